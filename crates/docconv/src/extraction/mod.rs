//! Extraction capabilities for the fast and high-fidelity tracks
//!
//! The extraction algorithms themselves live outside this crate; the
//! scheduler only sees these traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;

/// Output of the fast extractor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FastExtraction {
    pub text: String,
    pub page_count: u32,
    pub char_count: u64,
}

/// Output of the high-fidelity extractor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HighFidelityExtraction {
    pub text: String,
    pub page_count: u32,
}

/// Cheap extraction run synchronously for every document
///
/// Implementations: plain text readers, PDF text-layer dumps.
#[async_trait]
pub trait FastExtractor: Send + Sync {
    async fn extract(&self, filepath: &Path) -> Result<FastExtraction>;

    /// Extractor name for logging
    fn name(&self) -> &str;
}

/// Expensive, memory-hungry extraction run in background jobs
#[async_trait]
pub trait HighFidelityExtractor: Send + Sync {
    async fn extract(&self, filepath: &Path) -> Result<HighFidelityExtraction>;

    /// Extractor name for logging
    fn name(&self) -> &str;
}
