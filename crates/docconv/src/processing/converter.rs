//! Per-document conversion capability injected into jobs

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;

use crate::error::Result;

/// Reports fractional progress (0.0 to 1.0) within the current document
#[derive(Clone)]
pub struct ProgressReporter {
    callback: Arc<dyn Fn(f64) + Send + Sync>,
}

impl ProgressReporter {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
        }
    }

    /// A reporter that discards updates
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    pub fn report(&self, fraction: f64) {
        (self.callback)(fraction.clamp(0.0, 1.0));
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ProgressReporter")
    }
}

/// Converts one document. Errors fail only that document.
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    async fn convert(&self, document_id: &str, progress: ProgressReporter) -> Result<()>;

    /// Called for each document a job ends without converting, after the job
    /// failed, was cancelled or panicked.
    async fn abandon(&self, _document_id: &str, _reason: &str) -> Result<()> {
        Ok(())
    }
}

/// Adapts a closure into a [`DocumentConverter`]
pub struct FnConverter<F> {
    f: F,
}

impl<F> FnConverter<F>
where
    F: Fn(String, ProgressReporter) -> BoxFuture<'static, Result<()>> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> DocumentConverter for FnConverter<F>
where
    F: Fn(String, ProgressReporter) -> BoxFuture<'static, Result<()>> + Send + Sync,
{
    async fn convert(&self, document_id: &str, progress: ProgressReporter) -> Result<()> {
        (self.f)(document_id.to_string(), progress).await
    }
}
