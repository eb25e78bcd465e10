//! docconv: memory-aware scheduling for dual-track document conversion
//!
//! Every document gets a cheap fast extraction right away. A slower,
//! memory-hungry high-fidelity extraction runs in background jobs that check
//! available memory before each document. Whichever result is best becomes
//! the document's active text.

pub mod admission;
pub mod config;
pub mod error;
pub mod extraction;
pub mod processing;
pub mod state;
pub mod storage;
pub mod types;

pub use config::ConversionConfig;
pub use error::{Error, Result};
pub use processing::{
    ConversionStatus, DocumentConverter, DocumentProcessor, JobManager, QueueOutcome,
};
pub use state::ConversionState;
pub use types::{
    ActiveQuality, ConversionJob, DocumentConversionRecord, JobStatus, Quality,
    QualityPreference, TrackStatus,
};
