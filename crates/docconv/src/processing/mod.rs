//! Job scheduling and dual-track document processing

mod converter;
mod document_processor;
mod job_manager;
mod status;

pub use converter::{DocumentConverter, FnConverter, ProgressReporter};
pub use document_processor::{
    DocumentProcessor, FastExtractionSummary, MemoryWarning, QueueOutcome,
};
pub use job_manager::{JobManager, JobManagerOptions, QueueStats};
pub use status::{
    get_conversion_status, summarize, ConversionStatus, TrackCounts, FAST_WEIGHT, HQ_WEIGHT,
};
