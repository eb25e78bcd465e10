//! Core types for jobs and documents

pub mod document;
pub mod job;

pub use document::{
    hq_applicable, ActiveQuality, DocumentConversionRecord, Quality, QualityPreference,
    TrackStatus,
};
pub use job::{ConversionJob, DocumentFailure, JobStatus};
