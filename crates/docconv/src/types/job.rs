//! Conversion job record and its state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle state of a conversion job
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    WaitingForMemory,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Completed, failed and cancelled jobs never change again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Pending, Running) => true,
            (Running, WaitingForMemory) | (WaitingForMemory, Running) => true,
            (WaitingForMemory, Failed) => true,
            (Running, Completed) | (Running, Failed) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::WaitingForMemory => "waiting_for_memory",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A document that was attempted but failed inside a job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentFailure {
    pub document_id: String,
    pub error: String,
}

/// One batch request to convert a set of documents through the
/// high-fidelity track.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionJob {
    pub job_id: String,
    /// Owning session
    pub session_id: String,
    /// Documents in processing order
    pub document_ids: Vec<String>,
    pub status: JobStatus,
    /// Fraction complete, 0.0 to 1.0
    pub progress: f64,
    pub current_file: Option<String>,
    /// Documents attempted so far, successful or not
    pub files_completed: usize,
    pub files_failed: usize,
    pub files_total: usize,
    pub failures: Vec<DocumentFailure>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Set while the job is blocked on memory admission
    pub memory_wait_started: Option<DateTime<Utc>>,
    pub memory_available_gb: f64,
    pub memory_required_gb: f64,
    /// Number of times the job has blocked on memory
    pub memory_wait_count: u32,
}

impl ConversionJob {
    /// Create a pending job for the given documents
    pub fn new(session_id: impl Into<String>, document_ids: Vec<String>) -> Self {
        let files_total = document_ids.len();
        Self {
            job_id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            document_ids,
            status: JobStatus::Pending,
            progress: 0.0,
            current_file: None,
            files_completed: 0,
            files_failed: 0,
            files_total,
            failures: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            memory_wait_started: None,
            memory_available_gb: 0.0,
            memory_required_gb: 0.0,
            memory_wait_count: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `next` if the state machine allows it.
    ///
    /// Returns `false` and leaves the job untouched otherwise, so the first
    /// terminal state reached wins.
    pub fn transition(&mut self, next: JobStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        match next {
            JobStatus::Running => {
                if self.started_at.is_none() {
                    self.started_at = Some(Utc::now());
                }
                self.memory_wait_started = None;
            }
            JobStatus::WaitingForMemory => {
                self.memory_wait_started = Some(Utc::now());
            }
            JobStatus::Completed => {
                self.progress = 1.0;
                self.finish();
            }
            JobStatus::Failed | JobStatus::Cancelled => self.finish(),
            JobStatus::Pending => {}
        }
        true
    }

    fn finish(&mut self) {
        self.completed_at = Some(Utc::now());
        self.current_file = None;
        self.memory_wait_started = None;
    }

    /// Raise progress, never lowering it
    pub fn record_progress(&mut self, progress: f64) {
        let clamped = progress.clamp(0.0, 1.0);
        if clamped > self.progress {
            self.progress = clamped;
        }
    }

    /// Count one document as attempted
    pub fn record_attempt(&mut self, failure: Option<DocumentFailure>) {
        if self.files_completed >= self.files_total {
            return;
        }
        self.files_completed += 1;
        if let Some(failure) = failure {
            self.files_failed += 1;
            self.failures.push(failure);
        }
        if self.files_total > 0 {
            self.record_progress(self.files_completed as f64 / self.files_total as f64);
        }
    }

    /// Seconds since the job started running
    pub fn elapsed_secs(&self) -> Option<f64> {
        let started = self.started_at?;
        let end = self.completed_at.unwrap_or_else(Utc::now);
        Some((end - started).num_milliseconds().max(0) as f64 / 1000.0)
    }

    /// Estimated seconds remaining.
    ///
    /// Before the first document finishes this is `files_total *
    /// per_file_estimate`; afterwards it is the observed mean time per
    /// document times the documents left. No smoothing is applied.
    pub fn eta_seconds(&self, per_file_estimate: f64) -> f64 {
        if self.is_terminal() {
            return 0.0;
        }
        match (self.files_completed, self.elapsed_secs()) {
            (0, _) | (_, None) => self.files_total as f64 * per_file_estimate,
            (done, Some(elapsed)) => {
                let remaining = self.files_total.saturating_sub(done);
                (elapsed / done as f64) * remaining as f64
            }
        }
    }

    /// Age used by retention cleanup
    pub fn age_since_finished(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        if !self.is_terminal() {
            return None;
        }
        Some(now - self.completed_at.unwrap_or(self.created_at))
    }
}
