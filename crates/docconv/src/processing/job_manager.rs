//! Job manager for background high-fidelity conversion
//!
//! Each job runs as its own tokio task and processes its documents strictly
//! in order. Jobs are in-memory only and do not survive a restart.

use chrono::Utc;
use dashmap::DashMap;
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::converter::{DocumentConverter, ProgressReporter};
use crate::admission::{MemoryAdmission, MemoryWaitObserver};
use crate::config::ConversionConfig;
use crate::error::{Error, Result};
use crate::types::{ConversionJob, DocumentFailure, JobStatus};

/// Scheduling parameters for the job manager
#[derive(Debug, Clone)]
pub struct JobManagerOptions {
    /// Memory each document needs before it may start, in GB
    pub memory_required_gb: f64,
    /// Assumed seconds per document before any has finished
    pub per_file_estimate_secs: f64,
    /// How long `cancel_job` waits for the job to stop
    pub cancel_grace: Duration,
}

impl JobManagerOptions {
    pub fn from_config(config: &ConversionConfig) -> Self {
        Self {
            memory_required_gb: config.memory.required_gb,
            per_file_estimate_secs: config.jobs.per_file_estimate_secs,
            cancel_grace: config.jobs.cancel_grace(),
        }
    }
}

struct JobEntry {
    job: ConversionJob,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

struct JobManagerInner {
    jobs: DashMap<String, JobEntry>,
    admission: MemoryAdmission,
    options: JobManagerOptions,
}

/// Registry and runner for conversion jobs.
///
/// Cheap to clone; clones share the same registry. Construct one per process
/// and hand it to whatever needs it.
#[derive(Clone)]
pub struct JobManager {
    inner: Arc<JobManagerInner>,
}

impl JobManager {
    pub fn new(admission: MemoryAdmission, options: JobManagerOptions) -> Self {
        Self {
            inner: Arc::new(JobManagerInner {
                jobs: DashMap::new(),
                admission,
                options,
            }),
        }
    }

    pub fn admission(&self) -> &MemoryAdmission {
        &self.inner.admission
    }

    pub fn options(&self) -> &JobManagerOptions {
        &self.inner.options
    }

    /// Register a pending job. Nothing runs until [`JobManager::start_job`].
    pub fn create_job(&self, session_id: &str, document_ids: Vec<String>) -> String {
        let job = ConversionJob::new(session_id, document_ids);
        let job_id = job.job_id.clone();
        tracing::info!(
            "Created job {} for session {} with {} documents",
            job_id,
            session_id,
            job.files_total
        );
        self.inner.jobs.insert(
            job_id.clone(),
            JobEntry {
                job,
                cancel: CancellationToken::new(),
                handle: None,
            },
        );
        job_id
    }

    /// Start a pending job in the background.
    ///
    /// Fails if the job does not exist, is not pending, or no tokio runtime
    /// is available.
    pub fn start_job(&self, job_id: &str, converter: Arc<dyn DocumentConverter>) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::internal(format!("No async runtime to run job {}: {}", job_id, e)))?;

        let cancel = {
            let mut entry = self
                .inner
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| Error::JobNotFound(job_id.to_string()))?;
            if entry.job.status != JobStatus::Pending {
                return Err(Error::InvalidJobState {
                    job_id: job_id.to_string(),
                    status: entry.job.status,
                });
            }
            entry.job.memory_required_gb = self.inner.options.memory_required_gb;
            entry.job.transition(JobStatus::Running);
            entry.cancel.clone()
        };

        tracing::info!("Starting job {}", job_id);
        let handle = runtime.spawn(JobManagerInner::run(
            self.inner.clone(),
            job_id.to_string(),
            converter,
            cancel,
        ));

        if let Some(mut entry) = self.inner.jobs.get_mut(job_id) {
            entry.handle = Some(handle);
        }
        Ok(())
    }

    pub fn get_job(&self, job_id: &str) -> Option<ConversionJob> {
        self.inner.jobs.get(job_id).map(|e| e.job.clone())
    }

    /// Jobs, optionally limited to one session, oldest first
    pub fn list_jobs(&self, session_id: Option<&str>) -> Vec<ConversionJob> {
        let mut jobs: Vec<ConversionJob> = self
            .inner
            .jobs
            .iter()
            .filter(|e| session_id.map_or(true, |s| e.job.session_id == s))
            .map(|e| e.job.clone())
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        jobs
    }

    /// Estimated seconds remaining for a job
    pub fn eta_seconds(&self, job_id: &str) -> Option<f64> {
        self.inner
            .jobs
            .get(job_id)
            .map(|e| e.job.eta_seconds(self.inner.options.per_file_estimate_secs))
    }

    /// Request cancellation and wait up to the grace period for the job to stop.
    ///
    /// Returns `false` for unknown or already finished jobs. Otherwise the job
    /// is reported cancelled once the grace period ends, even if its current
    /// document is still converting. A job that completes before it observes
    /// the request stays completed.
    pub async fn cancel_job(&self, job_id: &str) -> bool {
        let handle = {
            let Some(mut entry) = self.inner.jobs.get_mut(job_id) else {
                return false;
            };
            if entry.job.is_terminal() {
                return false;
            }
            entry.cancel.cancel();
            if entry.job.status == JobStatus::Pending {
                entry.job.transition(JobStatus::Cancelled);
                tracing::info!("Cancelled pending job {}", job_id);
                return true;
            }
            entry.handle.take()
        };

        if let Some(mut handle) = handle {
            let grace = self.inner.options.cancel_grace;
            match tokio::time::timeout(grace, &mut handle).await {
                Ok(_) => tracing::info!("Job {} stopped after cancellation", job_id),
                Err(_) => {
                    tracing::warn!(
                        "Job {} did not stop within {:.1}s of cancellation; marking cancelled",
                        job_id,
                        grace.as_secs_f64()
                    );
                    if let Some(mut entry) = self.inner.jobs.get_mut(job_id) {
                        entry.handle = Some(handle);
                    }
                }
            }
        }

        self.inner.finish(job_id, JobStatus::Cancelled, None);
        true
    }

    /// Drop finished jobs at least `max_age` old. Active jobs are never removed.
    pub fn cleanup_completed(&self, max_age: Duration) -> usize {
        let now = Utc::now();
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let mut removed = 0;

        self.inner.jobs.retain(|_, entry| {
            let expired = entry
                .job
                .age_since_finished(now)
                .is_some_and(|age| age >= max_age);
            if expired {
                removed += 1;
            }
            !expired
        });

        if removed > 0 {
            tracing::info!("Cleaned up {} finished jobs", removed);
        }
        removed
    }

    /// Job counts by status
    pub fn stats(&self) -> QueueStats {
        let mut stats = QueueStats::default();
        for entry in self.inner.jobs.iter() {
            stats.total_jobs += 1;
            match entry.job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::WaitingForMemory => stats.waiting_for_memory += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }
}

impl JobManagerInner {
    /// Apply `f` to a job that has not finished yet
    fn update_active<F>(&self, job_id: &str, f: F)
    where
        F: FnOnce(&mut ConversionJob),
    {
        if let Some(mut entry) = self.jobs.get_mut(job_id) {
            if !entry.job.is_terminal() {
                f(&mut entry.job);
            }
        }
    }

    /// Move a job to a terminal state unless it already reached one
    fn finish(&self, job_id: &str, status: JobStatus, error: Option<String>) {
        if let Some(mut entry) = self.jobs.get_mut(job_id) {
            if entry.job.transition(status) {
                entry.job.error = error;
            } else {
                tracing::debug!(
                    "Job {} already {}, ignoring transition to {}",
                    job_id,
                    entry.job.status,
                    status
                );
            }
        }
    }

    /// Task body: run the document loop and record how it ended
    async fn run(
        inner: Arc<JobManagerInner>,
        job_id: String,
        converter: Arc<dyn DocumentConverter>,
        cancel: CancellationToken,
    ) {
        let started = Instant::now();
        let mut attempted = 0usize;
        let outcome = AssertUnwindSafe(Self::process_documents(
            &inner,
            &job_id,
            converter.as_ref(),
            &cancel,
            &mut attempted,
        ))
        .catch_unwind()
        .await;

        let (status, error) = match outcome {
            Ok(Ok(())) => (JobStatus::Completed, None),
            Ok(Err(Error::Cancelled)) => (JobStatus::Cancelled, None),
            Ok(Err(e)) => {
                tracing::error!("Job {} failed: {}", job_id, e);
                (JobStatus::Failed, Some(e.to_string()))
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!("Job {} panicked: {}", job_id, message);
                (
                    JobStatus::Failed,
                    Some(format!("Job runner panicked: {}", message)),
                )
            }
        };

        // Released while the job is still live so a requeue cannot interleave
        if status != JobStatus::Completed {
            let reason = error
                .clone()
                .unwrap_or_else(|| "Conversion job was cancelled".to_string());
            Self::abandon_remaining(&inner, &job_id, converter.as_ref(), attempted, &reason).await;
        }

        inner.finish(&job_id, status, error);
        match status {
            JobStatus::Completed => tracing::info!(
                "Job {} completed in {:.1}s",
                job_id,
                started.elapsed().as_secs_f64()
            ),
            JobStatus::Cancelled => tracing::info!("Job {} cancelled", job_id),
            _ => {}
        }
    }

    /// Hand every document the job never finished back to the converter
    async fn abandon_remaining(
        inner: &JobManagerInner,
        job_id: &str,
        converter: &dyn DocumentConverter,
        attempted: usize,
        reason: &str,
    ) {
        let remaining: Vec<String> = match inner.jobs.get(job_id) {
            Some(entry) => entry.job.document_ids.iter().skip(attempted).cloned().collect(),
            None => return,
        };
        if remaining.is_empty() {
            return;
        }

        tracing::info!(
            "Job {}: releasing {} unconverted documents",
            job_id,
            remaining.len()
        );
        for document_id in &remaining {
            let released = AssertUnwindSafe(converter.abandon(document_id, reason))
                .catch_unwind()
                .await;
            match released {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!("Job {}: could not release {}: {}", job_id, document_id, e)
                }
                Err(_) => tracing::warn!("Job {}: releasing {} panicked", job_id, document_id),
            }
        }
    }

    async fn process_documents(
        inner: &Arc<JobManagerInner>,
        job_id: &str,
        converter: &dyn DocumentConverter,
        cancel: &CancellationToken,
        attempted: &mut usize,
    ) -> Result<()> {
        let document_ids = inner
            .jobs
            .get(job_id)
            .map(|e| e.job.document_ids.clone())
            .ok_or_else(|| Error::JobNotFound(job_id.to_string()))?;
        let total = document_ids.len();
        let tracker = JobMemoryTracker {
            inner: inner.clone(),
            job_id: job_id.to_string(),
        };

        for (index, document_id) in document_ids.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            inner.update_active(job_id, |job| job.current_file = Some(document_id.clone()));

            let check = inner
                .admission
                .wait_for_resource(&tracker, inner.options.memory_required_gb, cancel)
                .await?;
            inner.update_active(job_id, |job| job.memory_available_gb = check.available_gb);

            tracing::info!(
                "Job {}: converting {} ({}/{})",
                job_id,
                document_id,
                index + 1,
                total
            );
            let reporter = {
                let inner = inner.clone();
                let job_id = job_id.to_string();
                ProgressReporter::new(move |fraction| {
                    inner.update_active(&job_id, |job| {
                        job.record_progress((index as f64 + fraction) / total as f64)
                    })
                })
            };

            let doc_started = Instant::now();
            match converter.convert(document_id, reporter).await {
                Ok(()) => {
                    tracing::info!(
                        "Job {}: {} converted in {:.1}s",
                        job_id,
                        document_id,
                        doc_started.elapsed().as_secs_f64()
                    );
                    inner.update_active(job_id, |job| job.record_attempt(None));
                }
                Err(e) => {
                    tracing::warn!("Job {}: {} failed: {}", job_id, document_id, e);
                    inner.update_active(job_id, |job| {
                        job.record_attempt(Some(DocumentFailure {
                            document_id: document_id.clone(),
                            error: e.to_string(),
                        }))
                    });
                }
            }
            *attempted += 1;
        }

        Ok(())
    }
}

/// Mirrors memory-wait transitions onto a job record
struct JobMemoryTracker {
    inner: Arc<JobManagerInner>,
    job_id: String,
}

impl MemoryWaitObserver for JobMemoryTracker {
    fn wait_started(&self, available_gb: f64, required_gb: f64) {
        self.inner.update_active(&self.job_id, |job| {
            job.memory_available_gb = available_gb;
            job.memory_required_gb = required_gb;
            job.memory_wait_count += 1;
            job.transition(JobStatus::WaitingForMemory);
        });
    }

    fn memory_refreshed(&self, available_gb: f64) {
        self.inner
            .update_active(&self.job_id, |job| job.memory_available_gb = available_gb);
    }

    fn wait_finished(&self, available_gb: f64) {
        self.inner.update_active(&self.job_id, |job| {
            job.memory_available_gb = available_gb;
            job.transition(JobStatus::Running);
        });
    }
}

/// Job counts by status
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct QueueStats {
    pub total_jobs: usize,
    pub pending: usize,
    pub running: usize,
    pub waiting_for_memory: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}
