//! Shared conversion state
//!
//! The composition root builds one [`ConversionState`] per process. It owns
//! the job manager and hands out per-session processors.

use std::sync::Arc;

use crate::admission::{MemoryAdmission, MemoryProbe};
use crate::config::ConversionConfig;
use crate::error::Result;
use crate::extraction::{FastExtractor, HighFidelityExtractor};
use crate::processing::{
    get_conversion_status, ConversionStatus, DocumentProcessor, JobManager, JobManagerOptions,
};
use crate::storage::{DocumentRepository, MarkdownStore};

/// Process-wide conversion services
#[derive(Clone)]
pub struct ConversionState {
    inner: Arc<ConversionStateInner>,
}

struct ConversionStateInner {
    config: ConversionConfig,
    repo: Arc<dyn DocumentRepository>,
    fast: Arc<dyn FastExtractor>,
    hq: Arc<dyn HighFidelityExtractor>,
    markdown: MarkdownStore,
    jobs: JobManager,
}

impl ConversionState {
    /// Wire up the scheduler from configuration and collaborators
    pub fn new(
        config: ConversionConfig,
        repo: Arc<dyn DocumentRepository>,
        fast: Arc<dyn FastExtractor>,
        hq: Arc<dyn HighFidelityExtractor>,
        probe: Arc<dyn MemoryProbe>,
    ) -> Result<Self> {
        config.validate()?;

        tracing::info!(
            "Initializing conversion state (repository: {}, memory probe: {}, fast: {}, hq: {})",
            repo.name(),
            probe.name(),
            fast.name(),
            hq.name()
        );

        let admission = MemoryAdmission::from_config(probe, &config.memory);
        let jobs = JobManager::new(admission, JobManagerOptions::from_config(&config));
        let markdown = MarkdownStore::new(config.storage.markdown_dir.clone());
        tracing::info!(
            "Markdown output under {}; {:.1} GB required per high-fidelity document",
            markdown.root().display(),
            config.memory.required_gb
        );

        Ok(Self {
            inner: Arc::new(ConversionStateInner {
                config,
                repo,
                fast,
                hq,
                markdown,
                jobs,
            }),
        })
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.inner.config
    }

    pub fn repository(&self) -> &Arc<dyn DocumentRepository> {
        &self.inner.repo
    }

    pub fn jobs(&self) -> &JobManager {
        &self.inner.jobs
    }

    /// Processor bound to one session
    pub fn processor(&self, session_id: impl Into<String>) -> DocumentProcessor {
        DocumentProcessor::new(
            session_id,
            self.inner.repo.clone(),
            self.inner.fast.clone(),
            self.inner.hq.clone(),
            self.inner.markdown.clone(),
            self.inner.jobs.clone(),
            self.inner.config.tracks.hq_extensions.clone(),
        )
    }

    pub async fn conversion_status(&self, session_id: &str) -> Result<ConversionStatus> {
        get_conversion_status(
            self.inner.repo.as_ref(),
            Some(&self.inner.jobs),
            session_id,
            self.inner.config.jobs.per_file_estimate_secs,
        )
        .await
    }

    /// Drop finished jobs older than the configured retention
    pub fn cleanup_expired(&self) -> usize {
        self.inner
            .jobs
            .cleanup_completed(self.inner.config.jobs.retention())
    }
}
