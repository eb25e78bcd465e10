//! Dual-track document processing
//!
//! The fast track runs inline for every document. The high-fidelity track is
//! handed to the [`JobManager`] and reports back only through the document
//! repository.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::converter::{DocumentConverter, ProgressReporter};
use super::job_manager::JobManager;
use crate::error::{Error, Result};
use crate::extraction::{FastExtractor, HighFidelityExtractor};
use crate::storage::{modify_document, DocumentRepository, MarkdownStore};
use crate::types::{
    hq_applicable, ActiveQuality, DocumentConversionRecord, Quality, QualityPreference,
    TrackStatus,
};

/// Counts from one fast extraction pass
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct FastExtractionSummary {
    pub converted: usize,
    pub failed: usize,
    /// Already complete or unknown ids
    pub skipped: usize,
}

/// Returned instead of a job when memory is short and the caller did not force
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MemoryWarning {
    pub available_gb: f64,
    pub required_gb: f64,
    pub message: String,
}

/// Result of asking for high-fidelity conversion
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum QueueOutcome {
    Queued {
        job_id: String,
        document_ids: Vec<String>,
    },
    InsufficientMemory(MemoryWarning),
    /// No selected document needs a high-fidelity pass
    NothingToConvert,
}

/// Drives both extraction tracks for one session
pub struct DocumentProcessor {
    session_id: String,
    repo: Arc<dyn DocumentRepository>,
    fast: Arc<dyn FastExtractor>,
    hq: Arc<dyn HighFidelityExtractor>,
    markdown: MarkdownStore,
    jobs: JobManager,
    hq_extensions: Vec<String>,
}

impl DocumentProcessor {
    pub fn new(
        session_id: impl Into<String>,
        repo: Arc<dyn DocumentRepository>,
        fast: Arc<dyn FastExtractor>,
        hq: Arc<dyn HighFidelityExtractor>,
        markdown: MarkdownStore,
        jobs: JobManager,
        hq_extensions: Vec<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            repo,
            fast,
            hq,
            markdown,
            jobs,
            hq_extensions,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Create records for newly discovered files.
    ///
    /// Paths already known to the session return their existing record.
    pub async fn register_documents(
        &self,
        paths: &[PathBuf],
    ) -> Result<Vec<DocumentConversionRecord>> {
        let mut records = Vec::with_capacity(paths.len());
        for path in paths {
            if let Some(existing) = self.repo.find_by_path(&self.session_id, path).await? {
                records.push(existing);
                continue;
            }
            let record = DocumentConversionRecord::new(
                self.session_id.as_str(),
                path.clone(),
                hq_applicable(path, &self.hq_extensions),
            );
            self.repo.save_document(&record).await?;
            tracing::debug!(
                "Registered {} as {} (hq {})",
                record.filename(),
                record.id,
                record.hq_status
            );
            records.push(record);
        }
        Ok(records)
    }

    /// Run the fast extractor over documents whose fast track is not complete.
    ///
    /// `None` selects every document in the session. Never waits on memory.
    pub async fn run_fast_extraction(
        &self,
        document_ids: Option<&[String]>,
    ) -> Result<FastExtractionSummary> {
        let records = self.select(document_ids).await?;
        let mut summary = FastExtractionSummary::default();
        if let Some(ids) = document_ids {
            summary.skipped += ids.len().saturating_sub(records.len());
        }

        for record in records {
            if record.fast_status == TrackStatus::Complete {
                summary.skipped += 1;
                continue;
            }

            match self.extract_fast(&record).await {
                Ok(()) => summary.converted += 1,
                Err(e) => {
                    tracing::warn!("Fast extraction failed for {}: {}", record.filename(), e);
                    let message = e.to_string();
                    modify_document(self.repo.as_ref(), &self.session_id, &record.id, |r| {
                        r.fast_status = TrackStatus::Failed;
                        r.fast_error = Some(message);
                    })
                    .await?;
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            "Fast extraction for session {} ({}): {} converted, {} failed, {} skipped",
            self.session_id,
            self.fast.name(),
            summary.converted,
            summary.failed,
            summary.skipped
        );
        Ok(summary)
    }

    async fn extract_fast(&self, record: &DocumentConversionRecord) -> Result<()> {
        let extraction = self.fast.extract(&record.filepath).await?;
        let path = self
            .markdown
            .write(&self.session_id, &record.id, Quality::Fast, &extraction.text)
            .await?;

        modify_document(self.repo.as_ref(), &self.session_id, &record.id, |r| {
            r.fast_status = TrackStatus::Complete;
            r.fast_markdown_path = Some(path);
            r.fast_extracted_at = Some(Utc::now());
            r.fast_page_count = Some(extraction.page_count);
            r.fast_char_count = Some(extraction.char_count);
            r.fast_error = None;
            r.has_markdown = true;
            if r.hq_status != TrackStatus::Complete {
                r.active_quality = ActiveQuality::Fast;
            }
        })
        .await?;
        Ok(())
    }

    /// Queue eligible documents for high-fidelity conversion.
    ///
    /// Unless `force` is set, memory is checked first and a warning is
    /// returned without creating a job when it is short.
    pub async fn queue_hq_conversion(
        &self,
        document_ids: Option<&[String]>,
        force: bool,
    ) -> Result<QueueOutcome> {
        let in_active_jobs: HashSet<String> = self
            .jobs
            .list_jobs(Some(&self.session_id))
            .into_iter()
            .filter(|job| !job.is_terminal())
            .flat_map(|job| job.document_ids)
            .collect();

        // Queued or converting documents that no live job owns were left
        // behind by a restart or a runner that outlived its cancellation
        let eligible: Vec<String> = self
            .select(document_ids)
            .await?
            .into_iter()
            .filter(|r| {
                r.hq_eligible() || (r.hq_status.is_in_flight() && !in_active_jobs.contains(&r.id))
            })
            .map(|r| r.id)
            .collect();

        if eligible.is_empty() {
            tracing::debug!("No documents need high-fidelity conversion in {}", self.session_id);
            return Ok(QueueOutcome::NothingToConvert);
        }

        let required_gb = self.jobs.options().memory_required_gb;
        if !force {
            let check = self.jobs.admission().check(required_gb);
            if !check.is_available {
                tracing::warn!(
                    "Not queueing {} documents: {:.1} GB available, {:.1} GB required",
                    eligible.len(),
                    check.available_gb,
                    required_gb
                );
                return Ok(QueueOutcome::InsufficientMemory(MemoryWarning {
                    available_gb: check.available_gb,
                    required_gb,
                    message: format!(
                        "High-fidelity conversion needs {:.1} GB of free memory but only {:.1} GB is available. Close other applications or retry with force.",
                        required_gb, check.available_gb
                    ),
                }));
            }
        }

        let queued_at = Utc::now();
        for id in &eligible {
            modify_document(self.repo.as_ref(), &self.session_id, id, |r| {
                r.hq_status = TrackStatus::Queued;
                r.hq_queued_at = Some(queued_at);
                r.hq_error = None;
            })
            .await?;
        }

        let job_id = self.jobs.create_job(&self.session_id, eligible.clone());
        let converter = Arc::new(HqConverter {
            session_id: self.session_id.clone(),
            repo: self.repo.clone(),
            hq: self.hq.clone(),
            markdown: self.markdown.clone(),
        });
        self.jobs.start_job(&job_id, converter)?;

        tracing::info!(
            "Queued {} documents for high-fidelity conversion as job {}",
            eligible.len(),
            job_id
        );
        Ok(QueueOutcome::Queued {
            job_id,
            document_ids: eligible,
        })
    }

    /// Text of a document in the requested quality, with the quality used.
    ///
    /// `Best` prefers high-fidelity output and falls back to fast output.
    /// Returns `None` when the requested track has nothing to read.
    pub async fn get_document_text(
        &self,
        document_id: &str,
        preference: QualityPreference,
    ) -> Result<Option<(String, Quality)>> {
        let record = self
            .repo
            .get_document(&self.session_id, document_id)
            .await?
            .ok_or_else(|| Error::DocumentNotFound(document_id.to_string()))?;

        let Some(quality) = record.resolve_quality(preference) else {
            return Ok(None);
        };
        let Some(path) = record.markdown_path_for(quality) else {
            return Ok(None);
        };
        let text = self.markdown.read(path).await?;
        Ok(Some((text, quality)))
    }

    /// Session documents, limited to `document_ids` when given
    async fn select(&self, document_ids: Option<&[String]>) -> Result<Vec<DocumentConversionRecord>> {
        let records = self.repo.list_documents(&self.session_id).await?;
        let Some(ids) = document_ids else {
            return Ok(records);
        };

        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let selected: Vec<_> = records
            .into_iter()
            .filter(|r| wanted.contains(r.id.as_str()))
            .collect();
        if selected.len() < wanted.len() {
            tracing::warn!(
                "{} requested documents not found in session {}",
                wanted.len() - selected.len(),
                self.session_id
            );
        }
        Ok(selected)
    }
}

/// Per-document high-fidelity conversion run inside a job.
///
/// Holds identifiers and collaborators only; every record access re-reads
/// the repository.
struct HqConverter {
    session_id: String,
    repo: Arc<dyn DocumentRepository>,
    hq: Arc<dyn HighFidelityExtractor>,
    markdown: MarkdownStore,
}

impl HqConverter {
    async fn extract_and_store(
        &self,
        document_id: &str,
        filepath: &Path,
        progress: &ProgressReporter,
    ) -> Result<(PathBuf, u32)> {
        let extraction = self.hq.extract(filepath).await?;
        progress.report(0.8);
        let path = self
            .markdown
            .write(&self.session_id, document_id, Quality::Hq, &extraction.text)
            .await?;
        Ok((path, extraction.page_count))
    }
}

#[async_trait]
impl DocumentConverter for HqConverter {
    async fn convert(&self, document_id: &str, progress: ProgressReporter) -> Result<()> {
        let record = modify_document(self.repo.as_ref(), &self.session_id, document_id, |r| {
            r.hq_status = TrackStatus::Converting;
            r.hq_error = None;
        })
        .await?;
        progress.report(0.1);

        match self
            .extract_and_store(document_id, &record.filepath, &progress)
            .await
        {
            Ok((path, page_count)) => {
                modify_document(self.repo.as_ref(), &self.session_id, document_id, |r| {
                    r.hq_status = TrackStatus::Complete;
                    r.hq_markdown_path = Some(path);
                    r.hq_extracted_at = Some(Utc::now());
                    r.hq_page_count = Some(page_count);
                    r.hq_error = None;
                    r.has_markdown = true;
                    r.active_quality = ActiveQuality::Hq;
                })
                .await?;
                progress.report(1.0);
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                modify_document(self.repo.as_ref(), &self.session_id, document_id, |r| {
                    r.hq_status = TrackStatus::Failed;
                    r.hq_error = Some(message);
                })
                .await?;
                Err(e)
            }
        }
    }

    async fn abandon(&self, document_id: &str, reason: &str) -> Result<()> {
        let mut released = false;
        modify_document(self.repo.as_ref(), &self.session_id, document_id, |r| {
            if r.hq_status.is_in_flight() {
                r.hq_status = TrackStatus::Failed;
                r.hq_error = Some(reason.to_string());
                released = true;
            }
        })
        .await?;
        if released {
            tracing::debug!("Released {} from its job: {}", document_id, reason);
        }
        Ok(())
    }
}
