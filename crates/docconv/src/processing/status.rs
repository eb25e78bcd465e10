//! Read-only conversion status for a session

use serde::Serialize;

use super::job_manager::JobManager;
use crate::error::Result;
use crate::storage::DocumentRepository;
use crate::types::{ConversionJob, DocumentConversionRecord, TrackStatus};

/// Share of a document's progress earned by the fast track alone
pub const FAST_WEIGHT: f64 = 0.3;
/// Share earned by the high-fidelity track
pub const HQ_WEIGHT: f64 = 0.7;

/// Number of documents in each state of one track
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct TrackCounts {
    pub pending: usize,
    pub queued: usize,
    pub converting: usize,
    pub complete: usize,
    pub failed: usize,
    pub not_applicable: usize,
}

impl TrackCounts {
    fn add(&mut self, status: TrackStatus) {
        match status {
            TrackStatus::Pending => self.pending += 1,
            TrackStatus::Queued => self.queued += 1,
            TrackStatus::Converting => self.converting += 1,
            TrackStatus::Complete => self.complete += 1,
            TrackStatus::Failed => self.failed += 1,
            TrackStatus::NotApplicable => self.not_applicable += 1,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.queued + self.converting
    }
}

/// Summary of a session's conversion state
#[derive(Debug, Clone, Serialize)]
pub struct ConversionStatus {
    pub session_id: String,
    pub total_documents: usize,
    pub fast: TrackCounts,
    pub hq: TrackCounts,
    /// 0.0 to 1.0
    pub overall_progress: f64,
    pub message: String,
    /// Newest unfinished high-fidelity job of the session
    pub active_job_id: Option<String>,
    pub eta_seconds: Option<f64>,
}

/// Progress one document contributes.
///
/// Documents with no high-fidelity pass are done once their fast text exists.
fn document_score(record: &DocumentConversionRecord) -> f64 {
    let fast_done = record.fast_status == TrackStatus::Complete;
    match record.hq_status {
        TrackStatus::Complete => FAST_WEIGHT + HQ_WEIGHT,
        TrackStatus::NotApplicable if fast_done => FAST_WEIGHT + HQ_WEIGHT,
        _ if fast_done => FAST_WEIGHT,
        _ => 0.0,
    }
}

/// Build the status projection from already loaded records
pub fn summarize(
    session_id: &str,
    records: &[DocumentConversionRecord],
    active_job: Option<&ConversionJob>,
    per_file_estimate_secs: f64,
) -> ConversionStatus {
    let mut fast = TrackCounts::default();
    let mut hq = TrackCounts::default();
    for record in records {
        fast.add(record.fast_status);
        hq.add(record.hq_status);
    }

    let total = records.len();
    let overall_progress = if total == 0 {
        0.0
    } else {
        records.iter().map(document_score).sum::<f64>() / total as f64
    };

    ConversionStatus {
        session_id: session_id.to_string(),
        total_documents: total,
        message: status_message(total, &fast, &hq),
        fast,
        hq,
        overall_progress,
        active_job_id: active_job.map(|job| job.job_id.clone()),
        eta_seconds: active_job.map(|job| job.eta_seconds(per_file_estimate_secs)),
    }
}

fn status_message(total: usize, fast: &TrackCounts, hq: &TrackCounts) -> String {
    let hq_total = total - hq.not_applicable;

    if total == 0 {
        "No documents in this session".to_string()
    } else if hq.in_flight() > 0 {
        format!(
            "High-fidelity conversion in progress: {} of {} documents done, {} remaining",
            hq.complete,
            hq_total,
            hq.in_flight()
        )
    } else if fast.pending > 0 {
        format!("Fast extraction pending for {} of {} documents", fast.pending, total)
    } else if hq.complete == hq_total {
        "All documents converted at full quality".to_string()
    } else if hq.failed > 0 {
        format!(
            "High-fidelity conversion failed for {} documents; fast text is used for them",
            hq.failed
        )
    } else {
        format!(
            "Fast text ready; {} documents can be upgraded with high-fidelity conversion",
            hq.pending
        )
    }
}

/// Load a session's records and summarize them.
///
/// `jobs` supplies the active job for ETA reporting; without it only
/// persisted state is used.
pub async fn get_conversion_status(
    repo: &dyn DocumentRepository,
    jobs: Option<&JobManager>,
    session_id: &str,
    per_file_estimate_secs: f64,
) -> Result<ConversionStatus> {
    let records = repo.list_documents(session_id).await?;
    let active_job = jobs.and_then(|jobs| {
        jobs.list_jobs(Some(session_id))
            .into_iter()
            .rev()
            .find(|job| !job.is_terminal())
    });
    Ok(summarize(
        session_id,
        &records,
        active_job.as_ref(),
        per_file_estimate_secs,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobStatus;

    fn record(fast: TrackStatus, hq: TrackStatus) -> DocumentConversionRecord {
        let mut record = DocumentConversionRecord::new("s1", "/in/doc.pdf", true);
        record.fast_status = fast;
        record.hq_status = hq;
        record
    }

    #[test]
    fn test_empty_session() {
        let status = summarize("s1", &[], None, 60.0);
        assert_eq!(status.overall_progress, 0.0);
        assert_eq!(status.message, "No documents in this session");
        assert!(status.eta_seconds.is_none());
    }

    #[test]
    fn test_weighted_progress() {
        let records = vec![
            record(TrackStatus::Complete, TrackStatus::Pending),
            record(TrackStatus::Complete, TrackStatus::Complete),
        ];
        let status = summarize("s1", &records, None, 60.0);
        assert_eq!(status.overall_progress, (1.0 * 0.3 + 1.0 * 1.0) / 2.0);
        assert_eq!(status.fast.complete, 2);
        assert_eq!(status.hq.pending, 1);
    }

    #[test]
    fn test_hq_complete_counts_fully_without_fast() {
        let records = vec![record(TrackStatus::Failed, TrackStatus::Complete)];
        assert_eq!(summarize("s1", &records, None, 60.0).overall_progress, 1.0);
    }

    #[test]
    fn test_not_applicable_counts_once_fast_done() {
        let records = vec![
            record(TrackStatus::Complete, TrackStatus::NotApplicable),
            record(TrackStatus::Pending, TrackStatus::NotApplicable),
        ];
        let status = summarize("s1", &records, None, 60.0);
        assert_eq!(status.overall_progress, 0.5);
    }

    #[test]
    fn test_messages() {
        let msg = |records: Vec<DocumentConversionRecord>| summarize("s1", &records, None, 60.0).message;

        assert!(msg(vec![record(TrackStatus::Complete, TrackStatus::Converting)])
            .starts_with("High-fidelity conversion in progress"));
        assert!(msg(vec![record(TrackStatus::Pending, TrackStatus::Pending)])
            .starts_with("Fast extraction pending"));
        assert_eq!(
            msg(vec![
                record(TrackStatus::Complete, TrackStatus::Complete),
                record(TrackStatus::Complete, TrackStatus::NotApplicable),
            ]),
            "All documents converted at full quality"
        );
        assert!(msg(vec![record(TrackStatus::Complete, TrackStatus::Failed)])
            .starts_with("High-fidelity conversion failed for 1"));
        assert!(msg(vec![record(TrackStatus::Complete, TrackStatus::Pending)])
            .starts_with("Fast text ready"));
    }

    #[test]
    fn test_active_job_eta() {
        let mut job = ConversionJob::new("s1", vec!["d1".to_string(), "d2".to_string()]);
        job.transition(JobStatus::Running);
        let records = vec![record(TrackStatus::Complete, TrackStatus::Queued)];

        let status = summarize("s1", &records, Some(&job), 90.0);
        assert_eq!(status.active_job_id.as_deref(), Some(job.job_id.as_str()));
        assert_eq!(status.eta_seconds, Some(180.0));
    }
}
