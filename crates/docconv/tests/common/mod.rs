//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use docconv::admission::{FixedMemoryProbe, MemoryProbe};
use docconv::extraction::{
    FastExtraction, FastExtractor, HighFidelityExtraction, HighFidelityExtractor,
};
use docconv::storage::{DocumentRepository, InMemoryDocumentRepository};
use docconv::{ConversionConfig, ConversionJob, ConversionState, Error, JobManager, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Fast extractor that echoes the file name
pub struct EchoFast;

#[async_trait]
impl FastExtractor for EchoFast {
    async fn extract(&self, filepath: &Path) -> Result<FastExtraction> {
        let text = format!("fast:{}", filepath.display());
        Ok(FastExtraction {
            char_count: text.len() as u64,
            text,
            page_count: 1,
        })
    }

    fn name(&self) -> &str {
        "echo-fast"
    }
}

/// High-fidelity extractor failing for selected file names
#[derive(Default)]
pub struct ScriptedHq {
    pub failing: HashSet<String>,
}

impl ScriptedHq {
    pub fn failing(names: &[&str]) -> Self {
        Self {
            failing: names.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[async_trait]
impl HighFidelityExtractor for ScriptedHq {
    async fn extract(&self, filepath: &Path) -> Result<HighFidelityExtraction> {
        let name = filepath
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        if self.failing.contains(&name) {
            return Err(Error::extraction(name, "layout model crashed"));
        }
        Ok(HighFidelityExtraction {
            text: format!("hq:{}", filepath.display()),
            page_count: 4,
        })
    }

    fn name(&self) -> &str {
        "scripted-hq"
    }
}

pub struct Harness {
    pub state: ConversionState,
    pub repo: Arc<dyn DocumentRepository>,
    pub probe: Arc<FixedMemoryProbe>,
    pub dir: tempfile::TempDir,
}

pub fn config(markdown_dir: &Path, max_wait_secs: u64, poll_secs: u64) -> ConversionConfig {
    let mut config = ConversionConfig::default();
    config.storage.markdown_dir = markdown_dir.to_path_buf();
    config.memory.max_wait_secs = max_wait_secs;
    config.memory.poll_interval_secs = poll_secs;
    config
}

pub fn harness_with(
    repo: Arc<dyn DocumentRepository>,
    hq: ScriptedHq,
    available_gb: f64,
    dir: tempfile::TempDir,
) -> Harness {
    let probe = Arc::new(FixedMemoryProbe::new(available_gb));
    let dyn_probe: Arc<dyn MemoryProbe> = probe.clone();
    let state = ConversionState::new(
        config(dir.path(), 30, 10),
        repo.clone(),
        Arc::new(EchoFast),
        Arc::new(hq),
        dyn_probe,
    )
    .unwrap();
    Harness {
        state,
        repo,
        probe,
        dir,
    }
}

pub fn harness(hq: ScriptedHq, available_gb: f64) -> Harness {
    harness_with(
        Arc::new(InMemoryDocumentRepository::new()),
        hq,
        available_gb,
        tempfile::tempdir().unwrap(),
    )
}

pub fn paths(names: &[&str]) -> Vec<PathBuf> {
    names.iter().map(|n| PathBuf::from(format!("/inbox/{}", n))).collect()
}

/// Poll until the job finishes, checking the counter invariant on the way
pub async fn wait_for_job(jobs: &JobManager, job_id: &str) -> ConversionJob {
    loop {
        let job = jobs.get_job(job_id).unwrap();
        assert!(job.files_completed <= job.files_total);
        if job.is_terminal() {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
