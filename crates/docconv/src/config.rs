//! Configuration for the conversion scheduler

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Main conversion configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConversionConfig {
    /// Memory admission configuration
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Job scheduling configuration
    #[serde(default)]
    pub jobs: JobConfig,
    /// Storage locations
    #[serde(default)]
    pub storage: StorageConfig,
    /// Track selection configuration
    #[serde(default)]
    pub tracks: TrackConfig,
}

impl ConversionConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        let config: ConversionConfig = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the scheduler cannot work with
    pub fn validate(&self) -> Result<()> {
        if !(self.memory.required_gb > 0.0) {
            return Err(Error::Config("memory.required_gb must be positive".to_string()));
        }
        if self.memory.poll_interval_secs == 0 {
            return Err(Error::Config("memory.poll_interval_secs must be positive".to_string()));
        }
        if self.memory.max_wait_secs < self.memory.poll_interval_secs {
            return Err(Error::Config(
                "memory.max_wait_secs must be at least one poll interval".to_string(),
            ));
        }
        if !(self.jobs.per_file_estimate_secs > 0.0) {
            return Err(Error::Config("jobs.per_file_estimate_secs must be positive".to_string()));
        }
        Ok(())
    }
}

/// Memory admission configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Memory the high-fidelity extractor needs per document, in GB (default: 8.0)
    #[serde(default = "default_required_gb")]
    pub required_gb: f64,
    /// Seconds between memory rechecks while waiting (default: 10)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Seconds to wait for memory before failing the job (default: 1800 = 30 minutes)
    #[serde(default = "default_max_wait")]
    pub max_wait_secs: u64,
}

fn default_required_gb() -> f64 { 8.0 }
fn default_poll_interval() -> u64 { 10 }
fn default_max_wait() -> u64 { 1800 }

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            required_gb: default_required_gb(),
            poll_interval_secs: default_poll_interval(),
            max_wait_secs: default_max_wait(),
        }
    }
}

impl MemoryConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }
}

/// Job scheduling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Assumed seconds per document before any document has finished (default: 120)
    #[serde(default = "default_per_file_estimate")]
    pub per_file_estimate_secs: f64,
    /// How long `cancel_job` waits for the job to acknowledge (default: 5)
    #[serde(default = "default_cancel_grace")]
    pub cancel_grace_secs: u64,
    /// Age after which finished jobs are dropped by cleanup (default: 3600)
    #[serde(default = "default_retention")]
    pub retention_secs: u64,
}

fn default_per_file_estimate() -> f64 { 120.0 }
fn default_cancel_grace() -> u64 { 5 }
fn default_retention() -> u64 { 3600 }

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            per_file_estimate_secs: default_per_file_estimate(),
            cancel_grace_secs: default_cancel_grace(),
            retention_secs: default_retention(),
        }
    }
}

impl JobConfig {
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

/// Storage locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for extracted markdown files
    #[serde(default = "default_markdown_dir")]
    pub markdown_dir: PathBuf,
    /// SQLite database holding session document records
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

fn default_markdown_dir() -> PathBuf {
    PathBuf::from("data").join("markdown")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data").join("sessions.db")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            markdown_dir: default_markdown_dir(),
            database_path: default_database_path(),
        }
    }
}

/// Which document kinds get a high-fidelity pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackConfig {
    /// File extensions for which the high-fidelity track adds value
    #[serde(default = "default_hq_extensions")]
    pub hq_extensions: Vec<String>,
}

fn default_hq_extensions() -> Vec<String> {
    ["pdf", "png", "jpg", "jpeg", "tif", "tiff"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for TrackConfig {
    fn default() -> Self {
        Self {
            hq_extensions: default_hq_extensions(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = ConversionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.memory.poll_interval(), Duration::from_secs(10));
        assert!(config.tracks.hq_extensions.contains(&"pdf".to_string()));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[memory]\nrequired_gb = 4.5\nmax_wait_secs = 30").unwrap();

        let config = ConversionConfig::from_file(file.path()).unwrap();
        assert_eq!(config.memory.required_gb, 4.5);
        assert_eq!(config.memory.max_wait_secs, 30);
        assert_eq!(config.memory.poll_interval_secs, 10);
        assert_eq!(config.jobs.cancel_grace_secs, 5);
    }

    #[test]
    fn test_validate_rejects_zero_poll_interval() {
        let mut config = ConversionConfig::default();
        config.memory.poll_interval_secs = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = ConversionConfig::from_file("/nonexistent/docconv.toml").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
