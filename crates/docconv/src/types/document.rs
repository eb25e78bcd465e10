//! Per-document conversion state for the fast and high-fidelity tracks

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Error;

/// Status of one extraction track for one document
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrackStatus {
    #[default]
    Pending,
    Queued,
    Converting,
    Complete,
    Failed,
    NotApplicable,
}

impl TrackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackStatus::Pending => "pending",
            TrackStatus::Queued => "queued",
            TrackStatus::Converting => "converting",
            TrackStatus::Complete => "complete",
            TrackStatus::Failed => "failed",
            TrackStatus::NotApplicable => "not_applicable",
        }
    }

    /// Queued or converting
    pub fn is_in_flight(&self) -> bool {
        matches!(self, TrackStatus::Queued | TrackStatus::Converting)
    }
}

impl fmt::Display for TrackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TrackStatus::Pending),
            "queued" => Ok(TrackStatus::Queued),
            "converting" => Ok(TrackStatus::Converting),
            "complete" => Ok(TrackStatus::Complete),
            "failed" => Ok(TrackStatus::Failed),
            "not_applicable" => Ok(TrackStatus::NotApplicable),
            other => Err(Error::storage(format!("unknown track status '{}'", other))),
        }
    }
}

/// One of the two extraction tracks
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Fast,
    Hq,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Fast => "fast",
            Quality::Hq => "hq",
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which extraction result is authoritative for a document
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ActiveQuality {
    Fast,
    Hq,
    #[default]
    None,
}

impl ActiveQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActiveQuality::Fast => "fast",
            ActiveQuality::Hq => "hq",
            ActiveQuality::None => "none",
        }
    }
}

impl FromStr for ActiveQuality {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fast" => Ok(ActiveQuality::Fast),
            "hq" => Ok(ActiveQuality::Hq),
            "none" => Ok(ActiveQuality::None),
            other => Err(Error::storage(format!("unknown active quality '{}'", other))),
        }
    }
}

/// Requested quality when reading document text
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum QualityPreference {
    /// High-fidelity if complete, otherwise fast
    #[default]
    Best,
    Fast,
    Hq,
}

impl FromStr for QualityPreference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "best" => Ok(QualityPreference::Best),
            "fast" => Ok(QualityPreference::Fast),
            "hq" => Ok(QualityPreference::Hq),
            other => Err(Error::Config(format!("unknown quality '{}'", other))),
        }
    }
}

/// Conversion state of one document in a session.
///
/// Owned by the session's document collection. Code that changes it must
/// re-read it through the repository first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentConversionRecord {
    pub id: String,
    pub session_id: String,
    pub filepath: PathBuf,

    pub fast_status: TrackStatus,
    pub fast_markdown_path: Option<PathBuf>,
    pub fast_extracted_at: Option<DateTime<Utc>>,
    pub fast_page_count: Option<u32>,
    pub fast_char_count: Option<u64>,
    pub fast_error: Option<String>,

    pub hq_status: TrackStatus,
    pub hq_markdown_path: Option<PathBuf>,
    pub hq_queued_at: Option<DateTime<Utc>>,
    pub hq_extracted_at: Option<DateTime<Utc>>,
    pub hq_page_count: Option<u32>,
    pub hq_error: Option<String>,

    pub active_quality: ActiveQuality,
    pub has_markdown: bool,
    pub discovered_at: DateTime<Utc>,
}

impl DocumentConversionRecord {
    /// A newly discovered document with both tracks pending
    pub fn new(session_id: impl Into<String>, filepath: impl Into<PathBuf>, hq_applicable: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            filepath: filepath.into(),
            fast_status: TrackStatus::Pending,
            fast_markdown_path: None,
            fast_extracted_at: None,
            fast_page_count: None,
            fast_char_count: None,
            fast_error: None,
            hq_status: if hq_applicable {
                TrackStatus::Pending
            } else {
                TrackStatus::NotApplicable
            },
            hq_markdown_path: None,
            hq_queued_at: None,
            hq_extracted_at: None,
            hq_page_count: None,
            hq_error: None,
            active_quality: ActiveQuality::None,
            has_markdown: false,
            discovered_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// File name for logging
    pub fn filename(&self) -> String {
        self.filepath
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.id.clone())
    }

    /// Whether the high-fidelity track may be queued for this document
    pub fn hq_eligible(&self) -> bool {
        matches!(self.hq_status, TrackStatus::Pending | TrackStatus::Failed)
    }

    pub fn status_for(&self, quality: Quality) -> TrackStatus {
        match quality {
            Quality::Fast => self.fast_status,
            Quality::Hq => self.hq_status,
        }
    }

    pub fn markdown_path_for(&self, quality: Quality) -> Option<&Path> {
        match quality {
            Quality::Fast => self.fast_markdown_path.as_deref(),
            Quality::Hq => self.hq_markdown_path.as_deref(),
        }
    }

    /// Track to read for the given preference, if any has usable output
    pub fn resolve_quality(&self, preference: QualityPreference) -> Option<Quality> {
        let complete = |q: Quality| self.status_for(q) == TrackStatus::Complete;
        match preference {
            QualityPreference::Best => {
                if complete(Quality::Hq) {
                    Some(Quality::Hq)
                } else if complete(Quality::Fast) {
                    Some(Quality::Fast)
                } else {
                    None
                }
            }
            QualityPreference::Fast => complete(Quality::Fast).then_some(Quality::Fast),
            QualityPreference::Hq => complete(Quality::Hq).then_some(Quality::Hq),
        }
    }
}

/// Whether a file type benefits from a high-fidelity pass
pub fn hq_applicable(path: &Path, hq_extensions: &[String]) -> bool {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    hq_extensions.iter().any(|e| e.eq_ignore_ascii_case(&extension))
}
