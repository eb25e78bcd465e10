//! On-disk storage for extracted markdown

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::types::Quality;

/// Writes one markdown file per document and track under a root directory
#[derive(Debug, Clone)]
pub struct MarkdownStore {
    root: PathBuf,
}

impl MarkdownStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<session>/<document>.<quality>.md`
    pub fn path_for(&self, session_id: &str, document_id: &str, quality: Quality) -> PathBuf {
        self.root
            .join(sanitize(session_id))
            .join(format!("{}.{}.md", sanitize(document_id), quality))
    }

    /// Write text for a document track, returning where it went
    pub async fn write(
        &self,
        session_id: &str,
        document_id: &str,
        quality: Quality,
        text: &str,
    ) -> Result<PathBuf> {
        let path = self.path_for(session_id, document_id, quality);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, text).await?;
        Ok(path)
    }

    pub async fn read(&self, path: &Path) -> Result<String> {
        Ok(tokio::fs::read_to_string(path).await?)
    }
}

/// Keep ids from escaping the root directory
fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
