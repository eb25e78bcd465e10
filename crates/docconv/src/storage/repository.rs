//! Repository interface for per-document conversion records

use async_trait::async_trait;
use dashmap::DashMap;
use std::path::Path;

use crate::error::{Error, Result};
use crate::types::DocumentConversionRecord;

/// In-place edit applied to a stored record
pub type RecordUpdate<'a> = Box<dyn FnOnce(&mut DocumentConversionRecord) + Send + 'a>;

/// Persisted document collection, keyed by session and document id.
///
/// This is the only channel between the conversion tracks and their callers:
/// background work writes here and callers read from here.
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    async fn get_document(
        &self,
        session_id: &str,
        document_id: &str,
    ) -> Result<Option<DocumentConversionRecord>>;

    /// All documents of a session in discovery order
    async fn list_documents(&self, session_id: &str) -> Result<Vec<DocumentConversionRecord>>;

    /// Insert or replace a record
    async fn save_document(&self, record: &DocumentConversionRecord) -> Result<()>;

    /// Apply `update` to the stored record atomically and return the result.
    ///
    /// No other write to the same record may land between the read and the
    /// write. Returns `None` when the record does not exist.
    async fn update_document<'a>(
        &'a self,
        session_id: &'a str,
        document_id: &'a str,
        update: RecordUpdate<'a>,
    ) -> Result<Option<DocumentConversionRecord>>;

    async fn find_by_path(
        &self,
        session_id: &str,
        filepath: &Path,
    ) -> Result<Option<DocumentConversionRecord>> {
        Ok(self
            .list_documents(session_id)
            .await?
            .into_iter()
            .find(|d| d.filepath == filepath))
    }

    /// Repository name for logging
    fn name(&self) -> &str;
}

/// Apply `f` to the current stored copy of a record in one atomic step.
///
/// Background code never mutates a record it read earlier; it always goes
/// through this function.
pub async fn modify_document<'a, F>(
    repo: &'a dyn DocumentRepository,
    session_id: &'a str,
    document_id: &'a str,
    f: F,
) -> Result<DocumentConversionRecord>
where
    F: FnOnce(&mut DocumentConversionRecord) + Send + 'a,
{
    repo.update_document(session_id, document_id, Box::new(f))
        .await?
        .ok_or_else(|| Error::DocumentNotFound(document_id.to_string()))
}

/// In-process document collection
#[derive(Default)]
pub struct InMemoryDocumentRepository {
    documents: DashMap<(String, String), DocumentConversionRecord>,
}

impl InMemoryDocumentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[async_trait]
impl DocumentRepository for InMemoryDocumentRepository {
    async fn get_document(
        &self,
        session_id: &str,
        document_id: &str,
    ) -> Result<Option<DocumentConversionRecord>> {
        let key = (session_id.to_string(), document_id.to_string());
        Ok(self.documents.get(&key).map(|r| r.value().clone()))
    }

    async fn list_documents(&self, session_id: &str) -> Result<Vec<DocumentConversionRecord>> {
        let mut records: Vec<_> = self
            .documents
            .iter()
            .filter(|e| e.key().0 == session_id)
            .map(|e| e.value().clone())
            .collect();
        records.sort_by(|a, b| {
            a.discovered_at
                .cmp(&b.discovered_at)
                .then_with(|| a.filepath.cmp(&b.filepath))
        });
        Ok(records)
    }

    async fn save_document(&self, record: &DocumentConversionRecord) -> Result<()> {
        let key = (record.session_id.clone(), record.id.clone());
        self.documents.insert(key, record.clone());
        Ok(())
    }

    async fn update_document<'a>(
        &'a self,
        session_id: &'a str,
        document_id: &'a str,
        update: RecordUpdate<'a>,
    ) -> Result<Option<DocumentConversionRecord>> {
        let key = (session_id.to_string(), document_id.to_string());
        // The shard stays write-locked until the clone is taken
        Ok(self.documents.get_mut(&key).map(|mut entry| {
            update(entry.value_mut());
            entry.value().clone()
        }))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TrackStatus;

    #[tokio::test]
    async fn test_save_and_get() {
        let repo = InMemoryDocumentRepository::new();
        let record = DocumentConversionRecord::new("s1", "/docs/a.pdf", true).with_id("d1");
        repo.save_document(&record).await.unwrap();

        let loaded = repo.get_document("s1", "d1").await.unwrap().unwrap();
        assert_eq!(loaded, record);
        assert!(repo.get_document("s2", "d1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_modify_reads_fresh_copy() {
        let repo = InMemoryDocumentRepository::new();
        let stale = DocumentConversionRecord::new("s1", "/docs/a.pdf", true).with_id("d1");
        repo.save_document(&stale).await.unwrap();

        // Someone else completes the fast track after our snapshot was taken
        modify_document(&repo, "s1", "d1", |r| r.fast_status = TrackStatus::Complete)
            .await
            .unwrap();

        let updated = modify_document(&repo, "s1", "d1", |r| r.hq_status = TrackStatus::Queued)
            .await
            .unwrap();

        assert_eq!(updated.fast_status, TrackStatus::Complete);
        assert_eq!(updated.hq_status, TrackStatus::Queued);
        assert_eq!(stale.fast_status, TrackStatus::Pending);
    }

    /// Delays reads so an unsynchronised read-modify-write would interleave
    struct SlowReads {
        inner: InMemoryDocumentRepository,
    }

    #[async_trait]
    impl DocumentRepository for SlowReads {
        async fn get_document(
            &self,
            session_id: &str,
            document_id: &str,
        ) -> Result<Option<DocumentConversionRecord>> {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            self.inner.get_document(session_id, document_id).await
        }

        async fn list_documents(&self, session_id: &str) -> Result<Vec<DocumentConversionRecord>> {
            self.inner.list_documents(session_id).await
        }

        async fn save_document(&self, record: &DocumentConversionRecord) -> Result<()> {
            self.inner.save_document(record).await
        }

        async fn update_document<'a>(
            &'a self,
            session_id: &'a str,
            document_id: &'a str,
            update: RecordUpdate<'a>,
        ) -> Result<Option<DocumentConversionRecord>> {
            self.inner.update_document(session_id, document_id, update).await
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    #[tokio::test]
    async fn test_concurrent_modifications_both_land() {
        let repo = SlowReads {
            inner: InMemoryDocumentRepository::new(),
        };
        let record = DocumentConversionRecord::new("s1", "/docs/a.pdf", true).with_id("d1");
        repo.save_document(&record).await.unwrap();

        let (fast, hq) = tokio::join!(
            modify_document(&repo, "s1", "d1", |r| r.fast_status = TrackStatus::Complete),
            modify_document(&repo, "s1", "d1", |r| r.hq_status = TrackStatus::Complete),
        );
        fast.unwrap();
        hq.unwrap();

        let stored = repo.get_document("s1", "d1").await.unwrap().unwrap();
        assert_eq!(stored.fast_status, TrackStatus::Complete);
        assert_eq!(stored.hq_status, TrackStatus::Complete);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_updates_are_not_lost() {
        let repo = std::sync::Arc::new(InMemoryDocumentRepository::new());
        let mut record = DocumentConversionRecord::new("s1", "/docs/a.pdf", true).with_id("d1");
        record.fast_page_count = Some(0);
        repo.save_document(&record).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..50 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                modify_document(repo.as_ref(), "s1", "d1", |r| {
                    r.fast_page_count = r.fast_page_count.map(|n| n + 1);
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let stored = repo.get_document("s1", "d1").await.unwrap().unwrap();
        assert_eq!(stored.fast_page_count, Some(50));
    }

    #[tokio::test]
    async fn test_modify_missing_document() {
        let repo = InMemoryDocumentRepository::new();
        let err = modify_document(&repo, "s1", "nope", |_| {}).await.unwrap_err();
        assert!(matches!(err, Error::DocumentNotFound(id) if id == "nope"));
    }

    #[tokio::test]
    async fn test_list_is_scoped_to_session() {
        let repo = InMemoryDocumentRepository::new();
        repo.save_document(&DocumentConversionRecord::new("s1", "/a.pdf", true))
            .await
            .unwrap();
        repo.save_document(&DocumentConversionRecord::new("s1", "/b.txt", false))
            .await
            .unwrap();
        repo.save_document(&DocumentConversionRecord::new("s2", "/c.pdf", true))
            .await
            .unwrap();

        assert_eq!(repo.list_documents("s1").await.unwrap().len(), 2);
        assert_eq!(repo.len(), 3);
        let found = repo.find_by_path("s1", Path::new("/b.txt")).await.unwrap();
        assert!(found.is_some());
    }
}
