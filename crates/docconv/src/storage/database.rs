//! SQLite storage for session document records

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::repository::{DocumentRepository, RecordUpdate};
use crate::error::{Error, Result};
use crate::types::{ActiveQuality, DocumentConversionRecord, TrackStatus};

const SELECT_COLUMNS: &str = "id, session_id, filepath, \
    fast_status, fast_markdown_path, fast_extracted_at, fast_page_count, fast_char_count, fast_error, \
    hq_status, hq_markdown_path, hq_queued_at, hq_extracted_at, hq_page_count, hq_error, \
    active_quality, has_markdown, discovered_at";

/// SQLite-backed document collection
pub struct SessionDb {
    conn: Arc<Mutex<Connection>>,
}

impl SessionDb {
    /// Create or open the database at the given path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)
            .map_err(|e| Error::storage(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.migrate()?;
        Ok(db)
    }

    /// Create an in-memory database
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::storage(format!("Failed to open in-memory database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
        "#,
        )
        .map_err(|e| Error::storage(format!("Failed to set pragmas: {}", e)))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                session_id TEXT NOT NULL,
                id TEXT NOT NULL,
                filepath TEXT NOT NULL,
                fast_status TEXT NOT NULL,
                fast_markdown_path TEXT,
                fast_extracted_at TEXT,
                fast_page_count INTEGER,
                fast_char_count INTEGER,
                fast_error TEXT,
                hq_status TEXT NOT NULL,
                hq_markdown_path TEXT,
                hq_queued_at TEXT,
                hq_extracted_at TEXT,
                hq_page_count INTEGER,
                hq_error TEXT,
                active_quality TEXT NOT NULL,
                has_markdown INTEGER NOT NULL DEFAULT 0,
                discovered_at TEXT NOT NULL,
                PRIMARY KEY (session_id, id)
            );

            CREATE INDEX IF NOT EXISTS idx_documents_session ON documents(session_id);
        "#,
        )
        .map_err(|e| Error::storage(format!("Failed to create tables: {}", e)))?;

        Ok(())
    }

    fn upsert(&self, record: &DocumentConversionRecord) -> Result<()> {
        upsert_row(&self.conn.lock(), record)
    }

    fn select_one(&self, session_id: &str, document_id: &str) -> Result<Option<DocumentConversionRecord>> {
        select_row(&self.conn.lock(), session_id, document_id)
    }

    /// Read, modify and write one record inside a single write transaction
    fn update_in_place(
        &self,
        session_id: &str,
        document_id: &str,
        update: RecordUpdate<'_>,
    ) -> Result<Option<DocumentConversionRecord>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let Some(mut record) = select_row(&tx, session_id, document_id)? else {
            return Ok(None);
        };
        update(&mut record);
        upsert_row(&tx, &record)?;
        tx.commit()?;
        Ok(Some(record))
    }

    fn select_session(&self, session_id: &str) -> Result<Vec<DocumentConversionRecord>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM documents WHERE session_id = ?1 ORDER BY discovered_at, filepath",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![session_id], RawRow::from_row)?;

        let mut records = Vec::new();
        for raw in rows {
            records.push(raw?.into_record()?);
        }
        Ok(records)
    }
}

fn upsert_row(conn: &Connection, record: &DocumentConversionRecord) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO documents (
            session_id, id, filepath,
            fast_status, fast_markdown_path, fast_extracted_at, fast_page_count, fast_char_count, fast_error,
            hq_status, hq_markdown_path, hq_queued_at, hq_extracted_at, hq_page_count, hq_error,
            active_quality, has_markdown, discovered_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
        ON CONFLICT(session_id, id) DO UPDATE SET
            filepath = excluded.filepath,
            fast_status = excluded.fast_status,
            fast_markdown_path = excluded.fast_markdown_path,
            fast_extracted_at = excluded.fast_extracted_at,
            fast_page_count = excluded.fast_page_count,
            fast_char_count = excluded.fast_char_count,
            fast_error = excluded.fast_error,
            hq_status = excluded.hq_status,
            hq_markdown_path = excluded.hq_markdown_path,
            hq_queued_at = excluded.hq_queued_at,
            hq_extracted_at = excluded.hq_extracted_at,
            hq_page_count = excluded.hq_page_count,
            hq_error = excluded.hq_error,
            active_quality = excluded.active_quality,
            has_markdown = excluded.has_markdown
        "#,
        params![
            record.session_id,
            record.id,
            path_to_sql(Some(&record.filepath)),
            record.fast_status.as_str(),
            path_to_sql(record.fast_markdown_path.as_deref()),
            record.fast_extracted_at.map(timestamp_to_sql),
            record.fast_page_count,
            record.fast_char_count.map(|c| c as i64),
            record.fast_error,
            record.hq_status.as_str(),
            path_to_sql(record.hq_markdown_path.as_deref()),
            record.hq_queued_at.map(timestamp_to_sql),
            record.hq_extracted_at.map(timestamp_to_sql),
            record.hq_page_count,
            record.hq_error,
            record.active_quality.as_str(),
            record.has_markdown,
            timestamp_to_sql(record.discovered_at),
        ],
    )?;
    Ok(())
}

fn select_row(
    conn: &Connection,
    session_id: &str,
    document_id: &str,
) -> Result<Option<DocumentConversionRecord>> {
    let sql = format!(
        "SELECT {} FROM documents WHERE session_id = ?1 AND id = ?2",
        SELECT_COLUMNS
    );
    let raw = conn
        .query_row(&sql, params![session_id, document_id], RawRow::from_row)
        .optional()?;
    raw.map(RawRow::into_record).transpose()
}

#[async_trait]
impl DocumentRepository for SessionDb {
    async fn get_document(
        &self,
        session_id: &str,
        document_id: &str,
    ) -> Result<Option<DocumentConversionRecord>> {
        self.select_one(session_id, document_id)
    }

    async fn list_documents(&self, session_id: &str) -> Result<Vec<DocumentConversionRecord>> {
        self.select_session(session_id)
    }

    async fn save_document(&self, record: &DocumentConversionRecord) -> Result<()> {
        self.upsert(record)
    }

    async fn update_document<'a>(
        &'a self,
        session_id: &'a str,
        document_id: &'a str,
        update: RecordUpdate<'a>,
    ) -> Result<Option<DocumentConversionRecord>> {
        self.update_in_place(session_id, document_id, update)
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

/// Column values as stored, before parsing enums and timestamps
struct RawRow {
    id: String,
    session_id: String,
    filepath: String,
    fast_status: String,
    fast_markdown_path: Option<String>,
    fast_extracted_at: Option<String>,
    fast_page_count: Option<u32>,
    fast_char_count: Option<i64>,
    fast_error: Option<String>,
    hq_status: String,
    hq_markdown_path: Option<String>,
    hq_queued_at: Option<String>,
    hq_extracted_at: Option<String>,
    hq_page_count: Option<u32>,
    hq_error: Option<String>,
    active_quality: String,
    has_markdown: bool,
    discovered_at: String,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            session_id: row.get(1)?,
            filepath: row.get(2)?,
            fast_status: row.get(3)?,
            fast_markdown_path: row.get(4)?,
            fast_extracted_at: row.get(5)?,
            fast_page_count: row.get(6)?,
            fast_char_count: row.get(7)?,
            fast_error: row.get(8)?,
            hq_status: row.get(9)?,
            hq_markdown_path: row.get(10)?,
            hq_queued_at: row.get(11)?,
            hq_extracted_at: row.get(12)?,
            hq_page_count: row.get(13)?,
            hq_error: row.get(14)?,
            active_quality: row.get(15)?,
            has_markdown: row.get(16)?,
            discovered_at: row.get(17)?,
        })
    }

    fn into_record(self) -> Result<DocumentConversionRecord> {
        Ok(DocumentConversionRecord {
            id: self.id,
            session_id: self.session_id,
            filepath: PathBuf::from(self.filepath),
            fast_status: self.fast_status.parse::<TrackStatus>()?,
            fast_markdown_path: self.fast_markdown_path.map(PathBuf::from),
            fast_extracted_at: parse_timestamp(self.fast_extracted_at)?,
            fast_page_count: self.fast_page_count,
            fast_char_count: self.fast_char_count.map(|c| c.max(0) as u64),
            fast_error: self.fast_error,
            hq_status: self.hq_status.parse::<TrackStatus>()?,
            hq_markdown_path: self.hq_markdown_path.map(PathBuf::from),
            hq_queued_at: parse_timestamp(self.hq_queued_at)?,
            hq_extracted_at: parse_timestamp(self.hq_extracted_at)?,
            hq_page_count: self.hq_page_count,
            hq_error: self.hq_error,
            active_quality: self.active_quality.parse::<ActiveQuality>()?,
            has_markdown: self.has_markdown,
            discovered_at: parse_timestamp(Some(self.discovered_at))?.unwrap_or_else(Utc::now),
        })
    }
}

fn path_to_sql(path: Option<&Path>) -> Option<String> {
    path.map(|p| p.to_string_lossy().into_owned())
}

/// Fixed-width UTC form so timestamps sort lexically
fn timestamp_to_sql(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|d| d.with_timezone(&Utc))
                .map_err(|e| Error::storage(format!("Invalid timestamp '{}': {}", s, e)))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::modify_document;

    #[tokio::test]
    async fn test_upsert_and_get() {
        let db = SessionDb::in_memory().unwrap();
        let record = DocumentConversionRecord::new("s1", "/docs/report.pdf", true).with_id("d1");
        db.save_document(&record).await.unwrap();

        let loaded = db.get_document("s1", "d1").await.unwrap().unwrap();
        assert_eq!(loaded.filepath, PathBuf::from("/docs/report.pdf"));
        assert_eq!(loaded.hq_status, TrackStatus::Pending);
        assert_eq!(loaded.active_quality, ActiveQuality::None);
        assert!(db.get_document("s1", "d2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_preserves_completed_fields() {
        let db = SessionDb::in_memory().unwrap();
        let record = DocumentConversionRecord::new("s1", "/docs/report.pdf", true).with_id("d1");
        db.save_document(&record).await.unwrap();

        let now = Utc::now();
        modify_document(&db, "s1", "d1", |r| {
            r.fast_status = TrackStatus::Complete;
            r.fast_markdown_path = Some(PathBuf::from("/md/d1.fast.md"));
            r.fast_extracted_at = Some(now);
            r.fast_page_count = Some(12);
            r.fast_char_count = Some(40_000);
            r.active_quality = ActiveQuality::Fast;
            r.has_markdown = true;
        })
        .await
        .unwrap();

        let loaded = db.get_document("s1", "d1").await.unwrap().unwrap();
        assert_eq!(loaded.fast_status, TrackStatus::Complete);
        assert_eq!(loaded.fast_page_count, Some(12));
        assert_eq!(loaded.fast_char_count, Some(40_000));
        assert_eq!(
            loaded.fast_extracted_at.map(|d| d.timestamp_millis()),
            Some(now.timestamp_millis())
        );
        assert_eq!(loaded.active_quality, ActiveQuality::Fast);
        assert!(loaded.has_markdown);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_updates_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(SessionDb::new(dir.path().join("sessions.db")).unwrap());
        let mut record = DocumentConversionRecord::new("s1", "/docs/report.pdf", true).with_id("d1");
        record.hq_page_count = Some(0);
        db.save_document(&record).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..40 {
            let db = db.clone();
            handles.push(tokio::spawn(async move {
                modify_document(db.as_ref(), "s1", "d1", |r| {
                    r.hq_page_count = r.hq_page_count.map(|n| n + 1);
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let loaded = db.get_document("s1", "d1").await.unwrap().unwrap();
        assert_eq!(loaded.hq_page_count, Some(40));
    }

    #[tokio::test]
    async fn test_update_missing_record() {
        let db = SessionDb::in_memory().unwrap();
        let updated = db
            .update_document("s1", "nope", Box::new(|r: &mut DocumentConversionRecord| r.hq_page_count = Some(1)))
            .await
            .unwrap();
        assert!(updated.is_none());
        assert!(db.get_document("s1", "nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_by_session() {
        let dir = tempfile::tempdir().unwrap();
        let db = SessionDb::new(dir.path().join("nested").join("sessions.db")).unwrap();

        db.save_document(&DocumentConversionRecord::new("s1", "/a.pdf", true))
            .await
            .unwrap();
        db.save_document(&DocumentConversionRecord::new("s1", "/b.md", false))
            .await
            .unwrap();
        db.save_document(&DocumentConversionRecord::new("s2", "/c.pdf", true))
            .await
            .unwrap();

        let s1 = db.list_documents("s1").await.unwrap();
        assert_eq!(s1.len(), 2);
        assert!(s1.iter().any(|d| d.hq_status == TrackStatus::NotApplicable));
        assert_eq!(db.list_documents("s3").await.unwrap().len(), 0);
    }
}
