//! Storage for document records and extracted markdown
//!
//! Provides the repository interface plus SQLite and in-memory backends.

mod database;
mod markdown;
mod repository;

pub use database::SessionDb;
pub use markdown::MarkdownStore;
pub use repository::{
    modify_document, DocumentRepository, InMemoryDocumentRepository, RecordUpdate,
};
