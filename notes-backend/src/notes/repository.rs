//! Durable store contract consumed by `NoteStore`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::Note;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("note {0} does not exist")]
    NotFound(String),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("store task failed: {0}")]
    Task(String),
}

/// Fields written by a partial update. `None` leaves the stored value as is.
#[derive(Debug, Clone)]
pub struct NoteUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait NoteRepository: Send + Sync {
    async fn create(&self, note: Note) -> Result<Note, StoreError>;

    async fn get_by_id(&self, id: &str) -> Result<Option<Note>, StoreError>;

    async fn list_all(&self) -> Result<Vec<Note>, StoreError>;

    /// Merge `fields` into the stored note and return the result.
    /// Fails with `StoreError::NotFound` if the note is gone.
    async fn update_partial(&self, id: &str, fields: NoteUpdate) -> Result<Note, StoreError>;

    async fn delete(&self, id: &str) -> Result<(), StoreError>;
}
