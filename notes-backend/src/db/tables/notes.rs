//! Notes table operations

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::Database;
use crate::models::Note;
use crate::notes::repository::{NoteRepository, NoteUpdate, StoreError};

const NOTE_COLUMNS: &str = "id, title, content, tags, created_at, updated_at";

/// Fixed-width RFC 3339 so lexical order matches chronological order.
fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{}': {}", raw, e)))
}

fn encode_tags(tags: Option<&Vec<String>>) -> Result<Option<String>, StoreError> {
    tags.map(|t| serde_json::to_string(t).map_err(|e| StoreError::Corrupt(e.to_string())))
        .transpose()
}

/// Raw row, decoded outside the rusqlite closure so errors stay typed.
struct NoteRow {
    id: String,
    title: String,
    content: String,
    tags: Option<String>,
    created_at: String,
    updated_at: String,
}

impl NoteRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            content: row.get(2)?,
            tags: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }

    fn into_note(self) -> Result<Note, StoreError> {
        let tags = match self.tags {
            Some(raw) => Some(
                serde_json::from_str(&raw)
                    .map_err(|e| StoreError::Corrupt(format!("bad tags for {}: {}", self.id, e)))?,
            ),
            None => None,
        };
        Ok(Note {
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
            id: self.id,
            title: self.title,
            content: self.content,
            tags,
        })
    }
}

impl Database {
    pub fn insert_note(&self, note: &Note) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO notes (id, title, content, tags, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                note.id,
                note.title,
                note.content,
                encode_tags(note.tags.as_ref())?,
                format_ts(&note.created_at),
                format_ts(&note.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_note(&self, id: &str) -> Result<Option<Note>, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM notes WHERE id = ?1", NOTE_COLUMNS),
                params![id],
                NoteRow::from_row,
            )
            .optional()?;
        row.map(NoteRow::into_note).transpose()
    }

    pub fn list_notes(&self) -> Result<Vec<Note>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM notes ORDER BY created_at ASC, id ASC",
            NOTE_COLUMNS
        ))?;
        let rows = stmt
            .query_map([], NoteRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(NoteRow::into_note).collect()
    }

    /// Merge the supplied fields in one transaction and return the stored row.
    pub fn update_note_fields(&self, id: &str, fields: &NoteUpdate) -> Result<Note, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "UPDATE notes SET
                title = COALESCE(?2, title),
                content = COALESCE(?3, content),
                tags = COALESCE(?4, tags),
                updated_at = ?5
             WHERE id = ?1",
            params![
                id,
                fields.title,
                fields.content,
                encode_tags(fields.tags.as_ref())?,
                format_ts(&fields.updated_at),
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        let row = tx.query_row(
            &format!("SELECT {} FROM notes WHERE id = ?1", NOTE_COLUMNS),
            params![id],
            NoteRow::from_row,
        )?;
        tx.commit()?;
        row.into_note()
    }

    pub fn delete_note(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let count = conn.execute("DELETE FROM notes WHERE id = ?1", params![id])?;
        if count == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl NoteRepository for Database {
    async fn create(&self, note: Note) -> Result<Note, StoreError> {
        self.run_blocking(move |db| {
            db.insert_note(&note)?;
            Ok(note)
        })
        .await
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Note>, StoreError> {
        let id = id.to_string();
        self.run_blocking(move |db| db.get_note(&id)).await
    }

    async fn list_all(&self) -> Result<Vec<Note>, StoreError> {
        self.run_blocking(|db| db.list_notes()).await
    }

    async fn update_partial(&self, id: &str, fields: NoteUpdate) -> Result<Note, StoreError> {
        let id = id.to_string();
        self.run_blocking(move |db| db.update_note_fields(&id, &fields)).await
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let id = id.to_string();
        self.run_blocking(move |db| db.delete_note(&id)).await
    }
}
