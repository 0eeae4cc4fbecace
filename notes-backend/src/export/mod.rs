//! Note → PDF export: render, upload, and hand back a time-limited link.

pub mod blob;
pub mod pool;
pub mod render;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub use blob::{BlobError, BlobStore, LinkError, LocalBlobStore, TimedLink};
pub use pool::{ChromiumFactory, RenderPool};

use crate::error::{ExportStage, NotesError, Result};
use crate::models::ExportResult;
use crate::notes::NoteStore;

pub const PDF_CONTENT_TYPE: &str = "application/pdf";

/// `notes/<id>-<millis>-<random>.pdf`
pub fn storage_key(note_id: &str, issued_at: &DateTime<Utc>) -> String {
    let nonce = Uuid::new_v4().simple().to_string();
    format!("notes/{}-{}-{}.pdf", note_id, issued_at.timestamp_millis(), &nonce[..12])
}

pub struct ExportPipeline {
    notes: Arc<NoteStore>,
    pool: Arc<RenderPool>,
    blobs: Arc<dyn BlobStore>,
    link_ttl: Duration,
}

impl ExportPipeline {
    pub fn new(notes: Arc<NoteStore>, pool: Arc<RenderPool>, blobs: Arc<dyn BlobStore>, link_ttl: Duration) -> Self {
        Self {
            notes,
            pool,
            blobs,
            link_ttl,
        }
    }

    pub fn pool(&self) -> &Arc<RenderPool> {
        &self.pool
    }

    pub async fn export_note(&self, id: &str) -> Result<ExportResult> {
        self.export_note_at(id, Utc::now()).await
    }

    /// Export with an explicit issuance instant. `issued_at` stamps the
    /// document and its storage key; `expires_at` is the instant signed into
    /// the link, so the link stops working exactly then.
    pub async fn export_note_at(&self, id: &str, issued_at: DateTime<Utc>) -> Result<ExportResult> {
        let note = self.notes.get(id).await?;

        let html = render::render_note_html(&note, issued_at);
        let pdf = self
            .pool
            .render(&html)
            .await
            .map_err(|e| failed(id, ExportStage::Render, e))?;

        let key = storage_key(&note.id, &issued_at);
        self.blobs
            .put(&key, pdf, PDF_CONTENT_TYPE)
            .await
            .map_err(|e| failed(id, ExportStage::Upload, e))?;

        let link = self
            .blobs
            .issue_timed_access_link(&key, self.link_ttl.as_secs())
            .await
            .map_err(|e| failed(id, ExportStage::Link, e))?;

        log::info!("[EXPORT] Exported note {} to {} (expires {})", id, key, link.expires_at);
        Ok(ExportResult {
            url: link.url,
            expires_at: link.expires_at,
        })
    }
}

fn failed(id: &str, stage: ExportStage, reason: impl std::fmt::Display) -> NotesError {
    log::error!("[EXPORT] Export of note {} failed during {}: {}", id, stage, reason);
    NotesError::export(stage, reason)
}
