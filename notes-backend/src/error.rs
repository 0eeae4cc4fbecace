//! Errors surfaced by the note and export operations.
//!
//! Cache failures never appear here: they are absorbed inside the cache
//! manager and logged.

use std::fmt;
use thiserror::Error;

use crate::notes::repository::StoreError;

/// Which step of an export failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStage {
    Render,
    Upload,
    Link,
}

impl ExportStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportStage::Render => "render",
            ExportStage::Upload => "upload",
            ExportStage::Link => "link_issuance",
        }
    }
}

impl fmt::Display for ExportStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum NotesError {
    #[error("Note not found: {0}")]
    NotFound(String),

    #[error("Invalid note input: {0}")]
    Validation(String),

    #[error("Note store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Export failed during {stage}: {reason}")]
    ExportFailed { stage: ExportStage, reason: String },
}

impl NotesError {
    pub fn export(stage: ExportStage, reason: impl fmt::Display) -> Self {
        NotesError::ExportFailed {
            stage,
            reason: reason.to_string(),
        }
    }
}

impl From<StoreError> for NotesError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => NotesError::NotFound(id),
            other => NotesError::StoreUnavailable(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, NotesError>;
