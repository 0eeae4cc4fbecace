pub mod note;

pub use note::{ExportResult, NewNote, Note, NotePatch};
