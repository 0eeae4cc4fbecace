//! Note domain: the durable store contract and the cached `NoteStore`.

pub mod repository;
pub mod store;

pub use store::NoteStore;
