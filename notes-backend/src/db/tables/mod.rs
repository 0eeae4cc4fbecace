//! `impl Database` blocks, one module per table.

mod notes;
