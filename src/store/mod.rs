//! Persistence for document metadata and both retrieval indexes.
//!
//! Everything lives in one SQLite database: a `documents` metadata table, an
//! FTS5 `search_index` virtual table for lexical matching, and a sqlite-vec
//! `vec_chunks` vec0 virtual table for nearest-neighbor search. All write
//! paths are delete-then-insert so re-ingestion converges instead of
//! accumulating duplicates.

pub mod sqlite;

use serde::{Deserialize, Serialize};

pub use sqlite::DocStore;

/// Metadata row, one per indexed page unit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Deterministic content key: hex SHA-256 of the URL.
    pub id: String,
    pub url: String,
    pub source_name: String,
    pub title: String,
    /// Epoch milliseconds of the last (re)index.
    pub last_modified: i64,
}

/// Text fields handed to the lexical index, one-to-one with a document.
#[derive(Clone, Debug)]
pub struct LexicalEntry {
    pub url: String,
    pub title: String,
    /// Heading texts joined with `" . "`.
    pub headings: String,
    /// The sparse-content blob; see [`crate::extract`].
    pub content: String,
}

/// One lexical match with the engine's native rank and highlighted snippet.
#[derive(Clone, Debug)]
pub struct LexicalHit {
    pub title: String,
    pub url: String,
    /// FTS5 bm25 rank; lower is better.
    pub score: f64,
    pub snippet: String,
}

/// One nearest-neighbor chunk hit.
#[derive(Clone, Debug)]
pub struct KnnHit {
    pub doc_id: String,
    pub chunk_text: String,
    /// Cosine distance in [0, 2]; lower is closer.
    pub distance: f64,
}

/// Resolved metadata for a semantic hit.
#[derive(Clone, Debug)]
pub struct DocumentMeta {
    pub title: String,
    pub url: String,
}
