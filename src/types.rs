//! Crate-wide error type.

use thiserror::Error;

/// Errors surfaced by the crawling, indexing, and retrieval pipeline.
///
/// Most failure modes below the source level are absorbed into counters and
/// logs rather than propagated; see the per-module documentation for which
/// paths return these variants to the caller.
#[derive(Debug, Error)]
pub enum DocsError {
    /// Invalid or missing configuration. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// A network fetch failed. Only the read path surfaces this to callers.
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// A storage-engine operation failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// The embedding backend failed.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// A tool request failed boundary validation.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl From<tokio_rusqlite::Error> for DocsError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        DocsError::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for DocsError {
    fn from(err: reqwest::Error) -> Self {
        DocsError::Fetch(err.to_string())
    }
}
