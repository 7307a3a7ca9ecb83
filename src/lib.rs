//! ```text
//! Source list ──► indexer::run_indexer ──► crawler::crawl_site (BFS, same-section)
//!                        │                          │
//!                        │                          ├─► extract::PageExtract
//!                        │                          └─► anchor sub-sections
//!                        ▼
//!              dual write path per PageUnit
//!                ├─► store (documents + FTS5 search_index)
//!                └─► embedding batches ──► store (vec0 vec_chunks)
//!
//! Query ──► search::SearchOrchestrator ─┬─► FTS5 match
//!                                       └─► knn over vec0
//!                                       ──► RRF fusion ──► ranked results
//!
//! read_doc ──► content::PageReader (LRU + TTL cache, HTML ──► Markdown)
//! ```
//!
pub mod config;
pub mod content;
pub mod crawler;
pub mod embedding;
pub mod extract;
pub mod indexer;
pub mod search;
pub mod service;
pub mod store;
pub mod types;

pub use config::{NavigationMode, SearchMode, Settings, Source};
pub use service::DocsService;
pub use types::DocsError;
