//! The dual-index write path and the per-source indexing run.
//!
//! Every [`PageUnit`] is written to both indexes under a content-derived
//! document id: metadata upsert, lexical delete-then-insert, chunk
//! delete-then-embed-then-insert. Re-running on the same unit converges to
//! the same end state.
//!
//! The recrawl policy gates whole sources: a source is re-ingested only when
//! it has never been crawled or its recrawl interval has elapsed. A due
//! source has all of its existing data deleted before the crawl starts;
//! there is no rollback, so a recrawl that fails midway can lose coverage
//! relative to skipping. That trade-off is inherited deliberately and logged.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::{Settings, Source};
use crate::crawler::{self, CrawlStats, PageSink, PageUnit};
use crate::embedding::{self, EmbeddingProvider};
use crate::store::{DocStore, DocumentRecord, LexicalEntry};
use crate::types::DocsError;

/// Deterministic document id: hex SHA-256 of the URL. Repeated ingestion of
/// the same URL always converges to the same identifier.
pub fn document_id(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Whether a source is due for (re)ingestion.
///
/// Never crawled: due. Interval of zero: index once, never refresh.
/// Otherwise due once the elapsed hours reach the interval.
pub fn needs_crawl(last_crawled_at: Option<i64>, recrawl_interval_hours: u64, now_ms: i64) -> bool {
    let Some(last) = last_crawled_at else {
        return true;
    };
    if recrawl_interval_hours == 0 {
        return false;
    }
    let elapsed_hours = (now_ms - last) as f64 / (1000.0 * 60.0 * 60.0);
    elapsed_hours >= recrawl_interval_hours as f64
}

/// Outcome of indexing one source.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexResult {
    pub source_name: String,
    pub status: IndexStatus,
    pub pages_processed: Option<usize>,
    pub errors: Option<usize>,
    pub message: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexStatus {
    Skipped,
    Crawled,
    Error,
}

/// Per-source readiness snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceStatus {
    pub name: String,
    pub page_count: usize,
    pub last_crawled: Option<i64>,
    pub needs_recrawl: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexerStatus {
    pub ready: bool,
    pub total_pages: usize,
    pub sources: Vec<SourceStatus>,
}

/// Writes page units to both indexes. Used as the crawl sink.
pub struct Indexer<'a> {
    store: &'a DocStore,
    embedder: &'a dyn EmbeddingProvider,
}

impl<'a> Indexer<'a> {
    pub fn new(store: &'a DocStore, embedder: &'a dyn EmbeddingProvider) -> Self {
        Self { store, embedder }
    }

    /// Indexes one page unit: metadata, lexical entry, semantic chunks.
    pub async fn index_unit(&self, unit: &PageUnit) -> Result<(), DocsError> {
        let doc_id = document_id(&unit.url);

        self.store
            .upsert_document(DocumentRecord {
                id: doc_id.clone(),
                url: unit.url.clone(),
                source_name: unit.source_name.clone(),
                title: unit.title.clone(),
                last_modified: Utc::now().timestamp_millis(),
            })
            .await?;

        self.store
            .replace_lexical(LexicalEntry {
                url: unit.url.clone(),
                title: unit.title.clone(),
                headings: unit.extract.headings.join(" . "),
                content: unit.extract.sparse_content.clone(),
            })
            .await?;

        self.store.delete_chunks(&doc_id).await?;
        if !unit.extract.chunks.is_empty() {
            let vectors = embedding::embed_or_zero(self.embedder, &unit.extract.chunks).await;
            let rows = unit
                .extract
                .chunks
                .iter()
                .cloned()
                .zip(vectors)
                .collect::<Vec<_>>();
            let count = rows.len();
            self.store.insert_chunks(&doc_id, rows).await?;
            debug!(url = %unit.url, chunks = count, "indexed semantic chunks");
        }

        Ok(())
    }
}

#[async_trait]
impl PageSink for Indexer<'_> {
    async fn accept(&mut self, unit: PageUnit) -> Result<(), DocsError> {
        self.index_unit(&unit).await
    }
}

/// Runs the indexer over every configured source, sequentially.
///
/// Sub-source failures are absorbed into the per-source counters; a failure
/// at the source level (store errors around the gate or the pre-delete)
/// yields an `Error` result for that source and the pass continues.
pub async fn run_indexer(
    store: &DocStore,
    embedder: &dyn EmbeddingProvider,
    client: &reqwest::Client,
    settings: &Settings,
    force: bool,
) -> Vec<IndexResult> {
    info!(sources = settings.sources.len(), force, "starting indexer");
    let mut results = Vec::with_capacity(settings.sources.len());

    for source in &settings.sources {
        let result = index_source(store, embedder, client, settings, source, force).await;
        match &result {
            Ok(result) => results.push(result.clone()),
            Err(err) => {
                warn!(source = %source.name, error = %err, "source indexing failed");
                results.push(IndexResult {
                    source_name: source.name.clone(),
                    status: IndexStatus::Error,
                    pages_processed: None,
                    errors: None,
                    message: Some(err.to_string()),
                });
            }
        }
    }

    match store.count_documents().await {
        Ok(total) => info!(total_pages = total, "indexer complete"),
        Err(err) => warn!(error = %err, "indexer complete, page count unavailable"),
    }
    results
}

async fn index_source(
    store: &DocStore,
    embedder: &dyn EmbeddingProvider,
    client: &reqwest::Client,
    settings: &Settings,
    source: &Source,
    force: bool,
) -> Result<IndexResult, DocsError> {
    let last = store.last_crawled_at(&source.name).await?;
    let due = force || needs_crawl(last, source.recrawl_interval_hours, Utc::now().timestamp_millis());

    if !due {
        let page_count = store.count_by_source(&source.name).await?;
        info!(source = %source.name, page_count, "skipping, already indexed");
        return Ok(IndexResult {
            source_name: source.name.clone(),
            status: IndexStatus::Skipped,
            pages_processed: None,
            errors: None,
            message: Some(format!("Already indexed with {page_count} pages")),
        });
    }

    let existing = store.count_by_source(&source.name).await?;
    if existing > 0 {
        // Prior data goes away before the recrawl begins; a run that fails
        // midway leaves the source with less coverage than skipping.
        warn!(source = %source.name, existing, "clearing previously indexed pages for recrawl");
        store.delete_source(&source.name).await?;
    }

    let mut sink = Indexer::new(store, embedder);
    let CrawlStats {
        pages_processed,
        errors,
    } = crawler::crawl_site(
        client,
        source,
        settings.crawl_max_pages,
        settings.crawl_max_depth,
        &mut sink,
    )
    .await;

    Ok(IndexResult {
        source_name: source.name.clone(),
        status: IndexStatus::Crawled,
        pages_processed: Some(pages_processed),
        errors: Some(errors),
        message: None,
    })
}

/// Readiness report over all configured sources.
pub async fn indexer_status(
    store: &DocStore,
    settings: &Settings,
) -> Result<IndexerStatus, DocsError> {
    let now = Utc::now().timestamp_millis();
    let mut sources = Vec::with_capacity(settings.sources.len());
    for source in &settings.sources {
        let page_count = store.count_by_source(&source.name).await?;
        let last_crawled = store.last_crawled_at(&source.name).await?;
        sources.push(SourceStatus {
            name: source.name.clone(),
            page_count,
            needs_recrawl: needs_crawl(last_crawled, source.recrawl_interval_hours, now),
            last_crawled,
        });
    }
    let total_pages = store.count_documents().await?;
    Ok(IndexerStatus {
        ready: total_pages > 0 && !sources.iter().any(|s| s.needs_recrawl && s.page_count == 0),
        total_pages,
        sources,
    })
}
