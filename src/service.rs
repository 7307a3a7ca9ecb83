//! The service registry: one shared instance per process wiring the store,
//! embedder, search orchestrator, and page reader together, plus the
//! request-validated operation surface.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;

use crate::config::Settings;
use crate::content::{PageContentCache, PageReader};
use crate::crawler;
use crate::embedding::EmbeddingProvider;
use crate::indexer::{self, IndexResult, IndexerStatus};
use crate::search::{SearchHit, SearchOrchestrator};
use crate::store::DocStore;
use crate::types::DocsError;

/// Inclusive bounds on the per-query result limit.
const LIMIT_MIN: usize = 1;
const LIMIT_MAX: usize = 50;
const LIMIT_DEFAULT: usize = 10;

/// A search request as received at the boundary.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchDocsRequest {
    pub query: String,
    pub limit: Option<usize>,
}

/// A page-read request as received at the boundary.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReadDocRequest {
    pub url: String,
    pub selector: Option<String>,
}

/// Long-lived service object owning every shared component. Constructed once
/// at startup; operations borrow it concurrently.
pub struct DocsService {
    settings: Settings,
    store: DocStore,
    embedder: Arc<dyn EmbeddingProvider>,
    orchestrator: SearchOrchestrator,
    reader: PageReader,
    client: reqwest::Client,
}

impl DocsService {
    /// Opens the store at the configured path and wires the components.
    pub async fn new(
        settings: Settings,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self, DocsError> {
        if let Some(parent) = std::path::Path::new(&settings.db_path).parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| DocsError::Storage(err.to_string()))?;
        }
        let store = DocStore::open(&settings.db_path, settings.embedding_dimensions).await?;
        Self::with_store(settings, store, embedder)
    }

    /// Wires the components over an already opened store.
    pub fn with_store(
        settings: Settings,
        store: DocStore,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self, DocsError> {
        let client = crawler::http_client()?;
        let orchestrator = SearchOrchestrator::new(
            store.clone(),
            Arc::clone(&embedder),
            settings.search_mode,
            settings.hybrid_lexical_weight as f64,
        );
        let cache = PageContentCache::new(settings.cache_size, settings.cache_max_bytes);
        let reader = PageReader::new(client.clone(), cache);
        info!(
            sources = settings.sources.len(),
            mode = ?settings.search_mode,
            db = %settings.db_path,
            "service ready"
        );
        Ok(Self {
            settings,
            store,
            embedder,
            orchestrator,
            reader,
            client,
        })
    }

    /// Crawls and indexes every configured source that is due. `force`
    /// re-ingests regardless of the recrawl policy.
    pub async fn index(&self, force: bool) -> Vec<IndexResult> {
        indexer::run_indexer(
            &self.store,
            self.embedder.as_ref(),
            &self.client,
            &self.settings,
            force,
        )
        .await
    }

    /// Readiness report over all configured sources.
    pub async fn status(&self) -> Result<IndexerStatus, DocsError> {
        indexer::indexer_status(&self.store, &self.settings).await
    }

    /// Searches the indexes. Validation failures error; engine failures do
    /// not, they degrade to fewer results.
    pub async fn search_docs(&self, request: SearchDocsRequest) -> Result<Vec<SearchHit>, DocsError> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(DocsError::InvalidRequest("query must not be empty".into()));
        }
        let limit = request.limit.unwrap_or(LIMIT_DEFAULT);
        if !(LIMIT_MIN..=LIMIT_MAX).contains(&limit) {
            return Err(DocsError::InvalidRequest(format!(
                "limit must be between {LIMIT_MIN} and {LIMIT_MAX}, got {limit}"
            )));
        }
        Ok(self.orchestrator.search(query, limit).await)
    }

    /// Fetches a live page and renders it to Markdown. Fetch failures are
    /// surfaced; the caller asked for this specific page.
    pub async fn read_doc(&self, request: ReadDocRequest) -> Result<String, DocsError> {
        let url = Url::parse(request.url.trim())
            .map_err(|err| DocsError::InvalidRequest(format!("invalid url: {err}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DocsError::InvalidRequest(format!(
                "unsupported url scheme '{}'",
                url.scheme()
            )));
        }
        self.reader
            .read(url.as_str(), request.selector.as_deref())
            .await
    }
}
