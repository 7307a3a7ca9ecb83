//! End-to-end pipeline tests against a local mock documentation site:
//! crawl, dual indexing, anchor sections, recrawl gating, search modes, and
//! the cached read path.

use std::sync::Arc;

use async_trait::async_trait;
use httpmock::prelude::*;
use url::Url;

use docsmith::config::{NavigationMode, SearchMode, Settings, Source};
use docsmith::crawler::{self, PageSink, PageUnit};
use docsmith::embedding::MockEmbeddingProvider;
use docsmith::indexer::{self, IndexStatus, Indexer};
use docsmith::search::{ResultOrigin, SearchOrchestrator};
use docsmith::service::{DocsService, ReadDocRequest, SearchDocsRequest};
use docsmith::store::DocStore;
use docsmith::types::DocsError;

const DIMS: usize = 32;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

const INDEX_PAGE: &str = r#"<html><head><title>Acme Docs</title></head><body>
<nav class="sidebar">
  <a href="/docs/install">Install</a>
  <a href="/docs/config">Configuration</a>
</nav>
<main>
  <h1>Acme Documentation</h1>
  <p>Welcome to the Acme documentation portal for operators and integrators.</p>
</main>
</body></html>"#;

const INSTALL_PAGE: &str = r##"<html><head><title>Installing Acme</title></head><body>
<nav class="sidebar"><a href="/blog">Blog</a></nav>
<div class="toc"><a href="#troubleshooting">Troubleshooting installs</a></div>
<h1>Installing Acme</h1>
<p>Install the toolchain with the package manager of your platform.</p>
<h2 id="troubleshooting">Troubleshooting installs</h2>
<p>Clear the package cache when checksums fail during installation.</p>
</body></html>"##;

const CONFIG_PAGE: &str = r#"<html><head><title>Configuring Acme</title></head><body>
<nav class="sidebar"><a href="/docs">Home</a></nav>
<h1>Configuring Acme</h1>
<p>Configuration lives in environment variables read once at startup.</p>
</body></html>"#;

async fn mock_site() -> MockServer {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/docs");
            then.status(200).body(INDEX_PAGE);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/docs/install");
            then.status(200).body(INSTALL_PAGE);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/docs/config");
            then.status(200).body(CONFIG_PAGE);
        })
        .await;
    server
}

fn settings_for(seed: &str, recrawl_interval_hours: u64) -> Settings {
    Settings {
        sources: vec![Source {
            name: "acme".into(),
            seed_url: Url::parse(seed).unwrap(),
            navigation_mode: NavigationMode::Sidebar,
            recrawl_interval_hours,
        }],
        crawl_max_depth: 5,
        crawl_max_pages: 100,
        db_path: ":memory:".into(),
        search_mode: SearchMode::Hybrid,
        hybrid_lexical_weight: 0.4,
        embedding_dimensions: DIMS,
        cache_size: 10,
        cache_max_bytes: 1024 * 1024,
    }
}

struct CollectSink(Vec<PageUnit>);

#[async_trait]
impl PageSink for CollectSink {
    async fn accept(&mut self, unit: PageUnit) -> Result<(), DocsError> {
        self.0.push(unit);
        Ok(())
    }
}

#[tokio::test]
async fn page_with_one_toc_anchor_yields_two_units() {
    init_tracing();
    let server = mock_site().await;
    let settings = settings_for(&server.url("/docs/install"), 0);
    let client = crawler::http_client().unwrap();

    let mut sink = CollectSink(Vec::new());
    let stats = crawler::crawl_site(
        &client,
        &settings.sources[0],
        settings.crawl_max_pages,
        settings.crawl_max_depth,
        &mut sink,
    )
    .await;

    assert_eq!(stats.errors, 0);
    assert_eq!(stats.pages_processed, 2);
    assert_eq!(sink.0.len(), 2);
    assert_eq!(sink.0[0].title, "Installing Acme");
    assert!(sink.0[1].url.ends_with("/docs/install#troubleshooting"));
    assert_eq!(sink.0[1].title, "Troubleshooting installs");
    assert!(
        sink.0[1]
            .extract
            .chunks
            .iter()
            .any(|c| c.contains("package cache"))
    );
}

#[tokio::test]
async fn anchor_unit_is_independently_searchable_by_heading_text() {
    let server = mock_site().await;
    let settings = settings_for(&server.url("/docs/install"), 0);
    let store = DocStore::open_in_memory(DIMS).await.unwrap();
    let embedder = MockEmbeddingProvider::new(DIMS);
    let client = crawler::http_client().unwrap();

    let mut sink = Indexer::new(&store, &embedder);
    crawler::crawl_site(
        &client,
        &settings.sources[0],
        settings.crawl_max_pages,
        settings.crawl_max_depth,
        &mut sink,
    )
    .await;

    let hits = store.lexical_search("troubleshooting*", 10).await.unwrap();
    let urls: Vec<&str> = hits.iter().map(|h| h.url.as_str()).collect();
    assert_eq!(hits.len(), 2);
    assert!(urls.iter().any(|u| u.ends_with("/docs/install")));
    assert!(urls.iter().any(|u| u.ends_with("#troubleshooting")));
}

#[tokio::test]
async fn full_crawl_indexes_every_reachable_page() {
    let server = mock_site().await;
    let settings = settings_for(&server.url("/docs"), 24);
    let store = DocStore::open_in_memory(DIMS).await.unwrap();
    let embedder = MockEmbeddingProvider::new(DIMS);
    let client = crawler::http_client().unwrap();

    let results = indexer::run_indexer(&store, &embedder, &client, &settings, false).await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, IndexStatus::Crawled);
    // Index, install, config pages plus the install TOC anchor section.
    assert_eq!(results[0].pages_processed, Some(4));
    assert_eq!(results[0].errors, Some(0));

    let status = indexer::indexer_status(&store, &settings).await.unwrap();
    assert!(status.ready);
    assert_eq!(status.total_pages, 4);
    assert!(!status.sources[0].needs_recrawl);
}

#[tokio::test]
async fn second_run_is_skipped_until_forced() {
    let server = mock_site().await;
    let settings = settings_for(&server.url("/docs"), 24);
    let store = DocStore::open_in_memory(DIMS).await.unwrap();
    let embedder = MockEmbeddingProvider::new(DIMS);
    let client = crawler::http_client().unwrap();

    indexer::run_indexer(&store, &embedder, &client, &settings, false).await;
    let second = indexer::run_indexer(&store, &embedder, &client, &settings, false).await;
    assert_eq!(second[0].status, IndexStatus::Skipped);

    // Forcing re-ingests without accumulating duplicates.
    let forced = indexer::run_indexer(&store, &embedder, &client, &settings, true).await;
    assert_eq!(forced[0].status, IndexStatus::Crawled);
    assert_eq!(store.count_documents().await.unwrap(), 4);
}

#[tokio::test]
async fn hybrid_search_ranks_the_relevant_page_first() {
    let server = mock_site().await;
    let settings = settings_for(&server.url("/docs"), 0);
    let store = DocStore::open_in_memory(DIMS).await.unwrap();
    let embedder = Arc::new(MockEmbeddingProvider::new(DIMS));
    let client = crawler::http_client().unwrap();

    indexer::run_indexer(&store, embedder.as_ref(), &client, &settings, false).await;

    let orchestrator = SearchOrchestrator::new(
        store.clone(),
        embedder.clone(),
        SearchMode::Hybrid,
        0.4,
    );
    let hits = orchestrator.search("install toolchain package manager", 5).await;
    assert!(!hits.is_empty());
    assert!(hits[0].url.contains("/docs/install"));
    assert_eq!(hits[0].origin, ResultOrigin::Hybrid);
    assert!(hits[0].lexical_rank.is_some() || hits[0].semantic_rank.is_some());

    // Scores are sorted descending.
    for pair in hits.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[tokio::test]
async fn lexical_and_semantic_modes_answer_independently() {
    let server = mock_site().await;
    let settings = settings_for(&server.url("/docs"), 0);
    let store = DocStore::open_in_memory(DIMS).await.unwrap();
    let embedder = Arc::new(MockEmbeddingProvider::new(DIMS));
    let client = crawler::http_client().unwrap();

    indexer::run_indexer(&store, embedder.as_ref(), &client, &settings, false).await;

    let lexical =
        SearchOrchestrator::new(store.clone(), embedder.clone(), SearchMode::Lexical, 0.4);
    let hits = lexical.search("environment variables", 5).await;
    assert!(hits.iter().any(|h| h.url.ends_with("/docs/config")));
    assert!(hits.iter().all(|h| h.origin == ResultOrigin::Lexical));

    let semantic =
        SearchOrchestrator::new(store.clone(), embedder.clone(), SearchMode::Semantic, 0.4);
    let hits = semantic.search("environment variables at startup", 5).await;
    assert!(!hits.is_empty());
    assert!(hits.iter().all(|h| h.origin == ResultOrigin::Semantic));
    // One result per document even though a document may have many chunks.
    let mut urls: Vec<&str> = hits.iter().map(|h| h.url.as_str()).collect();
    urls.sort_unstable();
    urls.dedup();
    assert_eq!(urls.len(), hits.len());
}

#[tokio::test]
async fn service_read_doc_renders_markdown_and_caches() {
    let server = MockServer::start_async().await;
    let page = server
        .mock_async(|when, then| {
            when.method(GET).path("/docs/install");
            then.status(200).body(INSTALL_PAGE);
        })
        .await;

    let settings = settings_for(&server.url("/docs"), 0);
    let store = DocStore::open_in_memory(DIMS).await.unwrap();
    let service =
        DocsService::with_store(settings, store, Arc::new(MockEmbeddingProvider::new(DIMS)))
            .unwrap();

    let request = ReadDocRequest {
        url: server.url("/docs/install"),
        selector: None,
    };
    let markdown = service.read_doc(request.clone()).await.unwrap();
    assert!(markdown.contains("# Installing Acme"));
    assert!(markdown.contains("package manager"));
    // Navigation chrome is stripped.
    assert!(!markdown.contains("Blog"));

    // Repeat read is served from the cache.
    let again = service.read_doc(request).await.unwrap();
    assert_eq!(markdown, again);
    page.assert_hits_async(1).await;
}

#[tokio::test]
async fn service_search_over_indexed_site() {
    let server = mock_site().await;
    let settings = settings_for(&server.url("/docs"), 0);
    let store = DocStore::open_in_memory(DIMS).await.unwrap();
    let service = DocsService::with_store(
        settings,
        store,
        Arc::new(MockEmbeddingProvider::new(DIMS)),
    )
    .unwrap();

    let results = service.index(false).await;
    assert_eq!(results[0].status, IndexStatus::Crawled);

    let hits = service
        .search_docs(SearchDocsRequest {
            query: "troubleshooting checksums".into(),
            limit: Some(5),
        })
        .await
        .unwrap();
    assert!(!hits.is_empty());
    assert!(hits[0].url.contains("/docs/install"));
    assert!(!hits[0].snippet.is_empty());
}

#[tokio::test]
async fn index_survives_reopening_the_database() {
    init_tracing();
    let server = mock_site().await;
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("docs.db");
    let mut settings = settings_for(&server.url("/docs"), 24);
    settings.db_path = db_path.to_string_lossy().into_owned();
    let embedder = MockEmbeddingProvider::new(DIMS);
    let client = crawler::http_client().unwrap();

    {
        let store = DocStore::open(&db_path, DIMS).await.unwrap();
        let results = indexer::run_indexer(&store, &embedder, &client, &settings, false).await;
        assert_eq!(results[0].status, IndexStatus::Crawled);
    }

    let reopened = DocStore::open(&db_path, DIMS).await.unwrap();
    assert_eq!(reopened.count_documents().await.unwrap(), 4);
    let status = indexer::indexer_status(&reopened, &settings).await.unwrap();
    assert!(status.ready);
    let hits = reopened.lexical_search("install*", 10).await.unwrap();
    assert!(!hits.is_empty());
}

#[tokio::test]
async fn fetch_failures_degrade_to_counted_errors() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/docs");
            then.status(500);
        })
        .await;

    let settings = settings_for(&server.url("/docs"), 0);
    let client = crawler::http_client().unwrap();
    let mut sink = CollectSink(Vec::new());
    let stats = crawler::crawl_site(
        &client,
        &settings.sources[0],
        settings.crawl_max_pages,
        settings.crawl_max_depth,
        &mut sink,
    )
    .await;

    assert_eq!(stats.pages_processed, 0);
    assert_eq!(stats.errors, 1);
    assert!(sink.0.is_empty());
}
