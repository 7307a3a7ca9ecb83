//! On-demand page reading with an in-process content cache.
//!
//! Reading a page is independent of the crawl indexes: the page is fetched
//! live, stripped of navigation chrome, optionally narrowed to a CSS
//! selector, and rendered to Markdown. Rendered pages are cached per
//! `(url, selector)` with a TTL and an aggregate byte budget.

use std::num::NonZeroUsize;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use scraper::{Html, Selector};
use tracing::{debug, warn};

use crate::extract::markdown;
use crate::types::DocsError;

/// How long a cached rendering stays valid.
const CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// Page regions removed before rendering. Matches are detached from the DOM
/// so their text never reaches the Markdown output.
static CHROME_SELECTORS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    [
        "nav",
        "header",
        "footer",
        "aside",
        "script",
        "style",
        "noscript",
        "iframe",
        "img",
        "svg",
        "video",
        "audio",
        "canvas",
        ".sidebar",
        ".navigation",
        ".menu",
        ".toc",
        ".breadcrumb",
        ".breadcrumbs",
        ".edit-page",
        ".page-nav",
    ]
    .iter()
    .map(|s| Selector::parse(s).expect("valid chrome selector"))
    .collect()
});

/// Fallback content regions, tried in order when no selector is given or the
/// given selector matches nothing.
static CONTENT_SELECTORS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    [
        "main",
        "article",
        ".content",
        "#content",
        ".main-content",
        "[role=main]",
        "body",
    ]
    .iter()
    .map(|s| Selector::parse(s).expect("valid content selector"))
    .collect()
});

struct CachedPage {
    markdown: String,
    inserted: Instant,
}

struct CacheInner {
    entries: LruCache<String, CachedPage>,
    total_bytes: usize,
    max_bytes: usize,
}

/// LRU cache of rendered pages, bounded by entry count and total bytes.
pub struct PageContentCache {
    inner: Mutex<CacheInner>,
}

impl PageContentCache {
    pub fn new(capacity: usize, max_bytes: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(CacheInner {
                entries: LruCache::new(capacity),
                total_bytes: 0,
                max_bytes,
            }),
        }
    }

    fn key(url: &str, selector: Option<&str>) -> String {
        match selector {
            Some(selector) => format!("{url}:{selector}"),
            None => format!("{url}:__full__"),
        }
    }

    /// Returns the cached rendering, refreshing its recency. Expired entries
    /// are dropped on access.
    pub fn get(&self, url: &str, selector: Option<&str>) -> Option<String> {
        let key = Self::key(url, selector);
        let mut inner = self.inner.lock();
        let expired = inner
            .entries
            .peek(&key)
            .is_some_and(|page| page.inserted.elapsed() >= CACHE_TTL);
        if expired {
            if let Some(page) = inner.entries.pop(&key) {
                inner.total_bytes -= page.markdown.len();
            }
            return None;
        }
        inner.entries.get(&key).map(|page| page.markdown.clone())
    }

    pub fn put(&self, url: &str, selector: Option<&str>, markdown: String) {
        let key = Self::key(url, selector);
        let mut inner = self.inner.lock();
        if let Some(prev) = inner.entries.pop(&key) {
            inner.total_bytes -= prev.markdown.len();
        }
        inner.total_bytes += markdown.len();
        // The same-key case was popped above, so anything push returns is a
        // capacity evictee whose bytes must leave the total as well.
        if let Some((_, evicted)) = inner.entries.push(
            key,
            CachedPage {
                markdown,
                inserted: Instant::now(),
            },
        ) {
            inner.total_bytes -= evicted.markdown.len();
        }
        // Byte budget holds across entries; the least recently used go first.
        while inner.total_bytes > inner.max_bytes && inner.entries.len() > 1 {
            if let Some((_, page)) = inner.entries.pop_lru() {
                inner.total_bytes -= page.markdown.len();
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    #[cfg(test)]
    fn backdate(&self, url: &str, selector: Option<&str>, age: Duration) {
        let key = Self::key(url, selector);
        let mut inner = self.inner.lock();
        if let Some(page) = inner.entries.peek_mut(&key) {
            page.inserted = Instant::now() - age;
        }
    }
}

/// Fetches and renders live pages, serving repeat reads from the cache.
pub struct PageReader {
    client: reqwest::Client,
    cache: PageContentCache,
}

impl PageReader {
    pub fn new(client: reqwest::Client, cache: PageContentCache) -> Self {
        Self { client, cache }
    }

    /// Renders the page at `url` to Markdown, narrowed to `selector` when one
    /// is given. Fetch failures surface as [`DocsError::Fetch`]; an invalid
    /// selector is an [`DocsError::InvalidRequest`].
    pub async fn read(&self, url: &str, selector: Option<&str>) -> Result<String, DocsError> {
        if let Some(raw) = selector
            && Selector::parse(raw).is_err()
        {
            return Err(DocsError::InvalidRequest(format!(
                "invalid CSS selector '{raw}'"
            )));
        }

        if let Some(cached) = self.cache.get(url, selector) {
            debug!(%url, "serving page from cache");
            return Ok(cached);
        }

        let response = self.client.get(url).send().await?.error_for_status()?;
        let html = response.text().await?;

        let markdown = render_page(&html, selector);
        self.cache.put(url, selector, markdown.clone());
        Ok(markdown)
    }
}

/// Strips chrome and renders the selected region to Markdown. Parsing stays
/// in this sync scope; `scraper::Html` is not `Send`.
fn render_page(html: &str, selector: Option<&str>) -> String {
    let mut doc = Html::parse_document(html);

    for sel in CHROME_SELECTORS.iter() {
        let ids: Vec<_> = doc.select(sel).map(|el| el.id()).collect();
        for id in ids {
            if let Some(mut node) = doc.tree.get_mut(id) {
                node.detach();
            }
        }
    }

    if let Some(raw) = selector {
        if let Ok(sel) = Selector::parse(raw) {
            if let Some(el) = doc.select(&sel).next() {
                return markdown::element_to_markdown(el);
            }
            warn!(selector = raw, "selector matched nothing, falling back to main content");
        }
    }

    for sel in CONTENT_SELECTORS.iter() {
        if let Some(el) = doc.select(sel).next() {
            let rendered = markdown::element_to_markdown(el);
            if !rendered.trim().is_empty() {
                return rendered;
            }
        }
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><head><title>Guide</title></head><body>
        <nav><a href="/other">Other page</a></nav>
        <main>
            <h1>Guide</h1>
            <p>Main body text.</p>
            <div class="api"><code>fn run()</code></div>
        </main>
        <footer>Copyright</footer>
        </body></html>"#;

    #[test]
    fn render_strips_chrome_regions() {
        let md = render_page(PAGE, None);
        assert!(md.contains("# Guide"));
        assert!(md.contains("Main body text."));
        assert!(!md.contains("Other page"));
        assert!(!md.contains("Copyright"));
    }

    #[test]
    fn render_narrows_to_selector() {
        let md = render_page(PAGE, Some(".api"));
        assert!(md.contains("fn run()"));
        assert!(!md.contains("Main body text."));
    }

    #[test]
    fn missing_selector_falls_back_to_main_content() {
        let md = render_page(PAGE, Some(".does-not-exist"));
        assert!(md.contains("Main body text."));
    }

    #[test]
    fn cache_is_keyed_by_url_and_selector() {
        let cache = PageContentCache::new(10, 1024 * 1024);
        cache.put("https://e.com/a", None, "full".into());
        cache.put("https://e.com/a", Some(".api"), "narrowed".into());
        assert_eq!(cache.get("https://e.com/a", None).as_deref(), Some("full"));
        assert_eq!(
            cache.get("https://e.com/a", Some(".api")).as_deref(),
            Some("narrowed")
        );
        assert_eq!(cache.get("https://e.com/b", None), None);
    }

    #[test]
    fn expired_entries_miss_and_are_dropped() {
        let cache = PageContentCache::new(10, 1024);
        cache.put("https://e.com/a", None, "rendered".into());
        assert!(cache.get("https://e.com/a", None).is_some());

        cache.backdate("https://e.com/a", None, CACHE_TTL);
        assert_eq!(cache.get("https://e.com/a", None), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn byte_budget_evicts_least_recently_used() {
        let cache = PageContentCache::new(10, 100);
        cache.put("https://e.com/a", None, "x".repeat(60));
        cache.put("https://e.com/b", None, "y".repeat(60));
        // 120 bytes exceeds the budget; the older entry goes.
        assert_eq!(cache.get("https://e.com/a", None), None);
        assert!(cache.get("https://e.com/b", None).is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn capacity_eviction_releases_bytes_from_the_budget() {
        let cache = PageContentCache::new(2, 25);
        cache.put("https://e.com/a", None, "x".repeat(10));
        cache.put("https://e.com/b", None, "y".repeat(10));
        cache.put("https://e.com/c", None, "z".repeat(10));
        // The capacity bound evicted the oldest entry and its bytes with it;
        // the two survivors fit the budget, so neither is evicted again.
        assert_eq!(cache.get("https://e.com/a", None), None);
        assert!(cache.get("https://e.com/b", None).is_some());
        assert!(cache.get("https://e.com/c", None).is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn replacing_an_entry_does_not_double_count_bytes() {
        let cache = PageContentCache::new(10, 100);
        cache.put("https://e.com/a", None, "x".repeat(90));
        cache.put("https://e.com/a", None, "y".repeat(40));
        cache.put("https://e.com/b", None, "z".repeat(40));
        assert!(cache.get("https://e.com/a", None).is_some());
        assert!(cache.get("https://e.com/b", None).is_some());
    }
}
