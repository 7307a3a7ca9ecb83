//! Scope-bounded breadth-first crawling.
//!
//! A crawl run walks pages reachable from a seed URL through navigation-region
//! links, restricted to the seed's URL-path section. Each visited page yields
//! one [`PageUnit`] for the page itself plus one per distinct in-page anchor
//! section discovered in the navigation regions, so deep single-page docs
//! become independently retrievable.
//!
//! Failures are counted, never fatal: a run always completes with
//! [`CrawlStats`], possibly with degraded coverage.

use std::collections::{HashSet, VecDeque};
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::RegexSet;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{NavigationMode, Source};
use crate::extract::{self, PageExtract};
use crate::types::DocsError;

/// Parallel fetch ceiling. Politeness bound, not a throughput knob.
pub const CRAWL_CONCURRENCY: usize = 5;
/// Per-request timeout.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
/// Retries after the initial attempt of a page fetch.
pub const FETCH_RETRIES: usize = 2;
/// Sibling elements collected for an anchor section before giving up.
/// The only other stop condition is the next heading.
pub const ANCHOR_SIBLING_CAP: usize = 20;

const ANCHOR_SELECTORS: &[&str] = &["#toc a", ".toc a", ".table-of-contents a", r#"[id*="toc"] a"#];
const SIDEBAR_SELECTORS: &[&str] = &[
    "nav a",
    "aside a",
    ".sidebar a",
    r#"[role="navigation"] a"#,
    ".nav-sidebar a",
    ".docs-nav a",
    ".menu a",
    "#sidebar a",
];
const NAVBAR_SELECTORS: &[&str] = &[
    "header a",
    ".navbar a",
    ".nav a",
    ".header-nav a",
    ".top-nav a",
    r#"[role="navigation"] a"#,
];

static SKIP_PATTERNS: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"\.(jpg|jpeg|png|gif|svg|ico|webp)$",
        r"\.(css|js|json|xml|txt|pdf)$",
        r"\.(zip|tar|gz|rar)$",
        r"\.(woff|woff2|ttf|eot)$",
        r"\.(mp3|mp4|wav|avi)$",
        r"^/?_",
        r"/api/",
    ])
    .expect("skip patterns are valid regexes")
});

/// One indexable unit: a whole page or one anchor-addressable section of it.
#[derive(Clone, Debug)]
pub struct PageUnit {
    /// Canonical URL; anchor sections keep their `#fragment`.
    pub url: String,
    pub title: String,
    pub source_name: String,
    pub extract: PageExtract,
}

/// Outcome of one crawl run. There is no failure state, only degraded counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CrawlStats {
    pub pages_processed: usize,
    pub errors: usize,
}

/// Consumer of crawled page units, invoked in discovery order.
#[async_trait]
pub trait PageSink {
    async fn accept(&mut self, unit: PageUnit) -> Result<(), DocsError>;
}

/// Builds the shared HTTP client used for crawling and the read path.
pub fn http_client() -> Result<Client, DocsError> {
    Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()
        .map_err(|err| DocsError::Fetch(err.to_string()))
}

/// Crawls the section rooted at the source's seed URL, handing every page
/// unit to `sink` until the queue drains or `max_pages` fetches happened.
pub async fn crawl_site<S: PageSink + Send>(
    client: &Client,
    source: &Source,
    max_pages: usize,
    max_depth: usize,
    sink: &mut S,
) -> CrawlStats {
    let nav = nav_selector(source.navigation_mode);
    let mut stats = CrawlStats::default();
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<(Url, usize)> = VecDeque::new();

    let seed = match normalize_url(&source.seed_url, "") {
        Some(url) => url,
        None => {
            warn!(source = %source.name, "seed URL did not normalize, skipping crawl");
            stats.errors += 1;
            return stats;
        }
    };
    visited.insert(seed.to_string());
    queue.push_back((seed, 0));

    info!(source = %source.name, seed = %source.seed_url, "starting crawl");

    let mut fetched = 0usize;
    while !queue.is_empty() && fetched < max_pages {
        let take = CRAWL_CONCURRENCY
            .min(queue.len())
            .min(max_pages - fetched);
        let batch: Vec<(Url, usize)> = queue.drain(..take).collect();
        fetched += batch.len();

        let fetches = batch.into_iter().map(|(url, depth)| async move {
            let result = fetch_with_retry(client, &url).await;
            (url, depth, result)
        });
        let results = futures_util::future::join_all(fetches).await;

        for (url, depth, result) in results {
            let html = match result {
                Ok(html) => html,
                Err(err) => {
                    stats.errors += 1;
                    warn!(%url, error = %err, "request failed");
                    continue;
                }
            };

            // Parsing happens in this sync scope; scraper documents are not
            // Send and must be dropped before the next await.
            let parsed = parse_page(&html, &url, &nav, source, &mut visited);

            for unit in parsed.units {
                match sink.accept(unit).await {
                    Ok(()) => stats.pages_processed += 1,
                    Err(err) => {
                        stats.errors += 1;
                        warn!(%url, error = %err, "failed to index page unit");
                    }
                }
            }

            if depth < max_depth {
                for link in parsed.links {
                    let key = link.to_string();
                    if visited.contains(&key) {
                        continue;
                    }
                    if !should_visit(&link) || !in_same_section(&link, &source.seed_url) {
                        continue;
                    }
                    visited.insert(key);
                    queue.push_back((link, depth + 1));
                }
            }
        }
    }

    info!(
        source = %source.name,
        pages = stats.pages_processed,
        errors = stats.errors,
        "crawl complete"
    );
    stats
}

struct ParsedPage {
    units: Vec<PageUnit>,
    links: Vec<Url>,
}

fn parse_page(
    html: &str,
    url: &Url,
    nav: &Selector,
    source: &Source,
    visited: &mut HashSet<String>,
) -> ParsedPage {
    let doc = Html::parse_document(html);
    let title = extract::page_title(&doc);

    let mut units = vec![PageUnit {
        url: url.to_string(),
        title: title.clone(),
        source_name: source.name.clone(),
        extract: extract::extract(&doc, &title),
    }];

    let anchors = anchor_links(&doc, nav);
    for (anchor, link_text) in &anchors {
        let anchor_url = format!("{url}#{anchor}");
        if !visited.insert(anchor_url.clone()) {
            continue;
        }
        if let Some(fragment) = section_fragment(&doc, anchor) {
            let section = Html::parse_fragment(&fragment);
            units.push(PageUnit {
                url: anchor_url,
                title: link_text.clone(),
                source_name: source.name.clone(),
                extract: extract::extract(&section, link_text),
            });
        }
    }
    if !anchors.is_empty() {
        debug!(%url, anchors = anchors.len(), "discovered anchor sections");
    }

    let links = doc
        .select(nav)
        .filter_map(|a| a.value().attr("href"))
        .filter(|href| !href.starts_with('#'))
        .filter_map(|href| normalize_url(url, href))
        .filter(|link| link.host_str() == url.host_str())
        .collect();

    ParsedPage { units, links }
}

/// Distinct same-page anchors with non-empty link text, in document order.
fn anchor_links(doc: &Html, nav: &Selector) -> Vec<(String, String)> {
    let mut seen = HashSet::new();
    let mut anchors = Vec::new();
    for link in doc.select(nav) {
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        if !href.starts_with('#') || href.len() <= 1 {
            continue;
        }
        let text = extract::element_text(link);
        if text.is_empty() {
            continue;
        }
        let anchor = href[1..].to_string();
        if seen.insert(anchor.clone()) {
            anchors.push((anchor, text));
        }
    }
    anchors
}

/// Extracts the HTML for one anchor section: the target heading (if the
/// target is a heading) plus following sibling elements until the next
/// heading or [`ANCHOR_SIBLING_CAP`].
fn section_fragment(doc: &Html, anchor: &str) -> Option<String> {
    let target = doc
        .root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .find(|el| {
            el.value().attr("id") == Some(anchor) || el.value().attr("name") == Some(anchor)
        })?;

    let mut parts = Vec::new();
    let siblings = if is_heading(&target) {
        parts.push(target.html());
        target.next_siblings()
    } else {
        let parent = ElementRef::wrap(target.parent()?)?;
        parent.next_siblings()
    };

    let mut count = 0usize;
    for node in siblings {
        let Some(el) = ElementRef::wrap(node) else {
            continue;
        };
        if count >= ANCHOR_SIBLING_CAP || is_heading(&el) {
            break;
        }
        parts.push(el.html());
        count += 1;
    }

    if parts.is_empty() {
        None
    } else {
        Some(format!(r#"<div class="section">{}</div>"#, parts.join("")))
    }
}

fn is_heading(el: &ElementRef<'_>) -> bool {
    matches!(el.value().name(), "h1" | "h2" | "h3" | "h4" | "h5" | "h6")
}

/// Navigation link selector for the configured mode. Table-of-contents
/// selectors are always included.
fn nav_selector(mode: NavigationMode) -> Selector {
    let mut selectors: Vec<&str> = match mode {
        NavigationMode::Sidebar => SIDEBAR_SELECTORS.to_vec(),
        NavigationMode::Navbar => NAVBAR_SELECTORS.to_vec(),
        NavigationMode::Auto => {
            let mut all = SIDEBAR_SELECTORS.to_vec();
            all.extend_from_slice(NAVBAR_SELECTORS);
            all
        }
    };
    selectors.extend_from_slice(ANCHOR_SELECTORS);
    Selector::parse(&selectors.join(", ")).expect("navigation selectors are valid")
}

/// Resolves `href` against `base`, strips the fragment, and removes the
/// trailing slash on non-root paths.
pub fn normalize_url(base: &Url, href: &str) -> Option<Url> {
    let mut url = if href.is_empty() {
        base.clone()
    } else {
        base.join(href).ok()?
    };
    url.set_fragment(None);
    if url.path() != "/" && url.path().ends_with('/') {
        let trimmed = url.path().trim_end_matches('/').to_string();
        url.set_path(&trimmed);
    }
    Some(url)
}

/// False for asset, archive, font, media, API, and underscore-prefixed paths.
pub fn should_visit(url: &Url) -> bool {
    !SKIP_PATTERNS.is_match(&url.path().to_lowercase())
}

/// Containment rule: the candidate's path must share the seed's leading path
/// segments. The seed's last segment is a page within the section, not a
/// boundary, so a seed at `/docs/v2/start` scopes the crawl to `/docs/v2/`.
/// Comparison depth is capped at three segments.
pub fn in_same_section(candidate: &Url, seed: &Url) -> bool {
    let seed_segments: Vec<&str> = seed.path().split('/').filter(|s| !s.is_empty()).collect();
    let candidate_segments: Vec<&str> = candidate
        .path()
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    let depth = match seed_segments.len() {
        0 => 0,
        n => (n - 1).max(1).min(3),
    };
    (0..depth).all(|i| candidate_segments.get(i) == Some(&seed_segments[i]))
}

async fn fetch_with_retry(client: &Client, url: &Url) -> Result<String, DocsError> {
    let mut last_err = DocsError::Fetch(format!("no attempt made for {url}"));
    for attempt in 0..=FETCH_RETRIES {
        match fetch_once(client, url).await {
            Ok(body) => return Ok(body),
            Err(err) => {
                debug!(%url, attempt, error = %err, "fetch attempt failed");
                last_err = err;
            }
        }
    }
    Err(last_err)
}

async fn fetch_once(client: &Client, url: &Url) -> Result<String, DocsError> {
    let response = client.get(url.clone()).send().await?.error_for_status()?;
    Ok(response.text().await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    #[test]
    fn scope_shares_leading_segments_with_seed() {
        let seed = url("https://example.com/docs/v2/start");
        assert!(in_same_section(&url("https://example.com/docs/v2/page"), &seed));
        assert!(!in_same_section(&url("https://example.com/docs/v3/page"), &seed));
        assert!(!in_same_section(&url("https://example.com/blog/post"), &seed));
        // The seed itself and its section root stay in scope.
        assert!(in_same_section(&seed, &seed));
        assert!(in_same_section(&url("https://example.com/docs/v2"), &seed));
    }

    #[test]
    fn scope_depth_is_capped_at_three_segments() {
        let seed = url("https://example.com/a/b/c/d/e");
        // Only the first three segments must match.
        assert!(in_same_section(&url("https://example.com/a/b/c/other"), &seed));
        assert!(!in_same_section(&url("https://example.com/a/b/x/d/e"), &seed));
    }

    #[test]
    fn shallow_seed_uses_its_own_depth() {
        let seed = url("https://example.com/docs");
        assert!(in_same_section(&url("https://example.com/docs/anything/deep"), &seed));
        assert!(!in_same_section(&url("https://example.com/api/docs"), &seed));
    }

    #[test]
    fn skip_rules_reject_assets_and_api_paths() {
        assert!(!should_visit(&url("https://example.com/logo.PNG")));
        assert!(!should_visit(&url("https://example.com/styles.css")));
        assert!(!should_visit(&url("https://example.com/bundle.tar.gz")));
        assert!(!should_visit(&url("https://example.com/font.woff2")));
        assert!(!should_visit(&url("https://example.com/api/v1/users")));
        assert!(!should_visit(&url("https://example.com/_next/data")));
        assert!(should_visit(&url("https://example.com/docs/getting-started")));
    }

    #[test]
    fn normalization_strips_fragment_and_trailing_slash() {
        let base = url("https://example.com/docs/page");
        let normalized = normalize_url(&base, "/docs/other/#install").unwrap();
        assert_eq!(normalized.as_str(), "https://example.com/docs/other");
        // Root path keeps its slash.
        let root = normalize_url(&base, "/").unwrap();
        assert_eq!(root.as_str(), "https://example.com/");
    }

    #[test]
    fn anchor_section_includes_heading_and_stops_at_next() {
        let doc = Html::parse_document(
            "<body><nav><a href=\"#setup\">Setup</a></nav>\
             <h2 id=\"setup\">Setup</h2><p>step one</p><p>step two</p>\
             <h2 id=\"usage\">Usage</h2><p>not included</p></body>",
        );
        let fragment = section_fragment(&doc, "setup").unwrap();
        assert!(fragment.contains("Setup"));
        assert!(fragment.contains("step one"));
        assert!(fragment.contains("step two"));
        assert!(!fragment.contains("not included"));
    }

    #[test]
    fn anchor_section_caps_sibling_traversal() {
        let paragraphs: String = (0..30).map(|i| format!("<p>para {i}</p>")).collect();
        let doc = Html::parse_document(&format!(
            "<body><h2 id=\"long\">Long</h2>{paragraphs}</body>"
        ));
        let fragment = section_fragment(&doc, "long").unwrap();
        let collected = fragment.matches("<p>").count();
        assert_eq!(collected, ANCHOR_SIBLING_CAP);
    }

    #[test]
    fn anchor_target_by_name_walks_parent_siblings() {
        let doc = Html::parse_document(
            "<body><div><a name=\"legacy\"></a></div><p>legacy content here</p><h3>Stop</h3></body>",
        );
        let fragment = section_fragment(&doc, "legacy").unwrap();
        assert!(fragment.contains("legacy content here"));
        assert!(!fragment.contains("Stop"));
    }

    #[test]
    fn anchor_links_dedup_and_require_text() {
        let doc = Html::parse_document(
            "<body><nav>\
             <a href=\"#a\">First</a><a href=\"#a\">Dup</a>\
             <a href=\"#b\"></a><a href=\"#\">empty</a><a href=\"/page\">page</a>\
             <a href=\"#c\">Third</a></nav></body>",
        );
        let nav = nav_selector(NavigationMode::Auto);
        let anchors = anchor_links(&doc, &nav);
        let names: Vec<&str> = anchors.iter().map(|(a, _)| a.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
        assert_eq!(anchors[0].1, "First");
    }

    #[test]
    fn nav_selector_modes_parse() {
        // All three selector unions must be valid CSS lists.
        nav_selector(NavigationMode::Sidebar);
        nav_selector(NavigationMode::Navbar);
        nav_selector(NavigationMode::Auto);
    }
}
