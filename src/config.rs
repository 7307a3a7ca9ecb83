//! Process configuration, parsed once at startup.
//!
//! All values come from the environment (a `.env` file is honored via
//! [`dotenvy`]). The source list is required; a missing or malformed
//! `SEED_URLS` is a fatal [`DocsError::Config`] so the process never serves
//! with an invalid source configuration.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::types::DocsError;

/// Which navigation regions of a page are scanned for links and anchors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NavigationMode {
    Sidebar,
    Navbar,
    Auto,
}

impl NavigationMode {
    fn parse(input: &str) -> Result<Self, DocsError> {
        match input {
            "sidebar" => Ok(Self::Sidebar),
            "navbar" => Ok(Self::Navbar),
            "auto" | "" => Ok(Self::Auto),
            other => Err(DocsError::Config(format!(
                "unknown navigation mode '{other}' (expected sidebar, navbar, or auto)"
            ))),
        }
    }
}

/// Process-wide search mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchMode {
    Lexical,
    Semantic,
    Hybrid,
}

impl SearchMode {
    fn parse(input: &str) -> Result<Self, DocsError> {
        match input {
            "LEXICAL_ONLY" => Ok(Self::Lexical),
            "SEMANTIC_ONLY" => Ok(Self::Semantic),
            "HYBRID" | "" => Ok(Self::Hybrid),
            other => Err(DocsError::Config(format!(
                "unknown search mode '{other}' (expected LEXICAL_ONLY, SEMANTIC_ONLY, or HYBRID)"
            ))),
        }
    }
}

/// One configured documentation site/section to crawl and index.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Source {
    pub name: String,
    pub seed_url: Url,
    pub navigation_mode: NavigationMode,
    /// Hours between re-crawls. 0 means index once and never refresh.
    pub recrawl_interval_hours: u64,
}

/// Immutable runtime settings.
#[derive(Clone, Debug)]
pub struct Settings {
    pub sources: Vec<Source>,
    pub crawl_max_depth: usize,
    pub crawl_max_pages: usize,
    pub db_path: String,
    pub search_mode: SearchMode,
    /// Weight of the lexical ranking in hybrid fusion; the semantic weight
    /// is `1.0 - hybrid_lexical_weight`.
    pub hybrid_lexical_weight: f32,
    pub embedding_dimensions: usize,
    pub cache_size: usize,
    pub cache_max_bytes: usize,
}

impl Settings {
    /// Loads settings from the process environment.
    pub fn from_env() -> Result<Self, DocsError> {
        let _ = dotenvy::dotenv();

        let seed_urls = std::env::var("SEED_URLS")
            .map_err(|_| DocsError::Config("SEED_URLS is required".into()))?;
        let sources = parse_sources(&seed_urls)?;

        let settings = Settings {
            sources,
            crawl_max_depth: env_parse("CRAWL_MAX_DEPTH", 5)?,
            crawl_max_pages: env_parse("CRAWL_MAX_PAGES", 1000)?,
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "./data/docsmith.db".into()),
            search_mode: SearchMode::parse(
                std::env::var("SEARCH_MODE").unwrap_or_default().trim(),
            )?,
            hybrid_lexical_weight: env_parse("HYBRID_LEXICAL_WEIGHT", 0.4_f32)?,
            embedding_dimensions: env_parse("EMBEDDING_DIMENSIONS", 384)?,
            cache_size: env_parse("CACHE_SIZE", 100)?,
            cache_max_bytes: env_parse("CACHE_MAX_BYTES", 100 * 1024 * 1024)?,
        };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), DocsError> {
        if self.sources.is_empty() {
            return Err(DocsError::Config("SEED_URLS contained no sources".into()));
        }
        if !(0.0..=1.0).contains(&self.hybrid_lexical_weight) {
            return Err(DocsError::Config(format!(
                "HYBRID_LEXICAL_WEIGHT must be in [0, 1], got {}",
                self.hybrid_lexical_weight
            )));
        }
        if self.embedding_dimensions == 0 {
            return Err(DocsError::Config("EMBEDDING_DIMENSIONS must be positive".into()));
        }
        Ok(())
    }
}

/// Parses the `name|url|mode|hours,name|url|mode|hours,...` source list.
pub fn parse_sources(input: &str) -> Result<Vec<Source>, DocsError> {
    input
        .split(',')
        .filter(|entry| !entry.trim().is_empty())
        .map(parse_source_entry)
        .collect()
}

fn parse_source_entry(entry: &str) -> Result<Source, DocsError> {
    let mut fields = entry.split('|');
    let name = fields
        .next()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| DocsError::Config(format!("source entry '{entry}' is missing a name")))?;
    let raw_url = fields
        .next()
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .ok_or_else(|| DocsError::Config(format!("source '{name}' is missing a seed URL")))?;
    let seed_url = Url::parse(raw_url)
        .map_err(|err| DocsError::Config(format!("source '{name}' has invalid URL: {err}")))?;
    let navigation_mode = NavigationMode::parse(fields.next().map(str::trim).unwrap_or(""))?;
    let recrawl_interval_hours = match fields.next().map(str::trim) {
        None | Some("") => 0,
        Some(raw) => raw.parse().map_err(|_| {
            DocsError::Config(format!(
                "source '{name}' has invalid recrawl interval '{raw}'"
            ))
        })?,
    };

    Ok(Source {
        name: name.to_string(),
        seed_url,
        navigation_mode,
        recrawl_interval_hours,
    })
}

fn env_parse<T>(key: &str, default: T) -> Result<T, DocsError>
where
    T: std::str::FromStr,
{
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) if raw.trim().is_empty() => Ok(default),
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| DocsError::Config(format!("{key} has invalid value '{raw}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_source_list() {
        let sources =
            parse_sources("guide|https://example.com/docs/v2|sidebar|24,api|https://example.com/api|navbar|0")
                .unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].name, "guide");
        assert_eq!(sources[0].navigation_mode, NavigationMode::Sidebar);
        assert_eq!(sources[0].recrawl_interval_hours, 24);
        assert_eq!(sources[1].recrawl_interval_hours, 0);
    }

    #[test]
    fn defaults_mode_and_interval() {
        let sources = parse_sources("guide|https://example.com/docs").unwrap();
        assert_eq!(sources[0].navigation_mode, NavigationMode::Auto);
        assert_eq!(sources[0].recrawl_interval_hours, 0);
    }

    #[test]
    fn source_round_trips_through_serde() {
        let sources = parse_sources("guide|https://example.com/docs/v2|sidebar|24").unwrap();
        let json = serde_json::to_string(&sources[0]).unwrap();
        let back: Source = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, "guide");
        assert_eq!(back.seed_url.as_str(), "https://example.com/docs/v2");
        assert_eq!(back.navigation_mode, NavigationMode::Sidebar);
        assert_eq!(back.recrawl_interval_hours, 24);
    }

    #[test]
    fn rejects_malformed_entries() {
        assert!(parse_sources("guide").is_err());
        assert!(parse_sources("guide|not a url").is_err());
        assert!(parse_sources("guide|https://example.com|teleport").is_err());
        assert!(parse_sources("guide|https://example.com|auto|soon").is_err());
    }
}
