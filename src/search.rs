//! Search orchestration: lexical, semantic, and RRF-fused hybrid modes.
//!
//! Engine failures never fail a query. A broken vector index degrades hybrid
//! search to lexical results and vice versa; if both engines fail the query
//! returns an empty list.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::SearchMode;
use crate::embedding::EmbeddingProvider;
use crate::store::DocStore;

/// Standard RRF damping constant; softens the influence of rank-1 outliers.
pub const RRF_K: f64 = 60.0;
/// Character cap for semantic snippets.
const SNIPPET_MAX_LEN: usize = 200;

static TITLE_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[.*?\]\s*").expect("valid snippet prefix regex"));

/// Which engine produced a result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultOrigin {
    Lexical,
    Semantic,
    Hybrid,
}

/// One ranked search result.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub score: f64,
    pub snippet: String,
    pub origin: ResultOrigin,
    /// 1-based rank in the lexical sub-search, when present there.
    pub lexical_rank: Option<usize>,
    /// 1-based rank in the semantic sub-search, when present there.
    pub semantic_rank: Option<usize>,
}

/// Runs sub-searches per the configured mode and fuses hybrid results.
pub struct SearchOrchestrator {
    store: DocStore,
    embedder: Arc<dyn EmbeddingProvider>,
    mode: SearchMode,
    lexical_weight: f64,
}

impl SearchOrchestrator {
    pub fn new(
        store: DocStore,
        embedder: Arc<dyn EmbeddingProvider>,
        mode: SearchMode,
        lexical_weight: f64,
    ) -> Self {
        Self {
            store,
            embedder,
            mode,
            lexical_weight,
        }
    }

    /// Returns up to `limit` results. Never errors; backend failures degrade
    /// to fewer (possibly zero) results.
    pub async fn search(&self, query: &str, limit: usize) -> Vec<SearchHit> {
        debug!(mode = ?self.mode, %query, limit, "search");
        match self.mode {
            SearchMode::Lexical => self.lexical_search(query, limit).await,
            SearchMode::Semantic => self.semantic_search(query, limit).await,
            SearchMode::Hybrid => self.hybrid_search(query, limit).await,
        }
    }

    async fn lexical_search(&self, query: &str, limit: usize) -> Vec<SearchHit> {
        let expr = sanitize_query(query);
        let hits = match self.store.lexical_search(&expr, limit).await {
            Ok(hits) => hits,
            Err(err) => {
                warn!(error = %err, "lexical search failed, returning empty set");
                return Vec::new();
            }
        };
        hits.into_iter()
            .enumerate()
            .map(|(idx, hit)| SearchHit {
                title: hit.title,
                url: hit.url,
                score: hit.score,
                snippet: hit.snippet,
                origin: ResultOrigin::Lexical,
                lexical_rank: Some(idx + 1),
                semantic_rank: None,
            })
            .collect()
    }

    async fn semantic_search(&self, query: &str, limit: usize) -> Vec<SearchHit> {
        let vector = match self.embedder.embed_batch(&[query.to_string()]).await {
            Ok(mut vectors) if !vectors.is_empty() => vectors.remove(0),
            Ok(_) => return Vec::new(),
            Err(err) => {
                warn!(error = %err, "query embedding failed, returning empty set");
                return Vec::new();
            }
        };

        // Over-fetch: one document may contribute several chunks and only the
        // best per document survives deduplication.
        let knn = match self.store.knn(&vector, limit * 3).await {
            Ok(hits) => hits,
            Err(err) => {
                warn!(error = %err, "knn search failed, returning empty set");
                return Vec::new();
            }
        };

        let mut seen_docs = std::collections::HashSet::new();
        let mut results = Vec::new();
        for hit in knn {
            if !seen_docs.insert(hit.doc_id.clone()) {
                continue;
            }
            let meta = match self.store.document_meta(&hit.doc_id).await {
                Ok(Some(meta)) => meta,
                Ok(None) => continue,
                Err(err) => {
                    warn!(error = %err, "metadata lookup failed mid-search");
                    continue;
                }
            };
            let rank = results.len() + 1;
            results.push(SearchHit {
                title: meta.title,
                url: meta.url,
                // Cosine distance lies in [0, 2]; map to a similarity score.
                score: 1.0 - hit.distance / 2.0,
                snippet: best_sentence_snippet(&hit.chunk_text, query),
                origin: ResultOrigin::Semantic,
                lexical_rank: None,
                semantic_rank: Some(rank),
            });
            if results.len() >= limit {
                break;
            }
        }
        results
    }

    async fn hybrid_search(&self, query: &str, limit: usize) -> Vec<SearchHit> {
        let fetch_limit = (limit * 3).max(30);
        let (lexical, semantic) = tokio::join!(
            self.lexical_search(query, fetch_limit),
            self.semantic_search(query, fetch_limit)
        );
        debug!(
            lexical = lexical.len(),
            semantic = semantic.len(),
            "fusing sub-search results"
        );
        let mut fused = rrf_fuse(&lexical, &semantic, self.lexical_weight);
        fused.truncate(limit);
        fused
    }
}

/// Weighted Reciprocal Rank Fusion over the two ranked lists.
///
/// `score = w_lex / (K + rank_lex) + w_sem / (K + rank_sem)`, with an absent
/// rank contributing zero and `w_sem = 1 - w_lex`. Results are sorted by
/// descending fused score; the snippet prefers the semantic one.
pub fn rrf_fuse(lexical: &[SearchHit], semantic: &[SearchHit], lexical_weight: f64) -> Vec<SearchHit> {
    struct Candidate {
        title: String,
        lexical_rank: Option<usize>,
        semantic_rank: Option<usize>,
        lexical_snippet: Option<String>,
        semantic_snippet: Option<String>,
    }

    let semantic_weight = 1.0 - lexical_weight;
    let mut candidates: HashMap<String, Candidate> = HashMap::new();

    for hit in lexical {
        let entry = candidates.entry(hit.url.clone()).or_insert(Candidate {
            title: hit.title.clone(),
            lexical_rank: None,
            semantic_rank: None,
            lexical_snippet: None,
            semantic_snippet: None,
        });
        entry.lexical_rank = hit.lexical_rank;
        entry.lexical_snippet = Some(hit.snippet.clone());
    }
    for hit in semantic {
        let entry = candidates.entry(hit.url.clone()).or_insert(Candidate {
            title: hit.title.clone(),
            lexical_rank: None,
            semantic_rank: None,
            lexical_snippet: None,
            semantic_snippet: None,
        });
        entry.semantic_rank = hit.semantic_rank;
        entry.semantic_snippet = Some(hit.snippet.clone());
    }

    let mut fused: Vec<SearchHit> = candidates
        .into_iter()
        .map(|(url, candidate)| {
            let mut score = 0.0;
            if let Some(rank) = candidate.lexical_rank {
                score += lexical_weight / (RRF_K + rank as f64);
            }
            if let Some(rank) = candidate.semantic_rank {
                score += semantic_weight / (RRF_K + rank as f64);
            }
            let snippet = candidate
                .semantic_snippet
                .or(candidate.lexical_snippet)
                .unwrap_or_default();
            SearchHit {
                title: candidate.title,
                url,
                score,
                snippet,
                origin: ResultOrigin::Hybrid,
                lexical_rank: candidate.lexical_rank,
                semantic_rank: candidate.semantic_rank,
            }
        })
        .collect();

    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.url.cmp(&b.url))
    });
    fused
}

/// Turns free text into an FTS5 prefix query: punctuation stripped, every
/// term wildcarded, multiple terms OR-joined. All-punctuation input degrades
/// to the bare wildcard.
pub fn sanitize_query(query: &str) -> String {
    let cleaned: String = query
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();
    let terms: Vec<&str> = cleaned.split_whitespace().collect();
    match terms.len() {
        0 => "*".to_string(),
        1 => format!("{}*", terms[0]),
        _ => terms
            .iter()
            .map(|term| format!("{term}*"))
            .collect::<Vec<_>>()
            .join(" OR "),
    }
}

/// Picks the sentence of a chunk most relevant to the query, capped to a
/// readable length. The `[title]` prefix chunks carry is dropped first.
fn best_sentence_snippet(chunk_text: &str, query: &str) -> String {
    let text = TITLE_PREFIX.replace(chunk_text, "").into_owned();
    let query_terms: Vec<String> = query
        .to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect();

    let sentences: Vec<&str> = text
        .split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| s.len() > 10)
        .collect();

    let mut best = *sentences.first().unwrap_or(&text.as_str());
    let mut best_score = 0usize;
    for sentence in &sentences {
        let lower = sentence.to_lowercase();
        let score = query_terms.iter().filter(|t| lower.contains(*t)).count();
        if score > best_score {
            best_score = score;
            best = sentence;
        }
    }

    let trimmed = best.trim();
    if trimmed.chars().count() > SNIPPET_MAX_LEN {
        let cut: String = trimmed.chars().take(SNIPPET_MAX_LEN).collect();
        format!("{}...", cut.trim_end())
    } else {
        trimmed.to_string()
    }
}
