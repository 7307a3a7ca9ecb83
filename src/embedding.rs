//! Embedding providers.
//!
//! The indexer and the semantic search path only see the [`EmbeddingProvider`]
//! trait. [`RigEmbedder`] adapts any `rig` embedding model; the
//! [`MockEmbeddingProvider`] produces deterministic token-hash vectors for
//! tests, where overlapping vocabulary yields higher cosine similarity.

use async_trait::async_trait;
use rig::embeddings::EmbeddingModel;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::types::DocsError;

/// Texts embedded per backend call, bounding peak memory.
pub const EMBED_BATCH_SIZE: usize = 16;
/// Character ceiling applied before embedding, matching the model input limit.
pub const EMBED_INPUT_CEILING: usize = 2000;

/// An opaque `text -> fixed-length vector` function.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn dimensions(&self) -> usize;

    /// Embeds a batch of texts, one vector per input, in order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, DocsError>;
}

/// Embeds `texts` in fixed-size batches. An individual failure degrades to a
/// zero vector of the right dimensionality instead of aborting the run, so
/// indexing always completes; the loss is recall for that chunk only.
pub async fn embed_or_zero(provider: &dyn EmbeddingProvider, texts: &[String]) -> Vec<Vec<f32>> {
    let dims = provider.dimensions();
    let truncated: Vec<String> = texts
        .iter()
        .map(|t| t.chars().take(EMBED_INPUT_CEILING).collect())
        .collect();

    let mut out = Vec::with_capacity(texts.len());
    for batch in truncated.chunks(EMBED_BATCH_SIZE) {
        match provider.embed_batch(batch).await {
            Ok(vectors) if vectors.len() == batch.len() => out.extend(vectors),
            Ok(vectors) => {
                warn!(
                    expected = batch.len(),
                    got = vectors.len(),
                    "embedding backend returned a short batch, padding with zero vectors"
                );
                let missing = batch.len() - vectors.len().min(batch.len());
                out.extend(vectors.into_iter().take(batch.len()));
                out.extend(std::iter::repeat_n(vec![0.0; dims], missing));
            }
            Err(err) => {
                warn!(error = %err, "batch embedding failed, retrying texts individually");
                for text in batch {
                    match provider.embed_batch(std::slice::from_ref(text)).await {
                        Ok(mut vectors) if !vectors.is_empty() => out.push(vectors.remove(0)),
                        Ok(_) | Err(_) => {
                            warn!("failed to embed chunk, substituting zero vector");
                            out.push(vec![0.0; dims]);
                        }
                    }
                }
            }
        }
    }
    out
}

/// Adapter over a `rig` embedding model.
pub struct RigEmbedder<M> {
    model: M,
}

impl<M: EmbeddingModel> RigEmbedder<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }
}

#[async_trait]
impl<M: EmbeddingModel + Sync> EmbeddingProvider for RigEmbedder<M> {
    fn dimensions(&self) -> usize {
        self.model.ndims()
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, DocsError> {
        let embeddings = self
            .model
            .embed_texts(texts.to_vec())
            .await
            .map_err(|err| DocsError::Embedding(err.to_string()))?;
        Ok(embeddings
            .into_iter()
            .map(|e| e.vec.into_iter().map(|v| v as f32).collect())
            .collect())
    }
}

/// Deterministic bag-of-token-hashes embedder for tests.
///
/// Each token contributes a pseudo-random unit direction derived from its
/// SHA-256 digest; the document vector is the normalized sum. Identical texts
/// embed identically and shared vocabulary raises cosine similarity.
#[derive(Clone, Debug)]
pub struct MockEmbeddingProvider {
    dimensions: usize,
}

impl MockEmbeddingProvider {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut accum = vec![0.0f32; self.dimensions];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut filled = 0usize;
            let mut counter = 0u32;
            while filled < self.dimensions {
                let mut hasher = Sha256::new();
                hasher.update(token.as_bytes());
                hasher.update(counter.to_le_bytes());
                let digest = hasher.finalize();
                for byte in digest.iter() {
                    if filled >= self.dimensions {
                        break;
                    }
                    accum[filled] += (*byte as f32 - 127.5) / 127.5;
                    filled += 1;
                }
                counter += 1;
            }
        }
        let norm = accum.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut accum {
                *v /= norm;
            }
        }
        accum
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, DocsError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}
