//! Embedding providers.
//!
//! Real embeddings come from a remote model server when one is configured;
//! the deterministic hash embedder below is the always-available fallback.
//! The fallback gives no semantic similarity, only a stable text-to-vector
//! mapping, which is enough to keep indexing and exact-duplicate retrieval
//! working offline.

use std::f64::consts::TAU;
use std::sync::Arc;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::KbConfig;
use crate::error::Result;

/// Produces embedding vectors for texts.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// A short name identifying the provider, used in logs and errors.
    fn name(&self) -> &str;

    /// Dimensionality of the vectors this provider produces.
    fn dimensions(&self) -> usize;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of texts, one vector per input in order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

/// Deterministic fallback vector for a text.
///
/// The text's SHA-256 digest seeds a PRNG that draws the vector from a
/// normal distribution, which is then L2-normalized. The same text always
/// maps to the same unit vector; different texts map to effectively
/// independent directions.
pub fn fallback_vector(text: &str, dimensions: usize) -> Vec<f32> {
    let digest = Sha256::digest(text.as_bytes());
    let seed = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    let mut rng = StdRng::seed_from_u64(u64::from(seed));

    let mut vector: Vec<f32> = (0..dimensions)
        .map(|_| {
            // Box-Muller; the open lower bound keeps ln() finite.
            let u1: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
            let u2: f64 = rng.gen_range(0.0..TAU);
            ((-2.0 * u1.ln()).sqrt() * u2.cos()) as f32
        })
        .collect();

    crate::vectorstore::l2_normalize(&mut vector);
    vector
}

/// Hash-based embedding provider.
///
/// Deterministic, offline, and infallible. Used directly when simple
/// embeddings are forced, and as the inner fallback of [`SafeEmbedder`]
/// otherwise.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn name(&self) -> &str {
        "hash"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(fallback_vector(text, self.dimensions))
    }
}

/// Wraps a provider so embedding never fails.
///
/// Empty input short-circuits to a zero vector without touching the inner
/// provider. Inner failures are logged and replaced with the deterministic
/// hash fallback for the same text, so a flaky model server degrades
/// retrieval quality instead of breaking writes.
pub struct SafeEmbedder {
    inner: Arc<dyn EmbeddingProvider>,
}

impl SafeEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingProvider>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl EmbeddingProvider for SafeEmbedder {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.inner.dimensions()]);
        }
        match self.inner.embed(text).await {
            Ok(vector) => Ok(vector),
            Err(e) => {
                warn!(provider = self.inner.name(), error = %e, "embedding failed, using hash fallback");
                Ok(fallback_vector(text, self.inner.dimensions()))
            }
        }
    }
}

/// Why embedding resolution fell back to the hash provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DegradedReason {
    /// Simple embeddings were explicitly requested.
    Forced,
    /// No remote provider was configured.
    NotConfigured,
    /// A remote provider was configured but support for it is not compiled in.
    NotCompiled,
}

/// The outcome of embedder resolution.
pub struct EmbedderSelection {
    /// The provider to use, already wrapped for infallibility.
    pub provider: Arc<dyn EmbeddingProvider>,
    /// Set when the hash fallback was chosen instead of a real model.
    pub degraded: Option<DegradedReason>,
}

/// Choose an embedding provider for the given configuration.
///
/// Resolution order: forced-simple wins, then a configured Ollama server
/// (when compiled in), then the hash fallback. Never fails; the worst case
/// is a degraded selection.
pub fn resolve_embedder(config: &KbConfig) -> EmbedderSelection {
    if config.force_simple_embeddings {
        debug!("simple embeddings forced by configuration");
        return EmbedderSelection {
            provider: Arc::new(HashEmbedder::new(config.embedding_dimension)),
            degraded: Some(DegradedReason::Forced),
        };
    }

    match &config.ollama_url {
        Some(url) => {
            #[cfg(feature = "ollama")]
            {
                let provider = crate::ollama::OllamaEmbedder::new(
                    url.clone(),
                    config.embedding_model.clone(),
                    config.embedding_dimension,
                );
                debug!(%url, model = %config.embedding_model, "using ollama embeddings");
                EmbedderSelection {
                    provider: Arc::new(SafeEmbedder::new(Arc::new(provider))),
                    degraded: None,
                }
            }
            #[cfg(not(feature = "ollama"))]
            {
                warn!(%url, "ollama support not compiled in, using hash embeddings");
                EmbedderSelection {
                    provider: Arc::new(HashEmbedder::new(config.embedding_dimension)),
                    degraded: Some(DegradedReason::NotCompiled),
                }
            }
        }
        None => {
            debug!("no embedding server configured, using hash embeddings");
            EmbedderSelection {
                provider: Arc::new(HashEmbedder::new(config.embedding_dimension)),
                degraded: Some(DegradedReason::NotConfigured),
            }
        }
    }
}
