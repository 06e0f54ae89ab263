//! Vector index abstraction shared by all backends.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::document::{GetResult, Metadata, SearchResult};
use crate::embedding::EmbeddingProvider;
use crate::error::{KbError, Result};

/// A metadata filter: every key must match the stored value exactly.
pub type Filter = HashMap<String, Value>;

/// Distance function used for similarity ranking.
///
/// Whatever the underlying metric, backends report scores under a uniform
/// higher-is-better convention so callers can rank and threshold results
/// without knowing which backend produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceFunction {
    /// Cosine similarity over normalized vectors. Scores in roughly [-1, 1].
    #[default]
    Cosine,
    /// Euclidean distance, reported as `1 / (1 + d^2)`. Scores in (0, 1].
    L2,
    /// Raw inner product. Scores are unbounded.
    Ip,
}

impl DistanceFunction {
    /// Parse a distance name, defaulting to cosine for unknown values.
    ///
    /// Unknown names are logged rather than rejected so a stale config file
    /// degrades to the most common metric instead of failing to open.
    pub fn parse_lenient(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "cosine" => Self::Cosine,
            "l2" | "euclidean" => Self::L2,
            "ip" | "dot" | "inner_product" => Self::Ip,
            other => {
                warn!(distance = other, "unknown distance function, defaulting to cosine");
                Self::Cosine
            }
        }
    }
}

/// Deserializes through [`parse_lenient`](Self::parse_lenient), so config
/// files with alias or unknown distance names still load.
impl<'de> Deserialize<'de> for DistanceFunction {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Ok(Self::parse_lenient(&name))
    }
}

impl std::fmt::Display for DistanceFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cosine => write!(f, "cosine"),
            Self::L2 => write!(f, "l2"),
            Self::Ip => write!(f, "ip"),
        }
    }
}

/// Storage and similarity search over embedded texts.
///
/// All backends share this contract: texts go in with optional IDs and
/// metadata, ranked [`SearchResult`]s come out. Implementations embed via
/// the provider they were constructed with, so two indexes over the same
/// backend may rank differently if their providers differ.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// The registered name of this backend.
    fn name(&self) -> &str;

    /// Add texts to the index.
    ///
    /// Missing IDs are generated (`doc_{position}` based on the current
    /// count), missing metadata defaults to empty. Returns the IDs under
    /// which the texts were stored.
    async fn add_texts(
        &self,
        texts: Vec<String>,
        metadatas: Option<Vec<Metadata>>,
        ids: Option<Vec<String>>,
    ) -> Result<Vec<String>>;

    /// Search for the `limit` entries most similar to `query`.
    ///
    /// An empty index returns an empty vec rather than an error. A filter
    /// restricts candidates before ranking.
    async fn search(
        &self,
        query: &str,
        limit: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchResult>>;

    /// Fetch entries by ID or by metadata filter.
    ///
    /// With neither argument, returns every entry. IDs that do not exist are
    /// skipped, not errors.
    async fn get(&self, ids: Option<&[String]>, filter: Option<&Filter>) -> Result<GetResult>;

    /// Number of entries in the index.
    async fn count(&self) -> Result<usize>;

    /// Delete entries matching the given IDs or metadata filter.
    ///
    /// An entry is removed when its ID is listed or its metadata matches
    /// the filter. With neither argument, nothing is deleted. Returns how
    /// many entries were removed.
    async fn delete(&self, ids: Option<&[String]>, filter: Option<&Filter>) -> Result<usize>;

    /// Remove every entry from the index.
    async fn reset(&self) -> Result<()>;
}

impl std::fmt::Debug for dyn VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex").field("name", &self.name()).finish()
    }
}

/// Whether metadata satisfies a filter (exact equality on every key).
pub(crate) fn matches_filter(metadata: &Metadata, filter: &Filter) -> bool {
    filter.iter().all(|(key, value)| metadata.get(key) == Some(value))
}

/// Scale a vector to unit length.
///
/// A zero vector cannot be normalized, so it is replaced with a uniform
/// epsilon vector first. This keeps cosine scores finite for degenerate
/// embeddings of empty or collapsed input.
pub(crate) fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    } else if !vector.is_empty() {
        let fill = 1.0 / (vector.len() as f32).sqrt();
        for x in vector.iter_mut() {
            *x = fill;
        }
    }
}

/// Similarity score between two vectors under the given distance function.
///
/// For [`DistanceFunction::Cosine`] both vectors are assumed pre-normalized,
/// making the score a plain dot product.
pub(crate) fn similarity(a: &[f32], b: &[f32], distance: DistanceFunction) -> f32 {
    match distance {
        DistanceFunction::Cosine | DistanceFunction::Ip => dot(a, b),
        DistanceFunction::L2 => {
            let squared: f32 = a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum();
            1.0 / (1.0 + squared)
        }
    }
}

pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Embed a batch of texts, normalizing for cosine ranking.
pub(crate) async fn embed_texts(
    provider: &Arc<dyn EmbeddingProvider>,
    texts: &[String],
    distance: DistanceFunction,
) -> Result<Vec<Vec<f32>>> {
    let mut vectors = provider.embed_batch(texts).await?;
    if distance == DistanceFunction::Cosine {
        for vector in &mut vectors {
            l2_normalize(vector);
        }
    }
    Ok(vectors)
}

/// Resolve caller-supplied IDs against the batch size, generating
/// `doc_{position}` IDs after `existing` for any that are missing.
pub(crate) fn fill_ids(
    ids: Option<Vec<String>>,
    count: usize,
    existing: usize,
    backend: &str,
) -> Result<Vec<String>> {
    match ids {
        Some(ids) if ids.len() == count => Ok(ids),
        Some(ids) => Err(KbError::Store {
            backend: backend.to_string(),
            message: format!("got {} ids for {} texts", ids.len(), count),
        }),
        None => Ok((0..count).map(|i| format!("doc_{}", existing + i)).collect()),
    }
}

/// Resolve caller-supplied metadata against the batch size, defaulting to
/// empty maps for any that are missing.
pub(crate) fn fill_metadatas(
    metadatas: Option<Vec<Metadata>>,
    count: usize,
    backend: &str,
) -> Result<Vec<Metadata>> {
    match metadatas {
        Some(metadatas) if metadatas.len() == count => Ok(metadatas),
        Some(metadatas) => Err(KbError::Store {
            backend: backend.to_string(),
            message: format!("got {} metadatas for {} texts", metadatas.len(), count),
        }),
        None => Ok(vec![Metadata::new(); count]),
    }
}
