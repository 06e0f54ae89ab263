//! Approximate vector store backed by a random-projection forest.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::document::{GetResult, Metadata, SearchResult};
use crate::embedding::EmbeddingProvider;
use crate::entries::Entries;
use crate::error::Result;
use crate::vectorstore::{
    dot, embed_texts, fill_ids, fill_metadatas, DistanceFunction, Filter, VectorIndex,
};

pub(crate) const BACKEND: &str = "rptree";

/// Entries per leaf before a node stops splitting.
const LEAF_SIZE: usize = 16;

/// Minimum candidate pool before falling back to an exact scan.
const MIN_CANDIDATES: usize = 100;

enum TreeNode {
    Leaf(Vec<usize>),
    Split { normal: Vec<f32>, threshold: f32, left: Box<TreeNode>, right: Box<TreeNode> },
}

/// Approximate nearest-neighbor store using random projection trees.
///
/// Each tree recursively partitions the entries with random hyperplanes;
/// a query descends every tree and the union of the reached leaves forms
/// the candidate pool, which is then scored exactly. More trees means
/// better recall at the cost of memory and build time.
///
/// The forest cannot be updated incrementally, so it is rebuilt after
/// every mutation. Tree seeds are fixed, making the forest (and search
/// results) deterministic for a given set of entries.
///
/// Only vectors and metadata are persisted; the forest is rebuilt when the
/// store is opened.
pub struct RpTreeVectorStore {
    provider: Arc<dyn EmbeddingProvider>,
    distance: DistanceFunction,
    n_trees: usize,
    index_path: PathBuf,
    meta_path: PathBuf,
    state: RwLock<State>,
}

struct State {
    entries: Entries,
    forest: Vec<TreeNode>,
}

impl RpTreeVectorStore {
    /// Open (or create) an rptree store under `dir` for the given collection.
    pub fn open(
        dir: &Path,
        collection: &str,
        provider: Arc<dyn EmbeddingProvider>,
        distance: DistanceFunction,
        n_trees: usize,
    ) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let index_path = dir.join(format!("{collection}.index"));
        let meta_path = dir.join(format!("{collection}.meta.json"));

        let entries = Self::load(&index_path, &meta_path)?;
        let forest = build_forest(&entries.vectors, n_trees);
        info!(collection, count = entries.len(), n_trees, "opened rptree vector store");

        Ok(Self {
            provider,
            distance,
            n_trees,
            index_path,
            meta_path,
            state: RwLock::new(State { entries, forest }),
        })
    }

    fn load(index_path: &Path, meta_path: &Path) -> Result<Entries> {
        if !index_path.exists() || !meta_path.exists() {
            return Ok(Entries::default());
        }

        let meta_bytes = std::fs::read(meta_path)?;
        let mut entries: Entries = serde_json::from_slice(&meta_bytes)?;
        let index_bytes = std::fs::read(index_path)?;
        let vectors: Vec<Vec<f32>> = bincode::deserialize(&index_bytes)?;

        if vectors.len() != entries.ids.len() {
            warn!(
                vectors = vectors.len(),
                entries = entries.ids.len(),
                "index and metadata files disagree, starting empty"
            );
            return Ok(Entries::default());
        }

        entries.vectors = vectors;
        Ok(entries)
    }

    async fn save(&self, entries: &Entries) -> Result<()> {
        let index_bytes = bincode::serialize(&entries.vectors)?;
        let meta_bytes = serde_json::to_vec(entries)?;

        if let Err(e) = tokio::fs::write(&self.index_path, index_bytes).await {
            error!(path = %self.index_path.display(), error = %e, "failed to write index file");
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::write(&self.meta_path, meta_bytes).await {
            error!(path = %self.meta_path.display(), error = %e, "failed to write metadata file");
            return Err(e.into());
        }
        Ok(())
    }

    /// Score a vector pair under this store's ranking conventions.
    ///
    /// Angular (cosine) entries are ranked by `1 - d/2` where
    /// `d = sqrt(2 - 2*cos)`, euclidean by `1 / (1 + d)`, inner product by
    /// the raw dot product. All are higher-is-better.
    fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        match self.distance {
            DistanceFunction::Cosine => {
                let d = (2.0 - 2.0 * dot(a, b)).max(0.0).sqrt();
                1.0 - d / 2.0
            }
            DistanceFunction::L2 => {
                let d = a
                    .iter()
                    .zip(b)
                    .map(|(x, y)| (x - y) * (x - y))
                    .sum::<f32>()
                    .sqrt();
                1.0 / (1.0 + d)
            }
            DistanceFunction::Ip => dot(a, b),
        }
    }
}

#[async_trait]
impl VectorIndex for RpTreeVectorStore {
    fn name(&self) -> &str {
        BACKEND
    }

    async fn add_texts(
        &self,
        texts: Vec<String>,
        metadatas: Option<Vec<Metadata>>,
        ids: Option<Vec<String>>,
    ) -> Result<Vec<String>> {
        let vectors = embed_texts(&self.provider, &texts, self.distance).await?;

        let mut state = self.state.write().await;
        let ids = fill_ids(ids, texts.len(), state.entries.len(), BACKEND)?;
        let metadatas = fill_metadatas(metadatas, texts.len(), BACKEND)?;

        for (((id, text), metadata), vector) in
            ids.iter().cloned().zip(texts).zip(metadatas).zip(vectors)
        {
            state.entries.push(id, text, metadata, vector);
        }
        state.forest = build_forest(&state.entries.vectors, self.n_trees);
        self.save(&state.entries).await?;
        debug!(count = ids.len(), total = state.entries.len(), "added texts to rptree store");
        Ok(ids)
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchResult>> {
        let state = self.state.read().await;
        let entries = &state.entries;
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let query_vec =
            embed_texts(&self.provider, std::slice::from_ref(&query.to_string()), self.distance)
                .await?
                .remove(0);

        // Union of the leaves the query lands in across the forest. A pool
        // smaller than wanted falls back to an exact scan.
        let wanted = MIN_CANDIDATES.max(limit * 10).min(entries.len());
        let mut pool: HashSet<usize> = HashSet::new();
        for tree in &state.forest {
            collect_leaf(tree, &query_vec, &mut pool);
        }
        let candidates: Vec<usize> = if pool.len() < wanted {
            (0..entries.len()).collect()
        } else {
            pool.into_iter().collect()
        };

        let mut scored: Vec<(usize, f32)> = candidates
            .into_iter()
            .filter(|&i| filter.is_none_or(|f| entries.matches(i, None, Some(f))))
            .map(|i| (i, self.score(&query_vec, &entries.vectors[i])))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);

        Ok(scored
            .into_iter()
            .map(|(i, score)| SearchResult {
                id: entries.ids[i].clone(),
                text: entries.documents[i].clone(),
                metadata: entries.metadatas[i].clone(),
                score,
            })
            .collect())
    }

    async fn get(&self, ids: Option<&[String]>, filter: Option<&Filter>) -> Result<GetResult> {
        Ok(self.state.read().await.entries.get(ids, filter))
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.state.read().await.entries.len())
    }

    async fn delete(&self, ids: Option<&[String]>, filter: Option<&Filter>) -> Result<usize> {
        let mut state = self.state.write().await;
        let removed = state.entries.remove_matching(ids, filter);
        if removed > 0 {
            state.forest = build_forest(&state.entries.vectors, self.n_trees);
            self.save(&state.entries).await?;
        }
        debug!(removed, "deleted entries from rptree store");
        Ok(removed)
    }

    async fn reset(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.entries.clear();
        state.forest.clear();
        self.save(&state.entries).await?;
        debug!("reset rptree store");
        Ok(())
    }
}

fn build_forest(vectors: &[Vec<f32>], n_trees: usize) -> Vec<TreeNode> {
    if vectors.is_empty() {
        return Vec::new();
    }
    let all: Vec<usize> = (0..vectors.len()).collect();
    (0..n_trees)
        .map(|t| {
            let mut rng = StdRng::seed_from_u64(t as u64);
            build_tree(vectors, all.clone(), &mut rng)
        })
        .collect()
}

fn build_tree(vectors: &[Vec<f32>], indices: Vec<usize>, rng: &mut StdRng) -> TreeNode {
    if indices.len() <= LEAF_SIZE {
        return TreeNode::Leaf(indices);
    }

    let dims = vectors[indices[0]].len();
    let mut normal: Vec<f32> = (0..dims).map(|_| rng.gen_range(-1.0..1.0)).collect();
    crate::vectorstore::l2_normalize(&mut normal);

    let mut projections: Vec<f32> = indices.iter().map(|&i| dot(&normal, &vectors[i])).collect();
    let mut sorted = projections.clone();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let threshold = sorted[sorted.len() / 2];

    let mut left = Vec::new();
    let mut right = Vec::new();
    for (&index, projection) in indices.iter().zip(projections.drain(..)) {
        if projection < threshold {
            left.push(index);
        } else {
            right.push(index);
        }
    }

    // Degenerate hyperplane (identical projections): stop splitting.
    if left.is_empty() || right.is_empty() {
        return TreeNode::Leaf(indices);
    }

    TreeNode::Split {
        normal,
        threshold,
        left: Box::new(build_tree(vectors, left, rng)),
        right: Box::new(build_tree(vectors, right, rng)),
    }
}

fn collect_leaf(node: &TreeNode, query: &[f32], pool: &mut HashSet<usize>) {
    match node {
        TreeNode::Leaf(indices) => pool.extend(indices.iter().copied()),
        TreeNode::Split { normal, threshold, left, right } => {
            if dot(normal, query) < *threshold {
                collect_leaf(left, query, pool);
            } else {
                collect_leaf(right, query, pool);
            }
        }
    }
}
