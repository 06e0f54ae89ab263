//! Persistent flat (exact) vector store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::document::{GetResult, Metadata, SearchResult};
use crate::embedding::EmbeddingProvider;
use crate::entries::Entries;
use crate::error::Result;
use crate::vectorstore::{
    embed_texts, fill_ids, fill_metadatas, similarity, DistanceFunction, Filter, VectorIndex,
};

pub(crate) const BACKEND: &str = "flat";

/// Exact-search vector store persisted to disk.
///
/// Vectors are stored as a binary file (`{collection}.index`) and the
/// parallel texts/metadata/IDs as JSON (`{collection}.meta.json`). Every
/// mutation rewrites both files. Search is a brute-force scan, which is
/// exact and fast enough up to tens of thousands of chunks.
///
/// Files are overwritten in place without locking; concurrent writers from
/// separate processes are not supported.
pub struct FlatVectorStore {
    provider: Arc<dyn EmbeddingProvider>,
    distance: DistanceFunction,
    index_path: PathBuf,
    meta_path: PathBuf,
    entries: RwLock<Entries>,
}

impl FlatVectorStore {
    /// Open (or create) a flat store under `dir` for the given collection.
    ///
    /// Existing index files are loaded eagerly. A vector file whose entry
    /// count disagrees with the metadata file is treated as corrupt and
    /// both are discarded with a warning.
    pub fn open(
        dir: &Path,
        collection: &str,
        provider: Arc<dyn EmbeddingProvider>,
        distance: DistanceFunction,
    ) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let index_path = dir.join(format!("{collection}.index"));
        let meta_path = dir.join(format!("{collection}.meta.json"));

        let entries = Self::load(&index_path, &meta_path)?;
        info!(collection, count = entries.len(), "opened flat vector store");

        Ok(Self { provider, distance, index_path, meta_path, entries: RwLock::new(entries) })
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
}

#[async_trait]
impl VectorIndex for FlatVectorStore {
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

        let mut entries = self.entries.write().await;
        let ids = fill_ids(ids, texts.len(), entries.len(), BACKEND)?;
        let metadatas = fill_metadatas(metadatas, texts.len(), BACKEND)?;

        for (((id, text), metadata), vector) in
            ids.iter().cloned().zip(texts).zip(metadatas).zip(vectors)
        {
            entries.push(id, text, metadata, vector);
        }
        self.save(&entries).await?;
        debug!(count = ids.len(), total = entries.len(), "added texts to flat store");
        Ok(ids)
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchResult>> {
        let entries = self.entries.read().await;
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let query_vec =
            embed_texts(&self.provider, std::slice::from_ref(&query.to_string()), self.distance)
                .await?
                .remove(0);

        let mut scored: Vec<(usize, f32)> = (0..entries.len())
            .filter(|&i| filter.is_none_or(|f| entries.matches(i, None, Some(f))))
            .map(|i| (i, similarity(&query_vec, &entries.vectors[i], self.distance)))
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
        Ok(self.entries.read().await.get(ids, filter))
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.entries.read().await.len())
    }

    async fn delete(&self, ids: Option<&[String]>, filter: Option<&Filter>) -> Result<usize> {
        let mut entries = self.entries.write().await;
        let removed = entries.remove_matching(ids, filter);
        if removed > 0 {
            self.save(&entries).await?;
        }
        debug!(removed, "deleted entries from flat store");
        Ok(removed)
    }

    async fn reset(&self) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.clear();
        self.save(&entries).await?;
        debug!("reset flat store");
        Ok(())
    }
}
