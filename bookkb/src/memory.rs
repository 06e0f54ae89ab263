//! In-memory vector store.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::document::{GetResult, Metadata, SearchResult};
use crate::embedding::EmbeddingProvider;
use crate::entries::Entries;
use crate::error::Result;
use crate::vectorstore::{
    embed_texts, fill_ids, fill_metadatas, similarity, DistanceFunction, Filter, VectorIndex,
};

pub(crate) const BACKEND: &str = "simple";

/// Brute-force vector store with no persistence.
///
/// Everything lives behind a [`RwLock`]; search is a linear scan. Suitable
/// for tests and small collections that do not need to survive restarts.
pub struct MemoryVectorStore {
    provider: Arc<dyn EmbeddingProvider>,
    distance: DistanceFunction,
    entries: RwLock<Entries>,
}

impl MemoryVectorStore {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, distance: DistanceFunction) -> Self {
        Self { provider, distance, entries: RwLock::new(Entries::default()) }
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorStore {
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
        debug!(count = ids.len(), total = entries.len(), "added texts to memory store");
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
        let removed = self.entries.write().await.remove_matching(ids, filter);
        debug!(removed, "deleted entries from memory store");
        Ok(removed)
    }

    async fn reset(&self) -> Result<()> {
        self.entries.write().await.clear();
        debug!("reset memory store");
        Ok(())
    }
}
