//! Qdrant vector store backend (feature `qdrant`).
//!
//! Talks to a [Qdrant](https://qdrant.tech/) server over gRPC via the
//! [qdrant-client](https://docs.rs/qdrant-client) crate. The only backend
//! that supports concurrent access from multiple processes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, DeletePointsBuilder, Distance,
    Filter as QdrantFilter, PointStruct, ScrollPointsBuilder, SearchPointsBuilder,
    UpsertPointsBuilder, Value as QdrantValue, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use crate::config::KbConfig;
use crate::document::{GetResult, Metadata, SearchResult};
use crate::embedding::EmbeddingProvider;
use crate::error::{KbError, Result};
use crate::vectorstore::{
    embed_texts, fill_ids, fill_metadatas, DistanceFunction, Filter, VectorIndex,
};

pub(crate) const BACKEND: &str = "qdrant";

const DEFAULT_URL: &str = "http://localhost:6334";
const SCROLL_PAGE: u32 = 256;

/// A [`VectorIndex`] backed by a Qdrant collection.
///
/// Qdrant point IDs must be UUIDs or integers, so each point gets a random
/// UUID and the logical entry ID lives in the payload alongside the text
/// and metadata. ID lookups therefore go through payload filters rather
/// than point-ID lookups.
pub struct QdrantVectorStore {
    client: Qdrant,
    collection: String,
    distance: DistanceFunction,
    dimensions: usize,
    provider: Arc<dyn EmbeddingProvider>,
    collection_ready: AtomicBool,
}

impl QdrantVectorStore {
    /// Connect to a Qdrant server. The collection is created lazily on
    /// first write.
    pub fn new(
        url: &str,
        collection: impl Into<String>,
        provider: Arc<dyn EmbeddingProvider>,
        distance: DistanceFunction,
        dimensions: usize,
    ) -> Result<Self> {
        let client = Qdrant::from_url(url).build().map_err(map_err)?;
        Ok(Self {
            client,
            collection: collection.into(),
            distance,
            dimensions,
            provider,
            collection_ready: AtomicBool::new(false),
        })
    }

    fn qdrant_distance(&self) -> Distance {
        match self.distance {
            DistanceFunction::Cosine => Distance::Cosine,
            DistanceFunction::L2 => Distance::Euclid,
            DistanceFunction::Ip => Distance::Dot,
        }
    }

    async fn ensure_collection(&self) -> Result<()> {
        if self.collection_ready.load(Ordering::Acquire) {
            return Ok(());
        }
        let collections = self.client.list_collections().await.map_err(map_err)?;
        let exists = collections.collections.iter().any(|c| c.name == self.collection);
        if !exists {
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&self.collection).vectors_config(
                        VectorParamsBuilder::new(self.dimensions as u64, self.qdrant_distance()),
                    ),
                )
                .await
                .map_err(map_err)?;
            debug!(collection = %self.collection, "created qdrant collection");
        }
        self.collection_ready.store(true, Ordering::Release);
        Ok(())
    }

    /// Build the "ID is listed or metadata matches" selection filter.
    fn selection_filter(ids: Option<&[String]>, filter: Option<&Filter>) -> Option<QdrantFilter> {
        let mut should: Vec<Condition> = Vec::new();
        if let Some(ids) = ids {
            should.extend(ids.iter().map(|id| Condition::matches("id", id.clone())));
        }
        if let Some(filter) = filter {
            let must: Vec<Condition> = filter
                .iter()
                .map(|(key, value)| metadata_condition(key, value))
                .collect();
            should.push(Condition::from(QdrantFilter::must(must)));
        }
        if should.is_empty() {
            None
        } else {
            Some(QdrantFilter::should(should))
        }
    }

    /// Normalize qdrant scores to the higher-is-better convention.
    fn normalize_score(&self, score: f32) -> f32 {
        match self.distance {
            // Euclid scores are raw distances.
            DistanceFunction::L2 => 1.0 / (1.0 + score * score),
            DistanceFunction::Cosine | DistanceFunction::Ip => score,
        }
    }
}

#[async_trait]
impl VectorIndex for QdrantVectorStore {
    fn name(&self) -> &str {
        BACKEND
    }

    async fn add_texts(
        &self,
        texts: Vec<String>,
        metadatas: Option<Vec<Metadata>>,
        ids: Option<Vec<String>>,
    ) -> Result<Vec<String>> {
        self.ensure_collection().await?;

        let existing = self.count().await?;
        let ids = fill_ids(ids, texts.len(), existing, BACKEND)?;
        let metadatas = fill_metadatas(metadatas, texts.len(), BACKEND)?;
        let vectors = embed_texts(&self.provider, &texts, self.distance).await?;

        let points: Vec<PointStruct> = ids
            .iter()
            .zip(&texts)
            .zip(&metadatas)
            .zip(vectors)
            .map(|(((id, text), metadata), vector)| {
                let payload_value = json!({
                    "id": id,
                    "text": text,
                    "metadata": metadata,
                });
                let payload = Payload::try_from(payload_value).unwrap_or_default();
                PointStruct::new(Uuid::new_v4().to_string(), vector, payload)
            })
            .collect();

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, points).wait(true))
            .await
            .map_err(map_err)?;

        debug!(collection = %self.collection, count = ids.len(), "upserted points to qdrant");
        Ok(ids)
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchResult>> {
        self.ensure_collection().await?;
        if self.count().await? == 0 {
            return Ok(Vec::new());
        }

        let query_vec =
            embed_texts(&self.provider, std::slice::from_ref(&query.to_string()), self.distance)
                .await?
                .remove(0);

        let mut builder = SearchPointsBuilder::new(&self.collection, query_vec, limit as u64)
            .with_payload(true);
        if let Some(selection) = Self::selection_filter(None, filter) {
            builder = builder.filter(selection);
        }

        let response = self.client.search_points(builder).await.map_err(map_err)?;

        Ok(response
            .result
            .into_iter()
            .map(|scored| {
                let (id, text, metadata) = unpack_payload(&scored.payload);
                SearchResult { id, text, metadata, score: self.normalize_score(scored.score) }
            })
            .collect())
    }

    async fn get(&self, ids: Option<&[String]>, filter: Option<&Filter>) -> Result<GetResult> {
        self.ensure_collection().await?;

        let selection = Self::selection_filter(ids, filter);
        let mut result = GetResult::default();
        let mut offset = None;

        loop {
            let mut builder = ScrollPointsBuilder::new(&self.collection)
                .limit(SCROLL_PAGE)
                .with_payload(true);
            if let Some(selection) = selection.clone() {
                builder = builder.filter(selection);
            }
            if let Some(offset) = offset.take() {
                builder = builder.offset(offset);
            }

            let response = self.client.scroll(builder).await.map_err(map_err)?;
            for point in response.result {
                let (id, text, metadata) = unpack_payload(&point.payload);
                result.ids.push(id);
                result.documents.push(text);
                result.metadatas.push(metadata);
            }

            match response.next_page_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        Ok(result)
    }

    async fn count(&self) -> Result<usize> {
        self.ensure_collection().await?;
        let response = self
            .client
            .count(CountPointsBuilder::new(&self.collection).exact(true))
            .await
            .map_err(map_err)?;
        Ok(response.result.map(|r| r.count as usize).unwrap_or(0))
    }

    async fn delete(&self, ids: Option<&[String]>, filter: Option<&Filter>) -> Result<usize> {
        self.ensure_collection().await?;
        let Some(selection) = Self::selection_filter(ids, filter) else {
            return Ok(0);
        };

        let before = self.count().await?;
        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.collection).points(selection).wait(true),
            )
            .await
            .map_err(map_err)?;
        let removed = before.saturating_sub(self.count().await?);

        debug!(collection = %self.collection, removed, "deleted points from qdrant");
        Ok(removed)
    }

    async fn reset(&self) -> Result<()> {
        self.client.delete_collection(&self.collection).await.map_err(map_err)?;
        self.collection_ready.store(false, Ordering::Release);
        self.ensure_collection().await?;
        debug!(collection = %self.collection, "reset qdrant collection");
        Ok(())
    }
}

pub(crate) fn make_qdrant(
    config: &KbConfig,
    provider: Arc<dyn EmbeddingProvider>,
) -> Result<Arc<dyn VectorIndex>> {
    let url = config.qdrant_url.as_deref().unwrap_or(DEFAULT_URL);
    Ok(Arc::new(QdrantVectorStore::new(
        url,
        config.collection_name.clone(),
        provider,
        config.distance,
        config.embedding_dimension,
    )?))
}

fn map_err(e: qdrant_client::QdrantError) -> KbError {
    KbError::Store { backend: BACKEND.to_string(), message: e.to_string() }
}

/// Exact-match condition on a nested metadata field.
///
/// Qdrant match conditions cover keywords, integers, and booleans; other
/// JSON values are matched by their string rendering.
fn metadata_condition(key: &str, value: &Value) -> Condition {
    let field = format!("metadata.{key}");
    match value {
        Value::String(s) => Condition::matches(field, s.clone()),
        Value::Bool(b) => Condition::matches(field, *b),
        Value::Number(n) if n.is_i64() => {
            Condition::matches(field, n.as_i64().unwrap_or_default())
        }
        other => Condition::matches(field, other.to_string()),
    }
}

fn unpack_payload(
    payload: &std::collections::HashMap<String, QdrantValue>,
) -> (String, String, Metadata) {
    let id = payload.get("id").and_then(extract_string).unwrap_or_default();
    let text = payload.get("text").and_then(extract_string).unwrap_or_default();
    let metadata = match payload.get("metadata").map(to_json) {
        Some(Value::Object(map)) => map.into_iter().collect(),
        _ => Metadata::new(),
    };
    (id, text, metadata)
}

fn extract_string(value: &QdrantValue) -> Option<String> {
    match &value.kind {
        Some(Kind::StringValue(s)) => Some(s.clone()),
        _ => None,
    }
}

fn to_json(value: &QdrantValue) -> Value {
    match &value.kind {
        None | Some(Kind::NullValue(_)) => Value::Null,
        Some(Kind::BoolValue(b)) => Value::Bool(*b),
        Some(Kind::IntegerValue(i)) => json!(i),
        Some(Kind::DoubleValue(d)) => json!(d),
        Some(Kind::StringValue(s)) => Value::String(s.clone()),
        Some(Kind::ListValue(list)) => Value::Array(list.values.iter().map(to_json).collect()),
        Some(Kind::StructValue(map)) => {
            Value::Object(map.fields.iter().map(|(k, v)| (k.clone(), to_json(v))).collect())
        }
    }
}
