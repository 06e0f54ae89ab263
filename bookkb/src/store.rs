//! Document store façade.
//!
//! Composes a vector index, a chunker, and on-disk document storage into
//! the interface the rest of an application talks to: whole documents go
//! in, ranked chunks and assembled context come out.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info, warn};

use crate::chunking::Chunker;
use crate::config::KbConfig;
use crate::document::{Document, GetResult, SearchResult, StoreStats};
use crate::embedding::{resolve_embedder, DegradedReason};
use crate::error::{KbError, Result};
use crate::registry::StoreRegistry;
use crate::vectorstore::{Filter, VectorIndex};

/// A knowledge base over whole documents.
///
/// Documents are persisted as one JSON file each under the data directory,
/// then chunked and indexed for similarity search. The document files are
/// the source of truth: the vector index can always be rebuilt from them.
#[derive(Debug)]
pub struct DocumentStore {
    index: Arc<dyn VectorIndex>,
    chunker: Chunker,
    data_dir: PathBuf,
    search_limit: usize,
    search_threshold: f32,
    degraded: Option<DegradedReason>,
}

impl DocumentStore {
    /// Open a document store using the default backend registry.
    pub fn from_config(config: &KbConfig) -> Result<Self> {
        Self::with_registry(config, &StoreRegistry::with_defaults())
    }

    /// Open a document store resolving the backend from `registry`.
    pub fn with_registry(config: &KbConfig, registry: &StoreRegistry) -> Result<Self> {
        let selection = resolve_embedder(config);
        if let Some(reason) = &selection.degraded {
            info!(?reason, "running with hash embeddings, retrieval is non-semantic");
        }
        let index = registry.create(&config.store, config, selection.provider)?;
        let chunker = Chunker::new(config.chunk_size, config.chunk_overlap, config.split_by)?;
        std::fs::create_dir_all(&config.data_dir)?;

        Ok(Self {
            index,
            chunker,
            data_dir: config.data_dir.clone(),
            search_limit: config.search_limit,
            search_threshold: config.search_threshold,
            degraded: selection.degraded,
        })
    }

    /// Wrap an existing index and chunker directly.
    pub fn new(
        index: Arc<dyn VectorIndex>,
        chunker: Chunker,
        data_dir: impl Into<PathBuf>,
        search_limit: usize,
        search_threshold: f32,
    ) -> Result<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)?;
        Ok(Self { index, chunker, data_dir, search_limit, search_threshold, degraded: None })
    }

    /// The underlying vector index.
    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    /// Set when the store fell back to non-semantic hash embeddings.
    pub fn degraded(&self) -> Option<&DegradedReason> {
        self.degraded.as_ref()
    }

    fn document_path(&self, id: &str) -> Result<PathBuf> {
        if id.is_empty() || id.contains('/') || id.contains('\\') || id.contains("..") {
            return Err(KbError::Config(format!("invalid document id: {id:?}")));
        }
        Ok(self.data_dir.join(format!("{id}.json")))
    }

    /// Add a document: persist it to disk, chunk it, and index the chunks.
    ///
    /// Re-adding an existing ID overwrites the document file and appends
    /// fresh chunks; call [`delete_document`](Self::delete_document) first
    /// to replace cleanly. Returns the chunk IDs that were indexed.
    pub async fn add_document(&self, document: &Document) -> Result<Vec<String>> {
        self.add_with_chunker(document, &self.chunker).await
    }

    /// Like [`add_document`](Self::add_document) with one-off chunk limits,
    /// for oversized or unusually structured documents.
    pub async fn add_document_with_limits(
        &self,
        document: &Document,
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> Result<Vec<String>> {
        let chunker = self.chunker.with_limits(chunk_size, chunk_overlap)?;
        self.add_with_chunker(document, &chunker).await
    }

    async fn add_with_chunker(&self, document: &Document, chunker: &Chunker) -> Result<Vec<String>> {
        let path = self.document_path(&document.id)?;

        let mut record = document.clone();
        record.metadata.insert("document_id".to_string(), json!(document.id));
        record.metadata.insert("is_document".to_string(), json!(true));
        tokio::fs::write(&path, serde_json::to_vec_pretty(&record)?).await?;

        let chunks = chunker.chunk_document(document);
        if chunks.is_empty() {
            warn!(document_id = %document.id, "document produced no chunks");
            return Ok(Vec::new());
        }

        let mut texts = Vec::with_capacity(chunks.len());
        let mut metadatas = Vec::with_capacity(chunks.len());
        let mut ids = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            texts.push(chunk.text);
            metadatas.push(chunk.metadata);
            ids.push(chunk.id);
        }

        let stored = self.index.add_texts(texts, Some(metadatas), Some(ids)).await?;
        info!(document_id = %document.id, chunks = stored.len(), "added document");
        Ok(stored)
    }

    /// Fetch a document by ID, or `None` if it does not exist.
    pub async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let path = self.document_path(id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// The indexed chunks belonging to a document.
    ///
    /// Backend failures are logged and reported as an empty result so
    /// display paths never fail on a broken index.
    pub async fn document_chunks(&self, id: &str) -> GetResult {
        let mut filter = Filter::new();
        filter.insert("document_id".to_string(), json!(id));
        match self.index.get(None, Some(&filter)).await {
            Ok(result) => result,
            Err(e) => {
                warn!(document_id = id, error = %e, "failed to fetch document chunks");
                GetResult::default()
            }
        }
    }

    /// Delete a document and its indexed chunks.
    ///
    /// Returns `true` if the document file existed. Chunk deletion runs
    /// regardless, clearing orphans from earlier partial writes.
    pub async fn delete_document(&self, id: &str) -> Result<bool> {
        let path = self.document_path(id)?;

        let mut filter = Filter::new();
        filter.insert("document_id".to_string(), json!(id));
        let removed = self.index.delete(None, Some(&filter)).await?;

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!(document_id = id, chunks = removed, "deleted document");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// All documents on disk, skipping files that fail to parse.
    pub async fn list_documents(&self) -> Result<Vec<Document>> {
        let mut documents = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.data_dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<Document>(&bytes) {
                Ok(document) => documents.push(document),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unparsable document file");
                }
            }
        }
        documents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(documents)
    }

    /// Document and chunk counts.
    ///
    /// Counting failures are logged and reported as zero.
    pub async fn stats(&self) -> StoreStats {
        let document_count = match self.list_documents().await {
            Ok(documents) => documents.len(),
            Err(e) => {
                warn!(error = %e, "failed to count documents");
                0
            }
        };
        let chunk_count = match self.index.count().await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "failed to count chunks");
                0
            }
        };
        StoreStats { document_count, chunk_count }
    }

    /// Search indexed chunks, applying the configured score threshold.
    ///
    /// `limit` defaults to the configured search limit. A filter restricts
    /// results by exact metadata equality, e.g. `document_id` to search
    /// within one document.
    pub async fn search(
        &self,
        query: &str,
        limit: Option<usize>,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchResult>> {
        let limit = limit.unwrap_or(self.search_limit);
        let mut results = self.index.search(query, limit, filter).await?;
        results.retain(|r| r.score >= self.search_threshold);
        debug!(query, count = results.len(), "search complete");
        Ok(results)
    }

    /// Retrieve the most relevant chunks joined into a single context
    /// string, separated by blank lines. Empty when nothing matches.
    pub async fn retrieve_context(
        &self,
        query: &str,
        limit: Option<usize>,
        filter: Option<&Filter>,
    ) -> Result<String> {
        let results = self.search(query, limit, filter).await?;
        Ok(results.iter().map(|r| r.text.as_str()).collect::<Vec<_>>().join("\n\n"))
    }

    /// Delete everything: the index contents and all document files.
    pub async fn reset(&self) -> Result<()> {
        self.index.reset().await?;
        let mut dir = tokio::fs::read_dir(&self.data_dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                tokio::fs::remove_file(&path).await?;
            }
        }
        info!("reset document store");
        Ok(())
    }
}
