//! Data types for documents, chunks, and search results.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Key-value metadata attached to documents and chunks.
pub type Metadata = HashMap<String, Value>;

/// A source document containing text content and metadata.
///
/// Documents are persisted as one JSON file each, independently of the
/// vector index, so the original unchunked text survives index rebuilds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Unique identifier for the document.
    pub id: String,
    /// The text content of the document.
    pub text: String,
    /// Key-value metadata associated with the document.
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    /// Create a document with empty metadata.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self { id: id.into(), text: text.into(), metadata: Metadata::new() }
    }

    /// Create a document with a freshly generated UUID as its ID.
    pub fn with_generated_id(text: impl Into<String>) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), text)
    }
}

/// A segment of a [`Document`], the unit that is embedded and indexed.
///
/// Chunk metadata always carries `document_id`, `chunk_index`, and
/// `chunk_count` in addition to the parent document's metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Unique identifier for the chunk, derived as `{document_id}_{index}`.
    pub id: String,
    /// The text content of the chunk.
    pub text: String,
    /// Inherited document metadata plus chunk-specific fields.
    pub metadata: Metadata,
}

/// A retrieved entry paired with a relevance score.
///
/// Scores follow a uniform higher-is-better convention across all backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// Identifier of the stored entry.
    pub id: String,
    /// The stored text.
    pub text: String,
    /// The stored metadata.
    pub metadata: Metadata,
    /// The similarity score (higher is more relevant).
    pub score: f32,
}

/// Parallel lists returned by [`VectorIndex::get`](crate::VectorIndex::get).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetResult {
    /// The stored texts.
    pub documents: Vec<String>,
    /// The stored metadata maps, parallel to `documents`.
    pub metadatas: Vec<Metadata>,
    /// The stored identifiers, parallel to `documents`.
    pub ids: Vec<String>,
}

impl GetResult {
    /// Number of entries returned.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the result is empty.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Aggregate counts over a knowledge base.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of documents on disk.
    pub document_count: usize,
    /// Number of chunks in the vector index.
    pub chunk_count: usize,
}
