//! Configuration for the knowledge base.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::chunking::SplitStrategy;
use crate::error::{KbError, Result};
use crate::vectorstore::DistanceFunction;

/// Configuration parameters for a knowledge base instance.
///
/// Construct via [`KbConfig::builder()`] to get validation, or use
/// [`Default`] for the standard single-user layout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KbConfig {
    /// Name of the collection; index files are derived from it.
    pub collection_name: String,
    /// Directory holding the persisted vector index files.
    pub vector_dir: PathBuf,
    /// Directory holding one JSON file per document.
    pub data_dir: PathBuf,
    /// Registered name of the vector store backend to use.
    pub store: String,
    /// Distance function for similarity ranking.
    pub distance: DistanceFunction,
    /// Dimensionality of embedding vectors.
    pub embedding_dimension: usize,
    /// Embedding model name passed to remote providers.
    pub embedding_model: String,
    /// Base URL of an Ollama server providing embeddings, if any.
    pub ollama_url: Option<String>,
    /// URL of a Qdrant server for the `qdrant` backend.
    pub qdrant_url: Option<String>,
    /// Skip provider resolution and use the deterministic hash embedder.
    pub force_simple_embeddings: bool,
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Number of overlapping characters between consecutive chunks.
    pub chunk_overlap: usize,
    /// How document text is split into segments.
    pub split_by: SplitStrategy,
    /// Default number of results returned from search.
    pub search_limit: usize,
    /// Minimum similarity score for document-store search results.
    pub search_threshold: f32,
    /// Number of projection trees for the approximate backend.
    pub n_trees: usize,
}

impl Default for KbConfig {
    fn default() -> Self {
        Self {
            collection_name: "book_knowledge".to_string(),
            vector_dir: PathBuf::from("knowledge_base_data/vectors"),
            data_dir: PathBuf::from("knowledge_base_data/documents"),
            store: "flat".to_string(),
            distance: DistanceFunction::Cosine,
            embedding_dimension: 384,
            embedding_model: "all-minilm".to_string(),
            ollama_url: None,
            qdrant_url: None,
            force_simple_embeddings: false,
            chunk_size: 1000,
            chunk_overlap: 200,
            split_by: SplitStrategy::Paragraph,
            search_limit: 5,
            search_threshold: 0.0,
            n_trees: 10,
        }
    }
}

impl KbConfig {
    /// Create a new builder for constructing a [`KbConfig`].
    pub fn builder() -> KbConfigBuilder {
        KbConfigBuilder::default()
    }
}

/// Builder for constructing a validated [`KbConfig`].
#[derive(Debug, Clone, Default)]
pub struct KbConfigBuilder {
    config: KbConfig,
}

impl KbConfigBuilder {
    /// Set the collection name.
    pub fn collection_name(mut self, name: impl Into<String>) -> Self {
        self.config.collection_name = name.into();
        self
    }

    /// Set the directory for persisted vector index files.
    pub fn vector_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.vector_dir = dir.into();
        self
    }

    /// Set the directory for per-document JSON records.
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.data_dir = dir.into();
        self
    }

    /// Set the vector store backend by registered name.
    pub fn store(mut self, name: impl Into<String>) -> Self {
        self.config.store = name.into();
        self
    }

    /// Set the distance function.
    pub fn distance(mut self, distance: DistanceFunction) -> Self {
        self.config.distance = distance;
        self
    }

    /// Set the embedding dimensionality.
    pub fn embedding_dimension(mut self, dimension: usize) -> Self {
        self.config.embedding_dimension = dimension;
        self
    }

    /// Set the embedding model name.
    pub fn embedding_model(mut self, model: impl Into<String>) -> Self {
        self.config.embedding_model = model.into();
        self
    }

    /// Point at an Ollama server for embeddings.
    pub fn ollama_url(mut self, url: impl Into<String>) -> Self {
        self.config.ollama_url = Some(url.into());
        self
    }

    /// Point at a Qdrant server for the `qdrant` backend.
    pub fn qdrant_url(mut self, url: impl Into<String>) -> Self {
        self.config.qdrant_url = Some(url.into());
        self
    }

    /// Force the deterministic hash embedder.
    pub fn force_simple_embeddings(mut self, force: bool) -> Self {
        self.config.force_simple_embeddings = force;
        self
    }

    /// Set the maximum chunk size in characters.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive chunks in characters.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Set the split strategy.
    pub fn split_by(mut self, strategy: SplitStrategy) -> Self {
        self.config.split_by = strategy;
        self
    }

    /// Set the default search result limit.
    pub fn search_limit(mut self, limit: usize) -> Self {
        self.config.search_limit = limit;
        self
    }

    /// Set the minimum similarity threshold for search results.
    pub fn search_threshold(mut self, threshold: f32) -> Self {
        self.config.search_threshold = threshold;
        self
    }

    /// Set the number of projection trees for the approximate backend.
    pub fn n_trees(mut self, n_trees: usize) -> Self {
        self.config.n_trees = n_trees;
        self
    }

    /// Build the [`KbConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::Config`] if:
    /// - `chunk_overlap >= chunk_size`
    /// - `search_limit == 0`
    /// - `embedding_dimension == 0`
    /// - `n_trees == 0`
    pub fn build(self) -> Result<KbConfig> {
        if self.config.chunk_overlap >= self.config.chunk_size {
            return Err(KbError::Config(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.config.chunk_overlap, self.config.chunk_size
            )));
        }
        if self.config.search_limit == 0 {
            return Err(KbError::Config("search_limit must be greater than zero".to_string()));
        }
        if self.config.embedding_dimension == 0 {
            return Err(KbError::Config(
                "embedding_dimension must be greater than zero".to_string(),
            ));
        }
        if self.config.n_trees == 0 {
            return Err(KbError::Config("n_trees must be greater than zero".to_string()));
        }
        Ok(self.config)
    }
}
