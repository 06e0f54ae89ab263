//! # bookkb
//!
//! Vector-store core for book-scale knowledge bases: document chunking,
//! embedding with a deterministic offline fallback, and pluggable vector
//! index backends behind one search contract.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use bookkb::{Document, DocumentStore, KbConfig};
//!
//! let config = KbConfig::builder()
//!     .collection_name("library")
//!     .store("flat")
//!     .build()?;
//! let store = DocumentStore::from_config(&config)?;
//!
//! store.add_document(&Document::new("moby-dick", text)).await?;
//! let context = store.retrieve_context("the white whale", None, None).await?;
//! ```
//!
//! ## Backends
//!
//! | Name | Persistence | Search |
//! |------|-------------|--------|
//! | `simple` | none | exact |
//! | `flat` | local files | exact |
//! | `rptree` | local files | approximate (projection forest) |
//! | `qdrant` (feature) | Qdrant server | server-side |
//!
//! Without a configured embedding server, texts are embedded with a
//! deterministic hash scheme: stable and offline, but non-semantic.

pub mod chunking;
pub mod config;
pub mod document;
pub mod embedding;
mod entries;
pub mod error;
pub mod flat;
pub mod memory;
pub mod registry;
pub mod rptree;
pub mod store;
pub mod vectorstore;

#[cfg(feature = "ollama")]
pub mod ollama;

#[cfg(feature = "qdrant")]
pub mod qdrant;

pub use chunking::{Chunker, SplitStrategy};
pub use config::{KbConfig, KbConfigBuilder};
pub use document::{Chunk, Document, GetResult, Metadata, SearchResult, StoreStats};
pub use embedding::{
    fallback_vector, resolve_embedder, DegradedReason, EmbedderSelection, EmbeddingProvider,
    HashEmbedder, SafeEmbedder,
};
pub use error::{KbError, Result};
pub use flat::FlatVectorStore;
pub use memory::MemoryVectorStore;
pub use registry::{StoreFactory, StoreRegistry};
pub use rptree::RpTreeVectorStore;
pub use store::DocumentStore;
pub use vectorstore::{DistanceFunction, Filter, VectorIndex};
