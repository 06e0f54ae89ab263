//! Backend registry.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::config::KbConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{KbError, Result};
use crate::flat::FlatVectorStore;
use crate::memory::MemoryVectorStore;
use crate::rptree::RpTreeVectorStore;
use crate::vectorstore::VectorIndex;

/// Constructs a backend from configuration and an embedding provider.
pub type StoreFactory =
    Arc<dyn Fn(&KbConfig, Arc<dyn EmbeddingProvider>) -> Result<Arc<dyn VectorIndex>> + Send + Sync>;

/// Explicit name-to-factory map for vector store backends.
///
/// Built-in backends are registered by [`StoreRegistry::with_defaults`];
/// additional ones can be added with [`register`](StoreRegistry::register).
/// Selecting an unknown name is an error listing what is available.
pub struct StoreRegistry {
    factories: HashMap<String, StoreFactory>,
}

impl StoreRegistry {
    /// An empty registry with no backends.
    pub fn new() -> Self {
        Self { factories: HashMap::new() }
    }

    /// A registry with every compiled-in backend registered.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(crate::memory::BACKEND, Arc::new(make_memory));
        registry.register(crate::flat::BACKEND, Arc::new(make_flat));
        registry.register(crate::rptree::BACKEND, Arc::new(make_rptree));
        #[cfg(feature = "qdrant")]
        registry.register(crate::qdrant::BACKEND, Arc::new(crate::qdrant::make_qdrant));
        registry
    }

    /// Register (or replace) a backend factory under `name`.
    pub fn register(&mut self, name: impl Into<String>, factory: StoreFactory) {
        let name = name.into();
        debug!(backend = %name, "registered vector store backend");
        self.factories.insert(name, factory);
    }

    /// Names of all registered backends, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Construct the backend registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::Config`] naming the available backends when
    /// `name` is not registered.
    pub fn create(
        &self,
        name: &str,
        config: &KbConfig,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<Arc<dyn VectorIndex>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            KbError::Config(format!(
                "unknown vector store backend '{name}' (available: {})",
                self.names().join(", ")
            ))
        })?;
        factory(config, provider)
    }
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn make_memory(
    config: &KbConfig,
    provider: Arc<dyn EmbeddingProvider>,
) -> Result<Arc<dyn VectorIndex>> {
    Ok(Arc::new(MemoryVectorStore::new(provider, config.distance)))
}

fn make_flat(
    config: &KbConfig,
    provider: Arc<dyn EmbeddingProvider>,
) -> Result<Arc<dyn VectorIndex>> {
    Ok(Arc::new(FlatVectorStore::open(
        &config.vector_dir,
        &config.collection_name,
        provider,
        config.distance,
    )?))
}

fn make_rptree(
    config: &KbConfig,
    provider: Arc<dyn EmbeddingProvider>,
) -> Result<Arc<dyn VectorIndex>> {
    Ok(Arc::new(RpTreeVectorStore::open(
        &config.vector_dir,
        &config.collection_name,
        provider,
        config.distance,
        config.n_trees,
    )?))
}
