//! Cache Registry Module
//!
//! Named stores built once at startup and passed explicitly to whoever needs them.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cache::{CacheStore, MemoryStore};
use crate::error::{CacheError, Result};

/// Name of the store used when no name is given.
pub const DEFAULT_CACHE: &str = "default";

#[derive(Debug, Clone, Default)]
pub struct CacheRegistry {
    caches: BTreeMap<String, Arc<dyn CacheStore>>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding a single in-memory store under [`DEFAULT_CACHE`].
    pub fn with_default_memory_store() -> Self {
        let mut registry = Self::new();
        registry.register(DEFAULT_CACHE, Arc::new(MemoryStore::new()));
        registry
    }

    /// Registers a store, replacing any previous store with the same name.
    pub fn register(&mut self, name: impl Into<String>, store: Arc<dyn CacheStore>) {
        self.caches.insert(name.into(), store);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn CacheStore>> {
        self.caches
            .get(name)
            .cloned()
            .ok_or_else(|| CacheError::UnknownCache(name.to_string()))
    }

    pub fn default_store(&self) -> Result<Arc<dyn CacheStore>> {
        self.get(DEFAULT_CACHE)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn CacheStore>)> {
        self.caches.iter().map(|(name, store)| (name.as_str(), store))
    }

    pub fn len(&self) -> usize {
        self.caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }
}
