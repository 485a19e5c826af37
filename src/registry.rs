//! Collection Registry
//!
//! Guarded collections keyed by collection name. Replay and the review
//! view resolve a proposal's `source` through it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use bouncer_core::{BouncerError, BouncerResult};

use crate::interceptor::GuardedCollection;

/// Registry that holds all guarded collections
pub struct CollectionRegistry {
    collections: RwLock<HashMap<String, Arc<GuardedCollection>>>,
}

impl CollectionRegistry {
    /// Creates a new empty registry
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a collection under its store's collection name
    ///
    /// A collection registered under the same name is replaced.
    pub fn register(&self, collection: Arc<GuardedCollection>) {
        let name = collection.name().to_string();
        if self
            .collections
            .write()
            .insert(name.clone(), collection)
            .is_some()
        {
            warn!(collection = %name, "Replaced an already registered collection");
        } else {
            debug!(collection = %name, "Collection registered");
        }
    }

    /// Gets a collection by name
    pub fn get(&self, name: &str) -> BouncerResult<Arc<GuardedCollection>> {
        self.collections
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| BouncerError::collection_not_found(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.collections.read().contains_key(name)
    }

    /// Lists registered collection names, sorted
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the number of registered collections
    pub fn len(&self) -> usize {
        self.collections.read().len()
    }

    /// Returns true if no collections are registered
    pub fn is_empty(&self) -> bool {
        self.collections.read().is_empty()
    }
}

impl Default for CollectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::{BouncerConfig, InterceptionEngine};
    use bouncer_stores::{MemoryDatabase, MemoryProposalStore, MemoryRecordStore};

    fn guarded(db: &Arc<MemoryDatabase>, name: &str) -> Arc<GuardedCollection> {
        let engine = InterceptionEngine::new(
            BouncerConfig::default(),
            Arc::new(MemoryProposalStore::new(Arc::clone(db))),
            db.clone(),
        );
        Arc::new(GuardedCollection::new(
            Arc::new(MemoryRecordStore::new(Arc::clone(db), name)),
            Arc::new(engine),
        ))
    }

    #[test]
    fn test_registry_lookup() {
        let db = MemoryDatabase::new();
        let registry = CollectionRegistry::new();
        assert!(registry.is_empty());

        registry.register(guarded(&db, "Posts"));
        registry.register(guarded(&db, "Articles"));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.list(), vec!["Articles", "Posts"]);
        assert!(registry.contains("Posts"));
        assert_eq!(registry.get("Articles").unwrap().name(), "Articles");
    }

    #[test]
    fn test_unknown_collection() {
        let registry = CollectionRegistry::default();
        let err = registry.get("Missing").err().unwrap();
        assert!(matches!(err, BouncerError::CollectionNotFound { .. }));
    }
}
