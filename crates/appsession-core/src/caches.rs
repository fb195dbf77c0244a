//! Process-wide caches the session can clear on request.
//!
//! Each cache is an injected capability; the session holds a fixed
//! `CacheRegistry` instead of reaching into global state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tracing::debug;

/// A cache that can be emptied on demand.
pub trait ClearableCache: Send + Sync {
    fn name(&self) -> &str;

    /// Drops every entry. Clearing an empty cache is a no-op.
    fn clear(&self);
}

/// Fixed list of caches cleared together.
#[derive(Clone, Default)]
pub struct CacheRegistry {
    caches: Vec<Arc<dyn ClearableCache>>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, cache: Arc<dyn ClearableCache>) -> Self {
        self.caches.push(cache);
        self
    }

    pub fn register(&mut self, cache: Arc<dyn ClearableCache>) {
        self.caches.push(cache);
    }

    pub fn len(&self) -> usize {
        self.caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }

    /// Clears every registered cache exactly once.
    pub fn clear_all(&self) {
        for cache in &self.caches {
            debug!(cache = cache.name(), "Clearing cache");
            cache.clear();
        }
    }
}

impl std::fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.caches.iter().map(|cache| cache.name()))
            .finish()
    }
}

/// Thread-safe memo table keyed by a caller-computed string.
#[derive(Debug)]
pub struct MemoCache {
    name: String,
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoCache {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    pub fn insert(&self, key: impl Into<String>, value: Value) {
        self.lock().insert(key.into(), value);
    }

    /// Returns the cached value for `key`, computing and storing it on a miss.
    pub fn get_or_insert_with(&self, key: &str, compute: impl FnOnce() -> Value) -> Value {
        if let Some(hit) = self.get(key) {
            return hit;
        }
        let value = compute();
        self.insert(key, value.clone());
        value
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Value>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ClearableCache for MemoCache {
    fn name(&self) -> &str {
        &self.name
    }

    fn clear(&self) {
        self.lock().clear();
    }
}
