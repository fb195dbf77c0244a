//! Script-visible key/value state that survives reruns.
//!
//! The store is shared with the worker, which reads and writes it while a
//! script runs, so it carries its own lock. Clearing empties it in place:
//! every clone keeps pointing at the same, now empty, map.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;

#[derive(Debug, Clone, Default)]
pub struct SessionStateStore {
    inner: Arc<RwLock<BTreeMap<String, Value>>>,
}

impl SessionStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.read(|map| map.get(key).cloned())
    }

    /// Sets `key`, returning the previous value.
    pub fn set(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.write(|map| map.insert(key.into(), value))
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.write(|map| map.remove(key))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.read(|map| map.contains_key(key))
    }

    pub fn len(&self) -> usize {
        self.read(BTreeMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.read(BTreeMap::is_empty)
    }

    /// Removes every entry, keeping the store's identity.
    pub fn clear(&self) {
        self.write(BTreeMap::clear);
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.read(BTreeMap::clone)
    }

    /// True when both handles refer to the same underlying store.
    pub fn same_store(&self, other: &SessionStateStore) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn read<R>(&self, f: impl FnOnce(&BTreeMap<String, Value>) -> R) -> R {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    fn write<R>(&self, f: impl FnOnce(&mut BTreeMap<String, Value>) -> R) -> R {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}
