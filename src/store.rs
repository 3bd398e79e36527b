//! The entity-store capability: keyed find-or-create persistence for seeds and predictions.

use std::hash::Hash;
use std::sync::{Arc, RwLock};

use rustc_hash::FxHashMap;

pub trait KeyedStore<K, V> {
    /// Returns the unique stored entity under `key`, invoking `compute` to produce it if absent.
    /// A failed `compute` stores nothing.
    fn find_or_create<F>(&self, key: &K, compute: F) -> anyhow::Result<Arc<V>>
    where
        F: FnOnce() -> anyhow::Result<V>;

    fn remove(&self, key: &K) -> bool;
}

/// Process-lifetime store backing the batch driver and tests. `compute` runs outside the lock, so
/// two concurrent creators may both compute; the first insertion wins and both observe it.
pub struct MemoryStore<K, V> {
    entries: RwLock<FxHashMap<K, Arc<V>>>,
}
impl<K, V> Default for MemoryStore<K, V> {
    fn default() -> Self {
        Self {
            entries: RwLock::default(),
        }
    }
}
impl<K: Clone + Eq + Hash, V> MemoryStore<K, V> {
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }

    /// Keeps only the entries satisfying `predicate`; used to purge records persisted under a
    /// superseded schema version.
    pub fn retain(&self, mut predicate: impl FnMut(&K, &Arc<V>) -> bool) {
        self.entries
            .write()
            .unwrap()
            .retain(|key, value| predicate(key, value));
    }
}
impl<K: Clone + Eq + Hash, V> KeyedStore<K, V> for MemoryStore<K, V> {
    fn find_or_create<F>(&self, key: &K, compute: F) -> anyhow::Result<Arc<V>>
    where
        F: FnOnce() -> anyhow::Result<V>,
    {
        if let Some(existing) = self.entries.read().unwrap().get(key) {
            return Ok(existing.clone());
        }
        let computed = Arc::new(compute()?);
        let mut entries = self.entries.write().unwrap();
        Ok(entries.entry(key.clone()).or_insert(computed).clone())
    }

    fn remove(&self, key: &K) -> bool {
        self.entries.write().unwrap().remove(key).is_some()
    }
}
