//! Concurrent handle registries for consumers and producers.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

/// A mutex-protected map from generated tag/id to a live handle.
///
/// Mutated by the session-owning thread and the closing path, read by the
/// dispatcher. [`snapshot`](Self::snapshot) yields a consistent copy for
/// iteration during close, so handles can deregister themselves without
/// invalidating the iteration.
#[derive(Debug)]
pub struct Registry<K, V> {
    entries: Mutex<HashMap<K, Arc<V>>>,
}

impl<K: Eq + Hash + Clone, V> Registry<K, V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Insert a handle under its key, replacing any previous handle.
    pub fn insert(&self, key: K, handle: Arc<V>) {
        self.entries.lock().unwrap().insert(key, handle);
    }

    /// Remove and return the handle registered under `key`.
    pub fn remove(&self, key: &K) -> Option<Arc<V>> {
        self.entries.lock().unwrap().remove(key)
    }

    /// Look up the handle registered under `key`.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    /// A point-in-time copy of all registered handles.
    pub fn snapshot(&self) -> Vec<Arc<V>> {
        self.entries.lock().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Eq + Hash + Clone, V> Default for Registry<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove() {
        let registry: Registry<String, u32> = Registry::new();
        registry.insert("1-1".into(), Arc::new(42));
        assert_eq!(registry.get(&"1-1".to_string()).as_deref(), Some(&42));
        assert_eq!(registry.len(), 1);

        let removed = registry.remove(&"1-1".to_string());
        assert_eq!(removed.as_deref(), Some(&42));
        assert!(registry.is_empty());
        assert!(registry.get(&"1-1".to_string()).is_none());
    }

    #[test]
    fn snapshot_is_stable_under_mutation() {
        let registry: Registry<u64, u64> = Registry::new();
        for id in 0..5 {
            registry.insert(id, Arc::new(id));
        }
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 5);

        // Removing entries does not invalidate the snapshot.
        for id in 0..5 {
            registry.remove(&id);
        }
        assert!(registry.is_empty());
        assert_eq!(snapshot.len(), 5);
    }

    #[test]
    fn insert_replaces_existing_handle() {
        let registry: Registry<String, u32> = Registry::new();
        registry.insert("tag".into(), Arc::new(1));
        registry.insert("tag".into(), Arc::new(2));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&"tag".to_string()).as_deref(), Some(&2));
    }

    #[test]
    fn concurrent_insert_and_lookup() {
        let registry: Arc<Registry<u64, u64>> = Arc::new(Registry::new());
        let writers: Vec<_> = (0..4)
            .map(|t| {
                let r = registry.clone();
                std::thread::spawn(move || {
                    for i in 0..100u64 {
                        r.insert(t * 100 + i, Arc::new(i));
                    }
                })
            })
            .collect();
        for w in writers {
            w.join().unwrap();
        }
        assert_eq!(registry.len(), 400);
    }
}
