use std::{
    collections::HashMap,
    hash::Hash,
    sync::{Arc, Weak},
};

use parking_lot::Mutex;

/// A cache that does not keep its entries alive.
///
/// Used for resolved-routine lookups: the cache remembers what a name
/// resolved to for as long as somebody else owns the target.
#[derive(Debug)]
pub struct WeakCache<K, V> {
    entries: Mutex<HashMap<K, Weak<V>>>,
}

impl<K: Eq + Hash, V> Default for WeakCache<K, V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash, V> WeakCache<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let mut entries = self.entries.lock();
        match entries.get(key).map(Weak::upgrade) {
            Some(Some(value)) => Some(value),
            Some(None) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: K, value: &Arc<V>) {
        self.entries.lock().insert(key, Arc::downgrade(value));
    }

    pub fn remove<Q>(&self, key: &Q) -> bool
    where
        K: std::borrow::Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.entries.lock().remove(key).is_some()
    }

    /// Drops entries whose target is gone. Returns how many were removed.
    pub fn purge(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, v| v.strong_count() > 0);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_do_not_outlive_owner() {
        let cache = WeakCache::new();
        let routine = Arc::new(String::from("body"));
        cache.insert("R", &routine);
        assert_eq!(cache.get(&"R").as_deref(), Some(&String::from("body")));

        drop(routine);
        assert!(cache.get(&"R").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn purge_removes_dead_entries() {
        let cache = WeakCache::new();
        let live = Arc::new(1);
        let dead = Arc::new(2);
        cache.insert("live", &live);
        cache.insert("dead", &dead);
        drop(dead);
        assert_eq!(cache.purge(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn removed_entries_miss_while_target_lives() {
        let cache: WeakCache<String, u32> = WeakCache::new();
        let live = Arc::new(7);
        cache.insert("K".to_string(), &live);
        assert!(cache.remove("K"));
        assert!(cache.get(&"K".to_string()).is_none());
        assert!(!cache.remove("K"));
    }
}
