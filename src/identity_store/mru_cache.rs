use std::collections::VecDeque;

/// Bounded cache of the most recently resolved identities.
///
/// Entries are kept in recency order, most recent first. Capacities are small
/// (tens of entries) so a linear scan beats hashing the key twice.
#[derive(Debug)]
pub struct MruCache<K, V> {
    entries: VecDeque<(K, V)>,
    capacity: usize,
}

impl<K: PartialEq, V: Copy> MruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn get(&mut self, key: &K) -> Option<V> {
        let position = self.entries.iter().position(|(k, _)| k == key)?;
        let entry = self.entries.remove(position)?;
        let value = entry.1;
        self.entries.push_front(entry);
        Some(value)
    }

    pub fn insert(&mut self, key: K, value: V) {
        if self.capacity == 0 {
            return;
        }
        if let Some(position) = self.entries.iter().position(|(k, _)| *k == key) {
            self.entries.remove(position);
        }
        self.entries.push_front((key, value));
        self.entries.truncate(self.capacity);
    }

    /// Drop every entry for which `keep` returns false.
    pub fn retain<F: FnMut(&K, &V) -> bool>(&mut self, mut keep: F) {
        self.entries.retain(|(k, v)| keep(k, v));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_recently_used() {
        let mut cache = MruCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.get(&"a"), Some(1));
        cache.insert("c", 3);

        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"c"), Some(3));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn reinsert_replaces_value() {
        let mut cache = MruCache::new(4);
        cache.insert("a", 1);
        cache.insert("a", 7);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"a"), Some(7));
    }

    #[test]
    fn zero_capacity_caches_nothing() {
        let mut cache = MruCache::new(0);
        cache.insert("a", 1);
        assert_eq!(cache.get(&"a"), None);
    }

    #[test]
    fn retain_invalidates() {
        let mut cache = MruCache::new(4);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.retain(|_, v| *v != 1);
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.get(&"b"), Some(2));
    }
}
