use std::hash::Hash;
use linked_hash_map::LinkedHashMap;
use parking_lot::Mutex;

/// LRU eviction policy over a set of candidate values. The map keeps
/// insertion order, so the front is always the least recently used entry;
/// every operation is O(1) under a single internal mutex.
pub struct LRUReplacer<T> {
    entries: Mutex<LinkedHashMap<T, ()>>,
}

impl<T: Hash + Eq + Clone> LRUReplacer<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(LinkedHashMap::new()),
        }
    }

    /// Make `value` the most recently used entry
    pub fn insert(&self, value: T) {
        let mut entries = self.entries.lock();
        entries.remove(&value);
        entries.insert(value, ());
    }

    /// Pop the least recently used entry
    pub fn victim(&self) -> Option<T> {
        self.entries.lock().pop_front().map(|(value, _)| value)
    }

    /// Remove `value`; returns whether it was present
    pub fn erase(&self, value: &T) -> bool {
        self.entries.lock().remove(value).is_some()
    }

    pub fn size(&self) -> usize {
        self.entries.lock().len()
    }
}

impl<T: Hash + Eq + Clone> Default for LRUReplacer<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_victim_order_is_lru() {
        let replacer = LRUReplacer::new();
        replacer.insert(1);
        replacer.insert(2);
        replacer.insert(3);
        assert_eq!(replacer.size(), 3);

        assert_eq!(replacer.victim(), Some(1));
        assert_eq!(replacer.victim(), Some(2));
        assert_eq!(replacer.victim(), Some(3));
        assert_eq!(replacer.victim(), None);
    }

    #[test]
    fn test_reinsert_moves_to_front() {
        let replacer = LRUReplacer::new();
        replacer.insert(1);
        replacer.insert(2);
        replacer.insert(1); // 1 becomes most recent

        assert_eq!(replacer.victim(), Some(2));
        assert_eq!(replacer.victim(), Some(1));
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_erase() {
        let replacer = LRUReplacer::new();
        replacer.insert(1);
        replacer.insert(2);

        assert!(replacer.erase(&1));
        assert!(!replacer.erase(&1));
        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.victim(), Some(2));
    }
}
