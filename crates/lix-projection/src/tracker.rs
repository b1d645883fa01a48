use std::collections::HashMap;
use std::hash::Hash;

/// Ordered multimap accumulator.
///
/// Groups values under structurally-equal keys and iterates them in the
/// order each key was first seen. Lookups are O(1). There is no removal:
/// a tracker lives for one invocation and is then dropped.
#[derive(Clone, Debug)]
pub struct ChangeTracker<K, V> {
    index: HashMap<K, usize>,
    entries: Vec<(K, V)>,
}

impl<K, V> Default for ChangeTracker<K, V> {
    fn default() -> Self {
        Self {
            index: HashMap::new(),
            entries: Vec::new(),
        }
    }
}

impl<K: Clone + Eq + Hash, V> ChangeTracker<K, V> {
    /// An empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing value for `key`, or a new one from `factory` recorded at the
    /// end of the iteration order.
    pub fn get_or_insert_with(&mut self, key: K, factory: impl FnOnce() -> V) -> &mut V {
        let idx = match self.index.get(&key) {
            Some(&idx) => idx,
            None => {
                let idx = self.entries.len();
                self.index.insert(key.clone(), idx);
                self.entries.push((key, factory()));
                idx
            }
        };
        &mut self.entries[idx].1
    }

    /// Value recorded for `key`, if any.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.index.get(key).map(|&idx| &self.entries[idx].1)
    }

    /// Entries in first-insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    /// Keys in first-insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.iter().map(|(k, _)| k)
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iterates_in_first_seen_order() {
        let mut tracker: ChangeTracker<(i64, i64), Vec<&str>> = ChangeTracker::new();
        tracker.get_or_insert_with((2, 10), Vec::new).push("a");
        tracker.get_or_insert_with((1, 10), Vec::new).push("b");
        tracker.get_or_insert_with((2, 10), Vec::new).push("c");
        tracker.get_or_insert_with((1, 11), Vec::new).push("d");

        let seen: Vec<_> = tracker.iter().map(|(k, v)| (*k, v.clone())).collect();
        assert_eq!(
            seen,
            vec![
                ((2, 10), vec!["a", "c"]),
                ((1, 10), vec!["b"]),
                ((1, 11), vec!["d"]),
            ]
        );
    }

    #[test]
    fn factory_runs_once_per_key() {
        let mut tracker: ChangeTracker<String, u32> = ChangeTracker::new();
        let mut calls = 0;
        for _ in 0..3 {
            *tracker.get_or_insert_with("k".to_string(), || {
                calls += 1;
                0
            }) += 1;
        }
        assert_eq!(calls, 1);
        assert_eq!(tracker.get(&"k".to_string()), Some(&3));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn empty_tracker() {
        let tracker: ChangeTracker<u8, u8> = ChangeTracker::default();
        assert!(tracker.is_empty());
        assert_eq!(tracker.keys().count(), 0);
        assert_eq!(tracker.get(&1), None);
    }
}
