//! Dirty-key tracking
//!
//! A [`DirtySet`] records every key touched since the last clear, together
//! with the values involved in each touch. Membership does not depend on
//! whether a touch changed anything: an insert immediately undone by a
//! remove still leaves the key dirty.

use hashbrown::HashMap;
use std::hash::Hash;

/// Keys touched in the current propagation round
#[derive(Debug, Clone)]
pub struct DirtySet<K, V = ()> {
    entries: HashMap<K, Vec<V>>,
}

impl<K: Eq + Hash, V> DirtySet<K, V> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Mark `key` dirty, remembering `value` as one of the values touched.
    pub fn mark(&mut self, key: K, value: V) {
        self.entries.entry(key).or_default().push(value);
    }

    /// Mark `key` dirty without recording a value.
    pub fn mark_key(&mut self, key: K) {
        self.entries.entry(key).or_default();
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Values touched under `key` this round, in touch order
    pub fn values(&self, key: &K) -> &[V] {
        self.entries.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Touched keys, in no particular order
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &[V])> {
        self.entries.iter().map(|(k, vs)| (k, vs.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<K: Eq + Hash, V> Default for DirtySet<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_and_values() {
        let mut dirty: DirtySet<&str, u32> = DirtySet::new();
        dirty.mark("a", 1);
        dirty.mark("a", 2);
        dirty.mark("b", 3);

        assert_eq!(dirty.len(), 2);
        assert_eq!(dirty.values(&"a"), &[1, 2]);
        assert_eq!(dirty.values(&"c"), &[] as &[u32]);
    }

    #[test]
    fn test_mark_key_only() {
        let mut dirty: DirtySet<u32> = DirtySet::new();
        dirty.mark_key(7);
        assert!(dirty.contains(&7));
        assert!(dirty.values(&7).is_empty());

        dirty.clear();
        assert!(dirty.is_empty());
    }
}
