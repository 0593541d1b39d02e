//! Concurrent needle index.
//!
//! Maps needle ids to their on-disk descriptors. The index is volatile: the
//! store rebuilds it from volume scans at startup, so nothing here touches
//! disk. All operations are atomic relative to one another and safe under
//! arbitrary concurrent callers.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::RwLock;

use crate::types::Needle;

/// Thread-safe map from needle id to [`Needle`], with insert-only puts.
///
/// `put` never overwrites: a colliding insert is refused and reported, which
/// is what lets the store detect duplicate needle ids and tombstone the
/// just-written record.
#[derive(Debug, Default)]
pub struct NeedleIndex {
    map: RwLock<HashMap<u64, Needle>>,
}

impl NeedleIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a needle by id, returning a copy of its descriptor.
    pub fn get(&self, needle_id: u64) -> Option<Needle> {
        let map = self.map.read().expect("needle index lock poisoned");
        map.get(&needle_id).copied()
    }

    /// Insert a descriptor if the id is absent.
    ///
    /// Returns `true` if the descriptor was inserted, `false` if the id was
    /// already taken (the existing entry is left untouched).
    pub fn put(&self, needle_id: u64, needle: Needle) -> bool {
        let mut map = self.map.write().expect("needle index lock poisoned");
        match map.entry(needle_id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(needle);
                true
            }
        }
    }

    /// Remove a descriptor by id. Returns `true` if an entry was removed.
    pub fn remove(&self, needle_id: u64) -> bool {
        let mut map = self.map.write().expect("needle index lock poisoned");
        map.remove(&needle_id).is_some()
    }

    /// Number of needles currently indexed.
    pub fn len(&self) -> usize {
        let map = self.map.read().expect("needle index lock poisoned");
        map.len()
    }

    /// Whether the index holds no needles.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_put_remove_round_trip() {
        let index = NeedleIndex::new();
        assert!(index.is_empty());
        assert_eq!(index.get(1), None);

        let needle = Needle::new(0, 0, 1, 10);
        assert!(index.put(1, needle));
        assert_eq!(index.get(1), Some(needle));
        assert_eq!(index.len(), 1);

        assert!(index.remove(1));
        assert_eq!(index.get(1), None);
        assert!(!index.remove(1), "second remove finds nothing");
    }

    #[test]
    fn put_refuses_duplicates_and_keeps_the_original() {
        let index = NeedleIndex::new();
        let first = Needle::new(0, 0, 7, 10);
        let second = Needle::new(1, 340, 7, 99);

        assert!(index.put(7, first));
        assert!(!index.put(7, second));
        assert_eq!(index.get(7), Some(first));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn survives_concurrent_mutation() {
        let index = NeedleIndex::new();

        std::thread::scope(|scope| {
            for worker in 0..4u64 {
                let index = &index;
                scope.spawn(move || {
                    for i in 0..250u64 {
                        let id = worker * 1000 + i;
                        assert!(index.put(id, Needle::new(0, id * 17, id, 0)));
                        assert!(index.get(id).is_some());
                    }
                });
            }
        });

        assert_eq!(index.len(), 1000);

        // Every entry is intact after the dust settles.
        for worker in 0..4u64 {
            for i in 0..250u64 {
                let id = worker * 1000 + i;
                assert_eq!(index.get(id), Some(Needle::new(0, id * 17, id, 0)));
            }
        }
    }
}
