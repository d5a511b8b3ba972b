use std::mem;

use crate::error::Result;
use crate::trigram::Trigram;
use crate::DocId;

/// Number of buckets in the pending table. A prime, so that `trigram mod
/// buckets` does not collapse to the low bits of the trigram.
const BUCKET_COUNT: usize = 9973;

/// Minimum number of extra id slots to reserve when an entry grows.
const MIN_SLOTS: usize = 4;

/// One trigram's buffered changes: the ids added to and removed from its
/// doclist since the last flush. Both sides are sorted and disjoint.
struct Entry {
    trigram: Trigram,
    added: Vec<DocId>,
    removed: Vec<DocId>,
}

impl Entry {
    fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    fn footprint(&self) -> usize {
        mem::size_of::<Entry>()
            + (self.added.capacity() + self.removed.capacity()) * mem::size_of::<DocId>()
    }
}

/// A drained entry, handed out by value. The arrays stay valid for as long
/// as the caller holds them.
pub struct PendingEntry {
    pub trigram: Trigram,
    pub added: Vec<DocId>,
    pub removed: Vec<DocId>,
}

/// Fixed-bucket hash table buffering per-trigram insert/delete operations
/// until they are flushed into the persisted doclists.
///
/// Buckets are keyed on `trigram mod BUCKET_COUNT`; each bucket's chain is
/// kept sorted by trigram value ascending so lookups terminate early. An add
/// of an id pending removal cancels the removal (and vice versa), so an
/// entry records the net change only.
pub struct PendingMap {
    buckets: Vec<Vec<Entry>>,
    memory: usize,
}

impl PendingMap {
    pub fn new() -> Self {
        let mut buckets = Vec::with_capacity(BUCKET_COUNT);
        buckets.resize_with(BUCKET_COUNT, Vec::new);
        Self { buckets, memory: 0 }
    }

    fn bucket(trigram: Trigram) -> usize {
        trigram.as_u32() as usize % BUCKET_COUNT
    }

    /// Borrow the buffered changes for `trigram`, if any.
    pub fn find(&self, trigram: Trigram) -> Option<(&[DocId], &[DocId])> {
        let chain = &self.buckets[Self::bucket(trigram)];
        let entry = match chain.binary_search_by_key(&trigram, |e| e.trigram) {
            Ok(i) => &chain[i],
            Err(_) => return None,
        };
        Some((&entry.added, &entry.removed))
    }

    /// Record that `id` now contains `trigram`. Returns false if this was a
    /// no-op (the id was already pending addition).
    pub fn add(&mut self, trigram: Trigram, id: DocId) -> Result<bool> {
        self.apply(trigram, id, Side::Added)
    }

    /// Record that `id` no longer contains `trigram`. Returns false if this
    /// was a no-op.
    pub fn remove(&mut self, trigram: Trigram, id: DocId) -> Result<bool> {
        self.apply(trigram, id, Side::Removed)
    }

    fn apply(&mut self, trigram: Trigram, id: DocId, side: Side) -> Result<bool> {
        let chain = &mut self.buckets[Self::bucket(trigram)];
        let idx = match chain.binary_search_by_key(&trigram, |e| e.trigram) {
            Ok(i) => i,
            Err(i) => {
                let entry = Entry {
                    trigram,
                    added: Vec::new(),
                    removed: Vec::new(),
                };
                self.memory += entry.footprint();
                chain.insert(i, entry);
                i
            }
        };
        let entry = &mut chain[idx];

        // A change that inverts a pending change cancels it instead.
        let opposite = match side {
            Side::Added => &mut entry.removed,
            Side::Removed => &mut entry.added,
        };
        if let Ok(pos) = opposite.binary_search(&id) {
            opposite.remove(pos);
            return Ok(true);
        }

        let target = match side {
            Side::Added => &mut entry.added,
            Side::Removed => &mut entry.removed,
        };
        let pos = match target.binary_search(&id) {
            Ok(_) => return Ok(false),
            Err(pos) => pos,
        };
        if target.len() == target.capacity() {
            // Growth factor 1.5, never fewer than MIN_SLOTS extra slots.
            let extra = (target.len() / 2).max(MIN_SLOTS);
            target.try_reserve_exact(extra)?;
            self.memory += extra * mem::size_of::<DocId>();
        }
        target.insert(pos, id);
        Ok(true)
    }

    /// True when no net change is buffered.
    pub fn is_empty(&self) -> bool {
        self.buckets
            .iter()
            .flatten()
            .all(|entry| entry.is_empty())
    }

    /// Discard all buffered changes.
    pub fn reset(&mut self) {
        for chain in &mut self.buckets {
            chain.clear();
            chain.shrink_to_fit();
        }
        self.memory = 0;
    }

    /// Estimated memory held by the buffered changes, for backpressure.
    pub fn approx_memory(&self) -> usize {
        self.memory
    }

    /// Drain the table: yields each non-empty entry exactly once, removing
    /// it as it goes. Entries left undrained stay in the table.
    pub fn drain(&mut self) -> PendingDrain<'_> {
        PendingDrain {
            table: self,
            bucket: 0,
        }
    }
}

impl Default for PendingMap {
    fn default() -> Self {
        Self::new()
    }
}

enum Side {
    Added,
    Removed,
}

pub struct PendingDrain<'a> {
    table: &'a mut PendingMap,
    bucket: usize,
}

impl Iterator for PendingDrain<'_> {
    type Item = PendingEntry;

    fn next(&mut self) -> Option<PendingEntry> {
        while self.bucket < BUCKET_COUNT {
            match self.table.buckets[self.bucket].pop() {
                Some(entry) => {
                    self.table.memory = self.table.memory.saturating_sub(entry.footprint());
                    if entry.is_empty() {
                        continue;
                    }
                    return Some(PendingEntry {
                        trigram: entry.trigram,
                        added: entry.added,
                        removed: entry.removed,
                    });
                }
                None => self.bucket += 1,
            }
        }
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use quickcheck::quickcheck;

    fn tri(s: &[u8; 3]) -> Trigram {
        Trigram::from_bytes(s[0], s[1], s[2])
    }

    #[test]
    fn add_keeps_ids_sorted_and_unique() {
        let mut map = PendingMap::new();
        for id in [5, 1, 3, 1, 9] {
            map.add(tri(b"abc"), id).unwrap();
        }
        let (added, removed) = map.find(tri(b"abc")).unwrap();
        assert_eq!(added, &[1, 3, 5, 9]);
        assert!(removed.is_empty());
    }

    #[test]
    fn double_add_is_a_noop() {
        let mut map = PendingMap::new();
        assert!(map.add(tri(b"abc"), 7).unwrap());
        assert!(!map.add(tri(b"abc"), 7).unwrap());
    }

    #[test]
    fn remove_cancels_a_pending_add() {
        let mut map = PendingMap::new();
        map.add(tri(b"abc"), 7).unwrap();
        map.remove(tri(b"abc"), 7).unwrap();
        let (added, removed) = map.find(tri(b"abc")).unwrap();
        assert!(added.is_empty());
        assert!(removed.is_empty());
        assert!(map.is_empty());
    }

    #[test]
    fn add_cancels_a_pending_remove() {
        let mut map = PendingMap::new();
        map.remove(tri(b"abc"), 7).unwrap();
        map.add(tri(b"abc"), 7).unwrap();
        let (added, removed) = map.find(tri(b"abc")).unwrap();
        assert!(added.is_empty());
        assert!(removed.is_empty());
    }

    #[test]
    fn colliding_trigrams_chain_in_ascending_order() {
        // These two trigrams differ by exactly BUCKET_COUNT, so they land in
        // the same bucket.
        let low = Trigram::from_u32(100);
        let high = Trigram::from_u32(100 + BUCKET_COUNT as u32);
        let mut map = PendingMap::new();
        map.add(high, 1).unwrap();
        map.add(low, 2).unwrap();
        assert_eq!(map.find(low).unwrap().0, &[2]);
        assert_eq!(map.find(high).unwrap().0, &[1]);
    }

    #[test]
    fn drain_yields_each_entry_once_and_empties_the_table() {
        let mut map = PendingMap::new();
        map.add(tri(b"abc"), 1).unwrap();
        map.add(tri(b"bcd"), 2).unwrap();
        map.remove(tri(b"cde"), 3).unwrap();

        let mut seen: Vec<_> = map.drain().map(|e| e.trigram).collect();
        seen.sort();
        let mut expected = vec![tri(b"abc"), tri(b"bcd"), tri(b"cde")];
        expected.sort();
        assert_eq!(seen, expected);
        assert!(map.is_empty());
        assert_eq!(map.approx_memory(), 0);
    }

    #[test]
    fn drain_skips_cancelled_entries() {
        let mut map = PendingMap::new();
        map.add(tri(b"abc"), 1).unwrap();
        map.remove(tri(b"abc"), 1).unwrap();
        map.add(tri(b"xyz"), 2).unwrap();
        let drained: Vec<_> = map.drain().map(|e| e.trigram).collect();
        assert_eq!(drained, vec![tri(b"xyz")]);
    }

    #[test]
    fn reset_discards_everything() {
        let mut map = PendingMap::new();
        map.add(tri(b"abc"), 1).unwrap();
        assert!(map.approx_memory() > 0);
        map.reset();
        assert!(map.is_empty());
        assert_eq!(map.approx_memory(), 0);
        assert!(map.find(tri(b"abc")).is_none());
    }

    quickcheck! {
        // Applying the same sequence of changes twice nets out to nothing.
        fn add_then_remove_is_empty(ids: Vec<u32>) -> bool {
            let mut map = PendingMap::new();
            for &id in &ids {
                map.add(tri(b"abc"), id as DocId).unwrap();
            }
            for &id in &ids {
                map.remove(tri(b"abc"), id as DocId).unwrap();
            }
            map.is_empty()
        }
    }
}
