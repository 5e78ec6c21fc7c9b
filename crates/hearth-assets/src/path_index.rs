//! Path to slot lookup.
//!
//! An open-chained hash table whose chains run through an intrusive
//! `next_in_chain` array indexed by slot id, so it never allocates after
//! construction. Removal unlinks the slot from its chain; there are no
//! tombstones. The index stores hashes only: callers compare the path of each
//! candidate slot themselves.

use std::hash::BuildHasher;

use hearth_core::alloc::RandomState;

pub(crate) struct PathIndex {
    hasher: RandomState,
    /// Head slot of each bucket's chain.
    buckets: Vec<Option<u32>>,
    next_in_chain: Vec<Option<u32>>,
    /// Full hash of each linked slot.
    hashes: Vec<u64>,
    mask: u64,
}

impl PathIndex {
    pub(crate) fn new(slot_capacity: usize) -> Self {
        let bucket_count = slot_capacity.next_power_of_two().max(16);
        Self {
            hasher: RandomState::new(),
            buckets: vec![None; bucket_count],
            next_in_chain: vec![None; slot_capacity],
            hashes: vec![0; slot_capacity],
            mask: bucket_count as u64 - 1,
        }
    }

    pub(crate) fn hash(&self, path: &str) -> u64 {
        self.hasher.hash_one(path)
    }

    fn bucket(&self, hash: u64) -> usize {
        (hash & self.mask) as usize
    }

    /// Link `slot` at the head of the chain for `hash`.
    pub(crate) fn insert(&mut self, hash: u64, slot: u32) {
        let bucket = self.bucket(hash);
        self.next_in_chain[slot as usize] = self.buckets[bucket];
        self.hashes[slot as usize] = hash;
        self.buckets[bucket] = Some(slot);
    }

    /// Iterate over every slot whose hash equals `hash`.
    pub(crate) fn candidates(&self, hash: u64) -> Candidates<'_> {
        Candidates {
            index: self,
            hash,
            cursor: self.buckets[self.bucket(hash)],
        }
    }

    /// Unlink `slot` from the chain for `hash`. Returns `false` if it was not linked.
    pub(crate) fn remove(&mut self, hash: u64, slot: u32) -> bool {
        let bucket = self.bucket(hash);
        let mut prev: Option<u32> = None;
        let mut cursor = self.buckets[bucket];

        while let Some(current) = cursor {
            let next = self.next_in_chain[current as usize];
            if current == slot {
                match prev {
                    Some(p) => self.next_in_chain[p as usize] = next,
                    None => self.buckets[bucket] = next,
                }
                self.next_in_chain[current as usize] = None;
                return true;
            }
            prev = Some(current);
            cursor = next;
        }
        false
    }
}

pub(crate) struct Candidates<'a> {
    index: &'a PathIndex,
    hash: u64,
    cursor: Option<u32>,
}

impl Iterator for Candidates<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        while let Some(slot) = self.cursor {
            self.cursor = self.index.next_in_chain[slot as usize];
            if self.index.hashes[slot as usize] == self.hash {
                return Some(slot);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_lookup() {
        let mut index = PathIndex::new(8);
        let h = index.hash("a.tex");
        index.insert(h, 3);
        assert_eq!(index.candidates(h).collect::<Vec<_>>(), vec![3]);
        assert_eq!(index.candidates(index.hash("b.tex")).count(), 0);
    }

    #[test]
    fn test_shared_bucket_chains() {
        let mut index = PathIndex::new(4);
        // Same bucket, different full hashes.
        let a = 0x10;
        let b = 0x10 + (index.mask + 1);
        index.insert(a, 0);
        index.insert(b, 1);
        index.insert(a, 2);

        assert_eq!(index.candidates(a).collect::<Vec<_>>(), vec![2, 0]);
        assert_eq!(index.candidates(b).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_remove_unlinks_from_middle_and_head() {
        let mut index = PathIndex::new(4);
        let h = 7;
        index.insert(h, 0);
        index.insert(h, 1);
        index.insert(h, 2);

        assert!(index.remove(h, 1));
        assert_eq!(index.candidates(h).collect::<Vec<_>>(), vec![2, 0]);
        assert!(index.remove(h, 2));
        assert_eq!(index.candidates(h).collect::<Vec<_>>(), vec![0]);
        assert!(!index.remove(h, 2));
        assert!(index.remove(h, 0));
        assert_eq!(index.candidates(h).count(), 0);
    }
}
