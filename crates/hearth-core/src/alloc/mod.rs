//! Allocation primitives.
//!
//! - [`block`]: the best-fit block allocator that backs asset payload memory
//! - Hash collections keyed with AHash, used for path lookups

pub mod block;

pub use ahash::{AHashMap as HashMap, AHashSet as HashSet, RandomState};
pub use block::{AllocatorConfig, AllocatorStats, BlockAllocator, MemoryBlock};

#[cfg(test)]
mod tests {
    use super::*;
    use std::hash::BuildHasher;

    #[test]
    fn test_hashmap_ahash() {
        let mut map = HashMap::new();
        map.insert("textures/grass.tex", 3u32);
        assert_eq!(map.get("textures/grass.tex"), Some(&3));
    }

    #[test]
    fn test_random_state_is_stable_per_instance() {
        let state = RandomState::new();
        assert_eq!(state.hash_one("a/b.mdl"), state.hash_one("a/b.mdl"));
    }
}
