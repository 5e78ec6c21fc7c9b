//! Variable-size block allocator for asset payloads.
//!
//! Memory is carved from the arena in large *base blocks*. Each base block is
//! split into a physically ordered chain of blocks; free blocks are indexed by
//! size in a [`btree`] so allocation is best-fit. Freeing a block merges it with
//! free physical neighbours from the same base block.
//!
//! Every block is preceded by a [`BLOCK_HEADER_SIZE`]-byte header inside its
//! base block, so for any sequence of operations
//! `used + free + live_blocks * BLOCK_HEADER_SIZE == base bytes`.
//!
//! The allocator is single-threaded; share it behind a lock.

mod btree;
mod chunk;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use btree::{FreeTree, NodeId};
use chunk::Chunk;

use crate::profiling::profile_function;

/// Bytes reserved in front of every block.
pub const BLOCK_HEADER_SIZE: usize = 32;

/// Granularity of block sizes and offsets.
pub const BLOCK_ALIGN: usize = 16;

static_assertions::const_assert_eq!(BLOCK_HEADER_SIZE % BLOCK_ALIGN, 0);

static NEXT_ALLOCATOR_ID: AtomicU64 = AtomicU64::new(1);

/// Tuning for the block allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorConfig {
    /// Size of each base block carved from the arena.
    pub base_block_size: usize,
    /// A residual is split off only when it exceeds this many bytes.
    pub min_block_size: usize,
    /// Maximum children per free-tree node.
    pub max_children: usize,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            base_block_size: 2 * 1024 * 1024,
            min_block_size: 4 * 1024,
            max_children: 4,
        }
    }
}

/// Index of a block's bookkeeping record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(u32);

impl BlockId {
    pub(crate) fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockState {
    /// Record is unused and waiting to be recycled.
    Vacant,
    /// Owned by a [`MemoryBlock`].
    InUse,
    /// In the free pool, owned by this tree leaf.
    Free(NodeId),
}

#[derive(Debug, Clone, Copy)]
struct BlockMeta {
    chunk: usize,
    /// Payload offset inside the chunk (just past the header).
    offset: usize,
    /// Payload bytes, excluding the header.
    size: usize,
    is_base: bool,
    prev: Option<BlockId>,
    next: Option<BlockId>,
    state: BlockState,
}

/// A block of payload memory handed out by [`BlockAllocator::alloc`].
///
/// The block is uniquely owned: it is not `Clone`, and it goes back to the
/// allocator only by value through [`BlockAllocator::free`].
pub struct MemoryBlock {
    id: BlockId,
    allocator: u64,
    chunk: Arc<Chunk>,
    offset: usize,
    len: usize,
    capacity: usize,
}

impl MemoryBlock {
    /// Bytes requested at allocation time.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the block holds zero requested bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Usable bytes, which may exceed `len()` after alignment or an unsplit residual.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bookkeeping id of this block.
    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the allocator hands out disjoint, in-bounds ranges and this
        // block is the only owner of its range.
        unsafe { self.chunk.slice(self.offset, self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above; `&mut self` guarantees exclusive access.
        unsafe { self.chunk.slice_mut(self.offset, self.len) }
    }
}

impl std::fmt::Debug for MemoryBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBlock")
            .field("id", &self.id)
            .field("offset", &self.offset)
            .field("len", &self.len)
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl AsRef<[u8]> for MemoryBlock {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsMut<[u8]> for MemoryBlock {
    fn as_mut(&mut self) -> &mut [u8] {
        self.as_mut_slice()
    }
}

/// A snapshot of allocator accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Base blocks carved from the arena.
    pub base_blocks: usize,
    /// Total bytes of all base blocks.
    pub base_bytes: usize,
    /// Payload bytes of blocks currently handed out.
    pub used_bytes: usize,
    /// Payload bytes of blocks in the free pool.
    pub free_bytes: usize,
    /// Header bytes of every live block record.
    pub header_bytes: usize,
    /// Blocks handed out or free (not vacant records).
    pub live_blocks: usize,
    /// Blocks in the free pool.
    pub free_blocks: usize,
    /// Lifetime number of `alloc` calls.
    pub total_allocations: u64,
    /// Lifetime number of `free` calls.
    pub total_frees: u64,
}

impl AllocatorStats {
    /// No bytes created or lost: used + free + headers equals base bytes.
    pub fn is_conserved(&self) -> bool {
        self.used_bytes + self.free_bytes + self.header_bytes == self.base_bytes
    }
}

fn align_up(size: usize) -> usize {
    size.div_ceil(BLOCK_ALIGN) * BLOCK_ALIGN
}

/// Best-fit allocator over a growing set of base blocks.
pub struct BlockAllocator {
    id: u64,
    config: AllocatorConfig,
    tree: FreeTree,
    blocks: Vec<BlockMeta>,
    vacant: Vec<BlockId>,
    chunks: Vec<Arc<Chunk>>,
    /// First block of each chunk; never absorbed by coalescing.
    bases: Vec<BlockId>,
    stats: AllocatorStats,
}

impl Default for BlockAllocator {
    fn default() -> Self {
        Self::new(AllocatorConfig::default())
    }
}

impl BlockAllocator {
    /// Create an empty allocator. No memory is reserved until the first `alloc`.
    ///
    /// # Panics
    ///
    /// Panics if `config.max_children < 3`.
    pub fn new(config: AllocatorConfig) -> Self {
        Self {
            id: NEXT_ALLOCATOR_ID.fetch_add(1, Ordering::Relaxed),
            config: AllocatorConfig {
                base_block_size: align_up(config.base_block_size.max(BLOCK_HEADER_SIZE + BLOCK_ALIGN)),
                ..config
            },
            tree: FreeTree::new(config.max_children),
            blocks: Vec::new(),
            vacant: Vec::new(),
            chunks: Vec::new(),
            bases: Vec::new(),
            stats: AllocatorStats::default(),
        }
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    pub fn stats(&self) -> AllocatorStats {
        self.stats
    }

    /// Allocate at least `size` bytes. Never fails short of the process running
    /// out of memory: when no free block fits a new base block is carved.
    pub fn alloc(&mut self, size: usize) -> MemoryBlock {
        profile_function!();
        let rounded = align_up(size.max(1));

        let id = match self.tree.find(rounded) {
            Some((leaf, block)) => {
                let removed = self.tree.remove(leaf);
                debug_assert_eq!(removed, block);
                let meta = &mut self.blocks[block.index()];
                meta.state = BlockState::InUse;
                self.stats.free_bytes -= meta.size;
                self.stats.free_blocks -= 1;
                self.stats.used_bytes += meta.size;
                block
            }
            None => self.carve_base_block(rounded),
        };

        self.split(id, rounded);
        self.stats.total_allocations += 1;

        let meta = self.blocks[id.index()];
        MemoryBlock {
            id,
            allocator: self.id,
            chunk: Arc::clone(&self.chunks[meta.chunk]),
            offset: meta.offset,
            len: size,
            capacity: meta.size,
        }
    }

    /// Return a block to the free pool, coalescing with free neighbours.
    ///
    /// # Panics
    ///
    /// Panics if the block came from another allocator or its record is not
    /// in use; both mean the allocator state is corrupt.
    pub fn free(&mut self, block: MemoryBlock) {
        profile_function!();
        assert_eq!(
            block.allocator, self.id,
            "block {:?} freed to an allocator that did not create it",
            block.id
        );
        let meta = self.blocks[block.id.index()];
        assert_eq!(
            meta.state,
            BlockState::InUse,
            "freeing block {:?} that is not in use",
            block.id
        );
        assert!(
            self.chunks[meta.chunk].same_region(&block.chunk),
            "block {:?} does not belong to chunk {}",
            block.id,
            meta.chunk
        );

        self.release(block.id);
        self.stats.total_frees += 1;
    }

    fn new_record(&mut self, meta: BlockMeta) -> BlockId {
        self.stats.live_blocks += 1;
        self.stats.header_bytes += BLOCK_HEADER_SIZE;
        if let Some(id) = self.vacant.pop() {
            self.blocks[id.index()] = meta;
            id
        } else {
            let id = BlockId(u32::try_from(self.blocks.len()).expect("block record arena overflow"));
            self.blocks.push(meta);
            id
        }
    }

    fn vacate(&mut self, id: BlockId) {
        self.blocks[id.index()].state = BlockState::Vacant;
        self.blocks[id.index()].prev = None;
        self.blocks[id.index()].next = None;
        self.vacant.push(id);
        self.stats.live_blocks -= 1;
        self.stats.header_bytes -= BLOCK_HEADER_SIZE;
    }

    fn carve_base_block(&mut self, size: usize) -> BlockId {
        let len = self.config.base_block_size.max(size + BLOCK_HEADER_SIZE);
        let chunk = Arc::new(Chunk::new(len));
        let chunk_index = self.chunks.len();
        self.chunks.push(chunk);

        let id = self.new_record(BlockMeta {
            chunk: chunk_index,
            offset: BLOCK_HEADER_SIZE,
            size: len - BLOCK_HEADER_SIZE,
            is_base: true,
            prev: None,
            next: None,
            state: BlockState::InUse,
        });
        self.bases.push(id);

        self.stats.base_blocks += 1;
        self.stats.base_bytes += len;
        self.stats.used_bytes += len - BLOCK_HEADER_SIZE;

        tracing::debug!(
            "Carved base block {} ({} bytes) for a {} byte request",
            chunk_index,
            len,
            size
        );
        id
    }

    /// Split the tail of an in-use block off as a new free block when the
    /// residual is larger than the minimum block size.
    fn split(&mut self, id: BlockId, size: usize) {
        let meta = self.blocks[id.index()];
        let Some(residual) = meta.size.checked_sub(size + BLOCK_HEADER_SIZE) else {
            return;
        };
        if residual <= self.config.min_block_size {
            return;
        }

        let tail = self.new_record(BlockMeta {
            chunk: meta.chunk,
            offset: meta.offset + size + BLOCK_HEADER_SIZE,
            size: residual,
            is_base: false,
            prev: Some(id),
            next: meta.next,
            state: BlockState::InUse,
        });
        if let Some(next) = meta.next {
            self.blocks[next.index()].prev = Some(tail);
        }
        let head = &mut self.blocks[id.index()];
        head.next = Some(tail);
        head.size = size;

        // The head gave up `residual + header` bytes; the tail holds `residual`.
        self.stats.used_bytes -= BLOCK_HEADER_SIZE;

        self.release(tail);
    }

    /// Move an in-use block into the free pool.
    fn release(&mut self, id: BlockId) {
        let mut id = id;
        self.stats.used_bytes -= self.blocks[id.index()].size;

        if let Some(next) = self.blocks[id.index()].next {
            let next_meta = self.blocks[next.index()];
            if let BlockState::Free(leaf) = next_meta.state
                && !next_meta.is_base
            {
                self.take_from_tree(next, leaf);
                let meta = &mut self.blocks[id.index()];
                meta.size += next_meta.size + BLOCK_HEADER_SIZE;
                meta.next = next_meta.next;
                if let Some(after) = next_meta.next {
                    self.blocks[after.index()].prev = Some(id);
                }
                self.vacate(next);
            }
        }

        let meta = self.blocks[id.index()];
        if let Some(prev) = meta.prev
            && !meta.is_base
            && let BlockState::Free(leaf) = self.blocks[prev.index()].state
        {
            self.take_from_tree(prev, leaf);
            let prev_meta = &mut self.blocks[prev.index()];
            prev_meta.size += meta.size + BLOCK_HEADER_SIZE;
            prev_meta.next = meta.next;
            if let Some(after) = meta.next {
                self.blocks[after.index()].prev = Some(prev);
            }
            self.vacate(id);
            id = prev;
        }

        let size = self.blocks[id.index()].size;
        let leaf = self.tree.insert(id, size);
        self.blocks[id.index()].state = BlockState::Free(leaf);
        self.stats.free_bytes += size;
        self.stats.free_blocks += 1;
    }

    fn take_from_tree(&mut self, id: BlockId, leaf: NodeId) {
        let removed = self.tree.remove(leaf);
        assert_eq!(removed, id, "free tree leaf does not own block {:?}", id);
        let meta = &mut self.blocks[id.index()];
        self.stats.free_bytes -= meta.size;
        self.stats.free_blocks -= 1;
        meta.state = BlockState::InUse;
    }

    /// Walk every base-block chain and the free tree, panicking on any
    /// accounting or linkage inconsistency.
    pub fn check_invariants(&self) {
        self.tree.check();

        let mut used = 0;
        let mut free = 0;
        let mut live = 0;
        let mut free_blocks = 0;

        for (chunk_index, &base) in self.bases.iter().enumerate() {
            let chunk_len = self.chunks[chunk_index].len();
            let mut cursor = Some(base);
            let mut prev: Option<BlockId> = None;
            let mut expected_offset = BLOCK_HEADER_SIZE;
            let mut prev_free = false;

            while let Some(id) = cursor {
                let meta = self.blocks[id.index()];
                assert_eq!(meta.chunk, chunk_index, "block {:?} in wrong chunk", id);
                assert_eq!(meta.prev, prev, "block {:?} has a broken prev link", id);
                assert_eq!(meta.offset, expected_offset, "block {:?} is not contiguous", id);
                assert_eq!(meta.is_base, prev.is_none(), "block {:?} base flag mismatch", id);

                live += 1;
                match meta.state {
                    BlockState::Vacant => panic!("vacant block {:?} linked into a chain", id),
                    BlockState::InUse => {
                        used += meta.size;
                        prev_free = false;
                    }
                    BlockState::Free(leaf) => {
                        assert!(!prev_free, "adjacent free blocks at {:?} were not coalesced", id);
                        assert_eq!(self.tree.leaf_block(leaf), Some(id), "free block {:?} lost its leaf", id);
                        free += meta.size;
                        free_blocks += 1;
                        prev_free = true;
                    }
                }

                expected_offset = meta.offset + meta.size + BLOCK_HEADER_SIZE;
                prev = Some(id);
                cursor = meta.next;
            }
            assert_eq!(
                expected_offset - BLOCK_HEADER_SIZE,
                chunk_len,
                "chain of base block {} does not cover the chunk",
                chunk_index
            );
        }

        let mut tree_leaves = 0;
        self.tree.for_each_leaf(|_, id, key| {
            assert_eq!(self.blocks[id.index()].size, key, "stale free tree key for {:?}", id);
            tree_leaves += 1;
        });

        assert_eq!(tree_leaves, free_blocks, "free tree and chains disagree");
        assert_eq!(used, self.stats.used_bytes, "used byte counter drifted");
        assert_eq!(free, self.stats.free_bytes, "free byte counter drifted");
        assert_eq!(live, self.stats.live_blocks, "live block counter drifted");
        assert_eq!(free_blocks, self.stats.free_blocks, "free block counter drifted");
        assert!(self.stats.is_conserved(), "allocator bytes not conserved: {:?}", self.stats);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> AllocatorConfig {
        AllocatorConfig {
            base_block_size: 64 * 1024,
            min_block_size: 256,
            max_children: 4,
        }
    }

    #[test]
    fn test_first_alloc_carves_base_block() {
        let mut alloc = BlockAllocator::new(small_config());
        let block = alloc.alloc(1000);

        assert_eq!(block.len(), 1000);
        assert_eq!(block.capacity(), 1008);
        let stats = alloc.stats();
        assert_eq!(stats.base_blocks, 1);
        assert_eq!(stats.base_bytes, 64 * 1024);
        assert_eq!(stats.free_blocks, 1);
        alloc.check_invariants();
    }

    #[test]
    fn test_block_bytes_are_writable() {
        let mut alloc = BlockAllocator::new(small_config());
        let mut a = alloc.alloc(64);
        let mut b = alloc.alloc(64);
        a.as_mut_slice().fill(0xAA);
        b.as_mut_slice().fill(0x55);
        assert!(a.as_slice().iter().all(|&x| x == 0xAA));
        assert!(b.as_slice().iter().all(|&x| x == 0x55));
        alloc.free(a);
        alloc.free(b);
        alloc.check_invariants();
    }

    #[test]
    fn test_partial_free_keeps_chains_consistent() {
        let mut alloc = BlockAllocator::new(small_config());
        let blocks: Vec<_> = (0..10).map(|i| alloc.alloc(512 + i * 100)).collect();
        alloc.check_invariants();

        for (i, block) in blocks.into_iter().enumerate() {
            if i % 2 == 0 {
                alloc.free(block);
            } else {
                drop(block);
            }
        }
        alloc.check_invariants();
        assert!(alloc.stats().free_blocks > 1);
    }

    #[test]
    fn test_full_release_returns_single_free_block() {
        let mut alloc = BlockAllocator::new(small_config());
        let blocks: Vec<_> = (0..8).map(|_| alloc.alloc(1024)).collect();
        for block in blocks.into_iter().rev() {
            alloc.free(block);
            alloc.check_invariants();
        }
        let stats = alloc.stats();
        assert_eq!(stats.free_blocks, 1);
        assert_eq!(stats.live_blocks, 1);
        assert_eq!(stats.free_bytes, 64 * 1024 - BLOCK_HEADER_SIZE);
    }

    #[test]
    fn test_oversized_request_gets_dedicated_base_block() {
        let mut alloc = BlockAllocator::new(small_config());
        let big = alloc.alloc(100 * 1024);
        assert!(big.capacity() >= 100 * 1024);
        assert_eq!(alloc.stats().base_blocks, 1);
        assert_eq!(alloc.stats().base_bytes, 100 * 1024 + BLOCK_HEADER_SIZE);
        alloc.free(big);
        alloc.check_invariants();
    }

    #[test]
    fn test_small_residual_is_not_split() {
        let mut alloc = BlockAllocator::new(small_config());
        let whole = 64 * 1024 - BLOCK_HEADER_SIZE;
        let block = alloc.alloc(whole - 100);
        assert_eq!(block.capacity(), whole);
        assert_eq!(alloc.stats().free_blocks, 0);
        alloc.free(block);
        alloc.check_invariants();
    }

    #[test]
    fn test_zero_sized_alloc() {
        let mut alloc = BlockAllocator::new(small_config());
        let block = alloc.alloc(0);
        assert!(block.is_empty());
        assert_eq!(block.capacity(), BLOCK_ALIGN);
        alloc.free(block);
        alloc.check_invariants();
    }

    #[test]
    #[should_panic(expected = "did not create it")]
    fn test_free_to_wrong_allocator_panics() {
        let mut a = BlockAllocator::new(small_config());
        let mut b = BlockAllocator::new(small_config());
        let block = a.alloc(64);
        b.free(block);
    }
}
