//! Slot table.
//!
//! A fixed-capacity array of asset slots plus the free-slot list and the path
//! index. Allocation, freeing and path lookup run under one table lock; the
//! slot array itself is never reallocated, so workers hold `&Slot` across
//! their whole load without the table lock.
//!
//! Lock order is table, then slot. Nothing takes the table lock while holding
//! a slot lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use hearth_core::alloc::MemoryBlock;
use parking_lot::{Mutex, RwLock};

use crate::error::{AssetError, AssetResult};
use crate::handle::Handle;
use crate::path_index::PathIndex;
use crate::payload::{AssetKind, Payload};
use crate::state::{AssetStatus, AssetVersion, AtomicStatus};

/// Slot fields guarded by the slot lock.
#[derive(Default)]
pub(crate) struct SlotData {
    pub(crate) path: Option<Arc<str>>,
    /// Bytes of the backing block's file.
    pub(crate) size: u64,
    /// Modification stamp of the file the current bytes were read from.
    pub(crate) loaded_modified: u64,
    pub(crate) block: Option<MemoryBlock>,
    pub(crate) kind: AssetKind,
    pub(crate) payload: Option<Payload>,
}

pub(crate) struct Slot {
    pub(crate) status: AtomicStatus,
    /// Stamp the hotload monitor compares against; 0 while not loaded.
    pub(crate) last_modified: AtomicU64,
    /// Stamp of a file version that failed to load; 0 if none.
    pub(crate) failed_modified: AtomicU64,
    pub(crate) generation: AtomicU32,
    pub(crate) version: AssetVersion,
    pub(crate) data: RwLock<SlotData>,
}

impl Slot {
    fn new() -> Self {
        Self {
            status: AtomicStatus::default(),
            last_modified: AtomicU64::new(0),
            failed_modified: AtomicU64::new(0),
            generation: AtomicU32::new(0),
            version: AssetVersion::default(),
            data: RwLock::new(SlotData::default()),
        }
    }

    pub(crate) fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }

    /// Path of the current occupant.
    pub(crate) fn path(&self) -> Option<Arc<str>> {
        self.data.read().path.clone()
    }
}

struct TableState {
    free_slots: Vec<u32>,
    next_fresh: u32,
    index: PathIndex,
    /// Path of every live slot, mirrored here so lookups skip slot locks.
    paths: Vec<Option<Arc<str>>>,
    live: usize,
}

impl TableState {
    fn find(&self, path: &str, hash: u64) -> Option<u32> {
        self.index
            .candidates(hash)
            .find(|&slot| self.paths[slot as usize].as_deref() == Some(path))
    }
}

/// Outcome of [`SlotTable::get_or_alloc`].
pub(crate) struct Allocated {
    pub(crate) handle: Handle,
    pub(crate) created: bool,
}

pub(crate) struct SlotTable {
    slots: Box<[Slot]>,
    state: Mutex<TableState>,
}

impl SlotTable {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| Slot::new()).collect(),
            state: Mutex::new(TableState {
                free_slots: Vec::new(),
                next_fresh: 0,
                index: PathIndex::new(capacity),
                paths: vec![None; capacity],
                live: 0,
            }),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn slot(&self, index: u32) -> &Slot {
        &self.slots[index as usize]
    }

    /// Slots that have ever been handed out.
    pub(crate) fn allocated_slots(&self) -> u32 {
        self.state.lock().next_fresh
    }

    pub(crate) fn live_count(&self) -> usize {
        self.state.lock().live
    }

    /// Handle of the live slot for `path`.
    pub(crate) fn lookup(&self, path: &str) -> Option<Handle> {
        let state = self.state.lock();
        let hash = state.index.hash(path);
        let index = state.find(path, hash)?;
        Some(Handle::new(index, self.slot(index).generation()))
    }

    /// Return the slot for `path`, allocating one in state `Unloaded` if none exists.
    pub(crate) fn get_or_alloc(&self, path: &str) -> AssetResult<Allocated> {
        let mut state = self.state.lock();
        let hash = state.index.hash(path);
        if let Some(index) = state.find(path, hash) {
            return Ok(Allocated {
                handle: Handle::new(index, self.slot(index).generation()),
                created: false,
            });
        }

        let (index, generation) = if let Some(index) = state.free_slots.pop() {
            let generation = self.slot(index).generation.fetch_add(1, Ordering::AcqRel) + 1;
            (index, generation)
        } else if (state.next_fresh as usize) < self.slots.len() {
            let index = state.next_fresh;
            state.next_fresh += 1;
            (index, self.slot(index).generation())
        } else {
            return Err(AssetError::CapacityExhausted {
                capacity: self.slots.len(),
            });
        };

        let path: Arc<str> = Arc::from(path);
        let slot = self.slot(index);
        {
            // Unreachable until the index insert below, so this never contends.
            let mut data = slot.data.write();
            debug_assert!(data.block.is_none(), "recycled slot {} still holds memory", index);
            *data = SlotData {
                path: Some(Arc::clone(&path)),
                ..SlotData::default()
            };
        }
        slot.last_modified.store(0, Ordering::Release);
        slot.failed_modified.store(0, Ordering::Release);
        slot.version.reset();
        slot.status.store(AssetStatus::Unloaded);

        state.paths[index as usize] = Some(path);
        state.index.insert(hash, index);
        state.live += 1;

        Ok(Allocated {
            handle: Handle::new(index, generation),
            created: true,
        })
    }

    /// Index of the live slot for `path`.
    pub(crate) fn find(&self, path: &str) -> Option<u32> {
        let state = self.state.lock();
        let hash = state.index.hash(path);
        state.find(path, hash)
    }

    /// Check that `handle` names the slot's current occupant.
    pub(crate) fn is_current(&self, handle: Handle) -> bool {
        let Some(slot) = self.slots.get(handle.index() as usize) else {
            return false;
        };
        if slot.generation() != handle.generation() {
            return false;
        }
        self.state.lock().paths[handle.index() as usize].is_some()
    }

    /// Unlink a slot from the path index so no new request can reach it.
    ///
    /// The caller must have claimed the slot's status first.
    pub(crate) fn retire(&self, handle: Handle) -> AssetResult<()> {
        let mut state = self.state.lock();
        let index = handle.index() as usize;
        let Some(path) = state.paths.get(index).cloned().flatten() else {
            return Err(AssetError::InvalidHandle { handle });
        };
        if self.slots[index].generation() != handle.generation() {
            return Err(AssetError::InvalidHandle { handle });
        }

        let hash = state.index.hash(&path);
        let unlinked = state.index.remove(hash, handle.index());
        assert!(unlinked, "live slot {} missing from the path index", index);
        state.paths[index] = None;
        state.live -= 1;
        Ok(())
    }

    /// Put a retired slot back on the free list.
    pub(crate) fn recycle(&self, index: u32) {
        let mut state = self.state.lock();
        debug_assert!(state.paths[index as usize].is_none());
        state.free_slots.push(index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_and_lookup() {
        let table = SlotTable::new(4);
        let a = table.get_or_alloc("a.tex").unwrap();
        assert!(a.created);
        assert_eq!(a.handle, Handle::new(0, 0));

        let again = table.get_or_alloc("a.tex").unwrap();
        assert!(!again.created);
        assert_eq!(again.handle, a.handle);
        assert_eq!(table.lookup("a.tex"), Some(a.handle));
        assert_eq!(table.lookup("b.tex"), None);
        assert_eq!(table.live_count(), 1);
    }

    #[test]
    fn test_reuse_bumps_generation() {
        let table = SlotTable::new(4);
        let a = table.get_or_alloc("a.tex").unwrap().handle;

        table.retire(a).unwrap();
        table.recycle(a.index());
        assert!(!table.is_current(a));

        let b = table.get_or_alloc("b.tex").unwrap().handle;
        assert_eq!(b.index(), a.index());
        assert_eq!(b.generation(), a.generation() + 1);
        assert!(table.is_current(b));
        assert!(!table.is_current(a));
        assert_eq!(table.lookup("a.tex"), None);
    }

    #[test]
    fn test_retire_twice_is_invalid() {
        let table = SlotTable::new(2);
        let a = table.get_or_alloc("a").unwrap().handle;
        table.retire(a).unwrap();
        assert!(matches!(table.retire(a), Err(AssetError::InvalidHandle { .. })));
    }

    #[test]
    fn test_capacity_exhausted() {
        let table = SlotTable::new(2);
        table.get_or_alloc("a").unwrap();
        table.get_or_alloc("b").unwrap();
        assert!(matches!(
            table.get_or_alloc("c"),
            Err(AssetError::CapacityExhausted { capacity: 2 })
        ));
        assert_eq!(table.allocated_slots(), 2);
    }

    #[test]
    fn test_out_of_range_handle_is_not_current() {
        let table = SlotTable::new(2);
        assert!(!table.is_current(Handle::new(9, 0)));
    }
}
