//! Slot status machine and version tracking.

use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};

/// Where a slot is in the load pipeline.
///
/// `Unloaded -> Queued -> Loaded`, with `Loaded -> Unloaded` taken only by a
/// worker claiming a hot reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum AssetStatus {
    /// No bytes are held; the slot may be waiting in the request queue.
    #[default]
    Unloaded = 0,
    /// A worker has claimed the slot and is reading or decoding it.
    Queued = 1,
    /// Bytes and payload are valid.
    Loaded = 2,
}

impl AssetStatus {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => AssetStatus::Unloaded,
            1 => AssetStatus::Queued,
            2 => AssetStatus::Loaded,
            other => unreachable!("invalid asset status {}", other),
        }
    }

    /// Returns `true` for `Loaded`.
    pub fn is_loaded(&self) -> bool {
        matches!(self, AssetStatus::Loaded)
    }
}

/// An [`AssetStatus`] that is read and advanced atomically.
///
/// This is the only slot field mutated across threads without the slot lock;
/// every transition goes through [`AtomicStatus::transition`].
#[derive(Debug, Default)]
pub(crate) struct AtomicStatus(AtomicU8);

impl AtomicStatus {
    pub(crate) fn load(&self) -> AssetStatus {
        AssetStatus::from_raw(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, status: AssetStatus) {
        self.0.store(status as u8, Ordering::Release);
    }

    /// Compare-and-swap `from -> to`. Returns `false` if another thread got
    /// there first.
    pub(crate) fn transition(&self, from: AssetStatus, to: AssetStatus) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Version tracker for change detection.
///
/// Starts at 0 for a slot that has never loaded and increments on every
/// successful load or reload.
#[derive(Debug, Default)]
pub(crate) struct AssetVersion {
    value: AtomicU32,
}

impl AssetVersion {
    /// Get the current version number.
    pub(crate) fn get(&self) -> u32 {
        self.value.load(Ordering::Acquire)
    }

    /// Increment the version and return the new value.
    pub(crate) fn increment(&self) -> u32 {
        self.value.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn reset(&self) {
        self.value.store(0, Ordering::Release);
    }
}
