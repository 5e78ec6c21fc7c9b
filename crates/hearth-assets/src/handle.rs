//! Asset handles.
//!
//! A [`Handle`] is a copyable `{slot index, generation}` pair. The generation is
//! bumped every time a slot is reused, so a handle captured before a free can
//! never resolve to the slot's next occupant.

use std::fmt;

/// A generational reference to an asset slot.
///
/// # Example
///
/// ```ignore
/// let handle = cache.get_asset("textures/grass.tex", true)?;
///
/// // Later, once a worker has loaded it
/// let texture = cache.get_texture(handle);
/// if !texture.is_nil() {
///     // Use texture...
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Index of the slot this handle refers to.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Generation of the slot when this handle was issued.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}@{}", self.index, self.generation)
    }
}

/// A handle that remembers the last asset version it observed.
///
/// # Example
///
/// ```ignore
/// let mut tracked = TrackedHandle::new(handle);
///
/// // In update loop:
/// if tracked.check_changed(cache.version(tracked.handle())) {
///     // Asset was reloaded since last check
///     rebuild_material();
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedHandle {
    handle: Handle,
    seen_version: u32,
}

impl TrackedHandle {
    /// Create a tracked handle that has seen no version yet.
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            seen_version: 0,
        }
    }

    /// Get the underlying handle.
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Get the last seen version.
    pub fn seen_version(&self) -> u32 {
        self.seen_version
    }

    /// Returns `true` if `current_version` is newer than the last seen one,
    /// and records it.
    pub fn check_changed(&mut self, current_version: u32) -> bool {
        if current_version > self.seen_version {
            self.seen_version = current_version;
            true
        } else {
            false
        }
    }

    /// Forget the seen version so the next check reports a change.
    pub fn reset(&mut self) {
        self.seen_version = 0;
    }
}

impl From<Handle> for TrackedHandle {
    fn from(handle: Handle) -> Self {
        Self::new(handle)
    }
}
