//! Asset events for change detection.

use crate::handle::Handle;
use crate::payload::AssetKind;

/// Events recorded by the cache as slots move through their lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum AssetEvent {
    /// An asset finished its first load.
    Created {
        /// The handle to the created asset.
        handle: Handle,
        /// Kind of payload produced.
        kind: AssetKind,
        /// The version of the asset.
        version: u32,
    },

    /// An asset was reloaded after its file changed.
    Modified {
        /// The handle to the modified asset.
        handle: Handle,
        /// Kind of payload produced.
        kind: AssetKind,
        /// The new version of the asset.
        version: u32,
    },

    /// An asset was freed.
    Removed {
        /// The handle that was freed.
        handle: Handle,
        /// Kind of payload the slot held.
        kind: AssetKind,
    },

    /// An asset failed to read or decode.
    LoadFailed {
        /// The handle to the failed asset.
        handle: Handle,
        /// The asset path.
        path: String,
        /// Error message.
        error: String,
    },
}

impl AssetEvent {
    /// Get the handle this event relates to.
    pub fn handle(&self) -> Handle {
        match self {
            AssetEvent::Created { handle, .. }
            | AssetEvent::Modified { handle, .. }
            | AssetEvent::Removed { handle, .. }
            | AssetEvent::LoadFailed { handle, .. } => *handle,
        }
    }

    /// Check if this is a creation event.
    pub fn is_created(&self) -> bool {
        matches!(self, AssetEvent::Created { .. })
    }

    /// Check if this is a modification event.
    pub fn is_modified(&self) -> bool {
        matches!(self, AssetEvent::Modified { .. })
    }

    /// Check if this is a removal event.
    pub fn is_removed(&self) -> bool {
        matches!(self, AssetEvent::Removed { .. })
    }

    /// Check if this is a failure event.
    pub fn is_failed(&self) -> bool {
        matches!(self, AssetEvent::LoadFailed { .. })
    }
}

/// A buffer of asset events that can be drained each frame.
#[derive(Debug, Default)]
pub struct AssetEventBuffer {
    events: Vec<AssetEvent>,
}

impl AssetEventBuffer {
    /// Create a new empty event buffer.
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Push an event to the buffer.
    pub fn push(&mut self, event: AssetEvent) {
        self.events.push(event);
    }

    /// Drain all events from the buffer.
    pub fn drain(&mut self) -> impl Iterator<Item = AssetEvent> + '_ {
        self.events.drain(..)
    }

    /// Check if there are any events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Get the number of events.
    pub fn len(&self) -> usize {
        self.events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_buffer_drain() {
        let mut buffer = AssetEventBuffer::new();
        let handle = Handle::new(0, 1);
        buffer.push(AssetEvent::Created {
            handle,
            kind: AssetKind::Texture,
            version: 1,
        });
        buffer.push(AssetEvent::Removed {
            handle,
            kind: AssetKind::Texture,
        });
        assert_eq!(buffer.len(), 2);

        let drained: Vec<_> = buffer.drain().collect();
        assert!(drained[0].is_created());
        assert!(drained[1].is_removed());
        assert_eq!(drained[1].handle(), handle);
        assert!(buffer.is_empty());
    }
}
