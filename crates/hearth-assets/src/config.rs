//! Cache configuration.

use std::path::PathBuf;
use std::time::Duration;

use hearth_core::alloc::AllocatorConfig;

use crate::error::{AssetError, AssetResult};

/// Where decode work runs after a worker has read an asset's bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeMode {
    /// Decode on a shared task pool so workers can go back to the queue.
    TaskPool {
        /// Number of pool threads.
        threads: usize,
    },
    /// Decode on the worker thread that read the bytes.
    Inline,
}

impl Default for DecodeMode {
    fn default() -> Self {
        DecodeMode::TaskPool {
            threads: default_thread_count(),
        }
    }
}

fn default_thread_count() -> usize {
    num_cpus::get().saturating_sub(1).max(1)
}

/// Configuration for an [`AssetCache`](crate::AssetCache).
///
/// # Example
///
/// ```ignore
/// let config = CacheConfig::new("assets")
///     .with_worker_count(2)
///     .with_hotload_period(None);
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Base directory for relative asset paths.
    pub root: PathBuf,
    /// Number of slots in the table. The table does not grow.
    pub slot_capacity: usize,
    /// Longest accepted asset path, in bytes.
    pub max_path_len: usize,
    /// Size of the request ring buffer. Must be a power of two.
    pub queue_bytes: usize,
    /// Loader threads. Zero means requests are only processed by [`pump`](crate::AssetCache::pump).
    pub worker_count: usize,
    pub decode_mode: DecodeMode,
    /// Period of the hotload monitor thread; `None` disables it.
    pub hotload_period: Option<Duration>,
    pub allocator: AllocatorConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            slot_capacity: 4096,
            max_path_len: 256,
            queue_bytes: 64 * 1024,
            worker_count: default_thread_count(),
            decode_mode: DecodeMode::default(),
            hotload_period: Some(Duration::from_millis(100)),
            allocator: AllocatorConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Default configuration rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// A configuration with no background threads: requests run on
    /// [`pump`](crate::AssetCache::pump) and decode inline.
    pub fn manual(root: impl Into<PathBuf>) -> Self {
        Self::new(root)
            .with_worker_count(0)
            .with_decode_mode(DecodeMode::Inline)
            .with_hotload_period(None)
    }

    pub fn with_slot_capacity(mut self, slot_capacity: usize) -> Self {
        self.slot_capacity = slot_capacity;
        self
    }

    pub fn with_max_path_len(mut self, max_path_len: usize) -> Self {
        self.max_path_len = max_path_len;
        self
    }

    pub fn with_queue_bytes(mut self, queue_bytes: usize) -> Self {
        self.queue_bytes = queue_bytes;
        self
    }

    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_decode_mode(mut self, decode_mode: DecodeMode) -> Self {
        self.decode_mode = decode_mode;
        self
    }

    pub fn with_hotload_period(mut self, period: Option<Duration>) -> Self {
        self.hotload_period = period;
        self
    }

    pub fn with_allocator(mut self, allocator: AllocatorConfig) -> Self {
        self.allocator = allocator;
        self
    }

    /// Check the configuration for values the cache cannot run with.
    pub fn validate(&self) -> AssetResult<()> {
        let invalid = |message: String| Err(AssetError::Other { message });

        if self.slot_capacity == 0 {
            return invalid("slot_capacity must be greater than zero".to_string());
        }
        if u32::try_from(self.slot_capacity).is_err() {
            return invalid(format!("slot_capacity {} does not fit a handle index", self.slot_capacity));
        }
        if self.max_path_len == 0 {
            return invalid("max_path_len must be greater than zero".to_string());
        }
        if !self.queue_bytes.is_power_of_two() || self.queue_bytes < 16 {
            return invalid(format!(
                "queue_bytes must be a power of two of at least 16, got {}",
                self.queue_bytes
            ));
        }
        if let DecodeMode::TaskPool { threads: 0 } = self.decode_mode {
            return invalid("decode task pool needs at least one thread".to_string());
        }
        if self.hotload_period.is_some_and(|p| p.is_zero()) {
            return invalid("hotload_period must be non-zero".to_string());
        }
        if self.allocator.max_children < 3 {
            return invalid(format!(
                "allocator max_children must be at least 3, got {}",
                self.allocator.max_children
            ));
        }
        Ok(())
    }
}
