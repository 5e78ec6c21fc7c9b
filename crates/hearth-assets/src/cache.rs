//! The asset cache.
//!
//! [`AssetCache`] owns the slot table, the request queue, the block allocator,
//! and the threads that drain the queue. Callers get a [`Handle`] for a path
//! with [`AssetCache::get_asset`]; a worker reads the file into a block from
//! the allocator, decodes it, and marks the slot `Loaded`. The hotload
//! monitor re-queues slots whose files change on disk.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;

use hearth_core::TaskPool;
use hearth_core::alloc::{AllocatorStats, BlockAllocator};
use hearth_core::sync::Semaphore;
use parking_lot::{MappedRwLockReadGuard, Mutex, RwLockReadGuard};

use crate::config::{CacheConfig, DecodeMode};
use crate::decoder::{AssetRequester, DecoderRegistry};
use crate::error::{AssetError, AssetResult};
use crate::event::{AssetEvent, AssetEventBuffer};
use crate::handle::Handle;
use crate::io::{DiskFileSystem, FileSystem};
use crate::payload::{Animation, AssetKind, ByteRange, Font, Model, Payload, Skeleton, Texture};
use crate::queue::RequestQueue;
use crate::slot::{Allocated, Slot, SlotData, SlotTable};
use crate::state::AssetStatus;
use crate::{hot_reload, worker};

#[derive(Default)]
pub(crate) struct Counters {
    pub(crate) loads_started: AtomicU64,
    pub(crate) loads_completed: AtomicU64,
    pub(crate) loads_failed: AtomicU64,
    pub(crate) reloads: AtomicU64,
    pub(crate) requests_dropped: AtomicU64,
    pub(crate) requests_abandoned: AtomicU64,
    pub(crate) hotload_requeues: AtomicU64,
}

impl Counters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// A snapshot of cache activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Requests that claimed a slot and started reading.
    pub loads_started: u64,
    /// Loads that ended with the slot `Loaded`.
    pub loads_completed: u64,
    /// Loads that failed to read or decode.
    pub loads_failed: u64,
    /// Completed loads that replaced previously loaded bytes.
    pub reloads: u64,
    /// Requests dropped because the file or slot no longer existed.
    pub requests_dropped: u64,
    /// Requests that found another worker already loading the slot, or
    /// found the loaded bytes already current.
    pub requests_abandoned: u64,
    /// Paths the hotload monitor re-queued.
    pub hotload_requeues: u64,
    /// Slots currently allocated.
    pub live_slots: usize,
    /// Requests waiting in the queue.
    pub queued_requests: usize,
}

/// State shared by the cache, its workers, its monitor, and decode tasks.
pub(crate) struct CacheInner {
    pub(crate) config: CacheConfig,
    pub(crate) fs: Arc<dyn FileSystem>,
    pub(crate) decoders: DecoderRegistry,
    pub(crate) table: SlotTable,
    pub(crate) queue: RequestQueue,
    pub(crate) allocator: Mutex<BlockAllocator>,
    pub(crate) events: Mutex<AssetEventBuffer>,
    pub(crate) counters: Counters,
    pub(crate) terminate: AtomicBool,
    pub(crate) monitor_stop: Semaphore,
}

impl CacheInner {
    fn check_path(&self, path: &str) -> AssetResult<()> {
        if path.is_empty() {
            return Err(AssetError::NotFound { path: String::new() });
        }
        let max = self.config.max_path_len.min(self.queue.max_path_len());
        if path.len() > max {
            return Err(AssetError::PathTooLong {
                path: path.to_string(),
                max,
            });
        }
        Ok(())
    }

    pub(crate) fn alloc_asset(&self, path: &str, enqueue: bool) -> AssetResult<Handle> {
        self.check_path(path)?;
        let allocated = self.table.get_or_alloc(path)?;
        if allocated.created {
            tracing::trace!("Allocated slot {} for '{}'", allocated.handle, path);
        }
        if enqueue {
            // Outside the table lock: enqueue blocks while the ring is full.
            self.enqueue_or_discard(path, &allocated)?;
        }
        Ok(allocated.handle)
    }

    pub(crate) fn get_asset(&self, path: &str, load_if_missing: bool) -> AssetResult<Handle> {
        self.check_path(path)?;
        if let Some(handle) = self.table.lookup(path) {
            return Ok(handle);
        }
        if !load_if_missing {
            return Err(AssetError::NotFound {
                path: path.to_string(),
            });
        }

        let allocated = self.table.get_or_alloc(path)?;
        if allocated.created {
            self.enqueue_or_discard(path, &allocated)?;
        }
        Ok(allocated.handle)
    }

    /// Queue a load for `path`. If that fails for a slot this call created,
    /// the slot is released again so a later request can retry the load.
    fn enqueue_or_discard(&self, path: &str, allocated: &Allocated) -> AssetResult<()> {
        let Err(err) = self.queue.enqueue(path) else {
            return Ok(());
        };
        if allocated.created {
            let handle = allocated.handle;
            let slot = self.table.slot(handle.index());
            // A concurrent request may already be loading it; leave it alone then.
            if slot.status.transition(AssetStatus::Unloaded, AssetStatus::Queued) {
                if self.table.retire(handle).is_ok() {
                    *slot.data.write() = SlotData::default();
                    slot.status.store(AssetStatus::Unloaded);
                    self.table.recycle(handle.index());
                    tracing::debug!("Released slot {} after failed enqueue of '{}'", handle, path);
                } else {
                    slot.status.store(AssetStatus::Unloaded);
                }
            }
        }
        Err(err)
    }

    /// The slot for `handle` if the handle is current and the slot is `Loaded`.
    fn loaded_slot(&self, handle: Handle) -> Option<&Slot> {
        if !self.table.is_current(handle) {
            return None;
        }
        let slot = self.table.slot(handle.index());
        slot.status.load().is_loaded().then_some(slot)
    }

    /// Read guard on a loaded slot's data, re-validated under the lock.
    fn loaded_data(&self, handle: Handle) -> Option<RwLockReadGuard<'_, SlotData>> {
        let slot = self.loaded_slot(handle)?;
        let data = slot.data.read();
        let valid = slot.generation() == handle.generation()
            && slot.status.load().is_loaded()
            && data.payload.is_some();
        valid.then_some(data)
    }

    fn payload(&self, handle: Handle) -> Option<Payload> {
        self.loaded_data(handle)?.payload.clone()
    }

    pub(crate) fn free_asset(&self, handle: Handle) -> AssetResult<()> {
        if !self.table.is_current(handle) {
            return Err(AssetError::InvalidHandle { handle });
        }
        let slot = self.table.slot(handle.index());

        // Claim the slot so no worker can start loading it while it is torn down.
        let previous = if slot.status.transition(AssetStatus::Loaded, AssetStatus::Queued) {
            AssetStatus::Loaded
        } else if slot.status.transition(AssetStatus::Unloaded, AssetStatus::Queued) {
            AssetStatus::Unloaded
        } else {
            return Err(AssetError::LoadInProgress { handle });
        };

        if let Err(err) = self.table.retire(handle) {
            // The slot was freed and reused between the checks above.
            slot.status.store(previous);
            return Err(err);
        }

        let (block, kind) = {
            let mut data = slot.data.write();
            let block = data.block.take();
            let kind = data.kind;
            *data = SlotData::default();
            (block, kind)
        };
        if let Some(block) = block {
            self.allocator.lock().free(block);
        }
        slot.last_modified.store(0, Ordering::Release);
        slot.failed_modified.store(0, Ordering::Release);
        slot.status.store(AssetStatus::Unloaded);
        self.table.recycle(handle.index());

        self.events.lock().push(AssetEvent::Removed { handle, kind });
        tracing::debug!("Freed asset {}", handle);
        Ok(())
    }

    pub(crate) fn stats(&self) -> CacheStats {
        let c = &self.counters;
        CacheStats {
            loads_started: c.loads_started.load(Ordering::Relaxed),
            loads_completed: c.loads_completed.load(Ordering::Relaxed),
            loads_failed: c.loads_failed.load(Ordering::Relaxed),
            reloads: c.reloads.load(Ordering::Relaxed),
            requests_dropped: c.requests_dropped.load(Ordering::Relaxed),
            requests_abandoned: c.requests_abandoned.load(Ordering::Relaxed),
            hotload_requeues: c.hotload_requeues.load(Ordering::Relaxed),
            live_slots: self.table.live_count(),
            queued_requests: self.queue.len(),
        }
    }
}

impl AssetRequester for CacheInner {
    fn request(&self, path: &str) -> AssetResult<Handle> {
        self.get_asset(path, true)
    }
}

/// A loaded asset as seen through [`AssetCache::get_asset_from_handle`].
#[derive(Debug, Clone)]
pub struct AssetInfo {
    pub handle: Handle,
    pub path: Arc<str>,
    pub kind: AssetKind,
    /// Bytes of the backing block.
    pub size: u64,
    pub version: u32,
    pub payload: Payload,
}

/// Concurrent, hot-reloading cache of file-backed assets.
///
/// # Example
///
/// ```ignore
/// let cache = AssetCache::new(CacheConfig::new("assets"))?;
/// let handle = cache.get_asset("textures/grass.tex", true)?;
///
/// // Each frame:
/// let texture = cache.get_texture(handle);
/// if !texture.is_nil() {
///     upload(&texture, &cache.bytes(handle).unwrap()[texture.pixels.as_range()]);
/// }
/// ```
pub struct AssetCache {
    inner: Arc<CacheInner>,
    decode_pool: Option<Arc<TaskPool>>,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl AssetCache {
    /// Create a cache reading from `config.root` on disk with the built-in decoders.
    pub fn new(config: CacheConfig) -> AssetResult<Self> {
        let fs = Arc::new(DiskFileSystem::new(&config.root));
        Self::with_parts(config, fs, DecoderRegistry::with_builtin())
    }

    /// Create a cache from an explicit file layer and decoder registry.
    pub fn with_parts(
        config: CacheConfig,
        fs: Arc<dyn FileSystem>,
        decoders: DecoderRegistry,
    ) -> AssetResult<Self> {
        config.validate()?;

        let inner = Arc::new(CacheInner {
            fs,
            decoders,
            table: SlotTable::new(config.slot_capacity),
            queue: RequestQueue::new(config.queue_bytes),
            allocator: Mutex::new(BlockAllocator::new(config.allocator)),
            events: Mutex::new(AssetEventBuffer::new()),
            counters: Counters::default(),
            terminate: AtomicBool::new(false),
            monitor_stop: Semaphore::new(0),
            config,
        });

        let decode_pool = match inner.config.decode_mode {
            DecodeMode::TaskPool { threads } => {
                Some(Arc::new(TaskPool::with_name("hearth-decode", threads)))
            }
            DecodeMode::Inline => None,
        };

        let mut threads = Vec::with_capacity(inner.config.worker_count + 1);
        for i in 0..inner.config.worker_count {
            let inner = Arc::clone(&inner);
            let pool = decode_pool.clone();
            let handle = thread::Builder::new()
                .name(format!("hearth-loader-{}", i))
                .spawn(move || worker::run(&inner, pool.as_deref(), i))
                .map_err(AssetError::from)?;
            threads.push(handle);
        }

        if let Some(period) = inner.config.hotload_period {
            let inner = Arc::clone(&inner);
            let handle = thread::Builder::new()
                .name("hearth-hotload".to_string())
                .spawn(move || hot_reload::run(&inner, period))
                .map_err(AssetError::from)?;
            threads.push(handle);
        }

        tracing::info!(
            "Asset cache started: {} slots, {} workers, hotload {:?}",
            inner.config.slot_capacity,
            inner.config.worker_count,
            inner.config.hotload_period
        );

        Ok(Self {
            inner,
            decode_pool,
            threads: Mutex::new(threads),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Handle for `path`. On a miss with `load_if_missing`, allocate a slot
    /// (status `Unloaded`) and queue it for loading; otherwise return `NotFound`.
    pub fn get_asset(&self, path: &str, load_if_missing: bool) -> AssetResult<Handle> {
        self.inner.get_asset(path, load_if_missing)
    }

    /// Allocate a slot for `path` (or return the existing one) and optionally
    /// queue a load, even if the path is already loaded.
    pub fn alloc_asset(&self, path: &str, enqueue: bool) -> AssetResult<Handle> {
        self.inner.alloc_asset(path, enqueue)
    }

    /// The loaded asset behind `handle`, or `None` if the handle is stale or
    /// the asset is not loaded.
    pub fn get_asset_from_handle(&self, handle: Handle) -> Option<AssetInfo> {
        let data = self.inner.loaded_data(handle)?;
        let slot = self.inner.table.slot(handle.index());
        Some(AssetInfo {
            handle,
            path: data.path.clone()?,
            kind: data.kind,
            size: data.size,
            version: slot.version.get(),
            payload: data.payload.clone()?,
        })
    }

    /// Status of the slot behind `handle`, or `None` for a stale handle.
    pub fn status(&self, handle: Handle) -> Option<AssetStatus> {
        self.inner
            .table
            .is_current(handle)
            .then(|| self.inner.table.slot(handle.index()).status.load())
    }

    /// Returns `true` if `handle` resolves to a loaded asset.
    pub fn is_loaded(&self, handle: Handle) -> bool {
        self.inner.loaded_slot(handle).is_some()
    }

    /// Version of the asset: 0 before the first load, bumped on every reload.
    /// Stale handles report 0.
    pub fn version(&self, handle: Handle) -> u32 {
        if !self.inner.table.is_current(handle) {
            return 0;
        }
        self.inner.table.slot(handle.index()).version.get()
    }

    /// Release the asset's memory and recycle its slot.
    ///
    /// Fails with `InvalidHandle` for stale or already-freed handles and with
    /// `LoadInProgress` while a worker is loading the slot.
    pub fn free_asset(&self, handle: Handle) -> AssetResult<()> {
        self.inner.free_asset(handle)
    }

    pub fn get_texture(&self, handle: Handle) -> Arc<Texture> {
        match self.inner.payload(handle) {
            Some(Payload::Texture(texture)) => texture,
            _ => Texture::nil(),
        }
    }

    pub fn get_model(&self, handle: Handle) -> Arc<Model> {
        match self.inner.payload(handle) {
            Some(Payload::Model(model)) => model,
            _ => Model::nil(),
        }
    }

    pub fn get_font(&self, handle: Handle) -> Arc<Font> {
        match self.inner.payload(handle) {
            Some(Payload::Font(font)) => font,
            _ => Font::nil(),
        }
    }

    pub fn get_skeleton(&self, handle: Handle) -> Arc<Skeleton> {
        match self.inner.payload(handle) {
            Some(Payload::Skeleton(skeleton)) => skeleton,
            _ => Skeleton::nil(),
        }
    }

    pub fn get_animation(&self, handle: Handle) -> Arc<Animation> {
        match self.inner.payload(handle) {
            Some(Payload::Animation(animation)) => animation,
            _ => Animation::nil(),
        }
    }

    /// Like the typed accessors, but reports why the payload is unavailable.
    pub fn try_payload(&self, handle: Handle, expected: AssetKind) -> AssetResult<Payload> {
        let payload = self
            .inner
            .payload(handle)
            .ok_or(AssetError::InvalidHandle { handle })?;
        if payload.kind() != expected {
            return Err(AssetError::KindMismatch {
                expected,
                actual: payload.kind(),
            });
        }
        Ok(payload)
    }

    /// Raw bytes of a loaded asset.
    ///
    /// The guard blocks reloads and frees of this asset while held; do not
    /// call back into the cache for the same asset while holding it.
    pub fn bytes(&self, handle: Handle) -> Option<MappedRwLockReadGuard<'_, [u8]>> {
        let data = self.inner.loaded_data(handle)?;
        RwLockReadGuard::try_map(data, |d| d.block.as_ref().map(|b| b.as_slice())).ok()
    }

    /// A sub-range of a loaded asset's bytes, typically taken from its payload.
    pub fn bytes_range(&self, handle: Handle, range: ByteRange) -> Option<MappedRwLockReadGuard<'_, [u8]>> {
        let data = self.inner.loaded_data(handle)?;
        RwLockReadGuard::try_map(data, |d| {
            d.block
                .as_ref()
                .and_then(|b| b.as_slice().get(range.as_range()))
        })
        .ok()
    }

    /// Take every event recorded since the last drain.
    pub fn drain_events(&self) -> Vec<AssetEvent> {
        self.inner.events.lock().drain().collect()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats()
    }

    pub fn allocator_stats(&self) -> AllocatorStats {
        self.inner.allocator.lock().stats()
    }

    /// Process one queued request on the calling thread.
    ///
    /// Returns `false` if the queue was empty. Decoding follows the configured
    /// [`DecodeMode`].
    pub fn pump(&self) -> bool {
        match self.inner.queue.dequeue() {
            Some(path) => {
                worker::handle_request(&self.inner, self.decode_pool.as_deref(), &path);
                true
            }
            None => false,
        }
    }

    /// Pump until the queue is empty, including requests queued by decoders
    /// along the way. Returns the number of requests processed.
    pub fn pump_until_idle(&self) -> usize {
        let mut processed = 0;
        while self.pump() {
            processed += 1;
        }
        processed
    }

    /// Run one hotload pass on the calling thread. Returns the number of
    /// paths re-queued.
    pub fn hotload_scan(&self) -> usize {
        hot_reload::scan_once(&self.inner)
    }

    /// Stop and join every background thread. Queued requests that have not
    /// started are discarded. Idempotent.
    pub fn shutdown(&self) {
        let threads = std::mem::take(&mut *self.threads.lock());

        if !self.inner.terminate.swap(true, Ordering::AcqRel) {
            self.inner.queue.close(self.inner.config.worker_count);
            self.inner.monitor_stop.signal();

            for handle in threads {
                if let Err(e) = handle.join() {
                    tracing::error!("Asset cache thread panicked: {:?}", e);
                }
            }
            if let Some(pool) = &self.decode_pool {
                pool.shutdown();
            }
            tracing::info!("Asset cache shut down");
        }
    }
}

impl Drop for AssetCache {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::TextureDecoder;
    use crate::io::MemoryFileSystem;
    use crate::payload::TextureFormat;

    fn manual_cache(fs: Arc<MemoryFileSystem>) -> AssetCache {
        AssetCache::with_parts(
            CacheConfig::manual(".").with_slot_capacity(8),
            fs,
            DecoderRegistry::with_builtin(),
        )
        .unwrap()
    }

    fn texture_bytes() -> Vec<u8> {
        TextureDecoder::encode(2, 2, TextureFormat::R8, 1, &[1, 2, 3, 4])
    }

    #[test]
    fn test_get_asset_without_load_is_not_found() {
        let cache = manual_cache(Arc::new(MemoryFileSystem::new()));
        assert!(matches!(
            cache.get_asset("x.tex", false),
            Err(AssetError::NotFound { .. })
        ));
        assert_eq!(cache.stats().queued_requests, 0);
    }

    #[test]
    fn test_load_and_access() {
        let fs = Arc::new(MemoryFileSystem::new());
        fs.insert("x.tex", texture_bytes());
        let cache = manual_cache(Arc::clone(&fs));

        let handle = cache.get_asset("x.tex", true).unwrap();
        assert_eq!(cache.status(handle), Some(AssetStatus::Unloaded));
        assert!(cache.get_texture(handle).is_nil());

        assert_eq!(cache.pump_until_idle(), 1);
        assert_eq!(cache.status(handle), Some(AssetStatus::Loaded));

        let texture = cache.get_texture(handle);
        assert!(!texture.is_nil());
        let pixels = cache.bytes_range(handle, texture.pixels).unwrap();
        assert_eq!(&*pixels, &[1, 2, 3, 4]);
        drop(pixels);

        assert!(cache.get_model(handle).is_nil());
        assert!(matches!(
            cache.try_payload(handle, AssetKind::Model),
            Err(AssetError::KindMismatch { .. })
        ));
        assert_eq!(cache.version(handle), 1);
    }

    #[test]
    fn test_free_releases_memory_and_invalidates() {
        let fs = Arc::new(MemoryFileSystem::new());
        fs.insert("x.tex", texture_bytes());
        let cache = manual_cache(fs);

        let handle = cache.get_asset("x.tex", true).unwrap();
        cache.pump_until_idle();
        assert!(cache.allocator_stats().used_bytes > 0);

        cache.free_asset(handle).unwrap();
        assert_eq!(cache.allocator_stats().used_bytes, 0);
        assert!(cache.get_asset_from_handle(handle).is_none());
        assert!(matches!(
            cache.free_asset(handle),
            Err(AssetError::InvalidHandle { .. })
        ));

        let events = cache.drain_events();
        assert!(events[0].is_created());
        assert!(events[1].is_removed());
    }

    #[test]
    fn test_free_during_load_is_rejected() {
        let cache = manual_cache(Arc::new(MemoryFileSystem::new()));
        let handle = cache.get_asset("x.tex", true).unwrap();

        let slot = cache.inner.table.slot(handle.index());
        assert!(slot.status.transition(AssetStatus::Unloaded, AssetStatus::Queued));
        assert!(matches!(
            cache.free_asset(handle),
            Err(AssetError::LoadInProgress { .. })
        ));
        slot.status.store(AssetStatus::Unloaded);
        assert!(cache.free_asset(handle).is_ok());
    }

    #[test]
    fn test_path_limits() {
        let cache = AssetCache::with_parts(
            CacheConfig::manual(".").with_max_path_len(8),
            Arc::new(MemoryFileSystem::new()),
            DecoderRegistry::new(),
        )
        .unwrap();
        assert!(matches!(
            cache.get_asset("much/too/long.tex", true),
            Err(AssetError::PathTooLong { max: 8, .. })
        ));
        assert!(cache.get_asset("", true).is_err());
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let cache = AssetCache::with_parts(
            CacheConfig::default().with_worker_count(2),
            Arc::new(MemoryFileSystem::new()),
            DecoderRegistry::with_builtin(),
        )
        .unwrap();
        cache.shutdown();
        cache.shutdown();
        assert!(matches!(
            cache.get_asset("late.tex", true),
            Err(AssetError::QueueClosed)
        ));
    }

    #[test]
    fn test_failed_enqueue_releases_new_slot() {
        let cache = manual_cache(Arc::new(MemoryFileSystem::new()));
        let kept = cache.get_asset("kept.tex", true).unwrap();
        cache.inner.queue.close(0);

        assert!(matches!(
            cache.get_asset("late.tex", true),
            Err(AssetError::QueueClosed)
        ));
        assert!(matches!(
            cache.get_asset("late.tex", false),
            Err(AssetError::NotFound { .. })
        ));
        assert!(matches!(
            cache.alloc_asset("other.tex", true),
            Err(AssetError::QueueClosed)
        ));
        assert_eq!(cache.stats().live_slots, 1);

        // An existing slot is not released by a failed re-queue.
        assert!(cache.alloc_asset("kept.tex", true).is_err());
        assert_eq!(cache.get_asset("kept.tex", false).unwrap(), kept);
    }
}
