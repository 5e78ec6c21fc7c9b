//! Loader threads.
//!
//! Each worker parks on the request queue, dequeues a path, and runs
//! [`handle_request`]. Only the worker that wins the `Unloaded -> Queued`
//! compare-and-swap on a slot loads it; every other request for that slot is
//! a no-op.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::Ordering;

use hearth_core::TaskPool;
use hearth_core::alloc::MemoryBlock;
use hearth_core::profiling::profile_function;

use crate::cache::{CacheInner, Counters};
use crate::decoder::{DecodeContext, Decoder};
use crate::error::{AssetError, AssetResult};
use crate::event::AssetEvent;
use crate::handle::Handle;
use crate::io::FileStat;
use crate::payload::Payload;
use crate::slot::Slot;
use crate::state::AssetStatus;

pub(crate) fn run(inner: &Arc<CacheInner>, pool: Option<&TaskPool>, id: usize) {
    tracing::debug!("Loader {} started", id);
    loop {
        inner.queue.wait_for_data();
        if inner.terminate.load(Ordering::Acquire) {
            break;
        }
        if let Some(path) = inner.queue.dequeue() {
            handle_request(inner, pool, &path);
        }
    }
    tracing::debug!("Loader {} stopped", id);
}

/// Process one dequeued path.
pub(crate) fn handle_request(inner: &Arc<CacheInner>, pool: Option<&TaskPool>, path: &str) {
    profile_function!();
    let counters = &inner.counters;

    let stat = inner.fs.stat(path);
    if !stat.exists() {
        tracing::debug!("Dropping request for missing file '{}'", path);
        Counters::bump(&counters.requests_dropped);
        return;
    }

    let Some(index) = inner.table.find(path) else {
        tracing::debug!("Dropping request for '{}': no slot", path);
        Counters::bump(&counters.requests_dropped);
        return;
    };
    let slot = inner.table.slot(index);

    let reload = match slot.status.load() {
        AssetStatus::Loaded => {
            if stat.modified == slot.data.read().loaded_modified {
                tracing::trace!("'{}' is already current", path);
                Counters::bump(&counters.requests_abandoned);
                return;
            }
            if !slot.status.transition(AssetStatus::Loaded, AssetStatus::Unloaded) {
                tracing::trace!("Reload of '{}' claimed by another worker", path);
                Counters::bump(&counters.requests_abandoned);
                return;
            }
            true
        }
        _ => false,
    };

    if !slot.status.transition(AssetStatus::Unloaded, AssetStatus::Queued) {
        tracing::trace!("'{}' is already being loaded", path);
        Counters::bump(&counters.requests_abandoned);
        return;
    }

    // The slot is ours. It may have been freed and reused for another path
    // after the lookup above; load whatever it holds now.
    let handle = Handle::new(index, slot.generation());
    let Some(current) = slot.path() else {
        slot.status.store(AssetStatus::Unloaded);
        Counters::bump(&counters.requests_dropped);
        return;
    };
    let stat = if *current == *path { stat } else { inner.fs.stat(&current) };

    // The stamp check above can race a reload that finished in between; the
    // bytes under the claim are the authority.
    let current_bytes = {
        let data = slot.data.read();
        data.block.is_some() && data.payload.is_some() && data.loaded_modified == stat.modified
    };
    if current_bytes {
        tracing::trace!("'{}' was reloaded by another worker", current);
        slot.status.store(AssetStatus::Loaded);
        Counters::bump(&counters.requests_abandoned);
        return;
    }

    Counters::bump(&counters.loads_started);
    let reload = reload || slot.data.read().block.is_some();
    release_block(inner, slot);

    if !stat.exists() {
        tracing::debug!("Dropping request for missing file '{}'", current);
        rollback(inner, slot, stat);
        Counters::bump(&counters.requests_dropped);
        return;
    }

    slot.last_modified.store(stat.modified, Ordering::Release);
    let block = match read_file(inner, &current, stat) {
        Ok(block) => block,
        Err(err) => {
            fail(inner, slot, handle, &current, stat, err.to_string());
            return;
        }
    };

    let decoder = match inner.decoders.find_for_path(&current) {
        Ok(decoder) => Arc::clone(decoder),
        Err(err) => {
            inner.allocator.lock().free(block);
            fail(inner, slot, handle, &current, stat, err.to_string());
            return;
        }
    };

    let job = DecodeJob {
        handle,
        path: current,
        stat,
        block,
        decoder,
        reload,
    };
    match pool {
        Some(pool) => {
            let inner = Arc::clone(inner);
            pool.spawn_detached(async move { job.run(&inner) });
        }
        None => job.run(inner),
    }
}

fn read_file(inner: &CacheInner, path: &str, stat: FileStat) -> AssetResult<MemoryBlock> {
    let size = usize::try_from(stat.size).map_err(|_| AssetError::Other {
        message: format!("'{}' is too large to load ({} bytes)", path, stat.size),
    })?;
    let mut block = inner.allocator.lock().alloc(size);
    if let Err(err) = inner.fs.read_into(path, block.as_mut_slice()) {
        inner.allocator.lock().free(block);
        return Err(err);
    }
    Ok(block)
}

/// Free the bytes and payload of a claimed slot.
fn release_block(inner: &CacheInner, slot: &Slot) {
    let block = {
        let mut data = slot.data.write();
        data.payload = None;
        data.size = 0;
        data.loaded_modified = 0;
        data.block.take()
    };
    if let Some(block) = block {
        inner.allocator.lock().free(block);
    }
}

fn rollback(inner: &CacheInner, slot: &Slot, stat: FileStat) {
    release_block(inner, slot);
    slot.last_modified.store(0, Ordering::Release);
    slot.failed_modified.store(stat.modified, Ordering::Release);
    slot.status.store(AssetStatus::Unloaded);
}

fn fail(inner: &CacheInner, slot: &Slot, handle: Handle, path: &str, stat: FileStat, error: String) {
    tracing::error!("Failed to load '{}': {}", path, error);
    rollback(inner, slot, stat);
    Counters::bump(&inner.counters.loads_failed);
    inner.events.lock().push(AssetEvent::LoadFailed {
        handle,
        path: path.to_string(),
        error,
    });
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// Decode work for one claimed slot. Runs inline or on the decode pool,
/// without any cache lock held.
struct DecodeJob {
    handle: Handle,
    path: Arc<str>,
    stat: FileStat,
    block: MemoryBlock,
    decoder: Arc<dyn Decoder>,
    reload: bool,
}

impl DecodeJob {
    fn run(self, inner: &CacheInner) {
        profile_function!();
        let slot = inner.table.slot(self.handle.index());

        // A panicking decoder must still release the slot it claimed.
        let result = {
            let ctx = DecodeContext::new(&self.path, self.block.as_slice(), inner);
            panic::catch_unwind(AssertUnwindSafe(|| self.decoder.decode(&ctx)))
                .unwrap_or_else(|payload| {
                    Err(AssetError::decode(
                        &*self.path,
                        format!("decoder panicked: {}", panic_message(payload.as_ref())),
                    ))
                })
        };

        match result {
            Ok(payload) => self.publish(inner, slot, payload),
            Err(err) => {
                inner.allocator.lock().free(self.block);
                fail(inner, slot, self.handle, &self.path, self.stat, err.to_string());
            }
        }
    }

    fn publish(self, inner: &CacheInner, slot: &Slot, payload: Payload) {
        let kind = payload.kind();
        {
            let mut data = slot.data.write();
            data.size = self.stat.size;
            data.loaded_modified = self.stat.modified;
            data.kind = kind;
            data.payload = Some(payload);
            data.block = Some(self.block);
        }
        slot.failed_modified.store(0, Ordering::Release);
        let version = slot.version.increment();
        slot.status.store(AssetStatus::Loaded);

        let counters = &inner.counters;
        Counters::bump(&counters.loads_completed);
        let event = if self.reload {
            Counters::bump(&counters.reloads);
            tracing::debug!("Reloaded '{}' ({} bytes, version {})", self.path, self.stat.size, version);
            AssetEvent::Modified {
                handle: self.handle,
                kind,
                version,
            }
        } else {
            tracing::debug!("Loaded '{}' ({} bytes)", self.path, self.stat.size);
            AssetEvent::Created {
                handle: self.handle,
                kind,
                version,
            }
        };
        inner.events.lock().push(event);

        // The monitor saw a newer file while this load was in flight and its
        // request was abandoned; queue the follow-up reload here.
        if slot.last_modified.load(Ordering::Acquire) != self.stat.modified {
            tracing::debug!("'{}' changed while loading, re-queueing", self.path);
            if let Err(err) = inner.queue.enqueue(&self.path) {
                tracing::warn!("Could not re-queue '{}': {}", self.path, err);
            }
        }
    }
}
