//! Hotload monitor.
//!
//! Polls the modification stamp of every tracked slot's file on a fixed
//! period. A changed stamp is claimed with a compare-and-swap on the slot's
//! `last_modified`, so two passes racing over the same slot re-queue it once.
//! The monitor never touches slot status; the worker that picks up the
//! request decides whether to reload.

use std::sync::atomic::Ordering;
use std::time::Duration;

use hearth_core::profiling::profile_function;

use crate::cache::{CacheInner, Counters};

pub(crate) fn run(inner: &CacheInner, period: Duration) {
    tracing::debug!("Hotload monitor started, polling every {:?}", period);
    while !inner.monitor_stop.wait_timeout(period) {
        if inner.terminate.load(Ordering::Acquire) {
            break;
        }
        scan_once(inner);
    }
    tracing::debug!("Hotload monitor stopped");
}

/// One pass over every slot. Returns the number of paths re-queued.
pub(crate) fn scan_once(inner: &CacheInner) -> usize {
    profile_function!();
    let mut requeued = 0;

    for index in 0..inner.table.allocated_slots() {
        let slot = inner.table.slot(index);
        let tracked = slot.last_modified.load(Ordering::Acquire);
        let failed = slot.failed_modified.load(Ordering::Acquire);
        if tracked == 0 && failed == 0 {
            continue;
        }
        let Some(path) = slot.path() else {
            continue;
        };

        let stat = inner.fs.stat(&path);
        if !stat.exists() {
            // Keep the loaded bytes; a deleted file is picked up again once it returns.
            continue;
        }

        let claimed = if tracked != 0 {
            stat.modified != tracked
                && slot
                    .last_modified
                    .compare_exchange(tracked, stat.modified, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
        } else {
            // A version that failed to load: retry once the file changes again.
            stat.modified != failed
                && slot
                    .failed_modified
                    .compare_exchange(failed, 0, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
        };
        if !claimed {
            continue;
        }

        tracing::debug!("'{}' changed on disk, re-queueing", path);
        if let Err(err) = inner.queue.enqueue(&path) {
            tracing::warn!("Could not re-queue '{}': {}", path, err);
            continue;
        }
        Counters::bump(&inner.counters.hotload_requeues);
        requeued += 1;
    }

    requeued
}
