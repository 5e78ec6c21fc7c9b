//! Hot reload tests.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use hearth_assets::*;
use hearth_test_utils::{AssetDir, RecordingDecoder, wait_until};

const TIMEOUT: Duration = Duration::from_secs(10);

fn texture_bytes(width: u32) -> Vec<u8> {
    let pixels = vec![7u8; (width * width) as usize];
    TextureDecoder::encode(width, width, TextureFormat::R8, 1, &pixels)
}

/// A manual cache with `x.tex` already loaded.
fn loaded_cache() -> (Arc<MemoryFileSystem>, AssetCache, Handle) {
    let fs = Arc::new(MemoryFileSystem::new());
    fs.insert("x.tex", texture_bytes(2));
    let cache = AssetCache::with_parts(
        CacheConfig::manual("."),
        fs.clone(),
        DecoderRegistry::with_builtin(),
    )
    .unwrap();
    let handle = cache.get_asset("x.tex", true).unwrap();
    cache.pump_until_idle();
    assert!(cache.is_loaded(handle));
    cache.drain_events();
    (fs, cache, handle)
}

#[test]
fn test_scan_requeues_each_change_once() {
    let (fs, cache, _) = loaded_cache();

    assert_eq!(cache.hotload_scan(), 0);
    fs.touch("x.tex").unwrap();
    assert_eq!(cache.hotload_scan(), 1);
    assert_eq!(cache.hotload_scan(), 0);
    assert_eq!(cache.stats().hotload_requeues, 1);
    assert_eq!(cache.stats().queued_requests, 1);
}

#[test]
fn test_concurrent_scans_requeue_once() {
    let (fs, cache, _) = loaded_cache();
    fs.touch("x.tex").unwrap();

    let total: usize = thread::scope(|s| {
        let a = s.spawn(|| cache.hotload_scan());
        let b = s.spawn(|| cache.hotload_scan());
        a.join().unwrap() + b.join().unwrap()
    });
    assert_eq!(total, 1);
}

#[test]
fn test_reload_replaces_payload_and_bumps_version() {
    let (fs, cache, handle) = loaded_cache();
    let mut tracked = TrackedHandle::new(handle);
    assert!(tracked.check_changed(cache.version(handle)));

    fs.insert("x.tex", texture_bytes(4));
    assert_eq!(cache.hotload_scan(), 1);
    assert_eq!(cache.pump_until_idle(), 1);

    assert_eq!(cache.version(handle), 2);
    assert!(tracked.check_changed(cache.version(handle)));
    assert_eq!(cache.get_texture(handle).width, 4);
    assert_eq!(cache.get_asset("x.tex", false).unwrap(), handle);

    let events = cache.drain_events();
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], AssetEvent::Modified { version: 2, .. }));

    let stats = cache.stats();
    assert_eq!(stats.reloads, 1);
    assert!(cache.allocator_stats().is_conserved());
}

#[test]
fn test_stale_duplicate_reload_is_abandoned() {
    let (fs, cache, handle) = loaded_cache();
    fs.touch("x.tex").unwrap();

    cache.alloc_asset("x.tex", true).unwrap();
    cache.alloc_asset("x.tex", true).unwrap();
    assert_eq!(cache.pump_until_idle(), 2);

    assert_eq!(cache.version(handle), 2);
    let stats = cache.stats();
    assert_eq!(stats.reloads, 1);
    assert_eq!(stats.requests_abandoned, 1);
}

#[test]
fn test_deleted_file_keeps_loaded_bytes() {
    let (fs, cache, handle) = loaded_cache();
    fs.remove("x.tex");

    assert_eq!(cache.hotload_scan(), 0);
    assert!(cache.is_loaded(handle));
    assert_eq!(cache.get_texture(handle).width, 2);

    // Restoring the file with a new stamp reloads it.
    fs.insert_with_stamp("x.tex", texture_bytes(4), 100);
    assert_eq!(cache.hotload_scan(), 1);
    cache.pump_until_idle();
    assert_eq!(cache.get_texture(handle).width, 4);
}

#[test]
fn test_free_stops_tracking() {
    let (fs, cache, handle) = loaded_cache();
    cache.free_asset(handle).unwrap();

    fs.touch("x.tex").unwrap();
    assert_eq!(cache.hotload_scan(), 0);
}

/// A threaded cache with one delayed `.bin` decoder.
fn threaded_cache(workers: usize, delay: Duration) -> (Arc<MemoryFileSystem>, AssetCache, RecordingDecoder) {
    let fs = Arc::new(MemoryFileSystem::new());
    fs.insert("x.bin", b"bytes".to_vec());
    let recorder = RecordingDecoder::new(AssetKind::Skeleton, &["bin"]);
    recorder.set_delay(Some(delay));
    let mut decoders = DecoderRegistry::new();
    decoders.register(recorder.clone());

    let config = CacheConfig::manual(".").with_worker_count(workers);
    let cache = AssetCache::with_parts(config, fs.clone(), decoders).unwrap();
    (fs, cache, recorder)
}

#[test]
fn test_racing_workers_reload_once() {
    let (fs, cache, recorder) = threaded_cache(4, Duration::from_millis(20));
    let handle = cache.get_asset("x.bin", true).unwrap();
    assert!(wait_until(TIMEOUT, || cache.is_loaded(handle)));

    fs.touch("x.bin").unwrap();
    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                for _ in 0..4 {
                    cache.alloc_asset("x.bin", true).unwrap();
                }
            });
        }
    });

    assert!(wait_until(TIMEOUT, || {
        let stats = cache.stats();
        stats.loads_completed + stats.requests_abandoned == 1 + 16
    }));
    let stats = cache.stats();
    assert_eq!(stats.loads_started, 2);
    assert_eq!(stats.reloads, 1);
    assert_eq!(stats.requests_abandoned, 15);
    assert_eq!(cache.version(handle), 2);
    assert_eq!(recorder.count_for("x.bin"), 2);
}

#[test]
fn test_change_during_load_is_reloaded_afterwards() {
    let (fs, cache, recorder) = threaded_cache(2, Duration::from_millis(200));
    let handle = cache.get_asset("x.bin", true).unwrap();

    // The first decode is running; the file changes under it.
    assert!(wait_until(TIMEOUT, || recorder.count() == 1));
    fs.touch("x.bin").unwrap();
    assert_eq!(cache.hotload_scan(), 1);

    assert!(wait_until(TIMEOUT, || cache.version(handle) == 2 && cache.is_loaded(handle)));
    assert!(wait_until(TIMEOUT, || cache.stats().queued_requests == 0));
    thread::sleep(Duration::from_millis(50));

    let stats = cache.stats();
    assert_eq!(stats.reloads, 1);
    assert_eq!(stats.requests_abandoned, 1);
    assert_eq!(cache.version(handle), 2);
    assert_eq!(recorder.count_for("x.bin"), 2);

    let events = cache.drain_events();
    assert!(events[0].is_created());
    assert!(matches!(events[1], AssetEvent::Modified { version: 2, .. }));
}

#[test]
fn test_monitor_picks_up_disk_changes() {
    let dir = AssetDir::new();
    dir.write("x.tex", texture_bytes(2));

    let config = CacheConfig::new(dir.path())
        .with_worker_count(1)
        .with_decode_mode(DecodeMode::Inline)
        .with_hotload_period(Some(Duration::from_millis(10)));
    let cache = AssetCache::new(config).unwrap();

    let handle = cache.get_asset("x.tex", true).unwrap();
    assert!(wait_until(TIMEOUT, || cache.is_loaded(handle)));

    dir.write("x.tex", texture_bytes(8));
    assert!(wait_until(TIMEOUT, || cache.get_texture(handle).width == 8));
    assert_eq!(cache.version(handle), 2);

    let events = cache.drain_events();
    assert!(events.iter().any(|e| e.is_created()));
    assert!(events.iter().any(|e| e.is_modified()));

    cache.shutdown();
}
