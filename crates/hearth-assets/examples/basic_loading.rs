//! Basic asset cache example.
//!
//! This example shows:
//! - Starting a cache with loader threads and a hotload monitor
//! - Requesting a model that pulls in its textures
//! - Polling for loaded assets each "frame"
//! - Picking up a changed file through hot reload
//!
//! Run with `RUST_LOG=debug` to see the loader activity.

use std::fs;
use std::thread;
use std::time::{Duration, Instant};

use hearth_assets::*;

fn texture(width: u32, height: u32, value: u8) -> Vec<u8> {
    let pixels = vec![value; (width * height * 4) as usize];
    TextureDecoder::encode(width, height, TextureFormat::Rgba8, 1, &pixels)
}

fn main() -> AssetResult<()> {
    hearth_core::logging::init();

    let dir = tempfile::tempdir()?;
    fs::create_dir_all(dir.path().join("textures"))?;
    fs::write(dir.path().join("textures/hull.tex"), texture(64, 64, 0x40))?;
    fs::write(dir.path().join("textures/glass.tex"), texture(16, 16, 0xC0))?;

    let quad: Vec<u8> = [[0.0f32, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]
        .iter()
        .flat_map(|v| bytemuck::cast_slice::<f32, u8>(v.as_slice()).to_vec())
        .collect();
    let model = ModelDecoder::encode(
        &[MeshSource {
            vertex_stride: 8,
            vertices: &quad,
            indices: &[0, 1, 2, 2, 3, 0],
        }],
        &["textures/hull.tex", "textures/glass.tex"],
    );
    fs::write(dir.path().join("ship.mdl"), model)?;

    let config = CacheConfig::new(dir.path())
        .with_worker_count(2)
        .with_hotload_period(Some(Duration::from_millis(50)));
    let cache = AssetCache::new(config)?;

    let ship = cache.get_asset("ship.mdl", true)?;
    let mut tracked = TrackedHandle::new(ship);

    let start = Instant::now();
    let mut rewritten = false;
    while start.elapsed() < Duration::from_secs(3) {
        hearth_core::profiling::new_frame();

        for event in cache.drain_events() {
            match event {
                AssetEvent::Created { handle, kind, .. } => {
                    tracing::info!("{} {} loaded", kind, handle);
                }
                AssetEvent::Modified { handle, version, .. } => {
                    tracing::info!("{} reloaded, version {}", handle, version);
                }
                AssetEvent::LoadFailed { path, error, .. } => {
                    tracing::warn!("{} failed: {}", path, error);
                }
                AssetEvent::Removed { .. } => {}
            }
        }

        let model = cache.get_model(ship);
        if !model.is_nil() && tracked.check_changed(cache.version(ship)) {
            for texture in &model.textures {
                let t = cache.get_texture(*texture);
                tracing::info!("  texture {}: {}x{} (nil: {})", texture, t.width, t.height, t.is_nil());
            }
        }

        // Once everything is in, edit a texture on disk and let the monitor notice.
        if !rewritten && model.textures.iter().all(|t| cache.is_loaded(*t)) {
            thread::sleep(Duration::from_millis(20));
            fs::write(dir.path().join("textures/glass.tex"), texture(32, 32, 0xFF))?;
            rewritten = true;
        }

        thread::sleep(Duration::from_millis(16));
    }

    let stats = cache.stats();
    tracing::info!(
        "{} loads, {} reloads, {} hotload requeues",
        stats.loads_completed,
        stats.reloads,
        stats.hotload_requeues
    );
    tracing::info!("Allocator: {:?}", cache.allocator_stats());

    cache.shutdown();
    Ok(())
}
