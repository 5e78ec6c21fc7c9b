//! Concurrent, hot-reloading asset cache for hearth.
//!
//! Assets are named by path. [`AssetCache::get_asset`] hands out a
//! generational [`Handle`] immediately and queues the file for loading;
//! loader threads read it into memory from the block allocator and run the
//! [`Decoder`] registered for its extension. A hotload monitor re-queues
//! assets whose files change on disk.
//!
//! # Example
//!
//! ```ignore
//! use hearth_assets::{AssetCache, CacheConfig};
//!
//! let cache = AssetCache::new(CacheConfig::new("assets"))?;
//! let handle = cache.get_asset("textures/grass.tex", true)?;
//!
//! // Later:
//! let texture = cache.get_texture(handle);
//! if !texture.is_nil() {
//!     // texture.width, texture.height, cache.bytes_range(handle, texture.pixels)
//! }
//! ```

pub mod cache;
pub mod config;
pub mod decoder;
pub mod error;
pub mod event;
pub mod handle;
mod hot_reload;
pub mod io;
mod path_index;
pub mod payload;
mod queue;
mod slot;
pub mod state;
mod worker;

pub use cache::{AssetCache, AssetInfo, CacheStats};
pub use config::{CacheConfig, DecodeMode};
pub use decoder::{
    AssetRequester, ByteReader, DecodeContext, Decoder, DecoderRegistry, MeshSource, ModelDecoder,
    TextureDecoder,
};
pub use error::{AssetError, AssetResult};
pub use event::AssetEvent;
pub use handle::{Handle, TrackedHandle};
pub use io::{DiskFileSystem, FileStat, FileSystem, MemoryFileSystem};
pub use payload::{
    Animation, AssetKind, ByteRange, Font, Mesh, Model, Payload, Skeleton, Texture, TextureFormat,
};
pub use state::AssetStatus;

pub use hearth_core::alloc::{AllocatorConfig, AllocatorStats};
