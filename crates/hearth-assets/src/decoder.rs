//! Decoder plug point.
//!
//! A [`Decoder`] turns the raw bytes a worker read into a typed [`Payload`].
//! Decoders are looked up by lower-cased file extension; when several are
//! registered for one extension the highest [`Decoder::priority`] wins.
//!
//! Decoders run after the worker has released every cache lock, so they may
//! issue nested requests (a model requesting its textures) through
//! [`DecodeContext::request`].

use std::path::Path;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use hearth_core::alloc::HashMap;

use crate::error::{AssetError, AssetResult};
use crate::handle::Handle;
use crate::payload::{AssetKind, ByteRange, Mesh, Model, Payload, Texture, TextureFormat};

/// Default priority for decoders.
pub const DEFAULT_DECODER_PRIORITY: i32 = 0;

/// Issues cache requests on behalf of a decoder.
pub trait AssetRequester: Send + Sync {
    /// Look up `path`, allocating a slot and queueing a load if it is new.
    fn request(&self, path: &str) -> AssetResult<Handle>;
}

/// Input handed to [`Decoder::decode`].
pub struct DecodeContext<'a> {
    path: &'a str,
    bytes: &'a [u8],
    requester: &'a dyn AssetRequester,
}

impl<'a> DecodeContext<'a> {
    pub fn new(path: &'a str, bytes: &'a [u8], requester: &'a dyn AssetRequester) -> Self {
        Self {
            path,
            bytes,
            requester,
        }
    }

    /// The cache path of the asset being decoded.
    pub fn path(&self) -> &'a str {
        self.path
    }

    /// The asset's raw bytes. [`ByteRange`]s in the payload index into this slice.
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Request another asset. Returns immediately; the asset loads in the background.
    pub fn request(&self, path: &str) -> AssetResult<Handle> {
        self.requester.request(path)
    }

    /// A cursor over the bytes that reports errors against this asset's path.
    pub fn reader(&self) -> ByteReader<'a> {
        ByteReader {
            path: self.path,
            bytes: self.bytes,
            pos: 0,
        }
    }
}

/// Trait for decoding one kind of asset.
///
/// # Example
///
/// ```ignore
/// struct SkeletonDecoder;
///
/// impl Decoder for SkeletonDecoder {
///     fn kind(&self) -> AssetKind {
///         AssetKind::Skeleton
///     }
///
///     fn extensions(&self) -> &[&str] {
///         &["skel"]
///     }
///
///     fn decode(&self, ctx: &DecodeContext<'_>) -> AssetResult<Payload> {
///         let mut reader = ctx.reader();
///         let bone_count: u32 = reader.read()?;
///         let bones = reader.take(bone_count as usize * 64)?;
///         reader.finish()?;
///         Ok(Skeleton::new(bone_count, bones).into())
///     }
/// }
/// ```
pub trait Decoder: Send + Sync + 'static {
    /// The kind of payload this decoder produces.
    fn kind(&self) -> AssetKind;

    /// File extensions handled, without dots.
    fn extensions(&self) -> &[&str];

    /// Higher priority decoders win when extensions collide.
    fn priority(&self) -> i32 {
        DEFAULT_DECODER_PRIORITY
    }

    /// Decode the asset. A returned error rolls the slot back to `Unloaded`.
    fn decode(&self, ctx: &DecodeContext<'_>) -> AssetResult<Payload>;
}

struct DecoderEntry {
    decoder: Arc<dyn Decoder>,
    priority: i32,
}

/// Registry of decoders, indexed by extension.
#[derive(Default)]
pub struct DecoderRegistry {
    by_extension: HashMap<String, Vec<DecoderEntry>>,
}

impl DecoderRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with [`TextureDecoder`] and [`ModelDecoder`] registered.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(TextureDecoder);
        registry.register(ModelDecoder);
        registry
    }

    /// Register a decoder for its declared extensions.
    pub fn register(&mut self, decoder: impl Decoder) {
        self.register_arc(Arc::new(decoder));
    }

    /// Register a shared decoder, keeping a handle to it outside the registry.
    pub fn register_arc(&mut self, decoder: Arc<dyn Decoder>) {
        let priority = decoder.priority();
        for ext in decoder.extensions() {
            let entries = self.by_extension.entry(ext.to_lowercase()).or_default();
            entries.push(DecoderEntry {
                decoder: Arc::clone(&decoder),
                priority,
            });
            // Highest priority first; stable sort keeps registration order on ties.
            entries.sort_by(|a, b| b.priority.cmp(&a.priority));
        }
        tracing::debug!(
            "Registered {} decoder for {:?}",
            decoder.kind(),
            decoder.extensions()
        );
    }

    /// Best decoder for an extension (case-insensitive, without the dot).
    pub fn find(&self, extension: &str) -> Option<&Arc<dyn Decoder>> {
        self.by_extension
            .get(&extension.to_lowercase())
            .and_then(|entries| entries.first())
            .map(|entry| &entry.decoder)
    }

    /// Best decoder for a path's extension.
    pub fn find_for_path(&self, path: &str) -> AssetResult<&Arc<dyn Decoder>> {
        let extension = extension_of(path);
        self.find(&extension)
            .ok_or(AssetError::NoDecoderForExtension { extension })
    }

    /// Check if any decoder handles `extension`.
    pub fn has_decoder(&self, extension: &str) -> bool {
        self.find(extension).is_some()
    }
}

/// Lower-cased extension of `path`, or an empty string.
pub fn extension_of(path: &str) -> String {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default()
}

/// Bounds-checked little-endian cursor over asset bytes.
pub struct ByteReader<'a> {
    path: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn error(&self, message: impl Into<String>) -> AssetError {
        AssetError::decode(self.path, message)
    }

    /// Current offset from the start of the asset.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    /// Read a plain-old-data value stored in native layout.
    pub fn read<T: Pod>(&mut self) -> AssetResult<T> {
        let range = self.take(size_of::<T>())?;
        Ok(bytemuck::pod_read_unaligned(&self.bytes[range.as_range()]))
    }

    /// Skip `len` bytes and return their range.
    pub fn take(&mut self, len: usize) -> AssetResult<ByteRange> {
        if len > self.remaining() {
            return Err(self.error(format!(
                "unexpected end of data at offset {}: needed {} bytes, {} left",
                self.pos,
                len,
                self.remaining()
            )));
        }
        let range = ByteRange::new(self.pos, len);
        self.pos += len;
        Ok(range)
    }

    /// Read a `u32`-length-prefixed UTF-8 string.
    pub fn read_str(&mut self) -> AssetResult<&'a str> {
        let len = u32::from_le(self.read::<u32>()?) as usize;
        let range = self.take(len)?;
        let bytes: &'a [u8] = self.bytes;
        std::str::from_utf8(&bytes[range.as_range()])
            .map_err(|e| self.error(format!("invalid UTF-8 string at offset {}: {}", range.offset, e)))
    }

    /// Fail unless every byte was consumed.
    pub fn finish(self) -> AssetResult<()> {
        if self.remaining() != 0 {
            return Err(self.error(format!("{} trailing bytes", self.remaining())));
        }
        Ok(())
    }
}

/// Header at the start of every `.tex` file.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct TextureHeader {
    pub magic: [u8; 4],
    pub width: u32,
    pub height: u32,
    pub format: u32,
    pub mip_count: u32,
}

static_assertions::assert_eq_size!(TextureHeader, [u8; 20]);

impl TextureHeader {
    pub const MAGIC: [u8; 4] = *b"HTEX";
}

/// Total pixel bytes of a mip chain, or `None` if it overflows `usize`.
fn mip_chain_bytes(width: u32, height: u32, mip_count: u32, format: TextureFormat) -> Option<usize> {
    (0..mip_count).try_fold(0usize, |total, level| {
        let w = (width >> level).max(1) as usize;
        let h = (height >> level).max(1) as usize;
        w.checked_mul(h)?
            .checked_mul(format.bytes_per_pixel())
            .and_then(|bytes| total.checked_add(bytes))
    })
}

/// Decodes `.tex` files: a [`TextureHeader`] followed by every mip level's pixels.
pub struct TextureDecoder;

impl TextureDecoder {
    /// Build a `.tex` file.
    pub fn encode(width: u32, height: u32, format: TextureFormat, mip_count: u32, pixels: &[u8]) -> Vec<u8> {
        let format_raw = match format {
            TextureFormat::R8 => 0,
            TextureFormat::Rg8 => 1,
            TextureFormat::Rgba8 => 2,
            TextureFormat::Rgba16Float => 3,
        };
        let header = TextureHeader {
            magic: TextureHeader::MAGIC,
            width: width.to_le(),
            height: height.to_le(),
            format: u32::to_le(format_raw),
            mip_count: mip_count.to_le(),
        };
        let mut bytes = bytemuck::bytes_of(&header).to_vec();
        bytes.extend_from_slice(pixels);
        bytes
    }
}

impl Decoder for TextureDecoder {
    fn kind(&self) -> AssetKind {
        AssetKind::Texture
    }

    fn extensions(&self) -> &[&str] {
        &["tex"]
    }

    fn decode(&self, ctx: &DecodeContext<'_>) -> AssetResult<Payload> {
        let mut reader = ctx.reader();
        let header: TextureHeader = reader.read()?;
        if header.magic != TextureHeader::MAGIC {
            return Err(AssetError::decode(ctx.path(), "not a texture file"));
        }

        let width = u32::from_le(header.width);
        let height = u32::from_le(header.height);
        let mip_count = u32::from_le(header.mip_count);
        let format = TextureFormat::from_raw(u32::from_le(header.format)).ok_or_else(|| {
            AssetError::decode(ctx.path(), format!("unknown texture format {}", header.format))
        })?;
        if width == 0 || height == 0 || mip_count == 0 {
            return Err(AssetError::decode(
                ctx.path(),
                format!("degenerate texture {}x{} with {} mips", width, height, mip_count),
            ));
        }
        if mip_count > 32 {
            return Err(AssetError::decode(ctx.path(), format!("{} mip levels", mip_count)));
        }

        let size = mip_chain_bytes(width, height, mip_count, format).ok_or_else(|| {
            AssetError::decode(ctx.path(), format!("{}x{} texture is too large", width, height))
        })?;
        let pixels = reader.take(size)?;
        reader.finish()?;

        Ok(Texture::new(width, height, format, mip_count, pixels).into())
    }
}

/// Header at the start of every `.mdl` file.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ModelHeader {
    pub magic: [u8; 4],
    pub mesh_count: u32,
    pub texture_count: u32,
    pub reserved: u32,
}

impl ModelHeader {
    pub const MAGIC: [u8; 4] = *b"HMDL";
}

/// Per-mesh table entry in a `.mdl` file.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct MeshRecord {
    pub vertex_count: u32,
    pub vertex_stride: u32,
    pub index_count: u32,
    pub reserved: u32,
}

/// Source data for one mesh passed to [`ModelDecoder::encode`].
pub struct MeshSource<'a> {
    pub vertex_stride: u32,
    pub vertices: &'a [u8],
    pub indices: &'a [u32],
}

/// Decodes `.mdl` files.
///
/// Layout: [`ModelHeader`], one [`MeshRecord`] per mesh, the referenced
/// texture paths as length-prefixed strings, then each mesh's vertex and index
/// data in order. Every texture path is requested from the cache while
/// decoding.
pub struct ModelDecoder;

impl ModelDecoder {
    /// Build a `.mdl` file.
    pub fn encode(meshes: &[MeshSource<'_>], textures: &[&str]) -> Vec<u8> {
        let header = ModelHeader {
            magic: ModelHeader::MAGIC,
            mesh_count: (meshes.len() as u32).to_le(),
            texture_count: (textures.len() as u32).to_le(),
            reserved: 0,
        };
        let mut bytes = bytemuck::bytes_of(&header).to_vec();

        for mesh in meshes {
            let record = MeshRecord {
                vertex_count: (mesh.vertices.len() as u32 / mesh.vertex_stride.max(1)).to_le(),
                vertex_stride: mesh.vertex_stride.to_le(),
                index_count: (mesh.indices.len() as u32).to_le(),
                reserved: 0,
            };
            bytes.extend_from_slice(bytemuck::bytes_of(&record));
        }
        for path in textures {
            bytes.extend_from_slice(&(path.len() as u32).to_le_bytes());
            bytes.extend_from_slice(path.as_bytes());
        }
        for mesh in meshes {
            bytes.extend_from_slice(mesh.vertices);
            for index in mesh.indices {
                bytes.extend_from_slice(&index.to_le_bytes());
            }
        }
        bytes
    }
}

impl Decoder for ModelDecoder {
    fn kind(&self) -> AssetKind {
        AssetKind::Model
    }

    fn extensions(&self) -> &[&str] {
        &["mdl"]
    }

    fn decode(&self, ctx: &DecodeContext<'_>) -> AssetResult<Payload> {
        let mut reader = ctx.reader();
        let header: ModelHeader = reader.read()?;
        if header.magic != ModelHeader::MAGIC {
            return Err(AssetError::decode(ctx.path(), "not a model file"));
        }
        let mesh_count = u32::from_le(header.mesh_count) as usize;
        let texture_count = u32::from_le(header.texture_count) as usize;

        // Bound the tables by what the file can hold before allocating for them.
        if mesh_count.saturating_mul(size_of::<MeshRecord>()) > reader.remaining() {
            return Err(AssetError::decode(
                ctx.path(),
                format!("mesh table of {} entries overruns the file", mesh_count),
            ));
        }
        let mut records = Vec::with_capacity(mesh_count);
        for _ in 0..mesh_count {
            records.push(reader.read::<MeshRecord>()?);
        }

        let mut textures = Vec::with_capacity(texture_count.min(reader.remaining() / 4));
        for _ in 0..texture_count {
            let path = reader.read_str()?;
            textures.push(ctx.request(path)?);
        }

        let mut meshes = Vec::with_capacity(mesh_count);
        for record in records {
            let vertex_count = u32::from_le(record.vertex_count);
            let vertex_stride = u32::from_le(record.vertex_stride);
            let index_count = u32::from_le(record.index_count);

            let vertices = reader.take(vertex_count as usize * vertex_stride as usize)?;
            let indices = reader.take(index_count as usize * size_of::<u32>())?;
            meshes.push(Mesh {
                vertex_count,
                vertex_stride,
                index_count,
                vertices,
                indices,
            });
        }
        reader.finish()?;

        Ok(Model::new(meshes, textures).into())
    }
}
