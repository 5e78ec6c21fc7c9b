//! Typed asset payloads.
//!
//! Decoders do not copy asset bytes. Each payload describes its data as
//! [`ByteRange`]s into the slot's backing block, which callers read through
//! [`AssetCache::bytes`](crate::AssetCache::bytes).
//!
//! Every payload type has a shared nil sentinel. Accessors hand out the
//! sentinel for stale handles or kind mismatches, so callers branch on
//! `is_nil()` instead of unwrapping.

use std::fmt;
use std::ops::Range;
use std::sync::{Arc, LazyLock};

use crate::handle::Handle;

/// The kind of payload a slot holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AssetKind {
    /// Not decoded yet.
    #[default]
    Unknown,
    Texture,
    Model,
    Font,
    Skeleton,
    Animation,
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AssetKind::Unknown => "unknown",
            AssetKind::Texture => "texture",
            AssetKind::Model => "model",
            AssetKind::Font => "font",
            AssetKind::Skeleton => "skeleton",
            AssetKind::Animation => "animation",
        };
        f.write_str(name)
    }
}

/// A span of bytes inside a slot's backing block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ByteRange {
    pub offset: usize,
    pub len: usize,
}

impl ByteRange {
    pub fn new(offset: usize, len: usize) -> Self {
        Self { offset, len }
    }

    pub fn end(&self) -> usize {
        self.offset + self.len
    }

    pub fn as_range(&self) -> Range<usize> {
        self.offset..self.end()
    }
}

/// Pixel layout of a [`Texture`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextureFormat {
    R8,
    Rg8,
    #[default]
    Rgba8,
    Rgba16Float,
}

impl TextureFormat {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(TextureFormat::R8),
            1 => Some(TextureFormat::Rg8),
            2 => Some(TextureFormat::Rgba8),
            3 => Some(TextureFormat::Rgba16Float),
            _ => None,
        }
    }

    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            TextureFormat::R8 => 1,
            TextureFormat::Rg8 => 2,
            TextureFormat::Rgba8 => 4,
            TextureFormat::Rgba16Float => 8,
        }
    }
}

/// A decoded texture: dimensions plus the pixel bytes of every mip level.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Texture {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub mip_count: u32,
    pub pixels: ByteRange,
    nil: bool,
}

impl Texture {
    pub fn new(width: u32, height: u32, format: TextureFormat, mip_count: u32, pixels: ByteRange) -> Self {
        Self {
            width,
            height,
            format,
            mip_count,
            pixels,
            nil: false,
        }
    }
}

/// One mesh of a [`Model`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Mesh {
    pub vertex_count: u32,
    pub vertex_stride: u32,
    pub index_count: u32,
    pub vertices: ByteRange,
    /// Little-endian `u32` indices.
    pub indices: ByteRange,
}

/// A decoded model: meshes plus handles to the textures it references.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Model {
    pub meshes: Vec<Mesh>,
    pub textures: Vec<Handle>,
    nil: bool,
}

impl Model {
    pub fn new(meshes: Vec<Mesh>, textures: Vec<Handle>) -> Self {
        Self {
            meshes,
            textures,
            nil: false,
        }
    }
}

/// A decoded bitmap font.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Font {
    pub glyph_count: u32,
    pub line_height: f32,
    pub glyphs: ByteRange,
    pub atlas: Option<Handle>,
    nil: bool,
}

impl Font {
    pub fn new(glyph_count: u32, line_height: f32, glyphs: ByteRange, atlas: Option<Handle>) -> Self {
        Self {
            glyph_count,
            line_height,
            glyphs,
            atlas,
            nil: false,
        }
    }
}

/// A decoded skeleton hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Skeleton {
    pub bone_count: u32,
    pub bones: ByteRange,
    nil: bool,
}

impl Skeleton {
    pub fn new(bone_count: u32, bones: ByteRange) -> Self {
        Self {
            bone_count,
            bones,
            nil: false,
        }
    }
}

/// A decoded animation clip.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Animation {
    pub duration_secs: f32,
    pub channel_count: u32,
    pub keys: ByteRange,
    nil: bool,
}

impl Animation {
    pub fn new(duration_secs: f32, channel_count: u32, keys: ByteRange) -> Self {
        Self {
            duration_secs,
            channel_count,
            keys,
            nil: false,
        }
    }
}

macro_rules! nil_sentinel {
    ($($ty:ident => $sentinel:ident),* $(,)?) => {
        $(
            static $sentinel: LazyLock<Arc<$ty>> = LazyLock::new(|| {
                Arc::new($ty {
                    nil: true,
                    ..$ty::default()
                })
            });

            impl $ty {
                /// The shared sentinel returned for invalid or mismatched handles.
                pub fn nil() -> Arc<$ty> {
                    Arc::clone(&$sentinel)
                }

                /// Returns `true` for the nil sentinel.
                pub fn is_nil(&self) -> bool {
                    self.nil
                }
            }
        )*
    };
}

nil_sentinel! {
    Texture => NIL_TEXTURE,
    Model => NIL_MODEL,
    Font => NIL_FONT,
    Skeleton => NIL_SKELETON,
    Animation => NIL_ANIMATION,
}

/// A decoded payload, tagged by kind.
#[derive(Debug, Clone)]
pub enum Payload {
    Texture(Arc<Texture>),
    Model(Arc<Model>),
    Font(Arc<Font>),
    Skeleton(Arc<Skeleton>),
    Animation(Arc<Animation>),
}

impl Payload {
    pub fn kind(&self) -> AssetKind {
        match self {
            Payload::Texture(_) => AssetKind::Texture,
            Payload::Model(_) => AssetKind::Model,
            Payload::Font(_) => AssetKind::Font,
            Payload::Skeleton(_) => AssetKind::Skeleton,
            Payload::Animation(_) => AssetKind::Animation,
        }
    }
}

impl From<Texture> for Payload {
    fn from(value: Texture) -> Self {
        Payload::Texture(Arc::new(value))
    }
}

impl From<Model> for Payload {
    fn from(value: Model) -> Self {
        Payload::Model(Arc::new(value))
    }
}

impl From<Font> for Payload {
    fn from(value: Font) -> Self {
        Payload::Font(Arc::new(value))
    }
}

impl From<Skeleton> for Payload {
    fn from(value: Skeleton) -> Self {
        Payload::Skeleton(Arc::new(value))
    }
}

impl From<Animation> for Payload {
    fn from(value: Animation) -> Self {
        Payload::Animation(Arc::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nil_sentinel_is_shared() {
        let a = Texture::nil();
        let b = Texture::nil();
        assert!(a.is_nil());
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_constructed_payloads_are_not_nil() {
        let texture = Texture::new(4, 4, TextureFormat::Rgba8, 1, ByteRange::new(20, 64));
        assert!(!texture.is_nil());
        assert!(!Skeleton::new(3, ByteRange::default()).is_nil());
        assert!(Animation::nil().is_nil());
    }

    #[test]
    fn test_payload_kind() {
        let payload = Payload::from(Model::new(Vec::new(), Vec::new()));
        assert_eq!(payload.kind(), AssetKind::Model);
        assert_eq!(payload.kind().to_string(), "model");
    }

    #[test]
    fn test_texture_format_from_raw() {
        assert_eq!(TextureFormat::from_raw(2), Some(TextureFormat::Rgba8));
        assert_eq!(TextureFormat::from_raw(9), None);
        assert_eq!(TextureFormat::Rgba16Float.bytes_per_pixel(), 8);
    }
}
