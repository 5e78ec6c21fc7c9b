//! A decoder that records its calls.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use hearth_assets::{
    Animation, AssetError, AssetKind, AssetResult, ByteRange, DecodeContext, Decoder, Font, Model,
    Payload, Skeleton, Texture, TextureFormat,
};
use parking_lot::Mutex;

/// Bytes starting with this marker make [`RecordingDecoder`] fail.
pub const FAIL_MARKER: &[u8] = b"!fail";

#[derive(Default)]
struct Log {
    paths: Vec<String>,
    sizes: Vec<usize>,
}

struct Shared {
    kind: AssetKind,
    extensions: Vec<&'static str>,
    priority: i32,
    delay: Mutex<Option<Duration>>,
    requests: Vec<String>,
    log: Mutex<Log>,
}

/// Mock decoder that logs each decoded path.
///
/// Clones share one log, so a test keeps a clone and registers another.
///
/// # Example
///
/// ```ignore
/// let recorder = RecordingDecoder::new(AssetKind::Texture, &["png"]);
/// let mut decoders = DecoderRegistry::new();
/// decoders.register(recorder.clone());
///
/// // ... run the cache ...
/// assert_eq!(recorder.count_for("a.png"), 1);
/// ```
#[derive(Clone)]
pub struct RecordingDecoder {
    shared: Arc<Shared>,
}

impl RecordingDecoder {
    pub fn new(kind: AssetKind, extensions: &[&'static str]) -> Self {
        Self::build(kind, extensions, 0, Vec::new())
    }

    /// A decoder that outranks the built-in decoders for `extensions`.
    pub fn with_priority(kind: AssetKind, extensions: &[&'static str], priority: i32) -> Self {
        Self::build(kind, extensions, priority, Vec::new())
    }

    /// A decoder that requests `paths` from the cache each time it decodes.
    pub fn requesting(kind: AssetKind, extensions: &[&'static str], paths: &[&str]) -> Self {
        Self::build(
            kind,
            extensions,
            0,
            paths.iter().map(|p| p.to_string()).collect(),
        )
    }

    fn build(kind: AssetKind, extensions: &[&'static str], priority: i32, requests: Vec<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                kind,
                extensions: extensions.to_vec(),
                priority,
                delay: Mutex::new(None),
                requests,
                log: Mutex::new(Log::default()),
            }),
        }
    }

    /// Sleep this long inside every decode, widening race windows.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.shared.delay.lock() = delay;
    }

    /// Total decode calls.
    pub fn count(&self) -> usize {
        self.shared.log.lock().paths.len()
    }

    /// Decode calls for one path.
    pub fn count_for(&self, path: &str) -> usize {
        self.shared.log.lock().paths.iter().filter(|p| *p == path).count()
    }

    /// Every decoded path, in call order.
    pub fn paths(&self) -> Vec<String> {
        self.shared.log.lock().paths.clone()
    }

    /// Byte length seen by the most recent decode.
    pub fn last_size(&self) -> Option<usize> {
        self.shared.log.lock().sizes.last().copied()
    }

    fn payload(&self, bytes: &[u8]) -> AssetResult<Payload> {
        let all = ByteRange::new(0, bytes.len());
        let payload = match self.shared.kind {
            AssetKind::Texture => Texture::new(bytes.len() as u32, 1, TextureFormat::R8, 1, all).into(),
            AssetKind::Model => Model::new(Vec::new(), Vec::new()).into(),
            AssetKind::Font => Font::new(0, 0.0, all, None).into(),
            AssetKind::Skeleton => Skeleton::new(0, all).into(),
            AssetKind::Animation => Animation::new(0.0, 0, all).into(),
            AssetKind::Unknown => {
                return Err(AssetError::Other {
                    message: "recording decoder has no kind".to_string(),
                });
            }
        };
        Ok(payload)
    }
}

impl Decoder for RecordingDecoder {
    fn kind(&self) -> AssetKind {
        self.shared.kind
    }

    fn extensions(&self) -> &[&str] {
        &self.shared.extensions
    }

    fn priority(&self) -> i32 {
        self.shared.priority
    }

    fn decode(&self, ctx: &DecodeContext<'_>) -> AssetResult<Payload> {
        {
            let mut log = self.shared.log.lock();
            log.paths.push(ctx.path().to_string());
            log.sizes.push(ctx.bytes().len());
        }

        let delay = *self.shared.delay.lock();
        if let Some(delay) = delay {
            thread::sleep(delay);
        }

        for path in &self.shared.requests {
            ctx.request(path)?;
        }

        if ctx.bytes().starts_with(FAIL_MARKER) {
            return Err(AssetError::decode(ctx.path(), "fail marker"));
        }
        self.payload(ctx.bytes())
    }
}
