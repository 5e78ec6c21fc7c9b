//! Error types for the asset cache.

use std::fmt;
use std::path::PathBuf;

use crate::handle::Handle;
use crate::payload::AssetKind;

/// Errors that can occur during asset cache operations.
#[derive(Debug)]
pub enum AssetError {
    /// The requested asset does not exist on the file layer.
    NotFound {
        /// The path of the asset.
        path: String,
    },

    /// Failed to read asset data from the file layer.
    IoError {
        /// The path that failed to load.
        path: PathBuf,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// The path is longer than the cache accepts, or does not fit a queue record.
    PathTooLong {
        /// The path that was rejected.
        path: String,
        /// Maximum accepted length in bytes.
        max: usize,
    },

    /// Every slot in the table is in use.
    CapacityExhausted {
        /// Configured slot capacity.
        capacity: usize,
    },

    /// The handle is stale, was already freed, or never existed.
    InvalidHandle {
        /// The offending handle.
        handle: Handle,
    },

    /// The slot is being loaded by a worker and cannot be freed right now.
    LoadInProgress {
        /// The handle of the slot being loaded.
        handle: Handle,
    },

    /// No decoder registered for the file extension.
    NoDecoderForExtension {
        /// The file extension, lower-cased, without the dot.
        extension: String,
    },

    /// A decoder rejected the bytes it was given.
    DecodeError {
        /// The path being decoded.
        path: String,
        /// Description of the error.
        message: String,
    },

    /// The slot holds a different kind of payload than requested.
    KindMismatch {
        /// Requested kind.
        expected: AssetKind,
        /// Kind the slot actually holds.
        actual: AssetKind,
    },

    /// The request queue was shut down.
    QueueClosed,

    /// Generic error with a message.
    Other {
        /// Error message.
        message: String,
    },
}

impl AssetError {
    /// Build a [`AssetError::DecodeError`] for `path`.
    pub fn decode(path: impl Into<String>, message: impl Into<String>) -> Self {
        AssetError::DecodeError {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for AssetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetError::NotFound { path } => {
                write!(f, "Asset not found: {}", path)
            }
            AssetError::IoError { path, source } => {
                write!(f, "IO error loading '{}': {}", path.display(), source)
            }
            AssetError::PathTooLong { path, max } => {
                write!(f, "Asset path exceeds {} bytes: {}", max, path)
            }
            AssetError::CapacityExhausted { capacity } => {
                write!(f, "All {} asset slots are in use", capacity)
            }
            AssetError::InvalidHandle { handle } => {
                write!(f, "Invalid asset handle: {}", handle)
            }
            AssetError::LoadInProgress { handle } => {
                write!(f, "Asset {} is still loading", handle)
            }
            AssetError::NoDecoderForExtension { extension } => {
                write!(f, "No decoder registered for extension: .{}", extension)
            }
            AssetError::DecodeError { path, message } => {
                write!(f, "Failed to decode '{}': {}", path, message)
            }
            AssetError::KindMismatch { expected, actual } => {
                write!(f, "Kind mismatch: expected {}, found {}", expected, actual)
            }
            AssetError::QueueClosed => {
                write!(f, "Asset request queue is closed")
            }
            AssetError::Other { message } => {
                write!(f, "Asset error: {}", message)
            }
        }
    }
}

impl std::error::Error for AssetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AssetError::IoError { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<std::io::Error> for AssetError {
    fn from(err: std::io::Error) -> Self {
        AssetError::IoError {
            path: PathBuf::new(),
            source: err,
        }
    }
}

/// Result type alias for asset operations.
pub type AssetResult<T> = Result<T, AssetError>;
