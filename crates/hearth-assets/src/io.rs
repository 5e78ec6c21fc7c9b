//! File layer the cache reads assets through.
//!
//! The cache only needs to stat a path and read its bytes into a buffer it
//! already allocated. A stat of `(0, 0)` means the file does not exist.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use hearth_core::alloc::HashMap;
use parking_lot::RwLock;

use crate::error::{AssetError, AssetResult};

/// Size and modification stamp of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FileStat {
    pub size: u64,
    /// Opaque, non-zero modification stamp for existing files.
    pub modified: u64,
}

impl FileStat {
    /// The stat reported for a missing file.
    pub const MISSING: FileStat = FileStat { size: 0, modified: 0 };

    pub fn exists(&self) -> bool {
        *self != Self::MISSING
    }
}

/// Trait for the storage assets are loaded from.
pub trait FileSystem: Send + Sync + 'static {
    /// Stat a path. Missing files report [`FileStat::MISSING`].
    fn stat(&self, path: &str) -> FileStat;

    /// Read the whole file into `buf`, which is exactly `stat(path).size` bytes.
    fn read_into(&self, path: &str, buf: &mut [u8]) -> AssetResult<()>;
}

/// Reads assets from a directory on disk.
#[derive(Debug, Clone)]
pub struct DiskFileSystem {
    root: PathBuf,
}

impl DiskFileSystem {
    /// Create a file system rooted at `root`.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a path relative to the root.
    fn resolve_path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

impl FileSystem for DiskFileSystem {
    fn stat(&self, path: &str) -> FileStat {
        let Ok(metadata) = std::fs::metadata(self.resolve_path(path)) else {
            return FileStat::MISSING;
        };
        if !metadata.is_file() {
            return FileStat::MISSING;
        }

        let modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
            .unwrap_or(0);

        FileStat {
            size: metadata.len(),
            modified: modified.max(1),
        }
    }

    fn read_into(&self, path: &str, buf: &mut [u8]) -> AssetResult<()> {
        use std::io::Read;

        let full_path = self.resolve_path(path);
        let mut file = std::fs::File::open(&full_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AssetError::NotFound {
                    path: full_path.display().to_string(),
                }
            } else {
                AssetError::IoError {
                    path: full_path.clone(),
                    source: e,
                }
            }
        })?;
        file.read_exact(buf).map_err(|e| AssetError::IoError {
            path: full_path,
            source: e,
        })
    }
}

#[derive(Debug, Clone)]
struct MemoryFile {
    bytes: Vec<u8>,
    modified: u64,
}

/// In-memory file system for tests and embedded assets.
///
/// Each write bumps a modification stamp, so hot reload can be driven
/// deterministically.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    files: RwLock<HashMap<String, MemoryFile>>,
}

impl MemoryFileSystem {
    /// Create a new empty memory file system.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a file. Returns the new modification stamp.
    pub fn insert(&self, path: impl Into<String>, bytes: impl Into<Vec<u8>>) -> u64 {
        let mut files = self.files.write();
        let path = path.into();
        let modified = files.get(&path).map_or(1, |f| f.modified + 1);
        files.insert(
            path,
            MemoryFile {
                bytes: bytes.into(),
                modified,
            },
        );
        modified
    }

    /// Add or replace a file with an explicit modification stamp.
    pub fn insert_with_stamp(&self, path: impl Into<String>, bytes: impl Into<Vec<u8>>, modified: u64) {
        assert_ne!(modified, 0, "stamp 0 is reserved for missing files");
        self.files.write().insert(
            path.into(),
            MemoryFile {
                bytes: bytes.into(),
                modified,
            },
        );
    }

    /// Bump a file's modification stamp without changing its bytes.
    pub fn touch(&self, path: &str) -> Option<u64> {
        let mut files = self.files.write();
        let file = files.get_mut(path)?;
        file.modified += 1;
        Some(file.modified)
    }

    /// Remove a file.
    pub fn remove(&self, path: &str) -> bool {
        self.files.write().remove(path).is_some()
    }

    /// Check if a file exists.
    pub fn contains(&self, path: &str) -> bool {
        self.files.read().contains_key(path)
    }
}

impl FileSystem for MemoryFileSystem {
    fn stat(&self, path: &str) -> FileStat {
        self.files.read().get(path).map_or(FileStat::MISSING, |f| FileStat {
            size: f.bytes.len() as u64,
            modified: f.modified,
        })
    }

    fn read_into(&self, path: &str, buf: &mut [u8]) -> AssetResult<()> {
        let files = self.files.read();
        let file = files.get(path).ok_or_else(|| AssetError::NotFound {
            path: path.to_string(),
        })?;
        if file.bytes.len() != buf.len() {
            return Err(AssetError::IoError {
                path: PathBuf::from(path),
                source: std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("file is {} bytes, expected {}", file.bytes.len(), buf.len()),
                ),
            });
        }
        buf.copy_from_slice(&file.bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_stat_and_read() {
        let fs = MemoryFileSystem::new();
        assert_eq!(fs.stat("a.tex"), FileStat::MISSING);

        let stamp = fs.insert("a.tex", b"hello".to_vec());
        let stat = fs.stat("a.tex");
        assert_eq!(stat, FileStat { size: 5, modified: stamp });
        assert!(stat.exists());

        let mut buf = [0u8; 5];
        fs.read_into("a.tex", &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn test_memory_stamps_advance() {
        let fs = MemoryFileSystem::new();
        let first = fs.insert("a", vec![1]);
        let second = fs.insert("a", vec![2]);
        assert!(second > first);
        assert_eq!(fs.touch("a"), Some(second + 1));
        assert_eq!(fs.touch("missing"), None);
    }

    #[test]
    fn test_memory_short_buffer_is_error() {
        let fs = MemoryFileSystem::new();
        fs.insert("a", vec![1, 2, 3]);
        let mut buf = [0u8; 2];
        assert!(matches!(fs.read_into("a", &mut buf), Err(AssetError::IoError { .. })));
    }

    #[test]
    fn test_disk_stat_and_read() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.tex"), b"bytes").unwrap();

        let fs = DiskFileSystem::new(dir.path());
        let stat = fs.stat("b.tex");
        assert_eq!(stat.size, 5);
        assert!(stat.modified >= 1);
        assert_eq!(fs.stat("missing.tex"), FileStat::MISSING);

        let mut buf = vec![0u8; 5];
        fs.read_into("b.tex", &mut buf).unwrap();
        assert_eq!(buf, b"bytes");
        assert!(matches!(
            fs.read_into("missing.tex", &mut buf),
            Err(AssetError::NotFound { .. })
        ));
    }

    #[test]
    fn test_disk_directory_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let fs = DiskFileSystem::new(dir.path());
        assert!(!fs.stat("sub").exists());
    }
}
