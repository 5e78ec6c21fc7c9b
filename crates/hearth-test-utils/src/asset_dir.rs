//! Temporary on-disk asset directories.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use tempfile::TempDir;

/// A temporary directory for asset files.
///
/// Every write or touch sets the file's modification time one second past
/// the previous one, so changes are visible even on file systems with coarse
/// timestamps.
pub struct AssetDir {
    dir: TempDir,
    clock: Mutex<SystemTime>,
}

impl AssetDir {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("failed to create temp asset dir"),
            clock: Mutex::new(SystemTime::now()),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Absolute path of an asset.
    pub fn join(&self, path: &str) -> PathBuf {
        self.dir.path().join(path)
    }

    /// Write an asset, creating parent directories.
    pub fn write(&self, path: &str, bytes: impl AsRef<[u8]>) {
        let full = self.join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).expect("failed to create asset subdirectory");
        }
        std::fs::write(&full, bytes).expect("failed to write asset");
        self.bump(&full);
    }

    /// Advance an asset's modification time without changing its bytes.
    pub fn touch(&self, path: &str) {
        self.bump(&self.join(path));
    }

    pub fn remove(&self, path: &str) {
        std::fs::remove_file(self.join(path)).expect("failed to remove asset");
    }

    fn bump(&self, full: &Path) {
        let stamp = {
            let mut clock = self.clock.lock();
            *clock += Duration::from_secs(1);
            *clock
        };
        File::options()
            .write(true)
            .open(full)
            .and_then(|f| f.set_modified(stamp))
            .expect("failed to set modification time");
    }
}

impl Default for AssetDir {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writes_advance_mtime() {
        let dir = AssetDir::new();
        dir.write("a/b.tex", b"one");
        let first = std::fs::metadata(dir.join("a/b.tex")).unwrap().modified().unwrap();

        dir.write("a/b.tex", b"two");
        let second = std::fs::metadata(dir.join("a/b.tex")).unwrap().modified().unwrap();
        assert!(second > first);

        dir.touch("a/b.tex");
        let third = std::fs::metadata(dir.join("a/b.tex")).unwrap().modified().unwrap();
        assert!(third > second);
        assert_eq!(std::fs::read(dir.join("a/b.tex")).unwrap(), b"two");
    }
}
