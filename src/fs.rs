//! The file system as seen by build nodes.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// MTime info gathered for a file.  This also models "file is absent".
/// It's not using an Option<> just because it makes the code using it easier
/// to follow.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MTime {
    Missing,
    /// Nanoseconds since the unix epoch; never zero.
    Stamp(u64),
}

pub trait FileSystem: Send + Sync {
    fn read(&self, path: &Path) -> std::io::Result<Vec<u8>>;
    fn write(&self, path: &Path, content: &[u8]) -> std::io::Result<()>;
    /// Remove a file, reporting whether there was one to remove.
    fn remove(&self, path: &Path) -> std::io::Result<bool>;
    /// stat() an on-disk path, producing its MTime.
    fn stat(&self, path: &Path) -> std::io::Result<MTime>;
    /// List the regular files under a directory, in a stable order.
    fn list(&self, dir: &Path, recursive: bool) -> std::io::Result<Vec<PathBuf>>;

    fn exists(&self, path: &Path) -> bool {
        matches!(self.stat(path), Ok(MTime::Stamp(_)))
    }
}

#[derive(Default)]
pub struct RealFileSystem {}
impl RealFileSystem {
    pub fn new() -> Self {
        RealFileSystem {}
    }
}

impl FileSystem for RealFileSystem {
    fn read(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn write(&self, path: &Path, content: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, content)
    }

    fn remove(&self, path: &Path) -> std::io::Result<bool> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn stat(&self, path: &Path) -> std::io::Result<MTime> {
        let meta = match std::fs::metadata(path) {
            Ok(meta) => meta,
            Err(err) => {
                if err.kind() == std::io::ErrorKind::NotFound {
                    return Ok(MTime::Missing);
                }
                return Err(err);
            }
        };
        let nanos = meta
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        // Zero is reserved for "unknown"; a file stamped exactly at the epoch
        // still has to read as present.
        Ok(MTime::Stamp(nanos.max(1)))
    }

    fn list(&self, dir: &Path, recursive: bool) -> std::io::Result<Vec<PathBuf>> {
        let mut walk = walkdir::WalkDir::new(dir).min_depth(1).sort_by_file_name();
        if !recursive {
            walk = walk.max_depth(1);
        }
        let mut files = Vec::new();
        for entry in walk {
            let entry = entry.map_err(std::io::Error::from)?;
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stat_missing() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let fs = RealFileSystem::new();
        assert_eq!(fs.stat(&dir.path().join("nope"))?, MTime::Missing);
        assert!(!fs.exists(&dir.path().join("nope")));
        Ok(())
    }

    #[test]
    fn write_creates_parents() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let fs = RealFileSystem::new();
        let path = dir.path().join("a/b/c.txt");
        fs.write(&path, b"hi")?;
        assert_eq!(fs.read(&path)?, b"hi");
        assert!(matches!(fs.stat(&path)?, MTime::Stamp(_)));
        assert!(fs.remove(&path)?);
        assert!(!fs.remove(&path)?);
        Ok(())
    }

    #[test]
    fn list_depth() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let fs = RealFileSystem::new();
        fs.write(&dir.path().join("top.txt"), b"")?;
        fs.write(&dir.path().join("sub/deep.txt"), b"")?;
        let shallow = fs.list(dir.path(), false)?;
        assert_eq!(shallow, vec![dir.path().join("top.txt")]);
        let deep = fs.list(dir.path(), true)?;
        assert_eq!(deep.len(), 2);
        Ok(())
    }
}
