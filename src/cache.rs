//! A content-addressed store of build outputs.
//!
//! Entries are keyed by a 128-bit fingerprint and sharded over two levels of
//! directories by the fingerprint's low bytes.  The cache only ever speeds a
//! build up: every read or write failure is reported as a miss.

use anyhow::{anyhow, bail};
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

/// Entries created longer ago than this are removed by `cleanup`.
pub const MAX_AGE: Duration = Duration::from_secs(30 * 24 * 60 * 60);

const EXTENSION: &str = "cache";

/// Makes temporary file names unique among the writers of one process.
static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct Fingerprint {
    pub lo: u64,
    pub hi: u64,
}

impl Fingerprint {
    pub fn new(lo: u64, hi: u64) -> Self {
        Fingerprint { lo, hi }
    }

    /// Take the first 128 bits of a digest.
    pub fn from_digest(digest: &[u8]) -> Self {
        let mut lo = [0u8; 8];
        let mut hi = [0u8; 8];
        lo.copy_from_slice(&digest[..8]);
        hi.copy_from_slice(&digest[8..16]);
        Fingerprint {
            lo: u64::from_le_bytes(lo),
            hi: u64::from_le_bytes(hi),
        }
    }

    /// Fingerprint arbitrary bytes.
    pub fn of(data: &[u8]) -> Self {
        Fingerprint::from_digest(&Sha256::digest(data))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}-{:08x}", self.lo, self.hi)
    }
}

pub struct BuildCache {
    root: PathBuf,
    writable: bool,
}

impl BuildCache {
    /// Open a cache rooted at `root`.  A writable cache creates its root; a
    /// read-only one requires it to exist.
    pub fn open(root: impl Into<PathBuf>, writable: bool) -> anyhow::Result<Self> {
        let root = root.into();
        if writable {
            std::fs::create_dir_all(&root)
                .map_err(|err| anyhow!("create {}: {}", root.display(), err))?;
        } else if !root.is_dir() {
            bail!("cache directory {} does not exist", root.display());
        }
        Ok(BuildCache { root, writable })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_read_only(&self) -> bool {
        !self.writable
    }

    pub fn entry_path(&self, fingerprint: Fingerprint) -> PathBuf {
        let lo = fingerprint.lo;
        self.root
            .join(format!("{:02x}", lo & 0xff))
            .join(format!("{:02x}", (lo >> 8) & 0xff))
            .join(format!("{}.{}", fingerprint, EXTENSION))
    }

    pub fn contains(&self, fingerprint: Fingerprint) -> bool {
        self.entry_path(fingerprint).is_file()
    }

    /// Open an entry for reading, or None on a miss.
    pub fn read(&self, fingerprint: Fingerprint) -> Option<BufReader<File>> {
        File::open(self.entry_path(fingerprint))
            .ok()
            .map(BufReader::new)
    }

    pub fn read_bytes(&self, fingerprint: Fingerprint) -> Option<Vec<u8>> {
        let mut reader = self.read(fingerprint)?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).ok()?;
        Some(buf)
    }

    /// Store an entry, returning whether it was written.  Readers never see
    /// a partially written entry.
    pub fn write(&self, fingerprint: Fingerprint, data: &[u8]) -> bool {
        if !self.writable {
            return false;
        }
        self.write_entry(fingerprint, data).is_ok()
    }

    fn write_entry(&self, fingerprint: Fingerprint, data: &[u8]) -> std::io::Result<()> {
        let path = self.entry_path(fingerprint);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let tmp = path.with_extension(format!(
            "{}.{}.{}",
            EXTENSION,
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let written = File::create(&tmp).and_then(|mut f| {
            f.write_all(data)?;
            f.flush()
        });
        match written.and_then(|_| std::fs::rename(&tmp, &path)) {
            Ok(()) => Ok(()),
            Err(err) => {
                let _ = std::fs::remove_file(&tmp);
                Err(err)
            }
        }
    }

    /// Remove entries older than `MAX_AGE`.  Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        match SystemTime::now().checked_sub(MAX_AGE) {
            Some(cutoff) => self.cleanup_older_than(cutoff),
            None => 0,
        }
    }

    /// Remove entries created before `cutoff`.  Returns how many were removed.
    pub fn cleanup_older_than(&self, cutoff: SystemTime) -> usize {
        if !self.writable {
            return 0;
        }
        let entries: Vec<PathBuf> = walkdir::WalkDir::new(&self.root)
            .min_depth(3)
            .max_depth(3)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| path.extension().map_or(false, |ext| ext == EXTENSION))
            .collect();

        entries
            .par_iter()
            .filter(|path| match created(path) {
                Some(time) => time < cutoff,
                None => false,
            })
            .filter(|path| std::fs::remove_file(path).is_ok())
            .count()
    }
}

/// Creation time where the platform records one, else modification time.
fn created(path: &Path) -> Option<SystemTime> {
    let meta = std::fs::metadata(path).ok()?;
    meta.created().or_else(|_| meta.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_layout() {
        let cache = BuildCache {
            root: PathBuf::from("/cache"),
            writable: false,
        };
        assert_eq!(
            cache.entry_path(Fingerprint::new(0x1234, 0x5678)),
            Path::new("/cache/34/12/00001234-00005678.cache")
        );
        assert_eq!(
            cache.entry_path(Fingerprint::new(0xdead_beef_0000_abcd, 1)),
            Path::new("/cache/cd/ab/deadbeef0000abcd-00000001.cache")
        );
    }

    #[test]
    fn write_then_read() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = BuildCache::open(dir.path().join("c"), true)?;
        let fp = Fingerprint::of(b"hello");
        assert!(cache.read(fp).is_none());
        assert!(cache.write(fp, b"payload\0bytes"));
        assert_eq!(cache.read_bytes(fp).as_deref(), Some(&b"payload\0bytes"[..]));
        // Overwrite in place.
        assert!(cache.write(fp, b"second"));
        assert_eq!(cache.read_bytes(fp).as_deref(), Some(&b"second"[..]));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn concurrent_writers() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = BuildCache::open(dir.path(), true)?;
        let fp = Fingerprint::of(b"shared");
        let payload = vec![b'z'; 64 * 1024];
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..10 {
                        assert!(cache.write(fp, &payload));
                    }
                });
            }
        });
        assert_eq!(cache.read_bytes(fp), Some(payload));
        // No temporary files are left behind.
        let shard = cache.entry_path(fp);
        let leftovers = std::fs::read_dir(shard.parent().unwrap())?.count();
        assert_eq!(leftovers, 1);
        Ok(())
    }

    #[test]
    fn read_only() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        assert!(BuildCache::open(dir.path().join("missing"), false).is_err());

        let fp = Fingerprint::new(7, 7);
        BuildCache::open(dir.path(), true)?.write(fp, b"x");
        let cache = BuildCache::open(dir.path(), false)?;
        assert!(cache.is_read_only());
        assert!(!cache.write(Fingerprint::new(8, 8), b"y"));
        assert_eq!(cache.read_bytes(fp).as_deref(), Some(&b"x"[..]));
        assert_eq!(cache.cleanup_older_than(SystemTime::now() + MAX_AGE), 0);
        assert!(cache.contains(fp));
        Ok(())
    }

    #[test]
    fn sweep() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = BuildCache::open(dir.path(), true)?;
        for i in 0..5 {
            assert!(cache.write(Fingerprint::new(i * 0x101, i), b"data"));
        }
        std::fs::write(dir.path().join("unrelated.txt"), "keep")?;

        assert_eq!(cache.cleanup(), 0);
        let future = SystemTime::now() + Duration::from_secs(60);
        assert_eq!(cache.cleanup_older_than(future), 5);
        assert!(!cache.contains(Fingerprint::new(0x101, 1)));
        assert!(dir.path().join("unrelated.txt").exists());
        Ok(())
    }
}
