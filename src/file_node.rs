//! Leaf nodes standing for one file on disk.

use crate::context::{BuildContext, ScanContext};
use crate::fs::MTime;
use crate::node::{BuildNode, NodeCore};
use crate::result::BuildResult;
use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// A file tracked by its modification time.  Created through the graph's
/// file index so there is one node per path.
pub struct FileNode {
    core: NodeCore,
    name: String,
    filename: PathBuf,
    /// Last seen mtime, 0 when unknown or missing.
    timestamp: AtomicU64,
}

impl FileNode {
    pub fn new(filename: impl Into<PathBuf>) -> Self {
        let filename = filename.into();
        FileNode {
            core: NodeCore::new(),
            name: filename.display().to_string(),
            filename,
            timestamp: AtomicU64::new(0),
        }
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp.load(Ordering::Acquire)
    }

    pub fn set_timestamp(&self, timestamp: u64) {
        self.timestamp.store(timestamp, Ordering::Release)
    }
}

impl BuildNode for FileNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn filename(&self) -> Option<&Path> {
        Some(&self.filename)
    }

    fn scan(&self, _ctx: &ScanContext) -> BuildResult {
        BuildResult::UpToDate
    }

    fn import(&self, _ctx: &BuildContext) -> BuildResult {
        // Always stat.
        BuildResult::Built
    }

    fn process(&self, ctx: &BuildContext) -> BuildResult {
        match ctx.fs().stat(&self.filename) {
            Ok(MTime::Stamp(mtime)) => {
                if mtime == self.timestamp() {
                    BuildResult::UpToDate
                } else {
                    self.set_timestamp(mtime);
                    BuildResult::Built
                }
            }
            Ok(MTime::Missing) => {
                self.set_timestamp(0);
                ctx.log().error(&format!("missing file: {}", self.name));
                BuildResult::Failed
            }
            Err(err) => {
                self.set_timestamp(0);
                ctx.log().error(&format!("stat {}: {}", self.name, err));
                BuildResult::Failed
            }
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
