//! The immutable bundle every traversal runs against.

use crate::cache::BuildCache;
use crate::executor::BuildExecutor;
use crate::fs::{FileSystem, RealFileSystem};
use crate::log::{BuildLog, ConsoleLog};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct BuildEnvironment {
    platform: String,
    output_dir: PathBuf,
    cache: Option<Arc<BuildCache>>,
    executor: Arc<BuildExecutor>,
    log: Arc<dyn BuildLog>,
    fs: Arc<dyn FileSystem>,
}

impl BuildEnvironment {
    /// An environment for the host platform writing under `output_dir`,
    /// with a console log, the real filesystem and no cache.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        BuildEnvironment {
            platform: std::env::consts::OS.to_string(),
            output_dir: output_dir.into(),
            cache: None,
            executor: Arc::new(BuildExecutor::with_default_parallelism()),
            log: Arc::new(ConsoleLog::new(false)),
            fs: Arc::new(RealFileSystem::new()),
        }
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }

    pub fn with_cache(mut self, cache: Arc<BuildCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_executor(mut self, executor: Arc<BuildExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_log(mut self, log: Arc<dyn BuildLog>) -> Self {
        self.log = log;
        self
    }

    pub fn with_fs(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn cache(&self) -> Option<&BuildCache> {
        self.cache.as_deref()
    }

    pub fn executor(&self) -> &BuildExecutor {
        &self.executor
    }

    pub fn log(&self) -> &dyn BuildLog {
        &*self.log
    }

    pub fn fs(&self) -> &dyn FileSystem {
        &*self.fs
    }
}
