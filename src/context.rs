//! Per-traversal contexts and the node visit state machine.
//!
//! One context type exists per operation (scan, build, clean).  A traversal
//! starts with a root context; every node visit runs under a child of the
//! context that dispatched it, and a child folds its counters and result into
//! its parent when it is dropped.

use crate::env::BuildEnvironment;
use crate::fs::FileSystem;
use crate::log::BuildLog;
use crate::node::{BuildNode, DependencyKind, NodeArena, NodeId};
use crate::result::{BuildFlags, BuildResult};
use crate::trace;
use rustc_hash::FxHashMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// An operation over the graph: which phase methods a node visit runs.
pub trait Pipeline: Sized + 'static {
    /// Used in log and trace output.
    const NAME: &'static str;

    /// Run the node's own phase(s), given the combined result of its static
    /// dependencies, and return the node's combined result.
    ///
    /// For builds, Import's result is not part of the returned value once
    /// Process runs: Import only decides whether Process is needed, and the
    /// node reports its static deps combined with Process.
    fn run_phases(node: &dyn BuildNode, ctx: &PipelineContext<Self>, deps: BuildResult)
        -> BuildResult;
}

pub enum Scan {}
pub enum Build {}
pub enum Clean {}

pub type ScanContext = PipelineContext<Scan>;
pub type BuildContext = PipelineContext<Build>;
pub type CleanContext = PipelineContext<Clean>;

impl Pipeline for Scan {
    const NAME: &'static str = "scan";

    fn run_phases(node: &dyn BuildNode, ctx: &ScanContext, deps: BuildResult) -> BuildResult {
        deps.combine(node.scan(ctx))
    }
}

impl Pipeline for Build {
    const NAME: &'static str = "build";

    fn run_phases(node: &dyn BuildNode, ctx: &BuildContext, deps: BuildResult) -> BuildResult {
        let imported = node.import(ctx);
        let result = deps.combine(imported);
        let wants_process = match result {
            BuildResult::Built => true,
            BuildResult::UpToDate => ctx.flags().contains(BuildFlags::REBUILD),
            _ => false,
        };
        if !wants_process {
            return result;
        }

        let dynamic = node.core().dependencies(DependencyKind::Dynamic);
        let dynamic_result = ctx.executor().queue_and_wait_for(ctx, &dynamic);
        if dynamic_result.is_failed() {
            return BuildResult::Failed;
        }
        // Import's Built only asks for Process; what Process reports is the
        // node's own outcome.
        deps.combine(node.process(ctx))
    }
}

impl Pipeline for Clean {
    const NAME: &'static str = "clean";

    fn run_phases(node: &dyn BuildNode, ctx: &CleanContext, deps: BuildResult) -> BuildResult {
        deps.combine(node.clean(ctx))
    }
}

/// Visit one node: the same state machine for every operation.
pub(crate) fn visit<P: Pipeline>(
    ctx: &PipelineContext<P>,
    node: &dyn BuildNode,
) -> BuildResult {
    let log = ctx.log();
    log.node_begin(node);

    let statics = node.core().dependencies(DependencyKind::Static);
    let mut result = ctx.executor().queue_and_wait_for(ctx, &statics);
    if !result.is_failed() {
        result = trace::node_scope(P::NAME, node.name(), || P::run_phases(node, ctx, result));
    }

    if !ctx.stop_requested(result) {
        let runtime = node.core().dependencies(DependencyKind::Runtime);
        if !runtime.is_empty() {
            ctx.executor().queue(ctx, &runtime);
        }
    }

    ctx.record(result);
    log.node_end(node, result);
    result
}

/// Counts of visited nodes by outcome.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counts {
    pub built: usize,
    pub up_to_date: usize,
    pub failed: usize,
}

impl Counts {
    pub fn total(&self) -> usize {
        self.built + self.up_to_date + self.failed
    }
}

/// Accumulated outcome of one context.  Folded into the parent on drop.
struct Accumulator {
    parent: Option<Arc<Accumulator>>,
    num_built: AtomicUsize,
    num_up_to_date: AtomicUsize,
    num_failed: AtomicUsize,
    result: AtomicU8,
}

impl Accumulator {
    fn new(parent: Option<Arc<Accumulator>>) -> Self {
        Accumulator {
            parent,
            num_built: AtomicUsize::new(0),
            num_up_to_date: AtomicUsize::new(0),
            num_failed: AtomicUsize::new(0),
            result: AtomicU8::new(BuildResult::Unbuilt as u8),
        }
    }

    fn combine(&self, result: BuildResult) {
        let mut current = self.result.load(Ordering::Acquire);
        loop {
            let next = BuildResult::from_u8(current).combine(result) as u8;
            if next == current {
                return;
            }
            match self.result.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    fn result(&self) -> BuildResult {
        BuildResult::from_u8(self.result.load(Ordering::Acquire))
    }

    fn counts(&self) -> Counts {
        Counts {
            built: self.num_built.load(Ordering::Acquire),
            up_to_date: self.num_up_to_date.load(Ordering::Acquire),
            failed: self.num_failed.load(Ordering::Acquire),
        }
    }
}

impl Drop for Accumulator {
    fn drop(&mut self) {
        if let Some(parent) = &self.parent {
            let counts = self.counts();
            parent.num_built.fetch_add(counts.built, Ordering::AcqRel);
            parent
                .num_up_to_date
                .fetch_add(counts.up_to_date, Ordering::AcqRel);
            parent.num_failed.fetch_add(counts.failed, Ordering::AcqRel);
            parent.combine(self.result());
        }
    }
}

/// State shared by every context of one traversal, owned by its root.
struct Traversal {
    env: Arc<BuildEnvironment>,
    arena: Arc<NodeArena>,
    flags: BuildFlags,
    revision: u64,
    start: Instant,
    /// Output filename => producing node, filled during scans.
    outputs: Mutex<FxHashMap<PathBuf, NodeId>>,
}

pub struct PipelineContext<P> {
    traversal: Arc<Traversal>,
    acc: Arc<Accumulator>,
    node: Option<NodeId>,
    pipeline: PhantomData<fn() -> P>,
}

impl<P: Pipeline> PipelineContext<P> {
    /// Create the root context of a traversal.
    pub fn new(
        env: Arc<BuildEnvironment>,
        arena: Arc<NodeArena>,
        flags: BuildFlags,
        revision: u64,
    ) -> Self {
        PipelineContext {
            traversal: Arc::new(Traversal {
                env,
                arena,
                flags,
                revision,
                start: Instant::now(),
                outputs: Mutex::new(FxHashMap::default()),
            }),
            acc: Arc::new(Accumulator::new(None)),
            node: None,
            pipeline: PhantomData,
        }
    }

    /// Create the context a dispatched node is visited under.
    pub fn child(&self, node: NodeId) -> Self {
        PipelineContext {
            traversal: self.traversal.clone(),
            acc: Arc::new(Accumulator::new(Some(self.acc.clone()))),
            node: Some(node),
            pipeline: PhantomData,
        }
    }

    pub fn env(&self) -> &BuildEnvironment {
        &self.traversal.env
    }

    pub fn log(&self) -> &dyn BuildLog {
        self.traversal.env.log()
    }

    pub fn fs(&self) -> &dyn FileSystem {
        self.traversal.env.fs()
    }

    pub fn executor(&self) -> &crate::executor::BuildExecutor {
        self.traversal.env.executor()
    }

    pub fn arena(&self) -> &NodeArena {
        &self.traversal.arena
    }

    pub fn node(&self, id: NodeId) -> Arc<dyn BuildNode> {
        self.traversal.arena.get(id)
    }

    /// The node this context was created for; None for the root.
    pub fn node_id(&self) -> Option<NodeId> {
        self.node
    }

    pub fn flags(&self) -> BuildFlags {
        self.traversal.flags
    }

    pub fn revision(&self) -> u64 {
        self.traversal.revision
    }

    pub fn start(&self) -> Instant {
        self.traversal.start
    }

    pub fn elapsed(&self) -> Duration {
        self.traversal.start.elapsed()
    }

    /// Record one node's outcome.
    pub fn record(&self, result: BuildResult) {
        let counter = match result {
            BuildResult::Unbuilt => None,
            BuildResult::UpToDate => Some(&self.acc.num_up_to_date),
            BuildResult::Built => Some(&self.acc.num_built),
            BuildResult::Failed => Some(&self.acc.num_failed),
        };
        if let Some(counter) = counter {
            counter.fetch_add(1, Ordering::AcqRel);
        }
        self.acc.combine(result);
    }

    /// The combined result recorded in this context and its finished children.
    pub fn result(&self) -> BuildResult {
        self.acc.result()
    }

    pub fn counts(&self) -> Counts {
        self.acc.counts()
    }

    /// Whether new dispatch should stop: StopOnError is set and `local`, the
    /// result seen so far by the dispatching node, is a failure.  Failures
    /// elsewhere in the traversal never stop this node.
    pub fn stop_requested(&self, local: BuildResult) -> bool {
        self.traversal.flags.contains(BuildFlags::STOP_ON_ERROR) && local.is_failed()
    }
}

impl PipelineContext<Scan> {
    /// Fetch or create the FileNode for a path through the graph-wide index.
    pub fn get_or_create_file_node(&self, path: &Path) -> NodeId {
        self.traversal.arena.file_node(path)
    }

    /// Register `node` as the producer of `filename`.  Fails if another node
    /// already claimed the file in this scan.
    pub fn register_output(&self, filename: &Path, node: NodeId) -> Result<(), NodeId> {
        let key = crate::canon::canon_path(filename);
        let mut outputs = self.traversal.outputs.lock().unwrap();
        match outputs.get(&key) {
            Some(&other) if other != node => Err(other),
            _ => {
                outputs.insert(key, node);
                Ok(())
            }
        }
    }

    /// Take the output registrations collected by this traversal.
    pub(crate) fn take_outputs(&self) -> FxHashMap<PathBuf, NodeId> {
        std::mem::take(&mut *self.traversal.outputs.lock().unwrap())
    }
}
