//! Dispatches node visits onto the worker pool.
//!
//! Every dispatch goes through the node's phase gate, so however many
//! parents ask for a node within one revision, its phase method runs once
//! and every asker sees the same result.

use crate::context::{self, Pipeline, PipelineContext};
use crate::node::{BuildNode, NodeId};
use crate::pool::WorkerPool;
use crate::result::BuildResult;
use crate::state::{Claim, Completion};
use std::num::NonZeroUsize;
use std::sync::{Arc, Condvar, Mutex};

/// Counts units of work that have been submitted and not yet finished.
#[derive(Default)]
struct WaitGroup {
    count: Mutex<usize>,
    cond: Condvar,
}

impl WaitGroup {
    fn add(&self) {
        *self.count.lock().unwrap() += 1;
    }

    fn done(&self) {
        let mut count = self.count.lock().unwrap();
        *count -= 1;
        if *count == 0 {
            self.cond.notify_all();
        }
    }

    fn wait(&self) {
        let mut count = self.count.lock().unwrap();
        while *count > 0 {
            count = self.cond.wait(count).unwrap();
        }
    }
}

/// A dispatched node whose result may not be known yet.
enum Pending {
    Signal(Arc<Completion>),
    Done(BuildResult),
}

/// Owns one node's claim for a revision while its visit runs.  Dropping it
/// publishes the result, also when the visit panicked.
struct Launch<P: Pipeline> {
    ctx: Option<PipelineContext<P>>,
    node: Arc<dyn BuildNode>,
    revision: u64,
    signal: Arc<Completion>,
    pending: Arc<WaitGroup>,
    result: BuildResult,
}

impl<P: Pipeline> Launch<P> {
    fn run(mut self) {
        if let Some(ctx) = &self.ctx {
            self.result = context::visit(ctx, &*self.node);
        }
    }
}

impl<P: Pipeline> Drop for Launch<P> {
    fn drop(&mut self) {
        // Fold the node's counters into its parent before anyone wakes up.
        drop(self.ctx.take());
        if std::thread::panicking() {
            self.result = BuildResult::Failed;
        }
        self.node.core().state().finish(self.revision, self.result);
        self.signal.complete(self.result);
        self.pending.done();
    }
}

pub struct BuildExecutor {
    pool: WorkerPool,
    pending: Arc<WaitGroup>,
}

impl BuildExecutor {
    pub fn new(parallelism: NonZeroUsize) -> Self {
        BuildExecutor {
            pool: WorkerPool::new(parallelism),
            pending: Arc::new(WaitGroup::default()),
        }
    }

    /// An executor sized to the machine's available parallelism.
    pub fn with_default_parallelism() -> Self {
        let parallelism = std::thread::available_parallelism().unwrap_or(NonZeroUsize::MIN);
        BuildExecutor::new(parallelism)
    }

    pub fn parallelism(&self) -> NonZeroUsize {
        self.pool.get_num_threads()
    }

    /// Dispatch nodes without waiting for them.
    pub fn queue<P: Pipeline>(&self, ctx: &PipelineContext<P>, nodes: &[NodeId]) {
        for &id in nodes {
            self.dispatch(ctx, id);
        }
    }

    /// Dispatch nodes and block until all of them are done, returning their
    /// combined result.  Under StopOnError, a node of the batch already known
    /// to have failed ends dispatch of the rest; nodes in flight still finish.
    pub fn queue_and_wait_for<P: Pipeline>(
        &self,
        ctx: &PipelineContext<P>,
        nodes: &[NodeId],
    ) -> BuildResult {
        let mut result = BuildResult::Unbuilt;
        let mut signals = Vec::new();
        for &id in nodes {
            if ctx.stop_requested(result) {
                break;
            }
            match self.dispatch(ctx, id) {
                Pending::Done(r) => result = result.combine(r),
                Pending::Signal(signal) => signals.push(signal),
            }
        }
        if signals.is_empty() {
            return result;
        }
        let waited: BuildResult = self
            .pool
            .block_on(|| signals.iter().map(|signal| signal.wait()).collect());
        result.combine(waited)
    }

    /// Block until every dispatched unit of work, including fire-and-forget
    /// ones, has finished.
    pub fn wait_for_all(&self) {
        self.pool.block_on(|| self.pending.wait())
    }

    fn dispatch<P: Pipeline>(&self, ctx: &PipelineContext<P>, id: NodeId) -> Pending {
        let node = ctx.node(id);
        let revision = ctx.revision();
        let signal = match node.core().state().claim(revision) {
            Claim::Finished(result) => return Pending::Done(result),
            Claim::Waiter(signal) => return Pending::Signal(signal),
            Claim::Owner(signal) => signal,
        };

        // Fewer edges run first, draining leaf work before suspending parents.
        let priority = node.core().edge_count();
        self.pending.add();
        let launch = Launch {
            ctx: Some(ctx.child(id)),
            node,
            revision,
            signal: signal.clone(),
            pending: self.pending.clone(),
            result: BuildResult::Unbuilt,
        };
        self.pool.execute(priority, move || launch.run());
        Pending::Signal(signal)
    }
}

impl Default for BuildExecutor {
    fn default() -> Self {
        BuildExecutor::with_default_parallelism()
    }
}
