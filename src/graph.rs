//! The build graph: the root node set, the output index and the revision
//! counter, plus the public scan/build/clean entry points.

use crate::canon::canon_path;
use crate::context::{Build, Clean, Counts, Pipeline, PipelineContext, Scan};
use crate::env::BuildEnvironment;
use crate::log::Level;
use crate::node::{BuildNode, NodeArena, NodeId};
use crate::result::{BuildFlags, BuildResult};
use crate::trace;
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Default)]
pub struct BuildGraph {
    arena: Arc<NodeArena>,
    roots: Vec<NodeId>,
    /// Canonical output filename => producing node, from the last good scan.
    outputs: FxHashMap<PathBuf, NodeId>,
    revision: u64,
    last: Option<Summary>,
}

/// Outcome of one top-level traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub result: BuildResult,
    pub counts: Counts,
    pub revision: u64,
}

impl BuildGraph {
    pub fn new() -> Self {
        BuildGraph::default()
    }

    pub fn arena(&self) -> &Arc<NodeArena> {
        &self.arena
    }

    /// Add a node to the root set.
    pub fn add_node<N: BuildNode>(&mut self, node: N) -> NodeId {
        let id = self.arena.add(node);
        self.roots.push(id);
        id
    }

    /// Add a node that is only reached through other nodes' edges.
    pub fn insert_node<N: BuildNode>(&mut self, node: N) -> NodeId {
        self.arena.add(node)
    }

    /// Add already constructed nodes to the root set.
    pub fn append_nodes(&mut self, nodes: Vec<Box<dyn BuildNode>>) -> Vec<NodeId> {
        let ids: Vec<NodeId> = nodes
            .into_iter()
            .map(|node| self.arena.add_boxed(node))
            .collect();
        self.roots.extend_from_slice(&ids);
        ids
    }

    /// Fetch or create the FileNode for a path.
    pub fn file_node(&self, path: impl AsRef<Path>) -> NodeId {
        self.arena.file_node(path.as_ref())
    }

    pub fn node(&self, id: NodeId) -> Arc<dyn BuildNode> {
        self.arena.get(id)
    }

    /// Run `f` on a node if it is of type `N`.
    pub fn with_node<N: BuildNode, R>(&self, id: NodeId, f: impl FnOnce(&N) -> R) -> Option<R> {
        let node = self.arena.get(id);
        let typed = node.as_any().downcast_ref::<N>()?;
        Some(f(typed))
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Find the node producing `filename`, as registered by the last
    /// successful scan.  Relative names are also tried against the output
    /// directory.
    pub fn lookup_output(&self, env: &BuildEnvironment, filename: &str) -> Option<NodeId> {
        let path = Path::new(filename);
        self.outputs
            .get(&canon_path(path))
            .or_else(|| {
                if path.is_absolute() {
                    return None;
                }
                self.outputs.get(&canon_path(env.output_dir().join(path)))
            })
            .copied()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    /// The outcome of the most recent traversal.
    pub fn last_summary(&self) -> Option<Summary> {
        self.last
    }

    /// Scan every root.  The output index is replaced only if the scan did
    /// not fail.
    pub fn scan_all(&mut self, env: &Arc<BuildEnvironment>, flags: BuildFlags) -> BuildResult {
        let roots = self.roots.clone();
        let (result, ctx) = self.traverse::<Scan>(env, flags, &roots);
        if !result.is_failed() {
            self.outputs = ctx.take_outputs();
        }
        result
    }

    pub fn build_all(&mut self, env: &Arc<BuildEnvironment>, flags: BuildFlags) -> BuildResult {
        let roots = self.roots.clone();
        self.traverse::<Build>(env, flags, &roots).0
    }

    pub fn clean_all(&mut self, env: &Arc<BuildEnvironment>, flags: BuildFlags) -> BuildResult {
        let roots = self.roots.clone();
        self.traverse::<Clean>(env, flags, &roots).0
    }

    /// Build the nodes producing the given files.  Any unknown file fails the
    /// call before anything runs.
    pub fn build(
        &mut self,
        env: &Arc<BuildEnvironment>,
        flags: BuildFlags,
        filenames: &[&str],
    ) -> BuildResult {
        match self.resolve(env, filenames) {
            Some(ids) => self.traverse::<Build>(env, flags, &ids).0,
            None => BuildResult::Failed,
        }
    }

    /// Clean the nodes producing the given files.  Any unknown file fails the
    /// call before anything runs.
    pub fn clean(
        &mut self,
        env: &Arc<BuildEnvironment>,
        flags: BuildFlags,
        filenames: &[&str],
    ) -> BuildResult {
        match self.resolve(env, filenames) {
            Some(ids) => self.traverse::<Clean>(env, flags, &ids).0,
            None => BuildResult::Failed,
        }
    }

    fn resolve(&self, env: &BuildEnvironment, filenames: &[&str]) -> Option<Vec<NodeId>> {
        let mut ids = Vec::with_capacity(filenames.len());
        for name in filenames {
            match self.lookup_output(env, name) {
                Some(id) => ids.push(id),
                None => {
                    env.log().error(&format!("unknown target: {}", name));
                    return None;
                }
            }
        }
        Some(ids)
    }

    /// Run one traversal over `nodes` under a fresh revision and report it.
    fn traverse<P: Pipeline>(
        &mut self,
        env: &Arc<BuildEnvironment>,
        flags: BuildFlags,
        nodes: &[NodeId],
    ) -> (BuildResult, PipelineContext<P>) {
        self.revision += 1;
        let ctx = PipelineContext::<P>::new(env.clone(), self.arena.clone(), flags, self.revision);
        let waited = trace::scope(P::NAME, || {
            let result = env.executor().queue_and_wait_for(&ctx, nodes);
            env.executor().wait_for_all();
            result
        });

        let summary = Summary {
            result: waited.combine(ctx.result()),
            counts: ctx.counts(),
            revision: self.revision,
        };
        report(env, P::NAME, &ctx, &summary);
        self.last = Some(summary);
        (summary.result, ctx)
    }
}

fn report<P: Pipeline>(
    env: &BuildEnvironment,
    name: &str,
    ctx: &PipelineContext<P>,
    summary: &Summary,
) {
    let counts = summary.counts;
    let level = if summary.result.is_failed() || counts.failed > 0 {
        Level::Error
    } else if counts.total() == 0 {
        Level::Warning
    } else {
        Level::Info
    };
    let verdict = match level {
        Level::Warning => "nothing to do".to_string(),
        _ => summary.result.to_string(),
    };
    env.log().trace_fmt(
        level,
        format_args!(
            "{} {} in {:.2}s: {} built, {} up to date, {} failed",
            name,
            verdict,
            ctx.elapsed().as_secs_f64(),
            counts.built,
            counts.up_to_date,
            counts.failed
        ),
    );
}
