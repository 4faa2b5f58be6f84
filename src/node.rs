//! Build nodes: the contract every node kind implements, the per-node
//! dependency lists, and the arena that owns all nodes of a graph.

use crate::canon::canon_path;
use crate::context::{BuildContext, CleanContext, ScanContext};
use crate::file_node::FileNode;
use crate::result::BuildResult;
use crate::state::BuildState;
use dashmap::DashMap;
use rustc_hash::{FxHashSet, FxHasher};
use std::any::Any;
use std::hash::BuildHasherDefault;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Stable handle of a node within its graph's arena.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct NodeId(pub(crate) usize);
impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DependencyKind {
    /// Known before any work begins; resolved before the node's own phase.
    Static,
    /// Discovered during Import; resolved before Process.
    Dynamic,
    /// Triggered after the node finishes, never awaited by it.
    Runtime,
}

#[derive(Debug, Default, Clone)]
pub struct Dependencies {
    pub static_deps: Vec<NodeId>,
    pub dynamic_deps: Vec<NodeId>,
    pub runtime_deps: Vec<NodeId>,
}

impl Dependencies {
    fn list(&self, kind: DependencyKind) -> &Vec<NodeId> {
        match kind {
            DependencyKind::Static => &self.static_deps,
            DependencyKind::Dynamic => &self.dynamic_deps,
            DependencyKind::Runtime => &self.runtime_deps,
        }
    }

    fn list_mut(&mut self, kind: DependencyKind) -> &mut Vec<NodeId> {
        match kind {
            DependencyKind::Static => &mut self.static_deps,
            DependencyKind::Dynamic => &mut self.dynamic_deps,
            DependencyKind::Runtime => &mut self.runtime_deps,
        }
    }

    pub fn len(&self) -> usize {
        self.static_deps.len() + self.dynamic_deps.len() + self.runtime_deps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The part of a node every kind shares: its edges and its revision state.
#[derive(Default)]
pub struct NodeCore {
    deps: RwLock<Dependencies>,
    state: BuildState,
}

impl NodeCore {
    pub fn new() -> Self {
        NodeCore::default()
    }

    /// Add an edge, returning false if it was already present.
    pub fn add_dependency(&self, kind: DependencyKind, id: NodeId) -> bool {
        let mut deps = self.deps.write().unwrap();
        let list = deps.list_mut(kind);
        if list.contains(&id) {
            return false;
        }
        list.push(id);
        true
    }

    /// Replace one category of edges wholesale.  Runtime edges are
    /// append-only and cannot be replaced.
    pub fn set_dependencies(&self, kind: DependencyKind, mut ids: Vec<NodeId>) {
        debug_assert!(kind != DependencyKind::Runtime);
        let mut seen = FxHashSet::default();
        ids.retain(|id| seen.insert(*id));
        *self.deps.write().unwrap().list_mut(kind) = ids;
    }

    pub fn dependencies(&self, kind: DependencyKind) -> Vec<NodeId> {
        self.deps.read().unwrap().list(kind).clone()
    }

    pub fn all_dependencies(&self) -> Dependencies {
        self.deps.read().unwrap().clone()
    }

    pub fn depends_on(&self, kind: DependencyKind, id: NodeId) -> bool {
        self.deps.read().unwrap().list(kind).contains(&id)
    }

    /// Total number of edges, used to prioritize leaf-heavy work.
    pub fn edge_count(&self) -> usize {
        self.deps.read().unwrap().len()
    }

    pub fn state(&self) -> &BuildState {
        &self.state
    }
}

/// A unit of the build graph.  Each phase method returns how it went and may
/// only mutate the node's own fields.  The default phases do nothing.
pub trait BuildNode: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn core(&self) -> &NodeCore;

    /// The on-disk file this node stands for, if it is file-like.
    fn filename(&self) -> Option<&Path> {
        None
    }

    /// Declare static dependencies.
    fn scan(&self, _ctx: &ScanContext) -> BuildResult {
        BuildResult::UpToDate
    }

    /// Resolve dynamic dependencies.  Built asks for Process to run.
    fn import(&self, _ctx: &BuildContext) -> BuildResult {
        BuildResult::UpToDate
    }

    fn process(&self, _ctx: &BuildContext) -> BuildResult {
        BuildResult::UpToDate
    }

    /// Remove produced artifacts.
    fn clean(&self, _ctx: &CleanContext) -> BuildResult {
        BuildResult::UpToDate
    }

    fn as_any(&self) -> &dyn Any;
}

type FxBuildHasher = BuildHasherDefault<FxHasher>;

/// Owns every node of a graph, addressed by NodeId.  Nodes may be added
/// concurrently, e.g. while a scan discovers files.
#[derive(Default)]
pub struct NodeArena {
    nodes: RwLock<Vec<Arc<dyn BuildNode>>>,
    /// Canonical filename => FileNode, so each path has exactly one node.
    files: DashMap<PathBuf, NodeId, FxBuildHasher>,
}

impl NodeArena {
    pub fn new() -> Self {
        NodeArena::default()
    }

    pub fn add<N: BuildNode>(&self, node: N) -> NodeId {
        self.add_arc(Arc::new(node))
    }

    pub fn add_boxed(&self, node: Box<dyn BuildNode>) -> NodeId {
        self.add_arc(Arc::from(node))
    }

    fn add_arc(&self, node: Arc<dyn BuildNode>) -> NodeId {
        let mut nodes = self.nodes.write().unwrap();
        let id = NodeId(nodes.len());
        nodes.push(node);
        id
    }

    pub fn get(&self, id: NodeId) -> Arc<dyn BuildNode> {
        self.nodes.read().unwrap()[id.index()].clone()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetch the FileNode for a path, creating it on first use.
    pub fn file_node(&self, path: &Path) -> NodeId {
        let key = canon_path(path);
        if let Some(id) = self.files.get(&key) {
            return *id;
        }
        let entry = self
            .files
            .entry(key.clone())
            .or_insert_with(|| self.add(FileNode::new(key)));
        *entry.value()
    }

    pub fn find_file(&self, path: &Path) -> Option<NodeId> {
        self.files.get(&canon_path(path)).map(|id| *id)
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

/// Collect every file-like node reachable from `root` over static, runtime
/// and dynamic edges, each once, in depth-first order.  File-like nodes are
/// leaves of the walk.  Returns whether anything was found.
pub fn flatten_files(arena: &NodeArena, root: NodeId, out: &mut Vec<NodeId>) -> bool {
    let found_before = out.len();
    let mut visited = FxHashSet::default();
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        if !visited.insert(id) {
            continue;
        }
        let node = arena.get(id);
        if node.filename().is_some() {
            out.push(id);
            continue;
        }
        let deps = node.core().all_dependencies();
        // Push in reverse so the walk visits edges in declaration order.
        for &dep in deps
            .static_deps
            .iter()
            .chain(deps.runtime_deps.iter())
            .chain(deps.dynamic_deps.iter())
            .rev()
        {
            if !visited.contains(&dep) {
                stack.push(dep);
            }
        }
    }
    out.len() > found_before
}
