use bgraph::canon::canon_path;
use bgraph::log::NullLog;
use bgraph::{
    BuildContext, BuildEnvironment, BuildFlags, BuildGraph, BuildNode, BuildResult,
    DependencyKind, NodeCore, NodeId,
};
use criterion::{criterion_group, criterion_main, Criterion};
use std::any::Any;
use std::sync::Arc;

/// A node whose work is free, so the benchmark measures scheduling.
struct Unit {
    core: NodeCore,
    name: String,
}

impl Unit {
    fn new(name: String, deps: &[NodeId]) -> Self {
        let core = NodeCore::new();
        for &dep in deps {
            core.add_dependency(DependencyKind::Static, dep);
        }
        Unit { core, name }
    }
}

impl BuildNode for Unit {
    fn name(&self) -> &str {
        &self.name
    }
    fn core(&self) -> &NodeCore {
        &self.core
    }
    fn import(&self, _ctx: &BuildContext) -> BuildResult {
        BuildResult::Built
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// `groups` roots, each depending on `width` leaves, every leaf shared by
/// two neighbouring groups.
fn wide_graph(groups: usize, width: usize) -> BuildGraph {
    let mut graph = BuildGraph::new();
    let leaves: Vec<NodeId> = (0..groups * width)
        .map(|i| graph.insert_node(Unit::new(format!("leaf{}", i), &[])))
        .collect();
    for g in 0..groups {
        let deps: Vec<NodeId> = (0..width * 2)
            .map(|i| leaves[(g * width + i) % leaves.len()])
            .collect();
        graph.add_node(Unit::new(format!("group{}", g), &deps));
    }
    graph
}

pub fn bench_graph(c: &mut Criterion) {
    let env = Arc::new(BuildEnvironment::new(".").with_log(Arc::new(NullLog::default())));
    let mut graph = wide_graph(100, 50);

    c.bench_function("scan 5k nodes", |b| {
        b.iter(|| graph.scan_all(&env, BuildFlags::default()))
    });

    c.bench_function("build 5k nodes", |b| {
        b.iter(|| graph.build_all(&env, BuildFlags::default()))
    });

    c.bench_function("construct 5k nodes", |b| b.iter(|| wide_graph(100, 50)));
}

pub fn bench_canon(c: &mut Criterion) {
    c.bench_function("canon plain", |b| {
        b.iter(|| {
            let path = "out/OrcV2Examples/OrcV2CBindingsVeryLazy/\
                CMakeFiles/OrcV2CBindingsVeryLazy.dir/OrcV2CBindingsVeryLazy.c.o";
            canon_path(path);
        })
    });

    c.bench_function("canon with parents", |b| {
        b.iter(|| {
            let path = "out/OrcV2Examples/OrcV2CBindingsVeryLazy/\
                ../../../\
                CMakeFiles/OrcV2CBindingsVeryLazy.dir/OrcV2CBindingsVeryLazy.c.o";
            canon_path(path);
        })
    });
}

criterion_group!(benches, bench_graph, bench_canon);
criterion_main!(benches);
