pub mod cache;
pub mod canon;
pub mod command;
pub mod context;
pub mod deps;
pub mod directory;
pub mod env;
pub mod executor;
pub mod file_node;
pub mod fs;
pub mod graph;
pub mod log;
pub mod node;
mod pool;
pub mod process;
pub mod result;
pub mod run;
pub mod state;
pub mod trace;

pub use cache::{BuildCache, Fingerprint};
pub use command::CommandNode;
pub use context::{BuildContext, CleanContext, ScanContext};
pub use deps::{BuildDependencies, Dependency, DependencyFlags};
pub use directory::DirectoryListNode;
pub use env::BuildEnvironment;
pub use executor::BuildExecutor;
pub use file_node::FileNode;
pub use graph::BuildGraph;
pub use node::{BuildNode, DependencyKind, NodeCore, NodeId};
pub use result::{BuildFlags, BuildResult};
