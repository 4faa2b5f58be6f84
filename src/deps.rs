//! A declarative list of dependencies.
//!
//! `BuildDependencies` only records which nodes something depends on and how
//! strongly.  It takes no part in traversals; nodes that want their entries
//! resolved add them to their own static dependencies during Scan.

use crate::node::NodeId;

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub enum DependencyFlags {
    #[default]
    Default,
    /// The dependent tolerates the dependency being absent.
    Weak,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Dependency {
    pub node: NodeId,
    pub flags: DependencyFlags,
}

#[derive(Debug, Default, Clone)]
pub struct BuildDependencies {
    entries: Vec<Dependency>,
}

impl BuildDependencies {
    pub fn new() -> Self {
        BuildDependencies::default()
    }

    /// Add a dependency.  Adding a node again updates its flags.
    pub fn add(&mut self, node: NodeId, flags: DependencyFlags) {
        match self.entries.iter_mut().find(|d| d.node == node) {
            Some(existing) => existing.flags = flags,
            None => self.entries.push(Dependency { node, flags }),
        }
    }

    /// Remove a dependency, returning whether it was present.
    pub fn remove(&mut self, node: NodeId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|d| d.node != node);
        self.entries.len() != before
    }

    pub fn depends_on(&self, node: NodeId) -> bool {
        self.entries.iter().any(|d| d.node == node)
    }

    pub fn flags(&self, node: NodeId) -> Option<DependencyFlags> {
        self.entries.iter().find(|d| d.node == node).map(|d| d.flags)
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Dependency> {
        self.entries.iter()
    }

    /// The nodes that must exist, skipping weak entries.
    pub fn required(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.entries
            .iter()
            .filter(|d| d.flags == DependencyFlags::Default)
            .map(|d| d.node)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_remove() {
        let mut deps = BuildDependencies::new();
        deps.add(NodeId(1), DependencyFlags::Default);
        deps.add(NodeId(2), DependencyFlags::Weak);
        deps.add(NodeId(1), DependencyFlags::Weak);
        assert_eq!(deps.len(), 2);
        assert_eq!(deps.flags(NodeId(1)), Some(DependencyFlags::Weak));
        assert!(deps.depends_on(NodeId(2)));

        assert!(deps.remove(NodeId(2)));
        assert!(!deps.remove(NodeId(2)));
        assert!(!deps.depends_on(NodeId(2)));

        deps.reset();
        assert!(deps.is_empty());
    }

    #[test]
    fn required_skips_weak() {
        let mut deps = BuildDependencies::new();
        deps.add(NodeId(3), DependencyFlags::Default);
        deps.add(NodeId(4), DependencyFlags::Weak);
        deps.add(NodeId(5), DependencyFlags::default());
        assert_eq!(deps.required().collect::<Vec<_>>(), vec![NodeId(3), NodeId(5)]);
        assert_eq!(deps.iter().count(), 3);
    }
}
