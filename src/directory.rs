//! Nodes that stand for the set of files found in a directory.

use crate::context::ScanContext;
use crate::node::{BuildNode, DependencyKind, NodeCore, NodeId};
use crate::result::BuildResult;
use regex::Regex;
use std::any::Any;
use std::path::{Path, PathBuf};

/// Lists the files under `path` during Scan and depends statically on each
/// of them.  An optional wildcard pattern (`*`, `?`, `[abc]`, `[!abc]`)
/// filters by file name, case-sensitively, at every listed depth.
pub struct DirectoryListNode {
    core: NodeCore,
    name: String,
    path: PathBuf,
    pattern: Option<String>,
    recursive: bool,
}

impl DirectoryListNode {
    pub fn new(path: impl Into<PathBuf>, pattern: Option<&str>, recursive: bool) -> Self {
        let path = path.into();
        let name = match pattern {
            Some(p) => format!("{}", path.join(p).display()),
            None => format!("{}", path.display()),
        };
        DirectoryListNode {
            core: NodeCore::new(),
            name,
            path,
            pattern: pattern.map(str::to_string),
            recursive,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pattern(&self) -> Option<&str> {
        self.pattern.as_deref()
    }

    pub fn recursive(&self) -> bool {
        self.recursive
    }

    fn matcher(&self) -> Result<Option<Regex>, regex::Error> {
        self.pattern
            .as_deref()
            .map(|p| Regex::new(&wildcard_regex(p)))
            .transpose()
    }
}

/// Translate a wildcard pattern into an anchored regex over a file name.
/// A `[` without its `]` is left unbalanced, so it fails to compile.
pub fn wildcard_regex(pattern: &str) -> String {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            '[' => {
                re.push('[');
                if chars.peek() == Some(&'!') {
                    chars.next();
                    re.push('^');
                }
                for c in chars.by_ref() {
                    match c {
                        ']' => {
                            re.push(']');
                            break;
                        }
                        '\\' | '[' | '&' | '~' => {
                            re.push('\\');
                            re.push(c);
                        }
                        _ => re.push(c),
                    }
                }
            }
            _ => re.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
    }
    re.push('$');
    re
}

impl BuildNode for DirectoryListNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn scan(&self, ctx: &ScanContext) -> BuildResult {
        let matcher = match self.matcher() {
            Ok(m) => m,
            Err(err) => {
                ctx.log().error(&format!("{}: bad pattern: {}", self.name, err));
                return BuildResult::Failed;
            }
        };
        let files = match ctx.fs().list(&self.path, self.recursive) {
            Ok(files) => files,
            Err(err) => {
                ctx.log()
                    .error(&format!("list {}: {}", self.path.display(), err));
                return BuildResult::Failed;
            }
        };

        let deps: Vec<NodeId> = files
            .iter()
            .filter(|file| match &matcher {
                None => true,
                Some(re) => file
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map_or(false, |n| re.is_match(n)),
            })
            .map(|file| ctx.get_or_create_file_node(file))
            .collect();

        if deps == self.core.dependencies(DependencyKind::Static) {
            return BuildResult::UpToDate;
        }
        ctx.log().debug(&format!("{}: {} files", self.name, deps.len()));
        self.core.set_dependencies(DependencyKind::Static, deps);
        BuildResult::Built
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pattern: &str, name: &str) -> bool {
        Regex::new(&wildcard_regex(pattern)).unwrap().is_match(name)
    }

    #[test]
    fn wildcards() {
        assert!(matches("*.obj", "a.obj"));
        assert!(matches("*.obj", ".obj"));
        assert!(!matches("*.obj", "a.obj.bak"));
        assert!(!matches("*.obj", "a.OBJ"));
        assert!(matches("?.c", "x.c"));
        assert!(!matches("?.c", "xy.c"));
        assert!(matches("[ab]*", "beta"));
        assert!(!matches("[!ab]*", "beta"));
        assert!(matches("[!ab]*", "gamma"));
        // Regex metacharacters are literal.
        assert!(matches("a+b(1).txt", "a+b(1).txt"));
        assert!(!matches("a+b(1).txt", "aab1.txt"));
    }

    #[test]
    fn unclosed_class_is_invalid() {
        assert!(Regex::new(&wildcard_regex("[abc")).is_err());
        let node = DirectoryListNode::new("src", Some("[abc"), false);
        assert!(node.matcher().is_err());
        let node = DirectoryListNode::new("src", None, true);
        assert!(matches!(node.matcher(), Ok(None)));
    }
}
