//! Build log reporting, for the purpose of display to the user.

use crate::node::BuildNode;
use crate::result::BuildResult;
use std::fmt;
use std::io::Write;
use std::sync::Mutex;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub enum Level {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warning => "warning",
            Level::Error => "error",
        })
    }
}

/// Trait for build log notifications.  Called concurrently from every worker.
pub trait BuildLog: Send + Sync {
    /// Called when a traversal starts visiting a node.
    fn node_begin(&self, node: &dyn BuildNode);

    /// Called when a traversal has finished a node, with its combined result.
    fn node_end(&self, node: &dyn BuildNode, result: BuildResult);

    /// Log a line of text at the given severity.
    fn trace(&self, level: Level, msg: &str);

    fn debug(&self, msg: &str) {
        self.trace(Level::Debug, msg)
    }
    fn info(&self, msg: &str) {
        self.trace(Level::Info, msg)
    }
    fn warning(&self, msg: &str) {
        self.trace(Level::Warning, msg)
    }
    fn error(&self, msg: &str) {
        self.trace(Level::Error, msg)
    }

    fn trace_fmt(&self, level: Level, args: fmt::Arguments) {
        self.trace(level, &args.to_string())
    }
}

/// Log implementation for a plain console, one line per message.
#[derive(Default)]
pub struct ConsoleLog {
    /// Whether to print debug messages and per-node begin/end lines.
    verbose: bool,
    /// Serializes lines from concurrent workers.
    out: Mutex<()>,
}

impl ConsoleLog {
    pub fn new(verbose: bool) -> Self {
        ConsoleLog {
            verbose,
            out: Mutex::new(()),
        }
    }

    fn print(&self, line: &str) {
        let _guard = self.out.lock().unwrap();
        let mut stdout = std::io::stdout().lock();
        // Writes to a closed stdout are not worth failing a build over.
        let _ = writeln!(stdout, "{}", line);
    }
}

impl BuildLog for ConsoleLog {
    fn node_begin(&self, node: &dyn BuildNode) {
        if self.verbose {
            self.print(&format!("begin {}", node.name()));
        }
    }

    fn node_end(&self, node: &dyn BuildNode, result: BuildResult) {
        if self.verbose || result.is_failed() {
            self.print(&format!("{}: {}", result, node.name()));
        }
    }

    fn trace(&self, level: Level, msg: &str) {
        match level {
            Level::Debug if !self.verbose => {}
            Level::Debug | Level::Info => self.print(msg),
            _ => self.print(&format!("{}: {}", level, msg)),
        }
    }
}

/// Implementation of BuildLog that prints nothing.
#[derive(Default)]
pub struct NullLog {}

impl BuildLog for NullLog {
    fn node_begin(&self, _node: &dyn BuildNode) {}
    fn node_end(&self, _node: &dyn BuildNode, _result: BuildResult) {}
    fn trace(&self, _level: Level, _msg: &str) {}
}

/// Keeps every message in memory; used by tests to check what was reported.
#[derive(Default)]
pub struct MemoryLog {
    lines: Mutex<Vec<(Level, String)>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        MemoryLog::default()
    }

    pub fn lines(&self) -> Vec<(Level, String)> {
        self.lines.lock().unwrap().clone()
    }

    /// True if some message at `level` contains `text`.
    pub fn contains(&self, level: Level, text: &str) -> bool {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .any(|(l, msg)| *l == level && msg.contains(text))
    }
}

impl BuildLog for MemoryLog {
    fn node_begin(&self, _node: &dyn BuildNode) {}

    fn node_end(&self, node: &dyn BuildNode, result: BuildResult) {
        self.trace(Level::Debug, &format!("{}: {}", result, node.name()));
    }

    fn trace(&self, level: Level, msg: &str) {
        self.lines.lock().unwrap().push((level, msg.to_string()));
    }
}
