//! Chrome trace output.
//!
//! Node visits happen on many workers at once, so the trace file sits behind
//! a mutex and each event carries the id of the thread that produced it.

use std::cell::Cell;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

static TRACE: Mutex<Option<Trace>> = Mutex::new(None);
/// Checked before touching TRACE, so the disabled path takes no lock.
static ENABLED: AtomicBool = AtomicBool::new(false);
static NEXT_TID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static TID: Cell<u64> = Cell::new(0);
}

fn thread_id() -> u64 {
    TID.with(|tid| {
        if tid.get() == 0 {
            tid.set(NEXT_TID.fetch_add(1, Ordering::Relaxed));
        }
        tid.get()
    })
}

struct Event<'a> {
    name: &'a str,
    category: &'static str,
    tid: u64,
    timestamp: Instant,
    end: Instant,
}

struct Trace {
    start: Instant,
    w: BufWriter<File>,
}

impl Trace {
    fn new(path: &Path) -> std::io::Result<Self> {
        let mut w = BufWriter::new(File::create(path)?);
        writeln!(w, "[")?;
        Ok(Trace {
            start: Instant::now(),
            w,
        })
    }

    fn write_event(&mut self, event: Event) -> std::io::Result<()> {
        write!(
            self.w,
            "{{ \"pid\": 0, \"tid\": {}, \"name\": {:?}, \"cat\": {:?}, \"ts\": {}, \"ph\": \"X\", \"dur\": {} }}",
            event.tid,
            event.name,
            event.category,
            event.timestamp.saturating_duration_since(self.start).as_micros(),
            event.end.saturating_duration_since(event.timestamp).as_micros(),
        )
    }

    fn write(&mut self, event: Event) -> std::io::Result<()> {
        self.write_event(event)?;
        writeln!(self.w, ",")
    }

    fn close(&mut self) -> std::io::Result<()> {
        let end = Instant::now();
        self.write_event(Event {
            name: "main",
            category: "main",
            tid: thread_id(),
            timestamp: self.start,
            end,
        })?;
        writeln!(self.w, "]")?;
        self.w.flush()
    }
}

pub fn open(path: impl AsRef<Path>) -> std::io::Result<()> {
    let trace = Trace::new(path.as_ref())?;
    *TRACE.lock().unwrap() = Some(trace);
    ENABLED.store(true, Ordering::Release);
    Ok(())
}

pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Acquire)
}

fn record(name: &str, category: &'static str, timestamp: Instant) {
    let end = Instant::now();
    let tid = thread_id();
    if let Some(t) = TRACE.lock().unwrap().as_mut() {
        // A trace that cannot be written is not worth failing a build over.
        let _ = t.write(Event {
            name,
            category,
            tid,
            timestamp,
            end,
        });
    }
}

/// Time `f` as an event named `name`.
#[inline]
pub fn scope<T>(name: &'static str, f: impl FnOnce() -> T) -> T {
    if !is_enabled() {
        return f();
    }
    let start = Instant::now();
    let result = f();
    record(name, "main", start);
    result
}

/// Time one phase invocation of a node.
#[inline]
pub fn node_scope<T>(phase: &'static str, node: &str, f: impl FnOnce() -> T) -> T {
    if !is_enabled() {
        return f();
    }
    let start = Instant::now();
    let result = f();
    record(node, phase, start);
    result
}

pub fn close() -> std::io::Result<()> {
    ENABLED.store(false, Ordering::Release);
    if let Some(mut t) = TRACE.lock().unwrap().take() {
        return t.close();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_events_from_threads() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("trace.json");
        open(&path)?;
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| node_scope("build", "out/a.o", || ()));
            }
        });
        scope("summary", || ());
        close()?;

        let text = std::fs::read_to_string(&path)?;
        assert!(text.starts_with("[\n"));
        assert!(text.trim_end().ends_with(']'));
        assert_eq!(text.matches("\"out/a.o\"").count(), 4);
        assert!(text.contains("\"cat\": \"build\""));
        assert!(text.contains("\"name\": \"summary\""));
        Ok(())
    }
}
