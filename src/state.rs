//! Per-node revision state: the gate deciding who runs a node's phase method
//! for a revision, and the one-shot signal everybody else waits on.

use crate::result::BuildResult;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};

/// A one-shot completion signal.  Any number of threads may wait on it; it is
/// completed exactly once, by the owner of the work.
#[derive(Default)]
pub struct Completion {
    result: Mutex<Option<BuildResult>>,
    cond: Condvar,
}

impl Completion {
    pub fn new() -> Arc<Self> {
        Arc::new(Completion::default())
    }

    /// Publish the result and wake all waiters.  Later calls are ignored.
    pub fn complete(&self, result: BuildResult) {
        let mut slot = self.result.lock().unwrap();
        if slot.is_none() {
            *slot = Some(result);
            self.cond.notify_all();
        }
    }

    pub fn result(&self) -> Option<BuildResult> {
        *self.result.lock().unwrap()
    }

    /// Block the calling thread until the signal completes.
    pub fn wait(&self) -> BuildResult {
        let mut slot = self.result.lock().unwrap();
        loop {
            if let Some(result) = *slot {
                return result;
            }
            slot = self.cond.wait(slot).unwrap();
        }
    }
}

#[derive(Debug)]
enum Phase {
    Idle,
    InProgress {
        revision: u64,
        signal: Weak<Completion>,
    },
    Done {
        revision: u64,
        result: BuildResult,
    },
}

/// What the gate decided for one requester.
pub enum Claim {
    /// The requester owns this revision's work and must complete the signal.
    Owner(Arc<Completion>),
    /// Somebody else is running it; wait on their signal.
    Waiter(Arc<Completion>),
    /// Already finished for this revision.
    Finished(BuildResult),
}

/// Mutable per-node state shared by every traversal that reaches the node.
pub struct BuildState {
    phase: Mutex<Phase>,
    /// The last revision this node was claimed for.
    revision: AtomicU64,
    last_result: AtomicU8,
}

impl Default for BuildState {
    fn default() -> Self {
        BuildState {
            phase: Mutex::new(Phase::Idle),
            revision: AtomicU64::new(0),
            last_result: AtomicU8::new(BuildResult::Unbuilt as u8),
        }
    }
}

impl BuildState {
    /// Decide, under the node's lock, whether the caller runs the node for
    /// `revision` or attaches to an existing run.
    pub fn claim(&self, revision: u64) -> Claim {
        let mut phase = self.phase.lock().unwrap();
        match &*phase {
            Phase::InProgress {
                revision: r,
                signal,
            } if *r == revision => {
                if let Some(signal) = signal.upgrade() {
                    return Claim::Waiter(signal);
                }
                // The owner went away without finishing; run it again.
            }
            Phase::Done {
                revision: r,
                result,
            } if *r == revision => return Claim::Finished(*result),
            _ => {}
        }
        let signal = Completion::new();
        *phase = Phase::InProgress {
            revision,
            signal: Arc::downgrade(&signal),
        };
        self.revision.store(revision, Ordering::Release);
        Claim::Owner(signal)
    }

    /// Record the terminal result for `revision`.  The owner calls this
    /// before completing its signal, so late requesters see `Finished`.
    pub fn finish(&self, revision: u64, result: BuildResult) {
        let mut phase = self.phase.lock().unwrap();
        *phase = Phase::Done { revision, result };
        self.last_result.store(result as u8, Ordering::Release);
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    pub fn last_result(&self) -> BuildResult {
        BuildResult::from_u8(self.last_result.load(Ordering::Acquire))
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(&*self.phase.lock().unwrap(), Phase::InProgress { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_per_revision() {
        let state = BuildState::default();
        let owner = match state.claim(1) {
            Claim::Owner(s) => s,
            _ => panic!("first claim must own"),
        };
        assert!(state.is_in_progress());
        match state.claim(1) {
            Claim::Waiter(s) => assert!(Arc::ptr_eq(&s, &owner)),
            _ => panic!("second claim must wait"),
        }
        state.finish(1, BuildResult::Built);
        owner.complete(BuildResult::Built);
        assert!(matches!(state.claim(1), Claim::Finished(BuildResult::Built)));
        assert_eq!(state.last_result(), BuildResult::Built);

        // A new revision reopens the gate.
        assert!(matches!(state.claim(2), Claim::Owner(_)));
        assert_eq!(state.revision(), 2);
    }

    #[test]
    fn dropped_owner_reclaims() {
        let state = BuildState::default();
        drop(state.claim(5));
        assert!(matches!(state.claim(5), Claim::Owner(_)));
    }

    #[test]
    fn completion_wakes_waiters() {
        let signal = Completion::new();
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let signal = signal.clone();
                std::thread::spawn(move || signal.wait())
            })
            .collect();
        signal.complete(BuildResult::UpToDate);
        signal.complete(BuildResult::Failed);
        for w in waiters {
            assert_eq!(w.join().unwrap(), BuildResult::UpToDate);
        }
        assert_eq!(signal.result(), Some(BuildResult::UpToDate));
    }
}
