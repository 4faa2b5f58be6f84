//! A priority-ordered worker pool whose jobs may block on each other.
//!
//! At most `parallelism` jobs run at once.  A job that blocks through
//! `block_on` hands its slot back for the duration of the wait, and a new
//! worker thread is started if queued work would otherwise sit idle, so a
//! chain of jobs waiting on each other can never starve the pool.

use std::cell::Cell;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Condvar, Mutex};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Queued {
    /// Lower runs first.
    priority: usize,
    seq: u64,
    job: Job,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for Queued {}
impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Queued {
    // BinaryHeap pops the greatest element; invert so the lowest priority
    // number, then the oldest submission, comes out first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct PoolState {
    queue: BinaryHeap<Queued>,
    seq: u64,
    /// Jobs currently holding a slot.
    active: usize,
    /// Workers parked waiting for work.
    idle: usize,
    workers: usize,
    shutdown: bool,
}

struct Shared {
    state: Mutex<PoolState>,
    cond: Condvar,
    parallelism: usize,
}

thread_local! {
    /// Address of the pool this thread works for, 0 if none.
    static CURRENT_POOL: Cell<usize> = Cell::new(0);
}

pub struct WorkerPool {
    shared: Arc<Shared>,
    num_threads: NonZeroUsize,
}

impl WorkerPool {
    pub fn new(num_threads: NonZeroUsize) -> Self {
        WorkerPool {
            shared: Arc::new(Shared {
                state: Mutex::new(PoolState::default()),
                cond: Condvar::new(),
                parallelism: num_threads.get(),
            }),
            num_threads,
        }
    }

    pub fn get_num_threads(&self) -> NonZeroUsize {
        self.num_threads
    }

    /// Queue a job.  Jobs with a lower `priority` value are started first.
    pub fn execute<F: FnOnce() + Send + 'static>(&self, priority: usize, f: F) {
        let mut state = self.shared.state.lock().unwrap();
        let seq = state.seq;
        state.seq += 1;
        state.queue.push(Queued {
            priority,
            seq,
            job: Box::new(f),
        });
        self.wake_or_spawn(&mut state);
    }

    /// Run `wait`, which is expected to block.  When called from one of this
    /// pool's jobs, the job's slot is released for the duration.
    pub fn block_on<T>(&self, wait: impl FnOnce() -> T) -> T {
        let on_worker = CURRENT_POOL.with(|p| p.get()) == self.id();
        if !on_worker {
            return wait();
        }

        {
            let mut state = self.shared.state.lock().unwrap();
            state.active -= 1;
            self.shared.cond.notify_all();
            self.wake_or_spawn(&mut state);
        }
        let result = wait();
        let mut state = self.shared.state.lock().unwrap();
        while state.active >= self.shared.parallelism {
            state = self.shared.cond.wait(state).unwrap();
        }
        state.active += 1;
        result
    }

    fn id(&self) -> usize {
        Arc::as_ptr(&self.shared) as usize
    }

    fn wake_or_spawn(&self, state: &mut PoolState) {
        if state.queue.is_empty() || state.active >= self.shared.parallelism {
            return;
        }
        if state.idle > 0 {
            self.shared.cond.notify_all();
            return;
        }
        state.workers += 1;
        let shared = self.shared.clone();
        let id = self.id();
        let spawned = std::thread::Builder::new()
            .name("bgraph-worker".into())
            .spawn(move || worker(shared, id));
        if spawned.is_err() {
            // Out of threads; the existing workers will drain the queue.
            state.workers -= 1;
        }
    }
}

fn worker(shared: Arc<Shared>, id: usize) {
    CURRENT_POOL.with(|p| p.set(id));
    let mut state = shared.state.lock().unwrap();
    loop {
        if state.active < shared.parallelism {
            if let Some(queued) = state.queue.pop() {
                state.active += 1;
                drop(state);
                // A panicking job must not take the slot accounting with it.
                let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(queued.job));
                state = shared.state.lock().unwrap();
                state.active -= 1;
                shared.cond.notify_all();
                continue;
            }
        }
        if state.shutdown && state.queue.is_empty() {
            break;
        }
        if state.idle >= shared.parallelism {
            // Enough parked workers already.
            break;
        }
        state.idle += 1;
        state = shared.cond.wait(state).unwrap();
        state.idle -= 1;
    }
    state.workers -= 1;
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock().unwrap();
        state.shutdown = true;
        self.shared.cond.notify_all();
    }
}
