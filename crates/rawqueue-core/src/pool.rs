//! Bounded worker pool with a priority run-queue.
//!
//! Tasks are boxed closures queued with a priority. Worker threads pull the
//! best task whenever fewer than `max_workers` tasks are executing:
//!
//! - lower priority value first
//! - equal priorities in submission order (FIFO)
//! - running tasks are never preempted
//!
//! The worker ceiling can change at runtime. Growing it spawns threads;
//! shrinking it only caps how many tasks may start, so tasks already running
//! finish normally.
//!
//! There is no process-wide pool. Callers that want to share one pool
//! between managers pass the same `Arc<WorkerPool>` around.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::job::JobPriority;

/// Unit of work executed by a worker thread.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

struct QueuedTask {
    priority: JobPriority,
    seq: u64,
    task: Task,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max heap: the "greatest" task is the one with the
        // lowest priority value, then the lowest sequence number.
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct PoolState {
    queue: BinaryHeap<QueuedTask>,
    next_seq: u64,
    active: usize,
    max_workers: usize,
    spawned: usize,
    shutdown: bool,
}

struct PoolShared {
    state: Mutex<PoolState>,
    work_available: Condvar,
    idle: Condvar,
    thread_name_prefix: String,
}

/// Fixed-ceiling pool of named worker threads.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Create the pool and spawn its worker threads.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Spawn` if the first worker thread cannot be
    /// created. Later spawn failures leave the pool with fewer threads.
    pub fn new(config: &EngineConfig) -> Result<Self, EngineError> {
        let max_workers = config.resolved_max_workers();
        let pool = Self {
            shared: Arc::new(PoolShared {
                state: Mutex::new(PoolState {
                    queue: BinaryHeap::new(),
                    next_seq: 0,
                    active: 0,
                    max_workers,
                    spawned: 0,
                    shutdown: false,
                }),
                work_available: Condvar::new(),
                idle: Condvar::new(),
                thread_name_prefix: config.thread_name_prefix.clone(),
            }),
            threads: Mutex::new(Vec::with_capacity(max_workers)),
        };

        pool.spawn_workers(max_workers)?;
        debug!(max_workers, "Worker pool started");
        Ok(pool)
    }

    /// Current ceiling on concurrently executing tasks.
    pub fn max_workers(&self) -> usize {
        self.shared.state.lock().max_workers
    }

    /// Change the ceiling. Values below 1 are treated as 1.
    ///
    /// Applies to tasks that start after the call.
    pub fn set_max_workers(&self, max_workers: usize) {
        let max_workers = max_workers.max(1);
        let missing = {
            let mut state = self.shared.state.lock();
            state.max_workers = max_workers;
            max_workers.saturating_sub(state.spawned)
        };

        if missing > 0 {
            if let Err(e) = self.spawn_workers(missing) {
                error!(error = %e, "Could not grow worker pool");
            }
        }
        debug!(max_workers, "Worker ceiling changed");
        self.shared.work_available.notify_all();
    }

    /// Queue `task` at `priority`.
    pub fn spawn(&self, priority: JobPriority, task: Task) {
        {
            let mut state = self.shared.state.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.queue.push(QueuedTask {
                priority,
                seq,
                task,
            });
        }
        self.shared.work_available.notify_one();
    }

    /// Number of tasks currently executing.
    pub fn active_count(&self) -> usize {
        self.shared.state.lock().active
    }

    /// Number of tasks waiting for a worker.
    pub fn queued_count(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Number of worker threads alive.
    pub fn thread_count(&self) -> usize {
        self.shared.state.lock().spawned
    }

    /// Block until no task is queued or running, or until `timeout` elapses.
    ///
    /// Returns `true` if the pool went idle.
    pub fn wait_for_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while state.active > 0 || !state.queue.is_empty() {
            if self
                .shared
                .idle
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return state.active == 0 && state.queue.is_empty();
            }
        }
        true
    }

    fn spawn_workers(&self, count: usize) -> Result<(), EngineError> {
        let mut threads = self.threads.lock();
        for _ in 0..count {
            let index = threads.len();
            let name = format!("{}-{}", self.shared.thread_name_prefix, index);
            let shared = Arc::clone(&self.shared);
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker_loop(shared))
                .map_err(|source| EngineError::Spawn { name, source })?;
            threads.push(handle);
            self.shared.state.lock().spawned += 1;
        }
        Ok(())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shared.state.lock().shutdown = true;
        self.shared.work_available.notify_all();

        let current = thread::current().id();
        for handle in self.threads.lock().drain(..) {
            // A pool dropped from one of its own workers cannot join itself.
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!("Worker thread terminated abnormally");
            }
        }
        debug!("Worker pool stopped");
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("WorkerPool")
            .field("max_workers", &state.max_workers)
            .field("active", &state.active)
            .field("queued", &state.queue.len())
            .field("threads", &state.spawned)
            .finish()
    }
}

fn worker_loop(shared: Arc<PoolShared>) {
    loop {
        let task = {
            let mut state = shared.state.lock();
            loop {
                if state.active < state.max_workers {
                    if let Some(queued) = state.queue.pop() {
                        state.active += 1;
                        break queued.task;
                    }
                }
                if state.shutdown && state.queue.is_empty() {
                    return;
                }
                shared.work_available.wait(&mut state);
            }
        };

        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            error!(
                thread = thread::current().name().unwrap_or("worker"),
                "Task panicked"
            );
        }

        let mut state = shared.state.lock();
        state.active -= 1;
        let drained = state.queue.is_empty();
        let idle = state.active == 0 && drained;
        let shutdown = state.shutdown;
        drop(state);

        if idle {
            shared.idle.notify_all();
        }
        // Workers parked at the ceiling must all see the drained queue to exit.
        if drained || shutdown {
            shared.work_available.notify_all();
        } else {
            shared.work_available.notify_one();
        }
    }
}


// ============================================================================
// Property-Based Tests
// ============================================================================
