//! Job manager: bookkeeping, dispatch loop and whole-engine cancellation.
//!
//! The manager is the canonical owner of every job appended to it. Each job
//! lives in exactly one of three sets:
//!
//! - `todo`: appended, not yet handed to the worker pool
//! - `pending`: handed to the pool, `Done` not yet observed
//! - `processed`: finished, cancelled or discarded; kept until teardown or
//!   purge
//!
//! A dedicated control thread moves jobs from `todo` to `pending` and queues
//! them on the [`WorkerPool`]. The pool only ever sees a task closure; the
//! manager learns about completion through a listener it connects to every
//! job when the job is appended.
//!
//! Cancellation is cooperative: [`ThreadPoolManager::cancel`] flags pending
//! jobs and returns immediately. Jobs whose body is already executing stop
//! only when the body notices its token.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use crate::collection::JobCollection;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::{EngineEvent, EventBus};
use crate::job::{Job, JobId, JobPriority, JobSignal, JobState};
use crate::pool::WorkerPool;

const CONTROL_THREAD_NAME: &str = "rawqueue-dispatch";

struct TodoEntry {
    job: Job,
    priority: JobPriority,
    seq: u64,
}

#[derive(Default)]
struct ManagerState {
    todo: HashMap<JobId, TodoEntry>,
    pending: HashMap<JobId, Job>,
    processed: HashMap<JobId, Job>,
    running: bool,
    shutdown: bool,
    next_seq: u64,
}

struct ManagerShared {
    state: Mutex<ManagerState>,
    wake: Condvar,
    idle: Condvar,
    events: EventBus<EngineEvent>,
}

impl ManagerShared {
    fn on_job_finished(&self, id: JobId) {
        let mut state = self.state.lock();
        match state.pending.remove(&id) {
            Some(job) => {
                state.processed.insert(id, job);
            }
            None => debug!(job_id = %id, "Finished job was not pending, already accounted for"),
        }

        if state.running && state.todo.is_empty() && state.pending.is_empty() {
            state.running = false;
            // Idle must be queued before any waiter can observe `running == false`.
            self.events.publish(EngineEvent::Idle);
            drop(state);
            info!("All jobs processed");
            self.idle.notify_all();
        }
    }
}

/// Point-in-time view of the manager's job sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagerSnapshot {
    pub todo: Vec<JobId>,
    pub pending: Vec<JobId>,
    pub processed: Vec<JobId>,
    pub running: bool,
}

impl ManagerSnapshot {
    /// Whether `id` is tracked in any set.
    pub fn contains(&self, id: JobId) -> bool {
        self.todo.contains(&id) || self.pending.contains(&id) || self.processed.contains(&id)
    }
}

/// Accepts job collections and runs them on a worker pool.
pub struct ThreadPoolManager {
    shared: Arc<ManagerShared>,
    pool: Arc<WorkerPool>,
    control: Option<JoinHandle<()>>,
}

impl ThreadPoolManager {
    /// Create a manager with its own worker pool.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Spawn` if the pool or control thread cannot be
    /// started.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let pool = Arc::new(WorkerPool::new(&config)?);
        Self::with_pool(pool)
    }

    /// Create a manager that dispatches onto an existing pool.
    pub fn with_pool(pool: Arc<WorkerPool>) -> Result<Self, EngineError> {
        let shared = Arc::new(ManagerShared {
            state: Mutex::new(ManagerState::default()),
            wake: Condvar::new(),
            idle: Condvar::new(),
            events: EventBus::new(),
        });

        let control = {
            let shared = Arc::clone(&shared);
            let pool = Arc::clone(&pool);
            thread::Builder::new()
                .name(CONTROL_THREAD_NAME.to_string())
                .spawn(move || dispatch_loop(shared, pool))
                .map_err(|source| EngineError::Spawn {
                    name: CONTROL_THREAD_NAME.to_string(),
                    source,
                })?
        };

        Ok(Self {
            shared,
            pool,
            control: Some(control),
        })
    }

    /// The pool this manager dispatches onto.
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn max_workers(&self) -> usize {
        self.pool.max_workers()
    }

    /// Change the worker ceiling; honoured for jobs that start afterwards.
    pub fn set_max_workers(&self, max_workers: usize) {
        self.pool.set_max_workers(max_workers);
    }

    /// Subscribe to engine events published after this call.
    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        self.shared.events.subscribe()
    }

    /// Merge `collection` into the queue and wake the dispatch loop.
    ///
    /// A job already waiting in `todo` gets its priority replaced. Jobs that
    /// were already dispatched or processed are ignored, and so are jobs that
    /// already ran or were cancelled elsewhere.
    pub fn append_jobs(&self, collection: JobCollection) {
        let mut added = 0usize;
        {
            let mut state = self.shared.state.lock();
            for (job, priority) in collection {
                let id = job.id();
                if let Some(entry) = state.todo.get_mut(&id) {
                    debug!(job_id = %id, priority, "Updating priority of queued job");
                    entry.priority = priority;
                    continue;
                }
                if state.pending.contains_key(&id) || state.processed.contains_key(&id) {
                    warn!(job_id = %id, "Job was already dispatched, ignoring");
                    continue;
                }
                if job.state() != JobState::Idle || job.is_cancelled() {
                    warn!(job_id = %id, state = ?job.state(), "Job is not runnable, ignoring");
                    continue;
                }

                self.attach(&job);
                let seq = state.next_seq;
                state.next_seq += 1;
                state.todo.insert(id, TodoEntry { job, priority, seq });
                added += 1;
            }

            if !state.todo.is_empty() {
                state.running = true;
            }
        }

        info!(added, "Jobs appended");
        self.shared.wake.notify_one();
    }

    /// Cancel everything.
    ///
    /// Queued jobs are discarded without running and dispatched jobs are
    /// flagged. Both move to `processed`. Returns without waiting for bodies
    /// that are already executing: use [`wait_for_workers`](Self::wait_for_workers)
    /// for that.
    pub fn cancel(&self) {
        let (discarded, cancelled) = {
            let mut state = self.shared.state.lock();

            let todo: Vec<(JobId, TodoEntry)> = state.todo.drain().collect();
            let discarded = todo.len();
            for (id, entry) in todo {
                entry.job.cancel();
                state.processed.insert(id, entry.job);
            }

            let pending: Vec<(JobId, Job)> = state.pending.drain().collect();
            let cancelled = pending.len();
            for (id, job) in pending {
                job.cancel();
                state.processed.insert(id, job);
            }

            if std::mem::replace(&mut state.running, false) {
                self.shared.events.publish(EngineEvent::Idle);
            }
            (discarded, cancelled)
        };

        if discarded > 0 || cancelled > 0 {
            warn!(discarded, cancelled, "Engine cancelled");
        }
        self.shared.wake.notify_all();
        self.shared.idle.notify_all();
    }

    /// Whether appended work remains in `todo` or `pending`.
    pub fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    /// Block until the manager is idle or `timeout` elapses.
    ///
    /// Returns `true` if the manager went idle.
    pub fn wait_for_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while state.running {
            if self
                .shared
                .idle
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return !state.running;
            }
        }
        true
    }

    /// Block until the worker pool has no queued or executing tasks, or
    /// `timeout` elapses. This is the join that [`cancel`](Self::cancel)
    /// deliberately does not perform.
    pub fn wait_for_workers(&self, timeout: Duration) -> bool {
        self.pool.wait_for_idle(timeout)
    }

    /// Copy of the current job sets, each sorted by id.
    pub fn snapshot(&self) -> ManagerSnapshot {
        let state = self.shared.state.lock();
        let mut snapshot = ManagerSnapshot {
            todo: state.todo.keys().copied().collect(),
            pending: state.pending.keys().copied().collect(),
            processed: state.processed.keys().copied().collect(),
            running: state.running,
        };
        snapshot.todo.sort();
        snapshot.pending.sort();
        snapshot.processed.sort();
        snapshot
    }

    /// Drop all processed jobs, returning how many were released.
    pub fn purge_processed(&self) -> usize {
        let purged: Vec<Job> = {
            let mut state = self.shared.state.lock();
            state.processed.drain().map(|(_, job)| job).collect()
        };
        debug!(count = purged.len(), "Purged processed jobs");
        purged.len()
    }

    fn attach(&self, job: &Job) {
        let shared: Weak<ManagerShared> = Arc::downgrade(&self.shared);
        job.connect(move |id, signal| {
            let Some(shared) = shared.upgrade() else {
                return;
            };
            shared.events.publish(EngineEvent::from_signal(id, signal));
            if matches!(signal, JobSignal::Done(_)) {
                shared.on_job_finished(id);
            }
        });
    }
}

impl Drop for ThreadPoolManager {
    fn drop(&mut self) {
        self.cancel();

        self.shared.state.lock().shutdown = true;
        self.shared.wake.notify_all();
        if let Some(handle) = self.control.take() {
            if handle.join().is_err() {
                error!("Dispatch thread terminated abnormally");
            }
        }

        let (todo, pending, processed) = {
            let mut state = self.shared.state.lock();
            (
                std::mem::take(&mut state.todo),
                std::mem::take(&mut state.pending),
                std::mem::take(&mut state.processed),
            )
        };
        debug!(
            todo = todo.len(),
            pending = pending.len(),
            processed = processed.len(),
            "Releasing jobs"
        );
    }
}

impl std::fmt::Debug for ThreadPoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPoolManager")
            .field("snapshot", &self.snapshot())
            .field("pool", &self.pool)
            .finish()
    }
}

fn dispatch_loop(shared: Arc<ManagerShared>, pool: Arc<WorkerPool>) {
    debug!("Dispatch loop started");
    loop {
        let batch = {
            let mut state = shared.state.lock();
            while !state.shutdown && state.todo.is_empty() {
                shared.wake.wait(&mut state);
            }
            if state.shutdown {
                break;
            }

            let mut batch: Vec<TodoEntry> = state.todo.drain().map(|(_, entry)| entry).collect();
            batch.sort_by_key(|entry| (entry.priority, entry.seq));
            for entry in &batch {
                state.pending.insert(entry.job.id(), entry.job.clone());
            }
            batch
        };

        for TodoEntry { job, priority, .. } in batch {
            debug!(job_id = %job.id(), priority, "Dispatching job");
            pool.spawn(priority, Box::new(move || job.run()));
        }
    }
    debug!("Dispatch loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JobError;
    use crate::test_utils::init_tracing;
    use crossbeam_channel::bounded;

    fn manager(workers: usize) -> ThreadPoolManager {
        init_tracing();
        ThreadPoolManager::new(EngineConfig::new().with_max_workers(workers)).unwrap()
    }

    #[test]
    fn test_jobs_reach_processed() {
        let manager = manager(2);
        let jobs: Vec<Job> = (0..5).map(|_| Job::new(|_| Ok(()))).collect();
        let collection: JobCollection = jobs.iter().cloned().map(|j| (j, 0)).collect();

        manager.append_jobs(collection);
        assert!(manager.wait_for_idle(Duration::from_secs(5)));

        let snapshot = manager.snapshot();
        assert!(snapshot.todo.is_empty());
        assert!(snapshot.pending.is_empty());
        assert_eq!(snapshot.processed.len(), 5);
        assert!(!snapshot.running);
    }

    #[test]
    fn test_idle_event_after_last_job() {
        let manager = manager(1);
        let events = manager.subscribe();
        let job = Job::new(|_| Ok(()));
        let id = job.id();

        manager.append_jobs(JobCollection::new().with(job, 0));
        assert!(manager.wait_for_idle(Duration::from_secs(5)));

        let received: Vec<EngineEvent> = events.try_iter().collect();
        assert_eq!(
            received,
            vec![
                EngineEvent::Started(id),
                EngineEvent::Finished(id),
                EngineEvent::Idle
            ]
        );
    }

    #[test]
    fn test_failed_job_reports_message() {
        let manager = manager(1);
        let events = manager.subscribe();
        let job = Job::new(|_| Err(JobError::failed("bad input")));
        let id = job.id();

        manager.append_jobs(JobCollection::new().with(job.clone(), 0));
        assert!(manager.wait_for_idle(Duration::from_secs(5)));

        assert_eq!(job.error().as_deref(), Some("bad input"));
        assert!(events
            .try_iter()
            .any(|e| e == EngineEvent::Failed(id, "bad input".to_string())));
    }

    #[test]
    fn test_reappending_processed_job_is_ignored() {
        let manager = manager(1);
        let job = Job::new(|_| Ok(()));

        manager.append_jobs(JobCollection::new().with(job.clone(), 0));
        assert!(manager.wait_for_idle(Duration::from_secs(5)));

        manager.append_jobs(JobCollection::new().with(job.clone(), 0));
        assert!(!manager.is_running());
        assert_eq!(manager.snapshot().processed, vec![job.id()]);
    }

    #[test]
    fn test_appending_job_that_already_ran_is_ignored() {
        let manager = manager(1);
        let job = Job::new(|_| Ok(()));
        job.run();

        manager.append_jobs(JobCollection::new().with(job.clone(), 0));

        assert!(manager.wait_for_idle(Duration::from_secs(2)));
        assert!(!manager.is_running());
        let snapshot = manager.snapshot();
        assert!(snapshot.todo.is_empty());
        assert!(snapshot.pending.is_empty());
        assert!(snapshot.processed.is_empty());
    }

    #[test]
    fn test_appending_cancelled_job_is_ignored() {
        let manager = manager(1);
        let events = manager.subscribe();
        let job = Job::new(|_| Ok(()));
        job.cancel();

        manager.append_jobs(JobCollection::new().with(job.clone(), 0));

        assert!(!manager.is_running());
        assert!(manager.snapshot().processed.is_empty());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_cancel_moves_queued_jobs_to_processed() {
        let manager = manager(1);
        let (started_tx, started_rx) = bounded(0);
        let (release_tx, release_rx) = bounded::<()>(0);
        let blocker = Job::new(move |_| {
            started_tx.send(()).map_err(JobError::failed)?;
            release_rx.recv().map_err(JobError::failed)?;
            Ok(())
        });
        manager.append_jobs(JobCollection::new().with(blocker.clone(), 0));
        started_rx.recv().unwrap();

        // Cancel right away: some jobs may still sit in `todo`.
        let jobs: Vec<Job> = (0..5).map(|_| Job::new(|_| Ok(()))).collect();
        manager.append_jobs(jobs.iter().cloned().map(|j| (j, 0)).collect());
        manager.cancel();

        let mut expected: Vec<JobId> = jobs
            .iter()
            .map(Job::id)
            .chain([blocker.id()])
            .collect();
        expected.sort();
        let snapshot = manager.snapshot();
        assert!(snapshot.todo.is_empty());
        assert!(snapshot.pending.is_empty());
        assert_eq!(snapshot.processed, expected);
        assert!(jobs.iter().all(|job| job.state() == JobState::Cancelled));

        // A discarded job cannot be queued a second time.
        manager.append_jobs(JobCollection::new().with(jobs[0].clone(), 0));
        assert!(!manager.is_running());
        assert_eq!(manager.snapshot().processed, expected);

        release_tx.send(()).unwrap();
        assert!(manager.wait_for_workers(Duration::from_secs(5)));
    }

    #[test]
    fn test_cancel_discards_todo_and_flags_pending() {
        let manager = manager(1);
        let (started_tx, started_rx) = bounded(0);
        let (release_tx, release_rx) = bounded::<()>(0);

        let blocker = Job::new(move |_| {
            started_tx.send(()).map_err(JobError::failed)?;
            release_rx.recv().map_err(JobError::failed)?;
            Ok(())
        });
        manager.append_jobs(JobCollection::new().with(blocker.clone(), 0));
        started_rx.recv().unwrap();

        manager.cancel();
        assert!(blocker.is_cancelled());
        assert!(!manager.is_running());
        assert_eq!(manager.snapshot().processed, vec![blocker.id()]);

        release_tx.send(()).unwrap();
        assert!(manager.wait_for_workers(Duration::from_secs(5)));
        // Completion after cancel leaves the bookkeeping untouched.
        assert_eq!(manager.snapshot().processed, vec![blocker.id()]);
    }

    #[test]
    fn test_purge_processed() {
        let manager = manager(1);
        manager.append_jobs(
            JobCollection::new()
                .with(Job::new(|_| Ok(())), 0)
                .with(Job::new(|_| Ok(())), 1),
        );
        assert!(manager.wait_for_idle(Duration::from_secs(5)));

        assert_eq!(manager.purge_processed(), 2);
        assert!(manager.snapshot().processed.is_empty());
    }

    #[test]
    fn test_shared_pool_between_managers() {
        init_tracing();
        let pool = Arc::new(WorkerPool::new(&EngineConfig::new().with_max_workers(2)).unwrap());
        let first = ThreadPoolManager::with_pool(Arc::clone(&pool)).unwrap();
        let second = ThreadPoolManager::with_pool(Arc::clone(&pool)).unwrap();

        first.append_jobs(JobCollection::new().with(Job::new(|_| Ok(())), 0));
        second.append_jobs(JobCollection::new().with(Job::new(|_| Ok(())), 0));

        assert!(first.wait_for_idle(Duration::from_secs(5)));
        assert!(second.wait_for_idle(Duration::from_secs(5)));
        assert_eq!(first.max_workers(), 2);

        second.set_max_workers(3);
        assert_eq!(first.max_workers(), 3);
    }

    #[test]
    fn test_drop_with_queued_work_does_not_hang() {
        let manager = manager(1);
        let collection: JobCollection = (0..20)
            .map(|i| {
                (
                    Job::new(|ctx| {
                        thread::sleep(Duration::from_millis(1));
                        ctx.checkpoint()
                    }),
                    i,
                )
            })
            .collect();
        manager.append_jobs(collection);
        drop(manager);
    }
}
