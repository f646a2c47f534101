//! Cancelable unit of work with lifecycle signals.
//!
//! A [`Job`] wraps a one-shot body closure together with a cancellation
//! token, a state, and an error slot. Interested parties observe the job by
//! registering listeners with [`Job::connect`]; the job then emits, in order:
//!
//! - [`JobSignal::Started`] once, when the body is entered
//! - [`JobSignal::Progress`] zero or more times, as the body reports it
//! - [`JobSignal::Done`] exactly once, when the body exits for any reason
//!
//! A job whose token is cancelled before it runs skips its body entirely: it
//! emits `Done(Cancelled)` without `Started`.
//!
//! Nothing escapes the body: errors become the job's error message and
//! panics are caught and reported as failures.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::cancel::CancellationToken;
use crate::error::JobError;

/// Scheduling priority. Lower values run first; `0` is the conventional
/// highest priority.
pub type JobPriority = i32;

/// Process-unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(u64);

impl JobId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        JobId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value of the id.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobState {
    /// Constructed or queued, body not entered yet.
    #[default]
    Idle,
    /// Body is executing on a worker.
    Running,
    /// Cancelled before its body was entered, or finished because the body
    /// observed cancellation.
    Cancelled,
    /// Body returned, successfully or with an error.
    Done,
}

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed(String),
    Cancelled,
}

impl JobOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, JobOutcome::Cancelled)
    }
}

/// Signal emitted by a job to its listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSignal {
    Started,
    /// Percent complete, 0..=100.
    Progress(u8),
    Done(JobOutcome),
}

type JobBody = Box<dyn FnOnce(&JobContext<'_>) -> Result<(), JobError> + Send>;
type Listener = Arc<dyn Fn(JobId, &JobSignal) + Send + Sync>;

struct JobInner {
    id: JobId,
    token: CancellationToken,
    state: Mutex<JobState>,
    error: Mutex<Option<String>>,
    body: Mutex<Option<JobBody>>,
    listeners: Mutex<Vec<Listener>>,
}

/// Handle to a cancelable job.
///
/// Cloning the handle does not clone the job; all clones refer to the same
/// state. Equality and hashing use the job id.
#[derive(Clone)]
pub struct Job {
    inner: Arc<JobInner>,
}

impl Job {
    /// Create a job around `body`.
    ///
    /// The body receives a [`JobContext`] for progress reporting and
    /// cancellation checks. It should return `Err(JobError::Cancelled)` when
    /// it stops because of cancellation and `Err(JobError::Failed(..))` on
    /// failure.
    pub fn new<F>(body: F) -> Self
    where
        F: FnOnce(&JobContext<'_>) -> Result<(), JobError> + Send + 'static,
    {
        Self {
            inner: Arc::new(JobInner {
                id: JobId::next(),
                token: CancellationToken::new(),
                state: Mutex::new(JobState::Idle),
                error: Mutex::new(None),
                body: Mutex::new(Some(Box::new(body))),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> JobId {
        self.inner.id
    }

    pub fn state(&self) -> JobState {
        *self.inner.state.lock()
    }

    /// Error message recorded by a failed body. `None` means no failure.
    pub fn error(&self) -> Option<String> {
        self.inner.error.lock().clone()
    }

    /// The job's cancellation token.
    pub fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Request cooperative cancellation.
    ///
    /// Safe from any thread and at any time. A job that has not started
    /// moves to [`JobState::Cancelled`] at once; after the job is done this
    /// has no observable effect.
    pub fn cancel(&self) {
        self.inner.token.cancel();
        let mut state = self.inner.state.lock();
        if *state == JobState::Idle {
            *state = JobState::Cancelled;
        }
    }

    /// Register a listener for this job's signals.
    ///
    /// Listeners run on the thread that emits the signal (usually a worker)
    /// and must not block for long. They are released after `Done`.
    pub fn connect<F>(&self, listener: F)
    where
        F: Fn(JobId, &JobSignal) + Send + Sync + 'static,
    {
        self.inner.listeners.lock().push(Arc::new(listener));
    }

    /// Execute the body on the calling thread.
    ///
    /// The body runs at most once; later calls return immediately.
    pub fn run(&self) {
        let Some(body) = self.inner.body.lock().take() else {
            warn!(job_id = %self.id(), "Job already ran, ignoring run request");
            return;
        };

        if self.is_cancelled() {
            debug!(job_id = %self.id(), "Job cancelled before start, skipping body");
            *self.inner.state.lock() = JobState::Cancelled;
            self.emit(&JobSignal::Done(JobOutcome::Cancelled));
            self.inner.listeners.lock().clear();
            return;
        }

        *self.inner.state.lock() = JobState::Running;
        self.emit(&JobSignal::Started);

        let ctx = JobContext { job: self };
        let result = panic::catch_unwind(AssertUnwindSafe(|| body(&ctx)));

        let outcome = match result {
            Ok(Ok(())) => JobOutcome::Succeeded,
            Ok(Err(JobError::Cancelled)) => JobOutcome::Cancelled,
            Ok(Err(JobError::Failed(message))) => JobOutcome::Failed(message),
            Err(payload) => {
                let message = format!("Job panicked: {}", panic_message(payload.as_ref()));
                error!(job_id = %self.id(), %message, "Job body panicked");
                JobOutcome::Failed(message)
            }
        };

        if let JobOutcome::Failed(message) = &outcome {
            *self.inner.error.lock() = Some(message.clone());
        }
        *self.inner.state.lock() = if outcome.is_cancelled() {
            JobState::Cancelled
        } else {
            JobState::Done
        };

        debug!(job_id = %self.id(), ?outcome, "Job finished");
        self.emit(&JobSignal::Done(outcome));
        self.inner.listeners.lock().clear();
    }

    fn emit(&self, signal: &JobSignal) {
        // Snapshot so listeners may call back into the job without deadlocking.
        let listeners: Vec<Listener> = self.inner.listeners.lock().clone();
        for listener in listeners {
            listener(self.id(), signal);
        }
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Job {}

impl Hash for Job {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// View of the running job handed to its body.
pub struct JobContext<'a> {
    job: &'a Job,
}

impl JobContext<'_> {
    pub fn job_id(&self) -> JobId {
        self.job.id()
    }

    /// Whether cancellation has been requested. Bodies poll this at their
    /// checkpoints.
    pub fn is_cancelled(&self) -> bool {
        self.job.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        self.job.token()
    }

    /// Return `Err(JobError::Cancelled)` if cancellation was requested.
    pub fn checkpoint(&self) -> Result<(), JobError> {
        if self.is_cancelled() {
            Err(JobError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Emit a progress signal. Values above 100 are clamped.
    pub fn report_progress(&self, percent: u8) {
        self.job.emit(&JobSignal::Progress(percent.min(100)));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
