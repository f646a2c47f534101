//! Rawqueue Core - cancelable job engine
//!
//! This crate provides the generic half of rawqueue: jobs with lifecycle
//! signals and cooperative cancellation, a bounded priority worker pool, and
//! the [`ThreadPoolManager`] that tracks jobs from submission to completion.
//!
//! # Example
//!
//! ```ignore
//! use rawqueue_core::{EngineConfig, Job, JobCollection, ThreadPoolManager};
//!
//! let manager = ThreadPoolManager::new(EngineConfig::new().with_max_workers(4))?;
//! let events = manager.subscribe();
//!
//! let job = Job::new(|ctx| {
//!     ctx.report_progress(50);
//!     ctx.checkpoint()?;
//!     Ok(())
//! });
//! manager.append_jobs(JobCollection::new().with(job, 0));
//!
//! for event in events.iter() {
//!     println!("{event:?}");
//! }
//! ```

pub mod cancel;
pub mod collection;
pub mod config;
pub mod error;
pub mod events;
pub mod job;
pub mod manager;
pub mod pool;

#[cfg(test)]
pub(crate) mod test_utils;

pub use cancel::CancellationToken;
pub use collection::JobCollection;
pub use config::{detected_parallelism, EngineConfig};
pub use error::{EngineError, JobError};
pub use events::{EngineEvent, EventBus};
pub use job::{Job, JobContext, JobId, JobOutcome, JobPriority, JobSignal, JobState};
pub use manager::{ManagerSnapshot, ThreadPoolManager};
pub use pool::{Task, WorkerPool};
