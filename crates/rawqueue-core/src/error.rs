//! Error types for the job engine.

use thiserror::Error;

/// Errors raised while building the engine itself.
///
/// Ordinary manager operations (appending, cancelling) never fail; only
/// acquiring operating-system threads can.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A worker or control thread could not be spawned.
    #[error("Failed to spawn thread {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Terminal error reported by a job body.
///
/// Cancellation is kept apart from failure: a cancelled job records no
/// error message and is never reported as failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// The body observed its cancellation token and stopped early.
    #[error("Job cancelled")]
    Cancelled,

    /// The body failed; the message is stored on the job.
    #[error("{0}")]
    Failed(String),
}

impl JobError {
    /// Convenience constructor for a failure from anything displayable.
    pub fn failed(message: impl std::fmt::Display) -> Self {
        JobError::Failed(message.to_string())
    }
}
