//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Default prefix for worker thread names.
pub const DEFAULT_THREAD_PREFIX: &str = "rawqueue-worker";

/// Configuration for the worker pool and manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of jobs executing at once.
    /// `None` uses the host's detected parallelism.
    pub max_workers: Option<usize>,
    /// Worker threads are named `{prefix}-{index}`.
    pub thread_name_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: None,
            thread_name_prefix: DEFAULT_THREAD_PREFIX.to_string(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the worker ceiling.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = Some(max_workers);
        self
    }

    /// Set the thread name prefix.
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Worker ceiling after applying the default. Always at least 1.
    pub fn resolved_max_workers(&self) -> usize {
        self.max_workers.unwrap_or_else(detected_parallelism).max(1)
    }
}

/// Number of hardware threads, falling back to 1 when it cannot be queried.
pub fn detected_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
