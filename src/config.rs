//! C9 (ambient): [`OperatorConfig`] — validated construction-time configuration for an
//! [`crate::operator::Operator`].

use crate::error::TrainingError;

/// OS scheduling hint for a worker thread. Not every platform honours every priority;
/// [`crate::worker::Worker`] best-efforts this via the platform thread builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerThreadPriority {
    Low,
    Normal,
    High,
}

impl Default for WorkerThreadPriority {
    fn default() -> Self {
        Self::Normal
    }
}

/// Construction-time configuration for an `Operator`.
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    pub worker_count: usize,
    /// Whether each iteration is bracketed by `handler.begin_session()/end_session()`
    /// Behaviour must be identical either way; only memory/perf changes.
    pub use_sessions: bool,
    /// Resolver glob pattern the default [`crate::merger::NetworkMerger`] reduces over.
    pub merger_pattern: String,
    /// Number of background-pool threads servicing background-bucket hook dispatch.
    pub background_pool_size: usize,
    pub worker_thread_priority: WorkerThreadPriority,
}

impl OperatorConfig {
    pub fn new(worker_count: usize) -> Self {
        Self {
            worker_count,
            use_sessions: false,
            merger_pattern: "layers.*.*".to_string(),
            background_pool_size: 1,
            worker_thread_priority: WorkerThreadPriority::default(),
        }
    }

    pub fn use_sessions(mut self, use_sessions: bool) -> Self {
        self.use_sessions = use_sessions;
        self
    }

    pub fn merger_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.merger_pattern = pattern.into();
        self
    }

    pub fn background_pool_size(mut self, size: usize) -> Self {
        self.background_pool_size = size;
        self
    }

    pub fn worker_thread_priority(mut self, priority: WorkerThreadPriority) -> Self {
        self.worker_thread_priority = priority;
        self
    }

    /// Validates that this configuration is usable.
    pub fn validate(&self) -> Result<(), TrainingError> {
        if self.worker_count == 0 {
            return Err(TrainingError::InvalidConfiguration(
                "worker_count must be >= 1".to_string(),
            ));
        }
        if self.background_pool_size == 0 {
            return Err(TrainingError::InvalidConfiguration(
                "background_pool_size must be >= 1".to_string(),
            ));
        }
        if self.merger_pattern.is_empty() {
            return Err(TrainingError::InvalidConfiguration(
                "merger_pattern must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
