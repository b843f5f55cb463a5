//! Error taxonomy for the training execution core.

use crate::hook::HookKey;

/// Errors surfaced synchronously from the calling control path.
#[derive(Debug, thiserror::Error)]
pub enum TrainingError {
    /// A control method was called in a state that does not admit it.
    #[error("invalid lifecycle transition: {action} while in state {state:?}")]
    InvalidLifecycleTransition {
        action: &'static str,
        state: crate::worker::ExecutionState,
    },

    /// Bad construction-time configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Detaching a hook with remaining dependents, or a required-hook cycle.
    #[error("dependency violation: {0}")]
    DependencyViolation(String),

    /// The data iterator produced no yield at worker start.
    #[error("worker {worker_index} failed to initialise: {reason}")]
    WorkerInitialisationFailure { worker_index: usize, reason: String },

    /// A worker attempted to push more replicas than `worker_count`.
    #[error("merger protocol breach: epoch {epoch} received a push beyond worker_count ({worker_count})")]
    MergerMismatch { epoch: u64, worker_count: usize },

    /// Propagated from the tensor/computation backend.
    #[error("backend error: {0}")]
    BackendError(String),

    /// A hook panicked during `invoke`.
    #[error("hook {key:?} panicked: {message}")]
    HookPanicked { key: HookKey, message: String },

    #[error(transparent)]
    Planner(#[from] PlannerError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Errors raised while (re)building the hook invocation plan.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PlannerError {
    #[error("required-hook cycle detected involving {0:?}")]
    Cycle(HookKey),

    #[error("hook {dependent:?} requires unknown hook {required:?}")]
    UnknownRequiredHook {
        dependent: HookKey,
        required: HookKey,
    },
}

/// Errors raised while resolving or reading a [`crate::registry::Registry`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no value found for key {0:?}")]
    MissingKey(String),

    #[error("value at key {0:?} was not of the requested type")]
    TypeMismatch(String),

    #[error("malformed resolver pattern {0:?}")]
    MalformedPattern(String),
}
