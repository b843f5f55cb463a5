//! `training-core`: a data-parallel training execution core.
//!
//! An [`operator::Operator`] owns a global [`collaborators::Network`] replica and a pool
//! of [`worker`] threads, each driving its own replica against its own
//! [`collaborators::DataIterator`]. Workers periodically pull the global network, run a
//! training iteration through a [`collaborators::Trainer`], and push their replica back;
//! the operator reduces pushed replicas with a [`merger::NetworkMerger`] once every
//! worker has reported for an epoch.
//!
//! A dependency-aware hook system (C2/C7/C8: [`hook`], [`hook_table`], [`planner`]) lets
//! embedders observe and instrument training at well-defined points — per-iteration and
//! per-epoch, locally on a worker or globally on the operator — without the core knowing
//! anything about what a hook actually does. A [`registry::Registry`] is the only data
//! channel a hook sees.
//!
//! Collaborators ([`collaborators::ComputationHandler`], [`collaborators::Network`],
//! [`collaborators::Optimiser`], [`collaborators::DataIterator`],
//! [`collaborators::Trainer`]) are supplied by the embedder; this crate never constructs
//! tensors or runs a model itself. Enable the `testing` feature (or build under
//! `#[cfg(test)]`) to pull in `collaborators::mock`, a set of minimal collaborators
//! sufficient to exercise the whole core without a real backend.

pub mod collaborators;
pub mod config;
pub mod error;
pub mod hook;
pub mod hook_table;
pub mod merger;
pub mod operator;
pub mod planner;
pub mod registry;
pub mod time_step;
pub mod worker;

pub use collaborators::{ComputationHandler, DataBlock, DataIterator, DataType, Network, NdArrayHandle, Optimiser, Trainer};
pub use config::{OperatorConfig, WorkerThreadPriority};
pub use error::{PlannerError, RegistryError, TrainingError};
pub use hook::{Hook, HookAction, HookKey, HookTarget};
pub use merger::{MeanNetworkMerger, NetworkMerger};
pub use operator::Operator;
pub use registry::{Registry, RegistryResolver, Value};
pub use time_step::{TimeScale, TimeStep};
pub use worker::ExecutionState;
