//! # Task execution wrapper.
//!
//! - [`ComputeTask`] async cancelable computation (and [`TaskFn`] for closures)
//! - [`PluginRegistry`] configuration key to task factory
//! - [`WorkerConfiguration`] what the control plane asks the cluster to run
//! - [`Dependencies`] named singletons scoped to one computation
//! - [`ComputationContext`] builds, runs, pauses, cancels and cleans one task

mod compute;
mod configuration;
mod context;
pub mod dependencies;
mod plugin;
mod task_fn;

pub use compute::{ComputeTask, PauseGate, Pauseable, TaskRef};
pub use configuration::{TASK_KEY, WorkerConfiguration};
pub use context::{ComputationContext, TaskOutcome};
pub use dependencies::Dependencies;
pub use plugin::{PluginRegistry, TaskFactory, TaskSetup};
pub use task_fn::TaskFn;
