//! Core of the experiment action handler.
//!
//! When an experiment starts or finishes, the handler runs one of the
//! experiment's named actions: an ordered list of tasks declared in
//! `spec.strategy.handlers.actions`. This crate provides everything those
//! tasks share:
//!
//! - [`experiment`]: the experiment model and how it is resolved
//! - [`registry`]: turns declarative task descriptors into tasks
//! - [`action`]: runs tasks in order, gated by [`condition`]s
//! - [`interpolation`]: exposes experiment state to task inputs
//! - [`store`]: where experiments and secrets live
//!
//! Task libraries themselves live in `handler-tasks`.

pub mod action;
pub mod condition;
pub mod config;
pub mod experiment;
pub mod interpolation;
pub mod registry;
pub mod retry;
pub mod store;
pub mod task;
pub mod wait;

pub use action::{Action, ActionError};
pub use condition::{Condition, ConditionError};
pub use config::HandlerConfig;
pub use experiment::{Experiment, ExperimentBuilder, ExperimentError};
pub use interpolation::{InterpolationError, Tags};
pub use registry::{RegistryError, TaskLibrary, TaskRegistry};
pub use retry::RetryPolicy;
pub use store::{
    ExperimentStore, FileSystemStore, InMemoryStore, NamespacedName, Secret, StoreError,
};
pub use task::{RunContext, Task, TaskDescriptor, TaskError, TaskInputs, TaskMeta};
