//! Task abstraction.
//!
//! A [`TaskDescriptor`] is the declarative form of a task as it appears in an
//! experiment's action map. A [`TaskLibrary`](crate::registry::TaskLibrary)
//! turns it into a [`Task`], decoding the generic `with` document into the
//! task's typed inputs.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::config::HandlerConfig;
use crate::experiment::{Experiment, ExperimentError};
use crate::interpolation::InterpolationError;
use crate::registry::RegistryError;
use crate::store::{ExperimentStore, InMemoryStore, StoreError};

/// Declarative description of one task.
///
/// Both `{library: common, task: bash}` and the compact `{task: common/bash}`
/// spellings are accepted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Library providing the task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library: Option<String>,
    /// Task name, optionally prefixed with `<library>/`.
    pub task: String,
    /// Boolean expression gating the task.
    #[serde(default, alias = "if", skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Task inputs.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub with: Map<String, Value>,
}

impl TaskDescriptor {
    /// Creates a descriptor for `library/task` with no inputs.
    pub fn new(library: impl Into<String>, task: impl Into<String>) -> Self {
        Self { library: Some(library.into()), task: task.into(), condition: None, with: Map::new() }
    }

    /// Adds an input.
    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with.insert(key.into(), value.into());
        self
    }

    /// Sets the gating condition.
    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// Library name, from the `library` field or the `task` prefix.
    pub fn library_name(&self) -> Result<&str, RegistryError> {
        if let Some(library) = self.library.as_deref().filter(|l| !l.is_empty()) {
            return Ok(library);
        }
        match self.task.split_once('/') {
            Some((library, _)) if !library.is_empty() => Ok(library),
            _ => Err(RegistryError::NoLibrary(self.task.clone())),
        }
    }

    /// Task name without the library prefix.
    pub fn task_name(&self) -> &str {
        self.task.split_once('/').map_or(self.task.as_str(), |(_, task)| task)
    }

    /// Fully qualified `<library>/<task>` name.
    pub fn qualified_name(&self) -> String {
        if self.task.contains('/') {
            return self.task.clone();
        }
        match self.library.as_deref() {
            Some(library) if !library.is_empty() => format!("{library}/{}", self.task),
            _ => self.task.clone(),
        }
    }

    /// Decodes the `with` document into typed inputs and validates them.
    pub fn decode<T: TaskInputs>(&self) -> Result<T, RegistryError> {
        let document = Value::Object(self.with.clone());
        let inputs: T = serde_json::from_value(document).map_err(|source| {
            RegistryError::InvalidInputs { task: self.qualified_name(), source }
        })?;
        inputs
            .validate()
            .map_err(|reason| RegistryError::Validation { task: self.qualified_name(), reason })?;
        Ok(inputs)
    }
}

/// Typed task inputs.
pub trait TaskInputs: DeserializeOwned {
    /// Checks constraints serde cannot express.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Identity shared by every constructed task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskMeta {
    pub library: String,
    pub task: String,
    pub condition: Option<String>,
}

impl TaskMeta {
    /// Creates task metadata.
    pub fn new(library: impl Into<String>, task: impl Into<String>) -> Self {
        Self { library: library.into(), task: task.into(), condition: None }
    }

    /// Extracts the identity of a descriptor.
    pub fn from_descriptor(descriptor: &TaskDescriptor) -> Result<Self, RegistryError> {
        Ok(Self {
            library: descriptor.library_name()?.to_string(),
            task: descriptor.task_name().to_string(),
            condition: descriptor.condition.clone(),
        })
    }

    /// Fully qualified name.
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.library, self.task)
    }
}

/// Errors raised while a task runs.
#[derive(Error, Debug)]
pub enum TaskError {
    /// Input interpolation failed.
    #[error(transparent)]
    Interpolation(#[from] InterpolationError),

    /// An external command exited unsuccessfully.
    #[error("command `{command}` failed: {reason}")]
    CommandFailed { command: String, reason: String },

    /// An HTTP request failed or returned an error status.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// A secret is missing the expected value.
    #[error("secret {secret} has no usable '{key}' value")]
    MissingSecretValue { secret: String, key: String },

    /// Experiment lookup failed.
    #[error(transparent)]
    Experiment(#[from] ExperimentError),

    /// Object store access failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Waiting for a condition took too long.
    #[error("timed out: {0}")]
    Timeout(String),
}

/// Result type for task execution.
pub type Result<T, E = TaskError> = std::result::Result<T, E>;

/// Shared, read-only state handed to every task.
#[derive(Debug, Clone)]
pub struct RunContext {
    config: Arc<HandlerConfig>,
    store: Arc<dyn ExperimentStore>,
}

impl RunContext {
    /// Creates a run context.
    pub fn new(config: HandlerConfig, store: Arc<dyn ExperimentStore>) -> Self {
        Self { config: Arc::new(config), store }
    }

    /// Handler configuration.
    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    /// Object store.
    pub fn store(&self) -> &dyn ExperimentStore {
        self.store.as_ref()
    }

    /// Namespace tasks fall back to, from the configuration or `default`.
    pub fn default_namespace(&self) -> &str {
        self.config.experiment_namespace.as_deref().unwrap_or(crate::store::DEFAULT_NAMESPACE)
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new(HandlerConfig::default(), Arc::new(InMemoryStore::new()))
    }
}

/// An executable task.
#[async_trait]
pub trait Task: Send + Sync + fmt::Debug {
    /// Identity of the task.
    fn meta(&self) -> &TaskMeta;

    /// Fully qualified `<library>/<task>` name.
    fn name(&self) -> String {
        self.meta().qualified_name()
    }

    /// Boolean expression gating the task.
    fn condition(&self) -> Option<&str> {
        self.meta().condition.as_deref()
    }

    /// One-line summary used by dry runs.
    fn describe(&self) -> String {
        match self.condition() {
            Some(condition) => format!("{} (if {condition})", self.name()),
            None => self.name(),
        }
    }

    /// Runs the task against an experiment snapshot.
    async fn run(&self, experiment: &Experiment, context: &RunContext) -> Result<()>;

    /// Downcasting support, mostly for tests.
    fn as_any(&self) -> &dyn Any;
}
