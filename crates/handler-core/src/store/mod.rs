//! Object store access.
//!
//! The handler reads experiments and secrets from, and writes experiments
//! back to, an [`ExperimentStore`]. Two implementations ship with the crate:
//! [`InMemoryStore`] and [`FileSystemStore`].

mod filesystem;
mod memory;
mod secret;

pub use filesystem::FileSystemStore;
pub use memory::InMemoryStore;
pub use secret::Secret;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::experiment::Experiment;

/// Namespace used when none is given.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Errors that can occur when talking to an object store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The object does not exist (yet).
    #[error("object not found: {0}")]
    NotFound(String),

    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The stored object could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A name could not be parsed.
    #[error("invalid object name: {0}")]
    InvalidName(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether waiting and asking again may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Unavailable(_))
    }
}

impl From<serde_yaml::Error> for StoreError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Namespace and name of a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    /// Creates a namespaced name.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }

    /// Parses `namespace/name`, or a bare `name` placed in `default_namespace`.
    pub fn parse(value: &str, default_namespace: &str) -> Result<Self> {
        let invalid = || StoreError::InvalidName(value.to_string());
        match value.split_once('/') {
            Some((namespace, name)) => {
                if namespace.is_empty() || name.is_empty() || name.contains('/') {
                    return Err(invalid());
                }
                Ok(Self::new(namespace, name))
            }
            None if value.is_empty() => Err(invalid()),
            None => Ok(Self::new(default_namespace, value)),
        }
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Read/write access to experiments and read access to secrets.
#[async_trait]
pub trait ExperimentStore: Send + Sync + fmt::Debug {
    /// Fetches an experiment.
    async fn get_experiment(&self, name: &NamespacedName) -> Result<Experiment>;

    /// Replaces the stored copy of an experiment.
    async fn update_experiment(&self, experiment: &Experiment) -> Result<()>;

    /// Fetches a secret.
    async fn get_secret(&self, name: &NamespacedName) -> Result<Secret>;
}
