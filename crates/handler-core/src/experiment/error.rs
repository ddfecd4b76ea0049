//! Error types for experiment resolution.

use std::path::PathBuf;
use thiserror::Error;

use crate::store::StoreError;

/// Errors that can occur while resolving or inspecting an experiment.
#[derive(Error, Debug)]
pub enum ExperimentError {
    /// No experiment was supplied.
    #[error("no experiment found")]
    Missing,

    /// The builder was asked for an experiment before any source was read.
    #[error("experiment builder has no source")]
    NoSource,

    /// Experiment file could not be read.
    #[error("cannot read experiment file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Experiment document could not be parsed.
    #[error("cannot parse experiment: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Experiment could not be fetched from the store.
    #[error("cannot get experiment {name} after {attempts} attempt(s): {source}")]
    Fetch {
        name: String,
        attempts: u32,
        #[source]
        source: StoreError,
    },

    /// Experiment could not be converted into a JSON document.
    #[error("cannot convert experiment into a document: {0}")]
    Document(#[from] serde_json::Error),

    /// `status.recommendedBaseline` is not set.
    #[error("recommended baseline not found in experiment status")]
    NoRecommendedBaseline,

    /// `status.versionRecommendedForPromotion` is not set.
    #[error("version recommended for promotion not found in experiment status")]
    NoVersionRecommendedForPromotion,

    /// The experiment has no `versionInfo` stanza.
    #[error("experiment does not have version info")]
    NoVersionInfo,

    /// No version carries the requested name.
    #[error("no version found with name {0}")]
    VersionNotFound(String),

    /// The experiment has no handlers stanza.
    #[error("experiment does not have a handlers stanza")]
    NoHandlers,

    /// The handlers stanza has no action map.
    #[error("experiment does not have an action map")]
    NoActions,

    /// The action map has no entry with the requested name.
    #[error("action with name {0} not found")]
    ActionNotFound(String),
}

impl ExperimentError {
    /// Whether a caller looking up an action can treat this as "nothing to do".
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NoHandlers | Self::NoActions | Self::ActionNotFound(_))
    }
}

/// Result type for experiment operations.
pub type Result<T> = std::result::Result<T, ExperimentError>;
