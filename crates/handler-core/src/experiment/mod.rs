//! Experiment model and resolution.
//!
//! An [`Experiment`] is loaded through an [`ExperimentBuilder`], either from a
//! local file or from an [`ExperimentStore`](crate::store::ExperimentStore).
//! The lookups here are what actions and tasks use to find their inputs:
//! the action list for a name, the recommended versions, and per-version
//! variables.

mod builder;
mod error;
mod types;

pub use builder::ExperimentBuilder;
pub use error::{ExperimentError, Result};
pub use types::*;

use serde_json::Value;

use crate::store::NamespacedName;
use crate::task::TaskDescriptor;

impl Experiment {
    /// Namespaced name of the experiment.
    pub fn namespaced_name(&self) -> NamespacedName {
        NamespacedName::new(self.namespace(), &self.metadata.name)
    }

    /// Namespace of the experiment, `default` when unset.
    pub fn namespace(&self) -> &str {
        if self.metadata.namespace.is_empty() { "default" } else { &self.metadata.namespace }
    }

    /// The experiment as a JSON document.
    ///
    /// This is the value bound to `this` in templates and the environment
    /// conditions are evaluated against.
    pub fn to_document(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Name of the recommended baseline version.
    pub fn recommended_baseline(&self) -> Result<&str> {
        self.status.recommended_baseline.as_deref().ok_or(ExperimentError::NoRecommendedBaseline)
    }

    /// Name of the version recommended for promotion.
    pub fn version_recommended_for_promotion(&self) -> Result<&str> {
        self.status
            .version_recommended_for_promotion
            .as_deref()
            .ok_or(ExperimentError::NoVersionRecommendedForPromotion)
    }

    /// Finds a version by name, looking at the baseline before the candidates.
    pub fn version_detail(&self, name: &str) -> Result<&VersionDetail> {
        let info = self.spec.version_info.as_ref().ok_or(ExperimentError::NoVersionInfo)?;
        info.find(name).ok_or_else(|| ExperimentError::VersionNotFound(name.to_string()))
    }

    /// Finds a version by name for modification.
    pub fn version_detail_mut(&mut self, name: &str) -> Result<&mut VersionDetail> {
        let info = self.spec.version_info.as_mut().ok_or(ExperimentError::NoVersionInfo)?;
        info.find_mut(name).ok_or_else(|| ExperimentError::VersionNotFound(name.to_string()))
    }

    /// The declarative task list of the named action.
    ///
    /// Every error returned here is [recoverable](ExperimentError::is_recoverable).
    pub fn action_spec(&self, name: &str) -> Result<&[TaskDescriptor]> {
        let handlers = self.spec.strategy.handlers.as_ref().ok_or(ExperimentError::NoHandlers)?;
        let actions = handlers.actions.as_ref().ok_or(ExperimentError::NoActions)?;
        actions
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| ExperimentError::ActionNotFound(name.to_string()))
    }

    /// Names of all declared actions, in sorted order.
    pub fn action_names(&self) -> Vec<&str> {
        self.spec
            .strategy
            .handlers
            .as_ref()
            .and_then(|h| h.actions.as_ref())
            .map(|actions| actions.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Action name bound to a lifecycle phase.
    pub fn handler_for(&self, phase: HandlerPhase) -> Option<&str> {
        self.spec.strategy.handlers.as_ref()?.for_phase(phase)
    }
}

/// Unwraps an optional experiment, failing with [`ExperimentError::Missing`].
pub fn require(experiment: Option<&Experiment>) -> Result<&Experiment> {
    experiment.ok_or(ExperimentError::Missing)
}

/// Recommended baseline of an optional experiment.
pub fn recommended_baseline(experiment: Option<&Experiment>) -> Result<&str> {
    require(experiment)?.recommended_baseline()
}

/// Version recommended for promotion of an optional experiment.
pub fn version_recommended_for_promotion(experiment: Option<&Experiment>) -> Result<&str> {
    require(experiment)?.version_recommended_for_promotion()
}

/// Version detail of an optional experiment.
pub fn version_detail<'a>(
    experiment: Option<&'a Experiment>,
    name: &str,
) -> Result<&'a VersionDetail> {
    require(experiment)?.version_detail(name)
}

/// Action spec of an optional experiment.
pub fn action_spec<'a>(
    experiment: Option<&'a Experiment>,
    name: &str,
) -> Result<&'a [TaskDescriptor]> {
    require(experiment)?.action_spec(name)
}
