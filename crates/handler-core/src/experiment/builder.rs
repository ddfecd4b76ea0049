use std::path::Path;
use tracing::{debug, error, info};

use super::{Experiment, ExperimentError, Result};
use crate::retry::{RetryPolicy, retry};
use crate::store::{ExperimentStore, NamespacedName, StoreError};

/// Builds an [`Experiment`] from a file or an object store.
///
/// The first error is sticky: once a step fails, later steps are skipped
/// and [`build`](Self::build) returns that error.
#[derive(Debug, Default)]
pub struct ExperimentBuilder {
    experiment: Option<Experiment>,
    error: Option<ExperimentError>,
}

impl ExperimentBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the experiment from a YAML or JSON file.
    pub fn from_file(mut self, path: impl AsRef<Path>) -> Self {
        if self.error.is_some() {
            return self;
        }
        let path = path.as_ref();
        match read_file(path) {
            Ok(experiment) => {
                debug!(path = %path.display(), name = %experiment.metadata.name, "Read experiment");
                self.experiment = Some(experiment);
            }
            Err(err) => {
                error!(path = %path.display(), error = %err, "Unable to read experiment");
                self.error = Some(err);
            }
        }
        self
    }

    /// Fetches the experiment from a store.
    ///
    /// Not-found and unavailable responses are retried according to `policy`;
    /// any other store error fails immediately.
    pub async fn from_cluster(
        mut self,
        name: &NamespacedName,
        store: &dyn ExperimentStore,
        policy: &RetryPolicy,
    ) -> Self {
        if self.error.is_some() {
            return self;
        }
        info!(experiment = %name, num_attempts = policy.num_attempts, "Fetching experiment");
        let fetched =
            retry(policy, move |_| store.get_experiment(name), StoreError::is_transient).await;
        match fetched {
            Ok(experiment) => self.experiment = Some(experiment),
            Err(exhausted) => {
                error!(
                    experiment = %name,
                    attempts = exhausted.attempts,
                    error = %exhausted.source,
                    "Unable to get experiment"
                );
                self.error = Some(ExperimentError::Fetch {
                    name: name.to_string(),
                    attempts: exhausted.attempts,
                    source: exhausted.source,
                });
            }
        }
        self
    }

    /// Returns the experiment or the first recorded error.
    pub fn build(self) -> Result<Experiment> {
        match self.error {
            Some(err) => Err(err),
            None => self.experiment.ok_or(ExperimentError::NoSource),
        }
    }
}

fn read_file(path: &Path) -> Result<Experiment> {
    let contents = std::fs::read_to_string(path)
        .map_err(|source| ExperimentError::Read { path: path.to_path_buf(), source })?;
    Ok(serde_yaml::from_str(&contents)?)
}
