use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{ExperimentStore, NamespacedName, Result, Secret, StoreError};
use crate::experiment::Experiment;

/// Object store backed by a directory tree.
///
/// Layout:
/// ```text
/// <root>/<namespace>/<name>.yaml          experiments
/// <root>/<namespace>/secrets/<name>.yaml  secrets
/// ```
#[derive(Debug, Clone)]
pub struct FileSystemStore {
    root: PathBuf,
}

impl FileSystemStore {
    /// Creates a store rooted at `root`. The directory need not exist yet.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of an experiment file.
    pub fn experiment_path(&self, name: &NamespacedName) -> PathBuf {
        self.root.join(&name.namespace).join(format!("{}.yaml", name.name))
    }

    /// Path of a secret file.
    pub fn secret_path(&self, name: &NamespacedName) -> PathBuf {
        self.root.join(&name.namespace).join("secrets").join(format!("{}.yaml", name.name))
    }

    async fn read(path: &Path, what: &str) -> Result<String> {
        debug!(path = %path.display(), "Reading {what}");
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => Ok(contents),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(StoreError::NotFound(format!("{what} at {}", path.display())))
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl ExperimentStore for FileSystemStore {
    async fn get_experiment(&self, name: &NamespacedName) -> Result<Experiment> {
        let contents = Self::read(&self.experiment_path(name), "experiment").await?;
        Ok(serde_yaml::from_str(&contents)?)
    }

    async fn update_experiment(&self, experiment: &Experiment) -> Result<()> {
        let path = self.experiment_path(&experiment.namespaced_name());
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let contents = serde_yaml::to_string(experiment)?;

        // Write to a sibling, then rename over the experiment.
        let temp_path = path.with_extension("yaml.tmp");
        tokio::fs::write(&temp_path, contents).await?;
        tokio::fs::rename(&temp_path, &path).await?;
        debug!(path = %path.display(), "Wrote experiment");
        Ok(())
    }

    async fn get_secret(&self, name: &NamespacedName) -> Result<Secret> {
        let contents = Self::read(&self.secret_path(name), "secret").await?;
        Ok(serde_yaml::from_str(&contents)?)
    }
}
