use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

use super::{ExperimentStore, NamespacedName, Result, Secret, StoreError};
use crate::experiment::Experiment;

/// In-memory object store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    experiments: RwLock<HashMap<NamespacedName, Experiment>>,
    secrets: RwLock<HashMap<NamespacedName, Secret>>,
    experiment_reads: AtomicUsize,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an experiment under its own namespaced name.
    pub async fn insert_experiment(&self, experiment: Experiment) {
        let key = experiment.namespaced_name();
        self.experiments.write().await.insert(key, experiment);
    }

    /// Stores a secret.
    pub async fn insert_secret(&self, name: NamespacedName, secret: Secret) {
        self.secrets.write().await.insert(name, secret);
    }

    /// Number of `get_experiment` calls served so far.
    pub fn experiment_reads(&self) -> usize {
        self.experiment_reads.load(Ordering::SeqCst)
    }

    /// Makes every call fail with [`StoreError::Unavailable`] while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store switched off".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ExperimentStore for InMemoryStore {
    async fn get_experiment(&self, name: &NamespacedName) -> Result<Experiment> {
        self.experiment_reads.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        self.experiments
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("experiment {name}")))
    }

    async fn update_experiment(&self, experiment: &Experiment) -> Result<()> {
        self.check_available()?;
        let key = experiment.namespaced_name();
        let mut experiments = self.experiments.write().await;
        match experiments.get_mut(&key) {
            Some(stored) => {
                *stored = experiment.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("experiment {key}"))),
        }
    }

    async fn get_secret(&self, name: &NamespacedName) -> Result<Secret> {
        self.check_available()?;
        self.secrets
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("secret {name}")))
    }
}
