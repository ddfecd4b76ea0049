//! Handler configuration.
//!
//! Values are layered: built-in defaults, then an optional YAML/JSON/TOML
//! file, then the environment. Only the documented variables are read
//! (`EXPERIMENT_NAME`, `EXPERIMENT_NAMESPACE`, `LOG_LEVEL`, `STORE_DIR`,
//! `RETRY_NUM_ATTEMPTS`, `RETRY_PERIOD_MS`); each can also be given with a
//! `HANDLER_` prefix, which wins over the bare name.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::retry::{DEFAULT_NUM_ATTEMPTS, DEFAULT_PERIOD, RetryPolicy};
use crate::store::NamespacedName;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = ".handler.yaml";

/// Prefix of handler-scoped environment variables.
pub const ENV_PREFIX: &str = "HANDLER";

const ENV_KEYS: [&str; 6] = [
    "EXPERIMENT_NAME",
    "EXPERIMENT_NAMESPACE",
    "LOG_LEVEL",
    "STORE_DIR",
    "RETRY_NUM_ATTEMPTS",
    "RETRY_PERIOD_MS",
];

/// Errors that can occur while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A configuration source could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// The experiment name or namespace is missing.
    #[error("invalid experiment name/namespace: {0}")]
    MissingExperiment(String),
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Handler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerConfig {
    /// Name of the experiment to act on.
    #[serde(default)]
    pub experiment_name: Option<String>,
    /// Namespace of the experiment; also the default namespace for tasks.
    #[serde(default)]
    pub experiment_namespace: Option<String>,
    /// Log level: trace, debug, info, warn or error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Root of the file system object store.
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,
    /// Attempts made when fetching an experiment or polling readiness.
    #[serde(default = "default_num_attempts")]
    pub retry_num_attempts: u32,
    /// Milliseconds between two attempts.
    #[serde(default = "default_period_ms")]
    pub retry_period_ms: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_store_dir() -> PathBuf {
    PathBuf::from("store")
}

fn default_num_attempts() -> u32 {
    DEFAULT_NUM_ATTEMPTS
}

#[allow(clippy::cast_possible_truncation)]
fn default_period_ms() -> u64 {
    DEFAULT_PERIOD.as_millis() as u64
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            experiment_name: None,
            experiment_namespace: None,
            log_level: default_log_level(),
            store_dir: default_store_dir(),
            retry_num_attempts: default_num_attempts(),
            retry_period_ms: default_period_ms(),
        }
    }
}

impl HandlerConfig {
    /// Loads configuration from an optional file and the process environment.
    ///
    /// # Arguments
    /// * `path` - configuration file; a missing file is not an error
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Like [`load`](Self::load), reading environment variables from `env`
    /// instead of the process environment when given.
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self> {
        let vars: HashMap<String, String> = env.unwrap_or_else(|| std::env::vars().collect());
        let documented: HashMap<String, String> = vars
            .iter()
            .filter(|(key, _)| ENV_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        let prefixed: HashMap<String, String> = vars
            .into_iter()
            .filter(|(key, _)| {
                key.strip_prefix(ENV_PREFIX)
                    .and_then(|rest| rest.strip_prefix('_'))
                    .is_some_and(|rest| ENV_KEYS.contains(&rest))
            })
            .collect();

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let loaded = builder
            .add_source(config::Environment::default().try_parsing(true).source(Some(documented)))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .try_parsing(true)
                    .source(Some(prefixed)),
            )
            .build()?;
        Ok(loaded.try_deserialize()?)
    }

    /// Retry policy described by the configuration.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_num_attempts, Duration::from_millis(self.retry_period_ms))
    }

    /// Namespaced name of the configured experiment.
    pub fn experiment(&self) -> Result<NamespacedName> {
        match (self.experiment_name.as_deref(), self.experiment_namespace.as_deref()) {
            (Some(name), Some(namespace)) if !name.is_empty() && !namespace.is_empty() => {
                Ok(NamespacedName::new(namespace, name))
            }
            (name, namespace) => Err(ConfigError::MissingExperiment(format!(
                "name={}, namespace={}",
                name.unwrap_or_default(),
                namespace.unwrap_or_default()
            ))),
        }
    }
}
