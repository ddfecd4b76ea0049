//! `common/readiness`: wait until Kubernetes objects exist or reach a condition.
//!
//! Every object is polled in its own background task with `kubectl get`
//! (or `kubectl wait --for <condition>` when `waitFor` is set). The task
//! fails as soon as one object runs out of retries.

use async_trait::async_trait;
use handler_core::retry::retry;
use handler_core::task::Result;
use handler_core::wait::{WaitError, wait_timeout_or_error};
use handler_core::{
    Experiment, RegistryError, RetryPolicy, RunContext, Task, TaskDescriptor, TaskError, TaskInputs,
    TaskMeta,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::run_command;

pub const TASK_NAME: &str = "readiness";

const KUBECTL: &str = "kubectl";

/// Headroom on top of the retry budget before the whole check times out.
const TIMEOUT_SLACK: Duration = Duration::from_secs(30);

static DNS_SUBDOMAIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
        .expect("DNS subdomain regex should be valid")
});

static DNS_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("DNS label regex should be valid")
});

fn default_num_retries() -> u32 {
    12
}

fn default_interval_seconds() -> u64 {
    5
}

/// An object to wait for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ObjectRef {
    /// Resource kind, e.g. `deployment` or `ksvc`.
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
    /// Condition passed to `kubectl wait --for`, e.g. `condition=Available`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_for: Option<String>,
}

impl ObjectRef {
    fn validate(&self) -> Result<(), String> {
        if self.kind.is_empty() || self.kind.contains(char::is_whitespace) {
            return Err(format!("invalid kind {:?} for object {:?}", self.kind, self.name));
        }
        if self.name.len() > 253 || !DNS_SUBDOMAIN.is_match(&self.name) {
            return Err(format!("invalid object name {:?}", self.name));
        }
        if let Some(namespace) = &self.namespace {
            if namespace.len() > 63 || !DNS_LABEL.is_match(namespace) {
                return Err(format!("invalid namespace {namespace:?} for object {:?}", self.name));
            }
        }
        Ok(())
    }

    /// `kubectl` arguments checking this object once.
    ///
    /// # Arguments
    /// * `default_namespace` - used when the reference names no namespace
    /// * `timeout_seconds` - how long one `kubectl wait` may block
    pub fn kubectl_args(&self, default_namespace: &str, timeout_seconds: u64) -> Vec<String> {
        let namespace = self.namespace.as_deref().unwrap_or(default_namespace).to_string();
        match &self.wait_for {
            Some(condition) => vec![
                "wait".to_string(),
                format!("{}/{}", self.kind, self.name),
                "--namespace".to_string(),
                namespace,
                "--for".to_string(),
                condition.clone(),
                "--timeout".to_string(),
                format!("{}s", timeout_seconds.max(1)),
            ],
            None => vec![
                "get".to_string(),
                self.kind.clone(),
                self.name.clone(),
                "--namespace".to_string(),
                namespace,
            ],
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{}/{}/{}", self.kind, namespace, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

/// Inputs of `common/readiness`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ReadinessInputs {
    /// Seconds to wait before the first check.
    #[serde(default)]
    pub initial_delay_seconds: u64,
    /// Checks repeated after the first one fails.
    #[serde(default = "default_num_retries")]
    pub num_retries: u32,
    /// Seconds between two checks.
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    #[serde(default)]
    pub obj_refs: Vec<ObjectRef>,
}

impl Default for ReadinessInputs {
    fn default() -> Self {
        Self {
            initial_delay_seconds: 0,
            num_retries: default_num_retries(),
            interval_seconds: default_interval_seconds(),
            obj_refs: Vec::new(),
        }
    }
}

impl TaskInputs for ReadinessInputs {
    fn validate(&self) -> Result<(), String> {
        self.obj_refs.iter().try_for_each(ObjectRef::validate)
    }
}

impl ReadinessInputs {
    /// Attempt budget for one object.
    pub fn retry_policy(&self) -> RetryPolicy {
        let interval = Duration::from_secs(self.interval_seconds);
        RetryPolicy::new(self.num_retries.saturating_add(1), interval)
    }

    /// Upper bound for checking every object.
    ///
    /// Each attempt may block for one interval in `kubectl wait` and then
    /// sleep for another.
    pub fn timeout(&self) -> Duration {
        let attempts = u64::from(self.num_retries) + 1;
        let per_attempt = self.interval_seconds.max(1).saturating_mul(2);
        Duration::from_secs(attempts.saturating_mul(per_attempt)) + TIMEOUT_SLACK
    }
}

#[derive(Debug, Clone)]
pub struct ReadinessTask {
    meta: TaskMeta,
    with: ReadinessInputs,
    program: String,
}

impl ReadinessTask {
    pub fn from_descriptor(descriptor: &TaskDescriptor) -> Result<Self, RegistryError> {
        Ok(Self {
            meta: TaskMeta::from_descriptor(descriptor)?,
            with: descriptor.decode()?,
            program: KUBECTL.to_string(),
        })
    }

    /// Uses `program` in place of `kubectl`.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn inputs(&self) -> &ReadinessInputs {
        &self.with
    }
}

#[async_trait]
impl Task for ReadinessTask {
    fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    async fn run(&self, _: &Experiment, context: &RunContext) -> Result<()> {
        if self.with.obj_refs.is_empty() {
            info!("No objects to check");
            return Ok(());
        }

        if self.with.initial_delay_seconds > 0 {
            info!(seconds = self.with.initial_delay_seconds, "Delaying readiness checks");
            tokio::time::sleep(Duration::from_secs(self.with.initial_delay_seconds)).await;
        }

        let policy = self.with.retry_policy();
        let (errors, mut received) = mpsc::channel(self.with.obj_refs.len());
        let handles = self
            .with
            .obj_refs
            .iter()
            .map(|object| {
                let program = self.program.clone();
                let args =
                    object.kubectl_args(context.default_namespace(), self.with.interval_seconds);
                let object = object.to_string();
                let errors = errors.clone();
                tokio::spawn(async move {
                    let checked = retry(
                        &policy,
                        |attempt| {
                            debug!(object = %object, attempt, "Checking readiness");
                            run_command(&program, &args)
                        },
                        |_| true,
                    )
                    .await;
                    match checked {
                        Ok(()) => info!(object = %object, "Object is ready"),
                        Err(exhausted) => {
                            let attempts = exhausted.attempts;
                            info!(object = %object, attempts, "Object is not ready");
                            let _ = errors.send(exhausted.source).await;
                        }
                    }
                })
            })
            .collect();
        drop(errors);

        match wait_timeout_or_error(handles, self.with.timeout(), &mut received).await {
            Ok(()) => received.try_recv().map_or(Ok(()), Err),
            Err(WaitError::Timeout) => {
                Err(TaskError::Timeout("objects did not become ready".to_string()))
            }
            Err(WaitError::Failed(err)) => Err(err),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
