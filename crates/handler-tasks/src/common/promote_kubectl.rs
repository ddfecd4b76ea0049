//! `common/promote-kubectl`: apply the manifest of the winning version.
//!
//! The task is a thin rewrite onto [`BashTask`]; the manifest path may use
//! tags, e.g. `manifests/{{.name}}.yaml`.

use async_trait::async_trait;
use handler_core::task::Result;
use handler_core::{
    Experiment, RegistryError, RunContext, Task, TaskDescriptor, TaskInputs, TaskMeta,
};
use serde::{Deserialize, Serialize};
use std::any::Any;

use super::BashTask;

pub const TASK_NAME: &str = "promote-kubectl";

/// Inputs of `common/promote-kubectl`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct PromoteKubectlInputs {
    /// File, directory or URL handed to `kubectl apply --filename`.
    pub manifest: String,
    /// Target namespace; the experiment namespace from the configuration when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Process the manifest directory recursively.
    #[serde(default)]
    pub recursive: bool,
}

impl TaskInputs for PromoteKubectlInputs {
    fn validate(&self) -> Result<(), String> {
        if self.manifest.trim().is_empty() {
            return Err("manifest must not be empty".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PromoteKubectlTask {
    meta: TaskMeta,
    with: PromoteKubectlInputs,
}

impl PromoteKubectlTask {
    pub fn from_descriptor(descriptor: &TaskDescriptor) -> Result<Self, RegistryError> {
        Ok(Self { meta: TaskMeta::from_descriptor(descriptor)?, with: descriptor.decode()? })
    }

    /// The equivalent `common/bash` task.
    ///
    /// # Arguments
    /// * `default_namespace` - used when the inputs name no namespace
    pub fn to_bash_task(&self, default_namespace: &str) -> BashTask {
        let namespace = self.with.namespace.as_deref().unwrap_or(default_namespace);
        let mut script = format!("kubectl apply --namespace {namespace}");
        if self.with.recursive {
            script.push_str(" --recursive");
        }
        script.push_str(" --filename ");
        script.push_str(&self.with.manifest);
        BashTask::new(script)
    }
}

#[async_trait]
impl Task for PromoteKubectlTask {
    fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    async fn run(&self, experiment: &Experiment, context: &RunContext) -> Result<()> {
        self.to_bash_task(context.default_namespace()).run(experiment, context).await
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
