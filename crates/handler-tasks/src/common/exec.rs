//! `common/exec`: run a command with interpolated arguments.

use async_trait::async_trait;
use handler_core::task::Result;
use handler_core::{
    Experiment, RegistryError, RunContext, Tags, Task, TaskDescriptor, TaskInputs, TaskMeta,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;

use super::run_command;

pub const TASK_NAME: &str = "exec";

/// Inputs of `common/exec`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ExecInputs {
    /// Program to run.
    pub cmd: String,
    /// Arguments; non-string values are passed in their JSON form.
    #[serde(default)]
    pub args: Vec<Value>,
    /// Pass arguments through untouched.
    #[serde(default)]
    pub disable_interpolation: bool,
}

impl TaskInputs for ExecInputs {
    fn validate(&self) -> Result<(), String> {
        if self.cmd.trim().is_empty() {
            return Err("cmd must not be empty".to_string());
        }
        Ok(())
    }
}

impl ExecInputs {
    /// Arguments as strings, before interpolation.
    pub fn raw_args(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| match arg {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct ExecTask {
    meta: TaskMeta,
    with: ExecInputs,
}

impl ExecTask {
    pub fn from_descriptor(descriptor: &TaskDescriptor) -> Result<Self, RegistryError> {
        Ok(Self { meta: TaskMeta::from_descriptor(descriptor)?, with: descriptor.decode()? })
    }

    pub fn inputs(&self) -> &ExecInputs {
        &self.with
    }

    /// Arguments the command would be run with for `experiment`.
    pub fn args(&self, experiment: &Experiment) -> Result<Vec<String>> {
        let args = self.with.raw_args();
        if self.with.disable_interpolation {
            return Ok(args);
        }
        Ok(Tags::for_experiment(experiment).interpolate_all(&args)?)
    }
}

#[async_trait]
impl Task for ExecTask {
    fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    async fn run(&self, experiment: &Experiment, _: &RunContext) -> Result<()> {
        let args = self.args(experiment)?;
        run_command(&self.with.cmd, &args).await
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
