//! `common/bash`: run an interpolated script with `/bin/bash -c`.

use async_trait::async_trait;
use handler_core::task::Result;
use handler_core::{
    Experiment, RegistryError, RunContext, Tags, Task, TaskDescriptor, TaskInputs, TaskMeta,
};
use serde::{Deserialize, Serialize};
use std::any::Any;

use super::{LIBRARY_NAME, run_command};

pub const TASK_NAME: &str = "bash";

const SHELL: &str = "/bin/bash";

/// Inputs of `common/bash`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct BashInputs {
    pub script: String,
}

impl TaskInputs for BashInputs {}

#[derive(Debug, Clone)]
pub struct BashTask {
    meta: TaskMeta,
    with: BashInputs,
}

impl BashTask {
    /// Creates a `common/bash` task running `script`.
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            meta: TaskMeta::new(LIBRARY_NAME, TASK_NAME),
            with: BashInputs { script: script.into() },
        }
    }

    pub fn from_descriptor(descriptor: &TaskDescriptor) -> Result<Self, RegistryError> {
        Ok(Self { meta: TaskMeta::from_descriptor(descriptor)?, with: descriptor.decode()? })
    }

    /// The script before interpolation.
    pub fn script(&self) -> &str {
        &self.with.script
    }

    /// The script as it would run for `experiment`.
    pub fn render(&self, experiment: &Experiment) -> Result<String> {
        Ok(Tags::for_experiment(experiment).interpolate(&self.with.script)?)
    }
}

#[async_trait]
impl Task for BashTask {
    fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    async fn run(&self, experiment: &Experiment, _: &RunContext) -> Result<()> {
        let script = self.render(experiment)?;
        run_command(SHELL, &["-c".to_string(), script]).await
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
