//! The `common` task library.

use handler_core::registry::{RegistryError, Result};
use handler_core::task::{Result as TaskResult, TaskError};
use handler_core::{Task, TaskDescriptor, TaskLibrary};
use tokio::process::Command;
use tracing::{debug, info, warn};

pub mod bash;
pub mod exec;
pub mod promote_kubectl;
pub mod readiness;

pub use bash::{BashInputs, BashTask};
pub use exec::{ExecInputs, ExecTask};
pub use promote_kubectl::{PromoteKubectlInputs, PromoteKubectlTask};
pub use readiness::{ObjectRef, ReadinessInputs, ReadinessTask};

/// Name of this library.
pub const LIBRARY_NAME: &str = "common";

const EXEC: &str = "common/exec";
const BASH: &str = "common/bash";
const PROMOTE_KUBECTL: &str = "common/promote-kubectl";
const READINESS: &str = "common/readiness";

/// Tasks that run local commands.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommonLibrary;

impl TaskLibrary for CommonLibrary {
    fn name(&self) -> &'static str {
        LIBRARY_NAME
    }

    fn task_names(&self) -> &'static [&'static str] {
        &[exec::TASK_NAME, bash::TASK_NAME, promote_kubectl::TASK_NAME, readiness::TASK_NAME]
    }

    fn make_task(&self, descriptor: &TaskDescriptor) -> Result<Box<dyn Task>> {
        match descriptor.qualified_name().as_str() {
            EXEC => Ok(Box::new(ExecTask::from_descriptor(descriptor)?)),
            BASH => Ok(Box::new(BashTask::from_descriptor(descriptor)?)),
            PROMOTE_KUBECTL => Ok(Box::new(PromoteKubectlTask::from_descriptor(descriptor)?)),
            READINESS => Ok(Box::new(ReadinessTask::from_descriptor(descriptor)?)),
            other => Err(RegistryError::UnknownTask(other.to_string())),
        }
    }
}

/// Runs `program` to completion, logging its output.
///
/// A non-zero exit status is an error.
pub(crate) async fn run_command(program: &str, args: &[String]) -> TaskResult<()> {
    let command = std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ");
    info!(command = %command, "Running command");

    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| TaskError::CommandFailed { command: command.clone(), reason: e.to_string() })?;

    for line in String::from_utf8_lossy(&output.stdout).lines() {
        info!(target: "handler::command", "{line}");
    }
    for line in String::from_utf8_lossy(&output.stderr).lines() {
        warn!(target: "handler::command", "{line}");
    }

    if output.status.success() {
        debug!(command = %command, "Command succeeded");
        Ok(())
    } else {
        Err(TaskError::CommandFailed { command, reason: output.status.to_string() })
    }
}
