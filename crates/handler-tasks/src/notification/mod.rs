//! The `notification` task library.
//!
//! Notifications are best effort: a failing notification is logged and
//! swallowed unless the task sets `ignoreFailure: false`.

use handler_core::registry::{RegistryError, Result};
use handler_core::store::NamespacedName;
use handler_core::task::Result as TaskResult;
use handler_core::{RunContext, Secret, Task, TaskDescriptor, TaskLibrary};
use tracing::warn;

pub mod github_workflow;
pub mod http;
pub mod slack;

pub use github_workflow::{GithubWorkflowInputs, GithubWorkflowTask};
pub use http::{AuthType, HttpInputs, HttpMethod, HttpTask};
pub use slack::{SlackInputs, SlackTask};

/// Name of this library.
pub const LIBRARY_NAME: &str = "notification";

const SLACK: &str = "notification/slack";
const HTTP: &str = "notification/http";
const GITHUB_WORKFLOW: &str = "notification/github-workflow";

/// Tasks that tell the outside world about an experiment.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotificationLibrary;

impl TaskLibrary for NotificationLibrary {
    fn name(&self) -> &'static str {
        LIBRARY_NAME
    }

    fn task_names(&self) -> &'static [&'static str] {
        &[slack::TASK_NAME, http::TASK_NAME, github_workflow::TASK_NAME]
    }

    fn make_task(&self, descriptor: &TaskDescriptor) -> Result<Box<dyn Task>> {
        match descriptor.qualified_name().as_str() {
            SLACK => Ok(Box::new(SlackTask::from_descriptor(descriptor)?)),
            HTTP => Ok(Box::new(HttpTask::from_descriptor(descriptor)?)),
            GITHUB_WORKFLOW => Ok(Box::new(GithubWorkflowTask::from_descriptor(descriptor)?)),
            other => Err(RegistryError::UnknownTask(other.to_string())),
        }
    }
}

/// Applies the `ignoreFailure` policy to the outcome of a notification.
///
/// Failures are swallowed unless `ignore_failure` is explicitly `false`.
pub(crate) fn settle(
    task: &str,
    ignore_failure: Option<bool>,
    outcome: TaskResult<()>,
) -> TaskResult<()> {
    match outcome {
        Err(err) if ignore_failure != Some(false) => {
            warn!(task, error = %err, "Notification failed, ignoring");
            Ok(())
        }
        outcome => outcome,
    }
}

/// Fetches the secret named by `reference` (`name` or `namespace/name`).
pub(crate) async fn fetch_secret(reference: &str, context: &RunContext) -> TaskResult<Secret> {
    let name = NamespacedName::parse(reference, context.default_namespace())?;
    Ok(context.store().get_secret(&name).await?)
}
