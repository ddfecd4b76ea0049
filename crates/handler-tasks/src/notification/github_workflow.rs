//! `notification/github-workflow`: trigger a `workflow_dispatch` event.

use async_trait::async_trait;
use handler_core::experiment::NamedValue;
use handler_core::task::Result;
use handler_core::{
    Experiment, RegistryError, RunContext, Task, TaskDescriptor, TaskInputs, TaskMeta,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::any::Any;
use tracing::info;

use super::http::{AuthType, HttpInputs, HttpTask};
use super::LIBRARY_NAME;

pub const TASK_NAME: &str = "github-workflow";

/// Branch dispatched when no `ref` is given.
pub const DEFAULT_REF: &str = "master";

const GITHUB_API: &str = "https://api.github.com";
const ACCEPT: &str = "application/vnd.github.v3+json";

/// Inputs of `notification/github-workflow`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct GithubWorkflowInputs {
    /// `owner/repo`.
    pub repository: String,
    /// Workflow file name or id.
    pub workflow: String,
    /// Secret holding a token allowed to dispatch the workflow.
    pub secret: String,
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,
    /// Workflow inputs; values may use tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<NamedValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_failure: Option<bool>,
}

impl TaskInputs for GithubWorkflowInputs {
    fn validate(&self) -> Result<(), String> {
        let required = [
            ("repository", &self.repository),
            ("workflow", &self.workflow),
            ("secret", &self.secret),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(format!("{field} must not be empty"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct GithubWorkflowTask {
    meta: TaskMeta,
    with: GithubWorkflowInputs,
    api_url: String,
}

impl GithubWorkflowTask {
    pub fn from_descriptor(descriptor: &TaskDescriptor) -> Result<Self, RegistryError> {
        Ok(Self {
            meta: TaskMeta::from_descriptor(descriptor)?,
            with: descriptor.decode()?,
            api_url: GITHUB_API.to_string(),
        })
    }

    /// Dispatches against another API root, e.g. a GitHub Enterprise server.
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    pub fn inputs(&self) -> &GithubWorkflowInputs {
        &self.with
    }

    /// The equivalent `notification/http` request.
    pub fn to_http_task(&self) -> HttpTask {
        let git_ref = self.with.git_ref.as_deref().unwrap_or(DEFAULT_REF);
        let inputs: Map<String, Value> = self
            .with
            .inputs
            .iter()
            .map(|i| (i.name.clone(), Value::String(i.value.clone())))
            .collect();
        let body = json!({ "ref": git_ref, "inputs": inputs }).to_string();

        let with = HttpInputs {
            url: format!(
                "{}/repos/{}/actions/workflows/{}/dispatches",
                self.api_url.trim_end_matches('/'),
                self.with.repository,
                self.with.workflow
            ),
            method: None,
            auth_type: Some(AuthType::Bearer),
            secret: Some(self.with.secret.clone()),
            headers: vec![NamedValue::new("Accept", ACCEPT)],
            body: Some(body),
            ignore_failure: self.with.ignore_failure,
        };
        HttpTask::new(TaskMeta::new(LIBRARY_NAME, TASK_NAME), with)
    }
}

#[async_trait]
impl Task for GithubWorkflowTask {
    fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    async fn run(&self, experiment: &Experiment, context: &RunContext) -> Result<()> {
        let http = self.to_http_task();
        info!(url = %http.inputs().url, "Dispatching GitHub workflow");
        http.run(experiment, context).await
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
