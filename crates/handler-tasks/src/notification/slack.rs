//! `notification/slack`: post an experiment summary to a Slack channel.

use async_trait::async_trait;
use handler_core::experiment::ExperimentStage;
use handler_core::task::Result;
use handler_core::{
    Experiment, RegistryError, RunContext, Task, TaskDescriptor, TaskError, TaskInputs, TaskMeta,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::any::Any;
use tracing::{debug, info};

use super::{fetch_secret, settle};

pub const TASK_NAME: &str = "slack";

/// Slack Web API method used to post.
pub const POST_MESSAGE_URL: &str = "https://slack.com/api/chat.postMessage";

const DEFAULT_STAGE: &str = "Waiting";

const ICON_URL: &str = "https://avatars.githubusercontent.com/u/53243580?s=200&v=4";

/// Inputs of `notification/slack`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct SlackInputs {
    /// Channel id or name.
    pub channel: String,
    /// Secret holding the bot `token`, as `name` or `namespace/name`.
    pub secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_failure: Option<bool>,
}

impl TaskInputs for SlackInputs {
    fn validate(&self) -> Result<(), String> {
        if self.channel.trim().is_empty() {
            return Err("channel must not be empty".to_string());
        }
        if self.secret.trim().is_empty() {
            return Err("secret must not be empty".to_string());
        }
        Ok(())
    }
}

fn bold(text: &str) -> String {
    format!("*{text}*")
}

fn italic(text: &str) -> String {
    format!("_{text}_")
}

/// `namespace/name` of the experiment.
pub fn name(experiment: &Experiment) -> String {
    experiment.namespaced_name().to_string()
}

/// Baseline and candidate names, comma separated.
pub fn versions(experiment: &Experiment) -> String {
    experiment
        .spec
        .version_info
        .as_ref()
        .map(|info| info.versions().map(|v| v.name.as_str()).collect::<Vec<_>>().join(", "))
        .unwrap_or_default()
}

/// Current stage, `Waiting` when unset.
pub fn stage(experiment: &Experiment) -> &str {
    experiment.status.stage.as_ref().map_or(DEFAULT_STAGE, ExperimentStage::as_str)
}

/// The winning version or `not found`.
pub fn winner(experiment: &Experiment) -> &str {
    experiment.status.winner().unwrap_or("not found")
}

/// Headline of the message.
pub fn title(experiment: &Experiment) -> String {
    let spec = &experiment.spec;
    bold(&format!("{} experiment on {}", spec.strategy.testing_pattern, spec.target))
}

/// Markdown body of the message, one fact per line.
pub fn message(experiment: &Experiment) -> String {
    let mut lines = vec![
        format!("{} {}", bold("Name:"), italic(&name(experiment))),
        format!("{} {}", bold("Versions:"), italic(&versions(experiment))),
        format!("{} {}", bold("Stage:"), italic(stage(experiment))),
        format!("{} {}", bold("Winner:"), italic(winner(experiment))),
    ];
    if experiment.status.failed() {
        lines.push(format!("{} {}", bold("Failed:"), italic("true")));
    }
    lines.join("\n")
}

fn section(text: String) -> Value {
    json!({ "type": "section", "text": { "type": "mrkdwn", "text": text } })
}

#[derive(Debug, Clone)]
pub struct SlackTask {
    meta: TaskMeta,
    with: SlackInputs,
    api_url: String,
}

impl SlackTask {
    pub fn from_descriptor(descriptor: &TaskDescriptor) -> Result<Self, RegistryError> {
        Ok(Self {
            meta: TaskMeta::from_descriptor(descriptor)?,
            with: descriptor.decode()?,
            api_url: POST_MESSAGE_URL.to_string(),
        })
    }

    /// Posts to `url` instead of the Slack Web API.
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    pub fn inputs(&self) -> &SlackInputs {
        &self.with
    }

    /// The `chat.postMessage` payload for `experiment`.
    pub fn payload(&self, experiment: &Experiment) -> Value {
        json!({
            "channel": self.with.channel,
            "blocks": [section(title(experiment))],
            "attachments": [{ "blocks": [section(message(experiment))] }],
            "icon_url": ICON_URL,
        })
    }

    async fn post(&self, experiment: &Experiment, context: &RunContext) -> Result<()> {
        let secret = fetch_secret(&self.with.secret, context).await?;
        let token = secret.token().ok_or_else(|| TaskError::MissingSecretValue {
            secret: self.with.secret.clone(),
            key: "token".to_string(),
        })?;

        let response = reqwest::Client::new()
            .post(&self.api_url)
            .bearer_auth(token)
            .json(&self.payload(experiment))
            .send()
            .await
            .map_err(|e| TaskError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TaskError::Http(format!("Slack returned {status}")));
        }
        let reply: Value = response.json().await.map_err(|e| TaskError::Http(e.to_string()))?;
        if reply["ok"] != Value::Bool(true) {
            let reason = reply["error"].as_str().unwrap_or("unknown error");
            return Err(TaskError::Http(format!("Slack rejected the message: {reason}")));
        }
        debug!(channel = ?reply["channel"], ts = ?reply["ts"], "Slack accepted the message");
        info!(channel = %self.with.channel, "Posted Slack notification");
        Ok(())
    }
}

#[async_trait]
impl Task for SlackTask {
    fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    async fn run(&self, experiment: &Experiment, context: &RunContext) -> Result<()> {
        let outcome = self.post(experiment, context).await;
        settle(&self.name(), self.with.ignore_failure, outcome)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
