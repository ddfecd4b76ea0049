//! `notification/http`: send an HTTP request about an experiment.
//!
//! The URL, header values and body are templates. Besides the default
//! experiment tags they see the decoded secret under `secret`, which is how
//! API keys reach headers (`X-Api-Key: {{.secret.key}}`).

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use handler_core::experiment::NamedValue;
use handler_core::task::Result;
use handler_core::{
    Experiment, RegistryError, RunContext, Secret, Tags, Task, TaskDescriptor, TaskError,
    TaskInputs, TaskMeta,
};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use tracing::{debug, info};

use super::{fetch_secret, settle};

pub const TASK_NAME: &str = "http";

const SECRET_LABEL: &str = "secret";
const CONTENT_TYPE: &str = "Content-Type";
const JSON: &str = "application/json";

/// Request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => Self::GET,
            HttpMethod::Post => Self::POST,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => f.write_str("GET"),
            Self::Post => f.write_str("POST"),
        }
    }
}

/// How the request authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthType {
    /// `username` and `password` from the secret.
    Basic,
    /// `token` from the secret.
    Bearer,
    /// Secret values interpolated into headers.
    #[serde(rename = "APIKey")]
    ApiKey,
}

/// Inputs of `notification/http`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct HttpInputs {
    pub url: String,
    /// `POST` when a body is given, `GET` otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<HttpMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_type: Option<AuthType>,
    /// Secret as `name` or `namespace/name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<NamedValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_failure: Option<bool>,
}

impl TaskInputs for HttpInputs {
    fn validate(&self) -> Result<(), String> {
        if self.url.trim().is_empty() {
            return Err("url must not be empty".to_string());
        }
        if self.auth_type.is_some() && self.secret.is_none() {
            return Err("authType requires a secret".to_string());
        }
        Ok(())
    }
}

impl HttpInputs {
    /// The method actually used.
    pub fn effective_method(&self) -> HttpMethod {
        self.method.unwrap_or(if self.body.is_some() { HttpMethod::Post } else { HttpMethod::Get })
    }
}

/// A fully interpolated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl PreparedRequest {
    /// Value of the first header named `name`, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }

    async fn send(self) -> Result<()> {
        let client = reqwest::Client::new();
        let mut request = client.request(self.method.into(), &self.url);
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }
        if let Some(body) = self.body {
            request = request.body(body);
        }

        let response = request.send().await.map_err(|e| TaskError::Http(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TaskError::Http(format!("{} {} returned {status}", self.method, self.url)));
        }
        info!(method = %self.method, url = %self.url, status = %status, "Request sent");
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct HttpTask {
    meta: TaskMeta,
    with: HttpInputs,
}

impl HttpTask {
    /// Creates a task from already decoded inputs.
    pub fn new(meta: TaskMeta, with: HttpInputs) -> Self {
        Self { meta, with }
    }

    pub fn from_descriptor(descriptor: &TaskDescriptor) -> Result<Self, RegistryError> {
        Ok(Self { meta: TaskMeta::from_descriptor(descriptor)?, with: descriptor.decode()? })
    }

    pub fn inputs(&self) -> &HttpInputs {
        &self.with
    }

    /// Interpolates the request for `experiment`.
    ///
    /// # Arguments
    /// * `secret` - the secret named by the inputs, already fetched
    pub fn prepare(
        &self,
        experiment: &Experiment,
        secret: Option<&Secret>,
    ) -> Result<PreparedRequest> {
        let tags = Tags::for_experiment(experiment).with_secret(SECRET_LABEL, secret);

        let mut headers = self
            .with
            .headers
            .iter()
            .map(|h| -> Result<(String, String)> {
                Ok((h.name.clone(), tags.interpolate(&h.value)?))
            })
            .collect::<Result<Vec<_>>>()?;

        if let Some(authorization) = self.authorization(secret)? {
            headers.push(("Authorization".to_string(), authorization));
        }

        let body = self.with.body.as_deref().map(|b| tags.interpolate(b)).transpose()?;
        if body.is_some() && !headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(CONTENT_TYPE)) {
            headers.push((CONTENT_TYPE.to_string(), JSON.to_string()));
        }

        Ok(PreparedRequest {
            method: self.with.effective_method(),
            url: tags.interpolate(&self.with.url)?,
            headers,
            body,
        })
    }

    fn authorization(&self, secret: Option<&Secret>) -> Result<Option<String>> {
        let secret_name = || self.with.secret.clone().unwrap_or_default();
        let missing = |key: &str| TaskError::MissingSecretValue {
            secret: secret_name(),
            key: key.to_string(),
        };
        let value = |key: &str| secret.and_then(|s| s.value(key)).ok_or_else(|| missing(key));
        match self.with.auth_type {
            Some(AuthType::Basic) => {
                let username = value("username")?;
                let password = value("password")?;
                Ok(Some(format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))))
            }
            Some(AuthType::Bearer) => {
                let token = secret.and_then(Secret::token).ok_or_else(|| missing("token"))?;
                Ok(Some(format!("Bearer {token}")))
            }
            Some(AuthType::ApiKey) | None => Ok(None),
        }
    }

    async fn send(&self, experiment: &Experiment, context: &RunContext) -> Result<()> {
        let secret = match &self.with.secret {
            Some(reference) => Some(fetch_secret(reference, context).await?),
            None => None,
        };
        let request = self.prepare(experiment, secret.as_ref())?;
        debug!(method = %request.method, url = %request.url, "Sending request");
        request.send().await
    }
}

#[async_trait]
impl Task for HttpTask {
    fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    async fn run(&self, experiment: &Experiment, context: &RunContext) -> Result<()> {
        let outcome = self.send(experiment, context).await;
        settle(&self.name(), self.with.ignore_failure, outcome)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
