//! The built-in libraries as the handler sees them: through the registry.

use handler_core::store::NamespacedName;
use handler_core::{
    Experiment, HandlerConfig, InMemoryStore, RegistryError, RunContext, Secret, Task,
    TaskDescriptor, TaskError,
};
use handler_tasks::common::{PromoteKubectlTask, ReadinessTask};
use handler_tasks::default_registry;
use handler_tasks::notification::{GithubWorkflowTask, HttpMethod, HttpTask, SlackTask, slack};
use mockito::Matcher;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

const EXPERIMENT: &str = r"
apiVersion: iter8.tools/v2alpha2
kind: Experiment
metadata:
  name: sample-exp
  namespace: knative-test
spec:
  target: knative-test/sample-app
  strategy:
    testingPattern: A/B
  versionInfo:
    baseline:
      name: sample-app-v1
    candidates:
    - name: sample-app-v2
      variables:
      - name: manifest
        value: v2.yaml
status:
  stage: Completed
  versionRecommendedForPromotion: sample-app-v2
  analysis:
    winnerAssessment:
      data:
        winnerFound: true
        winner: sample-app-v2
  conditions:
  - type: Failed
    status: 'True'
";

fn experiment() -> Experiment {
    serde_yaml::from_str(EXPERIMENT).unwrap()
}

fn descriptor(task: &str, with: serde_json::Value) -> TaskDescriptor {
    let mut descriptor: TaskDescriptor = serde_json::from_value(json!({ "task": task })).unwrap();
    descriptor.with = with.as_object().cloned().unwrap_or_default();
    descriptor
}

async fn context_with_secret(name: &str, token: &str) -> RunContext {
    let store = InMemoryStore::new();
    let secret = Secret::from_string_data(name, [("token", token)]);
    store.insert_secret(NamespacedName::new("default", name), secret).await;
    RunContext::new(HandlerConfig::default(), Arc::new(store))
}

#[test]
fn test_slack_message() {
    let experiment = experiment();
    assert_eq!(slack::title(&experiment), "*A/B experiment on knative-test/sample-app*");
    assert_eq!(
        slack::message(&experiment),
        "*Name:* _knative-test/sample-exp_\n\
         *Versions:* _sample-app-v1, sample-app-v2_\n\
         *Stage:* _Completed_\n\
         *Winner:* _sample-app-v2_\n\
         *Failed:* _true_"
    );
}

#[test]
fn test_promote_kubectl_rewrites_to_bash() {
    let registry = default_registry().unwrap();

    let task = registry
        .make_task(&descriptor("common/promote-kubectl", json!({"manifest": "{{.manifest}}"})))
        .unwrap();
    let promote = task.as_any().downcast_ref::<PromoteKubectlTask>().unwrap();
    let bash = promote.to_bash_task("knative-test");
    assert_eq!(bash.script(), "kubectl apply --namespace knative-test --filename {{.manifest}}");
    assert_eq!(
        bash.render(&experiment()).unwrap(),
        "kubectl apply --namespace knative-test --filename v2.yaml"
    );

    let task = registry
        .make_task(&descriptor(
            "common/promote-kubectl",
            json!({"manifest": "manifests/", "namespace": "prod", "recursive": true}),
        ))
        .unwrap();
    let promote = task.as_any().downcast_ref::<PromoteKubectlTask>().unwrap();
    assert_eq!(
        promote.to_bash_task("ignored").script(),
        "kubectl apply --namespace prod --recursive --filename manifests/"
    );
}

#[test]
fn test_github_workflow_rewrites_to_http() {
    let registry = default_registry().unwrap();
    let task = registry
        .make_task(&descriptor(
            "notification/github-workflow",
            json!({
                "repository": "iter8-tools/handler",
                "workflow": "promote.yaml",
                "secret": "gh-token",
                "inputs": [{"name": "version", "value": "{{.name}}"}]
            }),
        ))
        .unwrap();
    let workflow = task.as_any().downcast_ref::<GithubWorkflowTask>().unwrap();
    let http = workflow.to_http_task();

    let secret = Secret::from_string_data("gh-token", [("token", "ghp_123")]);
    let request = http.prepare(&experiment(), Some(&secret)).unwrap();
    assert_eq!(request.method, HttpMethod::Post);
    assert_eq!(
        request.url,
        "https://api.github.com/repos/iter8-tools/handler/actions/workflows/promote.yaml/dispatches"
    );
    assert_eq!(request.header("Accept"), Some("application/vnd.github.v3+json"));
    assert_eq!(request.header("Authorization"), Some("Bearer ghp_123"));

    let body: serde_json::Value = serde_json::from_str(request.body.as_deref().unwrap()).unwrap();
    assert_eq!(body, json!({"ref": "master", "inputs": {"version": "sample-app-v2"}}));
}

#[test]
fn test_readiness_rejects_invalid_object_name() {
    let registry = default_registry().unwrap();
    let err = registry
        .make_task(&descriptor(
            "common/readiness",
            json!({
                "initialDelaySeconds": 5,
                "numRetries": 3,
                "intervalSeconds": 5,
                "objRefs": [{"kind": "deployment", "name": "hello world"}]
            }),
        ))
        .unwrap_err();
    assert!(matches!(
        err,
        RegistryError::Validation { ref task, .. } if task == "common/readiness"
    ));

    let task = registry
        .make_task(&descriptor(
            "common/readiness",
            json!({"objRefs": [{"kind": "deployment", "name": "sample-app-v2.web"}]}),
        ))
        .unwrap();
    let readiness = task.as_any().downcast_ref::<ReadinessTask>().unwrap();
    assert_eq!(readiness.inputs().num_retries, 12);
}

#[test]
fn test_unknown_tasks_and_inputs() {
    let registry = default_registry().unwrap();
    let err = registry.make_task(&descriptor("notification/pager", json!({}))).unwrap_err();
    assert_eq!(err.to_string(), "unknown task: notification/pager");

    let err = registry
        .make_task(&descriptor("common/bash", json!({"script": "true", "shell": "zsh"})))
        .unwrap_err();
    assert!(err.to_string().contains("unknown field `shell`"), "{err}");
}

#[tokio::test]
async fn test_action_of_shell_tasks() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("promoted");
    let registry = default_registry().unwrap();
    let action = registry
        .build_action(&[
            descriptor("common/exec", json!({"cmd": "echo", "args": ["promoting", "{{.name}}"]})),
            descriptor(
                "common/bash",
                json!({"script": format!("echo -n {{{{.name}}}} > {}", out.display())}),
            ),
            descriptor("common/bash", json!({"script": "exit 1"}))
                .with_condition("status.stage != 'Completed'"),
        ])
        .unwrap();

    action.run(&experiment(), &RunContext::default()).await.unwrap();
    assert_eq!(std::fs::read_to_string(out).unwrap(), "sample-app-v2");
}

#[tokio::test]
async fn test_http_task_sends_request() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/hooks/sample-exp")
        .match_header("content-type", "application/json")
        .match_body(Matcher::Exact(r#"{"winner": "sample-app-v2"}"#.to_string()))
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let task = HttpTask::from_descriptor(&descriptor(
        "notification/http",
        json!({
            "url": format!("{}/hooks/{{{{.this.metadata.name}}}}", server.url()),
            "body": "{\"winner\": \"{{.name}}\"}",
            "ignoreFailure": false
        }),
    ))
    .unwrap();

    task.run(&experiment(), &RunContext::default()).await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn test_http_task_error_status() {
    let mut server = mockito::Server::new_async().await;
    let mock = server.mock("GET", "/status").with_status(503).create_async().await;

    let task = HttpTask::from_descriptor(&descriptor(
        "notification/http",
        json!({"url": format!("{}/status", server.url()), "ignoreFailure": false}),
    ))
    .unwrap();

    let err = task.run(&experiment(), &RunContext::default()).await.unwrap_err();
    assert!(matches!(err, TaskError::Http(_)), "{err}");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_github_workflow_dispatch() {
    let context = context_with_secret("gh-token", "ghp_123").await;
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/repos/iter8-tools/handler/actions/workflows/promote.yaml/dispatches")
        .match_header("authorization", "Bearer ghp_123")
        .match_header("accept", "application/vnd.github.v3+json")
        .match_body(Matcher::Json(json!({
            "ref": "release",
            "inputs": {"version": "sample-app-v2"}
        })))
        .with_status(204)
        .create_async()
        .await;

    let task = GithubWorkflowTask::from_descriptor(&descriptor(
        "notification/github-workflow",
        json!({
            "repository": "iter8-tools/handler",
            "workflow": "promote.yaml",
            "secret": "gh-token",
            "ref": "release",
            "inputs": [{"name": "version", "value": "{{.name}}"}],
            "ignoreFailure": false
        }),
    ))
    .unwrap()
    .with_api_url(server.url());

    task.run(&experiment(), &context).await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn test_slack_posts_with_token() {
    let context = context_with_secret("slack", "xoxb-1").await;
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/chat.postMessage")
        .match_header("authorization", "Bearer xoxb-1")
        .match_header("content-type", "application/json")
        .match_body(Matcher::PartialJson(json!({"channel": "C01"})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"ok": true, "channel": "C01", "ts": "1"}"#)
        .create_async()
        .await;

    let task = SlackTask::from_descriptor(&descriptor(
        "notification/slack",
        json!({"channel": "C01", "secret": "slack", "ignoreFailure": false}),
    ))
    .unwrap()
    .with_api_url(format!("{}/api/chat.postMessage", server.url()));

    task.run(&experiment(), &context).await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn test_slack_rejection_is_reported_when_asked() {
    let context = context_with_secret("slack", "x").await;
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/chat.postMessage")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"ok": false, "error": "channel_not_found"}"#)
        .create_async()
        .await;

    let task = SlackTask::from_descriptor(&descriptor(
        "notification/slack",
        json!({"channel": "C404", "secret": "slack", "ignoreFailure": false}),
    ))
    .unwrap()
    .with_api_url(format!("{}/api/chat.postMessage", server.url()));

    let err = task.run(&experiment(), &context).await.unwrap_err();
    assert!(matches!(err, TaskError::Http(ref reason) if reason.contains("channel_not_found")));
    mock.assert_async().await;
}
