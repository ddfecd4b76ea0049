//! End-to-end flow: resolve an experiment, build one of its actions through
//! the registry, and run it.

use async_trait::async_trait;
use handler_core::experiment::HandlerPhase;
use handler_core::registry::Result as RegistryResult;
use handler_core::task::Result as TaskResult;
use handler_core::{
    ActionError, Experiment, ExperimentBuilder, ExperimentError, InMemoryStore, NamespacedName,
    RegistryError, RetryPolicy, RunContext, Tags, Task, TaskDescriptor, TaskInputs, TaskLibrary,
    TaskMeta, TaskRegistry,
};
use pretty_assertions::assert_eq;
use serde::Deserialize;
use std::any::Any;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;

const EXPERIMENT: &str = r#"
apiVersion: iter8.tools/v2alpha2
kind: Experiment
metadata:
  name: reviews-canary
  namespace: bookinfo
spec:
  target: bookinfo/reviews
  strategy:
    testingPattern: Canary
    handlers:
      finish: finish
      actions:
        finish:
        - task: record/note
          condition: status.stage == "Running"
          with:
            message: "skipped"
        - task: record/note
          with:
            message: "promote {{.name}} at {{.revision}}"
        - library: record
          task: note
          condition: len(spec.versionInfo.candidates) == 1
          with:
            message: "candidate {{(index .this.spec.versionInfo.candidates 0).name}}"
  versionInfo:
    baseline:
      name: reviews-v1
      variables:
      - name: revision
        value: rev-1
    candidates:
    - name: reviews-v2
      variables:
      - name: revision
        value: rev-2
status:
  stage: Completed
  versionRecommendedForPromotion: reviews-v2
"#;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NoteInputs {
    message: String,
    #[serde(default)]
    fail: bool,
}

impl TaskInputs for NoteInputs {}

#[derive(Debug)]
struct NoteTask {
    meta: TaskMeta,
    with: NoteInputs,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Task for NoteTask {
    fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    async fn run(&self, experiment: &Experiment, _: &RunContext) -> TaskResult<()> {
        let message = Tags::for_experiment(experiment).interpolate(&self.with.message)?;
        if self.with.fail {
            return Err(handler_core::TaskError::CommandFailed {
                command: message,
                reason: "asked to fail".into(),
            });
        }
        self.log.lock().unwrap().push(message);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct RecordLibrary {
    log: Arc<Mutex<Vec<String>>>,
}

impl TaskLibrary for RecordLibrary {
    fn name(&self) -> &'static str {
        "record"
    }

    fn task_names(&self) -> &'static [&'static str] {
        &["note"]
    }

    fn make_task(&self, descriptor: &TaskDescriptor) -> RegistryResult<Box<dyn Task>> {
        match descriptor.qualified_name().as_str() {
            "record/note" => Ok(Box::new(NoteTask {
                meta: TaskMeta::from_descriptor(descriptor)?,
                with: descriptor.decode()?,
                log: Arc::clone(&self.log),
            })),
            other => Err(RegistryError::UnknownTask(other.to_string())),
        }
    }
}

fn registry() -> (TaskRegistry, Arc<Mutex<Vec<String>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut registry = TaskRegistry::new();
    registry.register(RecordLibrary { log: Arc::clone(&log) }).unwrap();
    (registry, log)
}

fn experiment_file() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(EXPERIMENT.as_bytes()).unwrap();
    file
}

#[tokio::test]
async fn test_finish_action_runs_with_conditions_and_interpolation() {
    let file = experiment_file();
    let experiment = ExperimentBuilder::new().from_file(file.path()).build().unwrap();
    let action_name = experiment.handler_for(HandlerPhase::Finish).unwrap();

    let (registry, log) = registry();
    let action = registry.build_action(experiment.action_spec(action_name).unwrap()).unwrap();
    assert_eq!(action.len(), 3);

    action.run(&experiment, &RunContext::default()).await.unwrap();
    assert_eq!(
        *log.lock().unwrap(),
        vec!["promote reviews-v2 at rev-2".to_string(), "candidate reviews-v2".to_string()]
    );
}

#[tokio::test]
async fn test_failing_task_stops_the_action() {
    let file = experiment_file();
    let mut experiment = ExperimentBuilder::new().from_file(file.path()).build().unwrap();
    let tasks = experiment
        .spec
        .strategy
        .handlers
        .as_mut()
        .and_then(|h| h.actions.as_mut())
        .and_then(|a| a.get_mut("finish"))
        .unwrap();
    tasks[1].with.insert("fail".into(), true.into());

    let (registry, log) = registry();
    let action = registry.build_action(experiment.action_spec("finish").unwrap()).unwrap();
    let err = action.run(&experiment, &RunContext::default()).await.unwrap_err();
    assert!(matches!(err, ActionError::Task { index: 1, .. }));
    assert!(log.lock().unwrap().is_empty());
}

#[test]
fn test_repeated_variables_and_unknown_stage_from_file() {
    let yaml = EXPERIMENT
        .replace(
            "        value: rev-2\n",
            "        value: rev-2\n      - name: revision\n        value: rev-3\n",
        )
        .replace("stage: Completed", "stage: Draining");
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();

    let experiment = ExperimentBuilder::new().from_file(file.path()).build().unwrap();
    let candidate = experiment.version_detail("reviews-v2").unwrap();
    assert_eq!(candidate.variables.len(), 1);
    assert_eq!(candidate.variable("revision"), Some("rev-2"));

    let tags = Tags::for_experiment(&experiment);
    assert_eq!(tags.interpolate("{{.revision}}").unwrap(), "rev-2");
    assert_eq!(tags.interpolate("{{.this.status.stage}}").unwrap(), "Draining");
}

#[test]
fn test_descriptor_round_trip_keeps_inputs() {
    let descriptor = TaskDescriptor::new("record", "note").with_input("message", "hi");
    let yaml = serde_yaml::to_string(&descriptor).unwrap();
    let parsed: TaskDescriptor = serde_yaml::from_str(&yaml).unwrap();
    assert_eq!(parsed, descriptor);

    let (registry, _) = registry();
    let task = registry.make_task(&parsed).unwrap();
    let note = task.as_any().downcast_ref::<NoteTask>().unwrap();
    assert_eq!(note.with.message, "hi");
    assert!(!note.with.fail);
}

#[test]
fn test_unknown_descriptors_are_rejected() {
    let (registry, _) = registry();
    let err = registry.make_task(&TaskDescriptor::new("record", "erase")).unwrap_err();
    assert!(matches!(err, RegistryError::UnknownTask(ref t) if t == "record/erase"));

    let err = registry.make_task(&TaskDescriptor::new("ledger", "note")).unwrap_err();
    assert!(matches!(err, RegistryError::UnknownLibrary(ref l) if l == "ledger"));

    let bad_inputs = TaskDescriptor::new("record", "note").with_input("message", 3);
    assert!(matches!(registry.make_task(&bad_inputs), Err(RegistryError::InvalidInputs { .. })));
}

#[tokio::test]
async fn test_from_cluster_gives_up_after_budget() {
    let store = InMemoryStore::new();
    let period = Duration::from_millis(50);
    let policy = RetryPolicy::new(2, period);

    let start = Instant::now();
    let err = ExperimentBuilder::new()
        .from_cluster(&NamespacedName::new("bookinfo", "missing"), &store, &policy)
        .await
        .build()
        .unwrap_err();

    assert!(start.elapsed() >= period);
    assert_eq!(store.experiment_reads(), 2);
    assert!(matches!(err, ExperimentError::Fetch { attempts: 2, .. }));
}

#[tokio::test]
async fn test_from_cluster_waits_for_late_experiment() {
    let store = Arc::new(InMemoryStore::new());
    let file = experiment_file();
    let experiment = ExperimentBuilder::new().from_file(file.path()).build().unwrap();

    let writer = Arc::clone(&store);
    let late = experiment.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        writer.insert_experiment(late).await;
    });

    let policy = RetryPolicy::new(20, Duration::from_millis(20));
    let fetched = ExperimentBuilder::new()
        .from_cluster(&NamespacedName::new("bookinfo", "reviews-canary"), store.as_ref(), &policy)
        .await
        .build()
        .unwrap();
    assert_eq!(fetched, experiment);
    assert!(store.experiment_reads() > 1);
}
