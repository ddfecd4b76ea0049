//! Experiment resource types.
//!
//! These mirror the `iter8.tools/v2alpha2` Experiment resource closely enough
//! for the handler: everything the handler reads is typed, and any field it
//! does not know about is preserved so that `{{.this...}}` templates and
//! conditions still see it.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::task::TaskDescriptor;

/// API version written by the handler when it creates experiments.
pub const API_VERSION: &str = "iter8.tools/v2alpha2";

/// Kind of the experiment resource.
pub const KIND: &str = "Experiment";

/// Map of action names to their declarative task lists.
pub type ActionMap = BTreeMap<String, Vec<TaskDescriptor>>;

/// An experiment: the declarative rollout spec plus its observed status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Experiment {
    /// API version of the resource.
    #[serde(default)]
    pub api_version: String,
    /// Kind of the resource.
    #[serde(default)]
    pub kind: String,
    /// Object metadata.
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Declarative spec.
    #[serde(default)]
    pub spec: ExperimentSpec,
    /// Observed status.
    #[serde(default)]
    pub status: ExperimentStatus,
}

/// Name, namespace and labels of a stored object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Object name.
    #[serde(default)]
    pub name: String,
    /// Object namespace; empty means the default namespace.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    /// Labels.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Annotations.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Declarative part of an experiment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentSpec {
    /// The rollout target, usually `namespace/name` of the routed service.
    #[serde(default)]
    pub target: String,
    /// Testing strategy and lifecycle handlers.
    #[serde(default)]
    pub strategy: Strategy,
    /// Baseline and candidate versions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_info: Option<VersionInfo>,
    /// Iteration timing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<Duration>,
    /// Fields the handler does not interpret (criteria, metrics, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Testing pattern of an experiment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestingPattern {
    /// A single version is validated against criteria.
    #[default]
    Conformance,
    /// A candidate is progressively compared with the baseline.
    Canary,
    /// Baseline against one candidate.
    #[serde(rename = "A/B")]
    AB,
    /// Baseline against several candidates.
    #[serde(rename = "A/B/N")]
    ABN,
}

impl TestingPattern {
    /// Returns the wire representation of the pattern.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conformance => "Conformance",
            Self::Canary => "Canary",
            Self::AB => "A/B",
            Self::ABN => "A/B/N",
        }
    }
}

impl fmt::Display for TestingPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Testing strategy of an experiment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Strategy {
    /// How versions are compared.
    #[serde(default)]
    pub testing_pattern: TestingPattern,
    /// How traffic is shifted between versions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_pattern: Option<String>,
    /// Lifecycle handlers and the actions they run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handlers: Option<Handlers>,
    /// Fields the handler does not interpret (weights, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Lifecycle phases an action can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerPhase {
    /// Experiment start.
    Start,
    /// Experiment completion.
    Finish,
    /// Rollback after a failed experiment.
    Rollback,
    /// Experiment failure.
    Failure,
    /// End of every loop.
    Loop,
}

/// Handler stanza: action names per lifecycle phase plus the action map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handlers {
    /// Action run when the experiment starts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    /// Action run when the experiment finishes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish: Option<String>,
    /// Action run on rollback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback: Option<String>,
    /// Action run on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    /// Action run at the end of each loop.
    #[serde(default, rename = "loop", skip_serializing_if = "Option::is_none")]
    pub loop_: Option<String>,
    /// Named actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<ActionMap>,
}

impl Handlers {
    /// Returns the action name bound to a lifecycle phase.
    pub fn for_phase(&self, phase: HandlerPhase) -> Option<&str> {
        match phase {
            HandlerPhase::Start => self.start.as_deref(),
            HandlerPhase::Finish => self.finish.as_deref(),
            HandlerPhase::Rollback => self.rollback.as_deref(),
            HandlerPhase::Failure => self.failure.as_deref(),
            HandlerPhase::Loop => self.loop_.as_deref(),
        }
    }
}

/// Iteration timing of an experiment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Duration {
    /// Seconds between iterations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_seconds: Option<i32>,
    /// Iterations in one loop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iterations_per_loop: Option<i32>,
    /// Maximum number of loops.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_loops: Option<i32>,
}

/// Baseline and candidate versions of an experiment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    /// The version currently serving production traffic.
    pub baseline: VersionDetail,
    /// Versions competing with the baseline.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<VersionDetail>,
}

impl VersionInfo {
    /// Iterates over the baseline followed by the candidates.
    pub fn versions(&self) -> impl Iterator<Item = &VersionDetail> {
        std::iter::once(&self.baseline).chain(self.candidates.iter())
    }

    /// Finds a version by name, baseline first.
    pub fn find(&self, name: &str) -> Option<&VersionDetail> {
        self.versions().find(|v| v.name == name)
    }

    /// Finds a version by name for modification, baseline first.
    pub fn find_mut(&mut self, name: &str) -> Option<&mut VersionDetail> {
        if self.baseline.name == name {
            return Some(&mut self.baseline);
        }
        self.candidates.iter_mut().find(|v| v.name == name)
    }
}

/// Per-version metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionDetail {
    /// Version name.
    pub name: String,
    /// Variables exposed to templates when this version is recommended.
    ///
    /// Names are unique; a repeated name in the resource is dropped.
    #[serde(default, deserialize_with = "unique_variables", skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<NamedValue>,
    /// Field of the routing resource holding this version's traffic weight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_obj_ref: Option<ObjectReference>,
}

impl VersionDetail {
    /// Creates a version with no variables.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), variables: Vec::new(), weight_obj_ref: None }
    }

    /// Looks up a variable value by name.
    pub fn variable(&self, name: &str) -> Option<&str> {
        self.variables.iter().find(|v| v.name == name).map(|v| v.value.as_str())
    }

    /// Adds a variable unless one with the same name exists.
    ///
    /// Returns `true` if the variable was added. First write wins.
    pub fn add_variable(&mut self, name: impl Into<String>, value: impl Into<String>) -> bool {
        let name = name.into();
        if self.variable(&name).is_some() {
            return false;
        }
        self.variables.push(NamedValue { name, value: value.into() });
        true
    }

    /// Sets a variable, overwriting any existing value.
    pub fn update_variable(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.variables.iter_mut().find(|v| v.name == name) {
            Some(existing) => existing.value = value,
            None => self.variables.push(NamedValue { name: name.to_string(), value }),
        }
    }
}

fn unique_variables<'de, D>(deserializer: D) -> Result<Vec<NamedValue>, D::Error>
where
    D: Deserializer<'de>,
{
    let mut version = VersionDetail::default();
    for variable in Vec::<NamedValue>::deserialize(deserializer)? {
        version.add_variable(variable.name, variable.value);
    }
    Ok(version.variables)
}

/// A `(name, value)` pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedValue {
    /// Name.
    pub name: String,
    /// Value.
    pub value: String,
}

impl NamedValue {
    /// Creates a named value.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into() }
    }
}

/// Reference to a field of another object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_path: Option<String>,
}

/// Stage of an experiment.
///
/// Stages the handler does not know are kept verbatim in `Other`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ExperimentStage {
    #[default]
    Waiting,
    Initializing,
    Running,
    FinalizeLaunched,
    Completed,
    Other(String),
}

impl ExperimentStage {
    /// Returns the wire representation of the stage.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Waiting => "Waiting",
            Self::Initializing => "Initializing",
            Self::Running => "Running",
            Self::FinalizeLaunched => "FinalizeLaunched",
            Self::Completed => "Completed",
            Self::Other(stage) => stage,
        }
    }
}

impl From<String> for ExperimentStage {
    fn from(stage: String) -> Self {
        match stage.as_str() {
            "Waiting" => Self::Waiting,
            "Initializing" => Self::Initializing,
            "Running" => Self::Running,
            "FinalizeLaunched" => Self::FinalizeLaunched,
            "Completed" => Self::Completed,
            _ => Self::Other(stage),
        }
    }
}

impl From<ExperimentStage> for String {
    fn from(stage: ExperimentStage) -> Self {
        match stage {
            ExperimentStage::Other(stage) => stage,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for ExperimentStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observed state of an experiment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentStatus {
    /// Current stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<ExperimentStage>,
    /// Version recommended as the next baseline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommended_baseline: Option<String>,
    /// Version the analysis currently favors for promotion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_recommended_for_promotion: Option<String>,
    /// Analysis results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<Analysis>,
    /// Status conditions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ExperimentCondition>,
    /// Fields the handler does not interpret (timestamps, counters, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ExperimentStatus {
    /// Returns the condition of the given type, if present.
    pub fn condition(&self, kind: &str) -> Option<&ExperimentCondition> {
        self.conditions.iter().find(|c| c.kind == kind)
    }

    /// Whether the experiment has failed.
    ///
    /// A `Failed` condition counts unless its status is explicitly `False`.
    pub fn failed(&self) -> bool {
        self.condition(CONDITION_FAILED).is_some_and(|c| c.status != ConditionStatus::False)
    }

    /// The winning version, if the analysis found one.
    pub fn winner(&self) -> Option<&str> {
        let data = &self.analysis.as_ref()?.winner_assessment.as_ref()?.data;
        if data.winner_found { data.winner.as_deref() } else { None }
    }
}

/// Condition type set when an experiment completes.
pub const CONDITION_COMPLETED: &str = "Completed";
/// Condition type set when an experiment fails.
pub const CONDITION_FAILED: &str = "Failed";
/// Condition type set when the target has been acquired.
pub const CONDITION_TARGET_ACQUIRED: &str = "TargetAcquired";

/// Status of a condition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    #[serde(other)]
    Unknown,
}

/// A status condition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentCondition {
    /// Condition type, e.g. `Completed` or `Failed`.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

/// Analysis section of the status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner_assessment: Option<WinnerAssessment>,
    /// Other analysis results (aggregated metrics, version assessments, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Winner assessment produced by the analytics service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WinnerAssessment {
    #[serde(default)]
    pub data: WinnerAssessmentData,
}

/// Winner assessment payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WinnerAssessmentData {
    #[serde(default)]
    pub winner_found: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_variable_first_write_wins() {
        let mut version = VersionDetail::new("v1");
        assert!(version.add_variable("revision", "rev-1"));
        assert!(!version.add_variable("revision", "rev-2"));
        assert_eq!(version.variable("revision"), Some("rev-1"));
        assert_eq!(version.variables.len(), 1);
    }

    #[test]
    fn test_parsed_variables_keep_first_value() {
        let yaml = r"
name: v1
variables:
- name: revision
  value: a
- name: revision
  value: b
- name: namespace
  value: prod
";
        let version: VersionDetail = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(version.variables.len(), 2);
        assert_eq!(version.variable("revision"), Some("a"));
        assert_eq!(version.variables[1], NamedValue::new("namespace", "prod"));
    }

    #[test]
    fn test_update_variable_overwrites() {
        let mut version = VersionDetail::new("v1");
        version.update_variable("namespace", "default");
        version.update_variable("namespace", "prod");
        assert_eq!(version.variable("namespace"), Some("prod"));
        assert_eq!(version.variables.len(), 1);
    }

    #[test]
    fn test_version_info_find_prefers_baseline() {
        let info = VersionInfo {
            baseline: VersionDetail::new("default"),
            candidates: vec![VersionDetail::new("canary")],
        };
        assert_eq!(info.find("default").map(|v| v.name.as_str()), Some("default"));
        assert_eq!(info.find("canary").map(|v| v.name.as_str()), Some("canary"));
        assert!(info.find("missing").is_none());
        assert_eq!(info.versions().count(), 2);
    }

    #[test]
    fn test_testing_pattern_wire_names() {
        let pattern: TestingPattern = serde_json::from_str(r#""A/B/N""#).unwrap();
        assert_eq!(pattern, TestingPattern::ABN);
        assert_eq!(serde_json::to_string(&TestingPattern::AB).unwrap(), r#""A/B""#);
    }

    #[test]
    fn test_unrecognized_stage_is_kept() {
        let status: ExperimentStatus = serde_yaml::from_str("stage: Paused\n").unwrap();
        assert_eq!(status.stage, Some(ExperimentStage::Other("Paused".to_string())));
        assert_eq!(status.stage.as_ref().map(ExperimentStage::as_str), Some("Paused"));
        assert_eq!(serde_json::to_value(&status).unwrap()["stage"], "Paused");

        let status: ExperimentStatus = serde_yaml::from_str("stage: Completed\n").unwrap();
        assert_eq!(status.stage, Some(ExperimentStage::Completed));
    }

    #[test]
    fn test_unrecognized_condition_status_is_unknown() {
        let condition: ExperimentCondition =
            serde_yaml::from_str("type: Failed\nstatus: Maybe\n").unwrap();
        assert_eq!(condition.status, ConditionStatus::Unknown);
    }

    #[test]
    fn test_failed_condition() {
        let mut status = ExperimentStatus::default();
        assert!(!status.failed());

        status.conditions.push(ExperimentCondition {
            kind: CONDITION_FAILED.to_string(),
            status: ConditionStatus::False,
            ..Default::default()
        });
        assert!(!status.failed());

        status.conditions[0].status = ConditionStatus::Unknown;
        assert!(status.failed());
    }

    #[test]
    fn test_winner_requires_winner_found() {
        let mut status = ExperimentStatus {
            analysis: Some(Analysis {
                winner_assessment: Some(WinnerAssessment {
                    data: WinnerAssessmentData {
                        winner_found: false,
                        winner: Some("v2".to_string()),
                    },
                }),
                extra: Map::new(),
            }),
            ..Default::default()
        };
        assert_eq!(status.winner(), None);

        if let Some(analysis) = status.analysis.as_mut() {
            if let Some(assessment) = analysis.winner_assessment.as_mut() {
                assessment.data.winner_found = true;
            }
        }
        assert_eq!(status.winner(), Some("v2"));
    }

    #[test]
    fn test_unknown_fields_are_preserved() {
        let yaml = r"
target: default/productpage
criteria:
  requestCount: iter8-system/request-count
strategy:
  testingPattern: Canary
  weights:
    maxCandidateWeight: 100
";
        let spec: ExperimentSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.strategy.testing_pattern, TestingPattern::Canary);
        assert!(spec.extra.contains_key("criteria"));
        assert!(spec.strategy.extra.contains_key("weights"));

        let back = serde_json::to_value(&spec).unwrap();
        assert_eq!(back["criteria"]["requestCount"], "iter8-system/request-count");
    }
}
