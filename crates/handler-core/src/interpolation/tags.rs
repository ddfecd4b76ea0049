use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::{error, warn};

use super::error::Result;
use super::template::Template;
use crate::experiment::Experiment;
use crate::store::Secret;

/// Label conventionally bound to the whole experiment.
pub const EXPERIMENT_LABEL: &str = "this";

/// Values available to templates.
///
/// Built by chaining `with*` calls, then used to [`interpolate`](Self::interpolate)
/// task inputs:
///
/// ```
/// use handler_core::interpolation::Tags;
///
/// let tags = Tags::new().with("name", "tester");
/// assert_eq!(tags.interpolate("hello {{.name}}").unwrap(), "hello tester");
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tags {
    values: Map<String, Value>,
}

impl Tags {
    /// Creates an empty tag store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Default tags for an experiment: the experiment document under `this`
    /// plus the variables of the version recommended for promotion.
    pub fn for_experiment(experiment: &Experiment) -> Self {
        let tags = match experiment.to_document() {
            Ok(document) => Self::new().with(EXPERIMENT_LABEL, document),
            Err(err) => {
                warn!(error = %err, "Unable to expose experiment to templates");
                Self::new()
            }
        };
        tags.with_recommended_version_for_promotion(experiment)
    }

    /// Inserts a value. Null values are ignored.
    pub fn with(mut self, label: impl Into<String>, value: impl Into<Value>) -> Self {
        let value = value.into();
        if !value.is_null() {
            self.values.insert(label.into(), value);
        }
        self
    }

    /// Inserts the decoded contents of a secret as a string map.
    pub fn with_secret(self, label: impl Into<String>, secret: Option<&Secret>) -> Self {
        let Some(secret) = secret else {
            return self;
        };
        let decoded: Map<String, Value> =
            secret.decoded().into_iter().map(|(k, v)| (k, Value::String(v))).collect();
        self.with(label, Value::Object(decoded))
    }

    /// Inserts `name` and every variable of the version recommended for promotion.
    ///
    /// Leaves the store unchanged, with a warning, when there is no
    /// recommendation or it names an unknown version.
    pub fn with_recommended_version_for_promotion(mut self, experiment: &Experiment) -> Self {
        let Ok(name) = experiment.version_recommended_for_promotion() else {
            warn!(experiment = %experiment.metadata.name, "No version recommended for promotion");
            return self;
        };
        let Ok(version) = experiment.version_detail(name) else {
            warn!(version = name, "Version recommended for promotion not found in version info");
            return self;
        };
        self.values.insert("name".to_string(), Value::String(version.name.clone()));
        let mut seen = HashSet::new();
        for variable in version.variables.iter().filter(|v| seen.insert(v.name.as_str())) {
            self.values.insert(variable.name.clone(), Value::String(variable.value.clone()));
        }
        self
    }

    /// Looks up a tag.
    pub fn get(&self, label: &str) -> Option<&Value> {
        self.values.get(label)
    }

    /// Number of tags.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The tags as a JSON document.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Renders `template` against the tags.
    ///
    /// An empty store returns the template unchanged.
    pub fn interpolate(&self, template: &str) -> Result<String> {
        if self.is_empty() {
            return Ok(template.to_string());
        }
        let document = Value::Object(self.values.clone());
        Template::compile(template)
            .and_then(|compiled| compiled.render(&document))
            .inspect_err(|err| error!(template, cause = err.cause(), "Unable to interpolate"))
    }

    /// Renders every template in `templates`.
    pub fn interpolate_all(&self, templates: &[String]) -> Result<Vec<String>> {
        templates.iter().map(|t| self.interpolate(t)).collect()
    }
}
