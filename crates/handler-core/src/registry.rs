//! Task registry.
//!
//! Task libraries register themselves with a [`TaskRegistry`]; the registry
//! routes every [`TaskDescriptor`] to the library named by it. Adding a
//! library never touches this module.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::action::Action;
use crate::task::{Task, TaskDescriptor};

/// Errors that can occur while constructing tasks.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Neither `library` nor a `<library>/` task prefix was given.
    #[error("no library specified for task '{0}'")]
    NoLibrary(String),

    /// No library with this name is registered.
    #[error("unknown library: {0}")]
    UnknownLibrary(String),

    /// The library does not provide this task.
    #[error("unknown task: {0}")]
    UnknownTask(String),

    /// The `with` document does not decode into the task's inputs.
    #[error("{source}")]
    InvalidInputs {
        task: String,
        #[source]
        source: serde_json::Error,
    },

    /// The decoded inputs failed validation.
    #[error("invalid inputs for task {task}: {reason}")]
    Validation { task: String, reason: String },

    /// A library with the same name is already registered.
    #[error("library already registered: {0}")]
    DuplicateLibrary(String),
}

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// A named set of task constructors.
pub trait TaskLibrary: Send + Sync {
    /// Library name, the part before `/` in a qualified task name.
    fn name(&self) -> &'static str;

    /// Names of the tasks this library provides.
    fn task_names(&self) -> &'static [&'static str];

    /// Builds a task from its descriptor.
    ///
    /// Construction has no side effects.
    fn make_task(&self, descriptor: &TaskDescriptor) -> Result<Box<dyn Task>>;
}

/// Name and tasks of a registered library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryInfo {
    pub name: &'static str,
    pub tasks: &'static [&'static str],
}

/// Registry of task libraries.
#[derive(Default, Clone)]
pub struct TaskRegistry {
    libraries: BTreeMap<String, Arc<dyn TaskLibrary>>,
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("libraries", &self.libraries.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl TaskRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a library.
    ///
    /// # Errors
    /// Returns [`RegistryError::DuplicateLibrary`] if the name is taken.
    pub fn register(&mut self, library: impl TaskLibrary + 'static) -> Result<()> {
        let name = library.name();
        if self.libraries.contains_key(name) {
            return Err(RegistryError::DuplicateLibrary(name.to_string()));
        }
        debug!(library = name, tasks = ?library.task_names(), "Registered task library");
        self.libraries.insert(name.to_string(), Arc::new(library));
        Ok(())
    }

    /// Registered libraries in name order.
    pub fn libraries(&self) -> Vec<LibraryInfo> {
        self.libraries
            .values()
            .map(|library| LibraryInfo { name: library.name(), tasks: library.task_names() })
            .collect()
    }

    /// Builds a task from its descriptor.
    pub fn make_task(&self, descriptor: &TaskDescriptor) -> Result<Box<dyn Task>> {
        let library_name = descriptor.library_name()?;
        let library = self
            .libraries
            .get(library_name)
            .ok_or_else(|| RegistryError::UnknownLibrary(library_name.to_string()))?;
        library.make_task(descriptor)
    }

    /// Builds every task of an action, stopping at the first failure.
    pub fn build_action(&self, descriptors: &[TaskDescriptor]) -> Result<Action> {
        let tasks = descriptors.iter().map(|d| self.make_task(d)).collect::<Result<Vec<_>>>()?;
        Ok(Action::new(tasks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::Experiment;
    use crate::task::{RunContext, TaskInputs, TaskMeta};
    use async_trait::async_trait;
    use serde::Deserialize;
    use std::any::Any;

    #[derive(Debug, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct NoopInputs {
        #[serde(default)]
        label: String,
    }

    impl TaskInputs for NoopInputs {}

    #[derive(Debug)]
    struct NoopTask {
        meta: TaskMeta,
        with: NoopInputs,
    }

    #[async_trait]
    impl Task for NoopTask {
        fn meta(&self) -> &TaskMeta {
            &self.meta
        }

        async fn run(&self, _: &Experiment, _: &RunContext) -> crate::task::Result<()> {
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct TestLibrary;

    impl TaskLibrary for TestLibrary {
        fn name(&self) -> &'static str {
            "test"
        }

        fn task_names(&self) -> &'static [&'static str] {
            &["noop"]
        }

        fn make_task(&self, descriptor: &TaskDescriptor) -> Result<Box<dyn Task>> {
            match descriptor.qualified_name().as_str() {
                "test/noop" => Ok(Box::new(NoopTask {
                    meta: TaskMeta::from_descriptor(descriptor)?,
                    with: descriptor.decode()?,
                })),
                other => Err(RegistryError::UnknownTask(other.to_string())),
            }
        }
    }

    fn registry() -> TaskRegistry {
        let mut registry = TaskRegistry::new();
        registry.register(TestLibrary).unwrap();
        registry
    }

    #[test]
    fn test_make_known_task() {
        let descriptor = TaskDescriptor::new("test", "noop").with_input("label", "x");
        let task = registry().make_task(&descriptor).unwrap();
        let noop = task.as_any().downcast_ref::<NoopTask>().unwrap();
        assert_eq!(noop.with.label, "x");
        assert_eq!(task.name(), "test/noop");
    }

    #[test]
    fn test_unknown_library() {
        let err = registry().make_task(&TaskDescriptor::new("nope", "noop")).unwrap_err();
        assert_eq!(err.to_string(), "unknown library: nope");
    }

    #[test]
    fn test_unknown_task() {
        let err = registry().make_task(&TaskDescriptor::new("test", "missing")).unwrap_err();
        assert_eq!(err.to_string(), "unknown task: test/missing");
    }

    #[test]
    fn test_duplicate_library() {
        let mut registry = registry();
        assert!(matches!(registry.register(TestLibrary), Err(RegistryError::DuplicateLibrary(_))));
    }

    #[test]
    fn test_build_action_stops_at_first_error() {
        let descriptors = vec![
            TaskDescriptor::new("test", "noop"),
            TaskDescriptor::new("test", "missing"),
            TaskDescriptor::new("nope", "noop"),
        ];
        let err = registry().build_action(&descriptors).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownTask(_)));
    }

    #[test]
    fn test_libraries_listing() {
        let libraries = registry().libraries();
        assert_eq!(libraries, vec![LibraryInfo { name: "test", tasks: &["noop"] }]);
    }
}
