//! Action runner.
//!
//! An [`Action`] is an ordered list of tasks executed one at a time. A task
//! with a condition only runs when the condition evaluates to `true` against
//! the experiment; the first failure stops the action.

use serde_json::Value;
use thiserror::Error;
use tracing::{Instrument, info, info_span};

use crate::condition::{Condition, ConditionError};
use crate::experiment::Experiment;
use crate::task::{RunContext, Task, TaskError};

/// Errors that can occur while running an action.
#[derive(Error, Debug)]
pub enum ActionError {
    /// A task condition failed to compile or evaluate.
    #[error("condition of task {index} ({task}) failed: {source}")]
    Condition {
        index: usize,
        task: String,
        #[source]
        source: ConditionError,
    },

    /// A task failed.
    #[error("task {index} ({task}) failed: {source}")]
    Task {
        index: usize,
        task: String,
        #[source]
        source: TaskError,
    },

    /// No task exists at the requested index.
    #[error("task index {index} out of range for an action with {len} task(s)")]
    IndexOutOfRange { index: usize, len: usize },
}

impl ActionError {
    /// The task error, when a task itself failed.
    pub fn task_error(&self) -> Option<&TaskError> {
        match self {
            Self::Task { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Result type for action operations.
pub type Result<T> = std::result::Result<T, ActionError>;

/// An ordered sequence of tasks.
#[derive(Debug, Default)]
pub struct Action {
    tasks: Vec<Box<dyn Task>>,
}

impl Action {
    /// Creates an action from constructed tasks.
    pub fn new(tasks: Vec<Box<dyn Task>>) -> Self {
        Self { tasks }
    }

    /// Appends a task.
    pub fn push(&mut self, task: Box<dyn Task>) {
        self.tasks.push(task);
    }

    /// The tasks of this action.
    pub fn tasks(&self) -> &[Box<dyn Task>] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// One line per task, in execution order.
    pub fn describe(&self) -> Vec<String> {
        self.tasks.iter().enumerate().map(|(i, task)| format!("{i}: {}", task.describe())).collect()
    }

    /// Runs every task in order.
    ///
    /// Stops at the first condition or task failure and returns it.
    pub async fn run(&self, experiment: &Experiment, context: &RunContext) -> Result<()> {
        let mut environment = None;
        for index in 0..self.tasks.len() {
            self.run_one(index, experiment, context, &mut environment).await?;
        }
        info!(tasks = self.tasks.len(), "Action completed");
        Ok(())
    }

    /// Runs the task at `index` only, honoring its condition.
    pub async fn run_task(
        &self,
        index: usize,
        experiment: &Experiment,
        context: &RunContext,
    ) -> Result<()> {
        if index >= self.tasks.len() {
            return Err(ActionError::IndexOutOfRange { index, len: self.tasks.len() });
        }
        self.run_one(index, experiment, context, &mut None).await
    }

    async fn run_one(
        &self,
        index: usize,
        experiment: &Experiment,
        context: &RunContext,
        environment: &mut Option<Value>,
    ) -> Result<()> {
        let task = &self.tasks[index];
        let name = task.name();
        let span = info_span!("task", index, task = %name);

        if let Some(condition) = task.condition() {
            let run = span
                .in_scope(|| should_run(condition, experiment, environment))
                .map_err(|source| ActionError::Condition { index, task: name.clone(), source })?;
            if !run {
                span.in_scope(|| info!(condition, "Condition is false, skipping task"));
                return Ok(());
            }
        }

        async {
            info!("Task starting");
            task.run(experiment, context).await?;
            info!("Task completed");
            Ok::<(), TaskError>(())
        }
        .instrument(span)
        .await
        .map_err(|source| ActionError::Task { index, task: name, source })
    }
}

/// Evaluates a condition, building the experiment document on first use.
fn should_run(
    source: &str,
    experiment: &Experiment,
    environment: &mut Option<Value>,
) -> std::result::Result<bool, ConditionError> {
    let condition = Condition::compile(source)?;
    let document = match environment.take() {
        Some(document) => document,
        None => experiment.to_document().map_err(|e| ConditionError::Environment(e.to_string()))?,
    };
    let result = condition.evaluate(&document);
    *environment = Some(document);
    result
}
