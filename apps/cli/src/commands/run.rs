//! `handler run` and `handler run-local`.

use anyhow::Context;
use handler_core::{
    Experiment, ExperimentBuilder, ExperimentStore, FileSystemStore, HandlerConfig, RunContext,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Runs `action` of the experiment named in the configuration.
pub async fn execute(config: HandlerConfig, action: &str) -> anyhow::Result<()> {
    let name = config.experiment()?;
    let store: Arc<dyn ExperimentStore> = Arc::new(FileSystemStore::new(&config.store_dir));

    info!(experiment = %name, "Fetching experiment");
    let experiment = ExperimentBuilder::new()
        .from_cluster(&name, store.as_ref(), &config.retry_policy())
        .await
        .build()
        .with_context(|| format!("Unable to resolve experiment {name}"))?;

    run_action(&experiment, action, None, &RunContext::new(config, store)).await
}

/// Runs `action` of the experiment in `path`, or only its task at `task`.
pub async fn execute_local(
    config: HandlerConfig,
    path: &Path,
    action: &str,
    task: Option<usize>,
) -> anyhow::Result<()> {
    let experiment = ExperimentBuilder::new()
        .from_file(path)
        .build()
        .with_context(|| format!("Unable to read experiment from {}", path.display()))?;
    let store: Arc<dyn ExperimentStore> = Arc::new(FileSystemStore::new(&config.store_dir));

    run_action(&experiment, action, task, &RunContext::new(config, store)).await
}

async fn run_action(
    experiment: &Experiment,
    action_name: &str,
    task: Option<usize>,
    context: &RunContext,
) -> anyhow::Result<()> {
    let descriptors = match experiment.action_spec(action_name) {
        Ok(descriptors) => descriptors,
        Err(err) if err.is_recoverable() => {
            warn!(action = action_name, error = %err, "Nothing to run");
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };

    let registry = handler_tasks::default_registry()?;
    let action = registry
        .build_action(descriptors)
        .with_context(|| format!("Unable to build action {action_name}"))?;

    info!(
        experiment = %experiment.namespaced_name(),
        action = action_name,
        tasks = action.len(),
        "Running action"
    );
    match task {
        Some(index) => action.run_task(index, experiment, context).await,
        None => action.run(experiment, context).await,
    }
    .with_context(|| format!("Action {action_name} failed"))
}
