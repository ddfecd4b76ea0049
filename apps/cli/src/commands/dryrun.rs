//! `handler dryrun`: build every action of an experiment without running it.

use anyhow::{Context, bail};
use colored::Colorize;
use handler_core::ExperimentBuilder;
use handler_core::experiment::HandlerPhase;
use std::path::Path;

const PHASES: [(HandlerPhase, &str); 5] = [
    (HandlerPhase::Start, "start"),
    (HandlerPhase::Finish, "finish"),
    (HandlerPhase::Rollback, "rollback"),
    (HandlerPhase::Failure, "failure"),
    (HandlerPhase::Loop, "loop"),
];

/// Prints the tasks each action would run.
///
/// Fails when any action cannot be built.
pub fn execute(path: &Path) -> anyhow::Result<()> {
    let experiment = ExperimentBuilder::new()
        .from_file(path)
        .build()
        .with_context(|| format!("Unable to read experiment from {}", path.display()))?;
    let registry = handler_tasks::default_registry()?;

    println!("{} {}", "experiment".bold(), experiment.namespaced_name().to_string().cyan());
    for (phase, label) in PHASES {
        if let Some(action) = experiment.handler_for(phase) {
            println!("  {} {} {}", label.dimmed(), "->".dimmed(), action);
        }
    }

    let names = experiment.action_names();
    if names.is_empty() {
        println!("{}", "no actions".yellow());
        return Ok(());
    }

    let mut failed = 0;
    for name in names {
        println!();
        println!("{} {}", "action".bold(), name.cyan());
        let built = experiment
            .action_spec(name)
            .map_err(anyhow::Error::from)
            .and_then(|descriptors| {
                registry.build_action(descriptors).map_err(anyhow::Error::from)
            });
        match built {
            Ok(action) if action.is_empty() => println!("  {}", "no tasks".dimmed()),
            Ok(action) => {
                for line in action.describe() {
                    println!("  {line}");
                }
            }
            Err(err) => {
                failed += 1;
                println!("  {} {err}", "error:".red().bold());
            }
        }
    }

    if failed > 0 {
        bail!("{failed} action(s) could not be built");
    }
    Ok(())
}
