//! Experiment handler CLI.
//!
//! Runs one named action of an experiment: `handler run --action finish`
//! inside the cluster job, `handler run-local` against a file while
//! developing, and `handler dryrun` to see what an action would do.

mod commands;

use clap::{Parser, Subcommand};
use handler_core::HandlerConfig;
use handler_core::config::DEFAULT_CONFIG_FILE;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use commands::{dryrun, run, version};

/// Runs the tasks of an experiment action
#[derive(Parser, Debug)]
#[command(name = "handler", author, version, about = "Runs the tasks of an experiment action")]
struct Args {
    /// Log level (trace, debug, info, warn, error); overrides LOG_LEVEL
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Configuration file; a missing file is ignored
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run an action of the experiment named by EXPERIMENT_NAME and EXPERIMENT_NAMESPACE
    Run {
        /// Action name, e.g. start or finish
        #[arg(short, long)]
        action: String,
    },

    /// Run an action of an experiment read from a file
    RunLocal {
        /// Experiment file (YAML or JSON)
        #[arg(short, long)]
        experiment: PathBuf,

        /// Action name
        #[arg(short, long)]
        action: String,

        /// Run only the task at this index
        #[arg(short, long)]
        task: Option<usize>,
    },

    /// Build every action of an experiment file and list its tasks
    Dryrun {
        /// Experiment file (YAML or JSON)
        #[arg(short, long)]
        experiment: PathBuf,
    },

    /// Print the handler version and the available task libraries
    Version,
}

fn level(name: &str) -> Level {
    match name.to_ascii_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = HandlerConfig::load(Some(&args.config))?;

    let log_level = args.log_level.as_deref().unwrap_or(&config.log_level);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level(log_level))
        .without_time()
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Command::Run { action } => run::execute(config, &action).await,
        Command::RunLocal { experiment, action, task } => {
            run::execute_local(config, &experiment, &action, task).await
        }
        Command::Dryrun { experiment } => dryrun::execute(&experiment),
        Command::Version => version::execute(),
    }
}
