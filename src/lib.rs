// src/lib.rs

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod execution;
pub mod logging;
pub mod plan;
pub mod runner;
pub mod store;
pub mod transport;
pub mod types;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::cli::{CliArgs, Command};
use crate::config::{load_or_default, load_plan_spec};
use crate::coordinator::Coordinator;

pub use crate::coordinator::{CancelNote, CancelOutcome};
pub use crate::errors::{ErrorKind, PlanexecError};

/// High-level entry point used by `main.rs`.
///
/// Loads the config (defaults if the file is missing), builds a
/// coordinator over the system `ssh`, runs one subcommand and prints its
/// result as JSON on stdout.
pub async fn run(args: CliArgs) -> Result<()> {
    let config = load_or_default(&args.config)
        .with_context(|| format!("loading config from {}", args.config))?;
    let coordinator = Coordinator::from_config(config)?;

    match args.command {
        Command::Plan { project, file } => {
            let spec = load_plan_spec(&file).with_context(|| format!("reading plan {file}"))?;
            let (plan_id, _warnings) = coordinator.submit_plan(project, spec)?;
            print_json(&coordinator.plan(plan_id)?)
        }
        Command::Approve { plan_id } => print_json(&coordinator.approve_plan(plan_id)?),
        Command::Reject { plan_id } => print_json(&coordinator.reject_plan(plan_id)?),
        Command::Run { plan_id, detach } => {
            let execution_id = coordinator.run(plan_id).await?;
            if detach {
                return print_json(&coordinator.status(execution_id)?);
            }
            let execution = wait_or_cancel(&coordinator, execution_id).await?;
            print_json(&execution)
        }
        Command::Status { execution_id } => print_json(&coordinator.status(execution_id)?),
        Command::Logs { execution_id } => print_json(&coordinator.fetch_logs(execution_id).await?),
        Command::Cancel { execution_id } => print_json(&coordinator.cancel(execution_id).await?),
        Command::Collect { execution_id } => {
            let artifacts = coordinator.collect(execution_id).await?;
            print_json(&json!({ "execution_id": execution_id, "artifacts": artifacts }))
        }
        Command::Artifacts { project } => {
            let files = coordinator.list_artifacts(project)?;
            print_json(&json!({ "project_id": project, "artifacts": files }))
        }
    }
}

/// Wait for a terminal state; Ctrl-C requests cancellation and keeps
/// waiting for it to settle.
async fn wait_or_cancel(
    coordinator: &Coordinator,
    execution_id: types::ExecutionId,
) -> Result<execution::Execution> {
    tokio::select! {
        res = coordinator.wait(execution_id) => Ok(res?),
        ctrl_c = tokio::signal::ctrl_c() => {
            if let Err(e) = ctrl_c {
                warn!(error = %e, "failed to listen for Ctrl+C");
            }
            info!(execution_id, "Ctrl+C received; cancelling execution");
            coordinator.cancel(execution_id).await?;
            Ok(coordinator.wait(execution_id).await?)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("serialising output")?;
    println!("{out}");
    Ok(())
}
