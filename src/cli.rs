// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, Subcommand, ValueEnum};

use crate::types::{ExecutionId, PlanId, ProjectId};

/// Command-line arguments for `planexec`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "planexec",
    version,
    about = "Review, approve and run shell command plans locally, over SSH, or on a batch scheduler.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Planexec.toml` in the current working directory. A missing
    /// file means built-in defaults.
    #[arg(long, value_name = "PATH", default_value = "Planexec.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `PLANEXEC_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Submit a plan from a TOML file and print its id and warnings.
    Plan {
        #[arg(long, value_name = "ID")]
        project: ProjectId,
        #[arg(long, value_name = "PATH")]
        file: String,
    },

    /// Approve a draft plan.
    Approve { plan_id: PlanId },

    /// Reject a draft plan.
    Reject { plan_id: PlanId },

    /// Run an approved plan.
    Run {
        plan_id: PlanId,
        /// Return right after dispatch instead of waiting for a terminal state.
        #[arg(long)]
        detach: bool,
    },

    /// Show an execution.
    Status { execution_id: ExecutionId },

    /// Print captured stdout/stderr of an execution.
    Logs { execution_id: ExecutionId },

    /// Request cancellation of an execution.
    Cancel { execution_id: ExecutionId },

    /// Collect download mappings of a finished execution.
    Collect { execution_id: ExecutionId },

    /// List files in a project's artifact directory.
    Artifacts {
        #[arg(long, value_name = "ID")]
        project: ProjectId,
    },
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
