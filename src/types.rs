use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identifier of the project that owns a plan.
pub type ProjectId = u64;

/// Identifier of a stored [`ExecutionPlan`](crate::plan::ExecutionPlan).
pub type PlanId = u64;

/// Identifier of a stored [`Execution`](crate::execution::Execution).
pub type ExecutionId = u64;

/// Backend a plan targets.
///
/// - `Local`: a child process on this machine.
/// - `RemoteShell`: a process on a remote host reached over SSH.
/// - `Scheduler`: a batch job submitted to a cluster scheduler (Slurm).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerKind {
    Local,
    RemoteShell,
    Scheduler,
}

impl RunnerKind {
    /// True for the kinds that reach a remote host.
    pub fn is_remote(self) -> bool {
        matches!(self, RunnerKind::RemoteShell | RunnerKind::Scheduler)
    }
}

impl fmt::Display for RunnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunnerKind::Local => "local",
            RunnerKind::RemoteShell => "remote_shell",
            RunnerKind::Scheduler => "scheduler",
        };
        f.write_str(s)
    }
}

impl FromStr for RunnerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(RunnerKind::Local),
            "remote_shell" | "remote-shell" | "ssh" => Ok(RunnerKind::RemoteShell),
            "scheduler" | "slurm" => Ok(RunnerKind::Scheduler),
            other => Err(format!(
                "invalid runner kind: {other} (expected \"local\", \"remote_shell\" or \"scheduler\")"
            )),
        }
    }
}

/// Where the plan/execution store keeps its records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// Snapshot every mutation to `<data_dir>/store.json`.
    File,
    /// Keep records in memory only (lost on restart).
    Memory,
}

impl Default for StorageMode {
    fn default() -> Self {
        StorageMode::File
    }
}
