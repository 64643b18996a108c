// src/runner/mod.rs

//! Command Runner Protocol.
//!
//! A runner knows how to `stage`, `start`, `poll`, `fetch_logs`, `collect`
//! and `cancel` one execution on one backend. The set of backends is
//! closed, so [`Runner`] is an enum rather than a trait object; the
//! coordinator drives every variant through the same state machine.
//!
//! - [`local`]: a child process tree under the project's artifact dir.
//! - [`remote`]: a detached process on an SSH host.
//! - [`scheduler`]: a Slurm batch job submitted over SSH.

pub mod local;
pub mod remote;
pub mod retry;
pub mod scheduler;
pub mod script;

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::config::ConfigFile;
use crate::errors::Result;
use crate::execution::{CollectedArtifact, Execution};
use crate::plan::ExecutionPlan;
use crate::store::ProjectLayout;
use crate::transport::RemoteTransport;
use crate::types::RunnerKind;

pub use local::LocalRunner;
pub use remote::RemoteShellRunner;
pub use retry::{RetryConfig, RetryPolicy};
pub use scheduler::SchedulerRunner;

/// Shared dependencies every runner is built from.
#[derive(Debug, Clone)]
pub struct RunnerEnv {
    pub config: Arc<ConfigFile>,
    pub layout: ProjectLayout,
    pub transport: Arc<dyn RemoteTransport>,
}

/// What `start` learned about the launched work.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Launch {
    pub process_id: Option<u32>,
    pub job_id: Option<String>,
}

/// Backend view of an execution, as reported by `poll`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    Running,
    /// The batch finished with this exit code.
    Exited(i32),
    /// The backend reports the work as failed without a usable exit code
    /// of its own (e.g. a scheduler TIMEOUT).
    Failed {
        exit_code: Option<i32>,
        detail: String,
    },
    /// The backend reports the work as cancelled.
    Cancelled,
    /// The process is gone and left no exit status.
    Orphaned(String),
    /// The job left the scheduler with no recorded outcome.
    UnknownTermination(String),
}

/// Outcome of delivering a cancellation signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelAck {
    Delivered,
    /// Nothing was launched yet, so there was nothing to signal.
    NotStarted,
    /// The signal could not be confirmed; the reason is recorded.
    Unconfirmed(String),
}

/// Captured standard output and error of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LogPair {
    pub stdout: String,
    pub stderr: String,
}

impl LogPair {
    /// Read both log files; missing files read as empty.
    pub async fn read(stdout: &Path, stderr: &Path) -> Result<Self> {
        Ok(Self {
            stdout: read_or_empty(stdout).await?,
            stderr: read_or_empty(stderr).await?,
        })
    }
}

async fn read_or_empty(path: &Path) -> Result<String> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug)]
pub enum Runner {
    Local(LocalRunner),
    RemoteShell(RemoteShellRunner),
    Scheduler(SchedulerRunner),
}

impl Runner {
    /// Pick the variant matching `plan.runner`.
    pub fn for_plan(plan: &ExecutionPlan, env: &RunnerEnv) -> Self {
        match plan.runner {
            RunnerKind::Local => Runner::Local(LocalRunner::new(env)),
            RunnerKind::RemoteShell => Runner::RemoteShell(RemoteShellRunner::new(plan, env)),
            RunnerKind::Scheduler => Runner::Scheduler(SchedulerRunner::new(plan, env)),
        }
    }

    pub fn kind(&self) -> RunnerKind {
        match self {
            Runner::Local(_) => RunnerKind::Local,
            Runner::RemoteShell(_) => RunnerKind::RemoteShell,
            Runner::Scheduler(_) => RunnerKind::Scheduler,
        }
    }

    pub async fn stage(&self, execution: &Execution, plan: &ExecutionPlan) -> Result<()> {
        match self {
            Runner::Local(r) => r.stage(execution, plan).await,
            Runner::RemoteShell(r) => r.stage(execution, plan).await,
            Runner::Scheduler(r) => r.stage(execution, plan).await,
        }
    }

    pub async fn start(&self, execution: &Execution, plan: &ExecutionPlan) -> Result<Launch> {
        match self {
            Runner::Local(r) => r.start(execution, plan).await,
            Runner::RemoteShell(r) => r.start(execution, plan).await,
            Runner::Scheduler(r) => r.start(execution, plan).await,
        }
    }

    pub async fn poll(&self, execution: &Execution) -> Result<PollStatus> {
        match self {
            Runner::Local(r) => r.poll(execution).await,
            Runner::RemoteShell(r) => r.poll(execution).await,
            Runner::Scheduler(r) => r.poll(execution).await,
        }
    }

    pub async fn fetch_logs(&self, execution: &Execution) -> Result<LogPair> {
        match self {
            Runner::Local(r) => r.fetch_logs(execution).await,
            Runner::RemoteShell(r) => r.fetch_logs(execution).await,
            Runner::Scheduler(r) => r.fetch_logs(execution).await,
        }
    }

    pub async fn collect(
        &self,
        execution: &Execution,
        plan: &ExecutionPlan,
    ) -> Result<Vec<CollectedArtifact>> {
        match self {
            Runner::Local(r) => r.collect(execution, plan).await,
            Runner::RemoteShell(r) => r.collect(execution, plan).await,
            Runner::Scheduler(r) => r.collect(execution, plan).await,
        }
    }

    pub async fn cancel(&self, execution: &Execution) -> Result<CancelAck> {
        match self {
            Runner::Local(r) => r.cancel(execution).await,
            Runner::RemoteShell(r) => r.cancel(execution).await,
            Runner::Scheduler(r) => r.cancel(execution).await,
        }
    }
}
