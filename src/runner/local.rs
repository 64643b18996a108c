// src/runner/local.rs

//! Local runner: the command batch as a `sh -c` child process.
//!
//! The child runs in the project's artifact directory in its own process
//! group with stdout/stderr redirected to the execution's log files. A
//! supervisor task owns the child and publishes its exit code on a watch
//! channel; cancellation goes through a oneshot to that supervisor.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::errors::{PlanexecError, Result};
use crate::execution::{CollectedArtifact, Execution};
use crate::plan::ExecutionPlan;
use crate::runner::script::render_local_script;
use crate::runner::{CancelAck, Launch, LogPair, PollStatus, RunnerEnv};
use crate::store::ProjectLayout;

/// Handle to a child spawned by this runner instance.
#[derive(Debug)]
struct ActiveChild {
    stop: Option<oneshot::Sender<()>>,
    exit: watch::Receiver<Option<i32>>,
}

#[derive(Debug)]
pub struct LocalRunner {
    layout: ProjectLayout,
    grace: Duration,
    child: Mutex<Option<ActiveChild>>,
}

impl LocalRunner {
    pub fn new(env: &RunnerEnv) -> Self {
        Self {
            layout: env.layout.clone(),
            grace: env.config.cancel_grace,
            child: Mutex::new(None),
        }
    }

    /// Nothing to stage locally.
    pub async fn stage(&self, _execution: &Execution, _plan: &ExecutionPlan) -> Result<()> {
        Ok(())
    }

    pub async fn start(&self, execution: &Execution, plan: &ExecutionPlan) -> Result<Launch> {
        let dir = self.layout.ensure_artifacts_dir(execution.project_id)?;
        let stdout = std::fs::File::create(&execution.stdout_path)?;
        let stderr = std::fs::File::create(&execution.stderr_path)?;

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(render_local_script(plan))
            .current_dir(&dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn()?;
        let pid = child.id();
        info!(
            execution_id = execution.id,
            pid = ?pid,
            dir = ?dir,
            "local process started"
        );

        let (stop_tx, stop_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = watch::channel(None);
        tokio::spawn(supervise(child, pid, self.grace, stop_rx, exit_tx));

        *self.child.lock() = Some(ActiveChild {
            stop: Some(stop_tx),
            exit: exit_rx,
        });

        Ok(Launch {
            process_id: pid,
            job_id: None,
        })
    }

    pub async fn poll(&self, execution: &Execution) -> Result<PollStatus> {
        let observed = self.child.lock().as_ref().map(|c| *c.exit.borrow());
        match observed {
            Some(Some(code)) => Ok(PollStatus::Exited(code)),
            Some(None) => Ok(PollStatus::Running),
            // Started by another process: only liveness is observable.
            None => {
                let Some(pid) = execution.process_id else {
                    return Ok(PollStatus::Orphaned(
                        "no local process was recorded".to_string(),
                    ));
                };
                if signal(pid, "-0").await {
                    Ok(PollStatus::Running)
                } else {
                    Ok(PollStatus::Orphaned(format!(
                        "local process {pid} exited without a recorded status"
                    )))
                }
            }
        }
    }

    pub async fn fetch_logs(&self, execution: &Execution) -> Result<LogPair> {
        LogPair::read(&execution.stdout_path, &execution.stderr_path).await
    }

    /// Local outputs are already in place.
    pub async fn collect(
        &self,
        _execution: &Execution,
        _plan: &ExecutionPlan,
    ) -> Result<Vec<CollectedArtifact>> {
        Ok(Vec::new())
    }

    pub async fn cancel(&self, execution: &Execution) -> Result<CancelAck> {
        let handle = {
            let mut guard = self.child.lock();
            guard
                .as_mut()
                .map(|c| (c.stop.take(), c.exit.clone()))
        };

        if let Some((stop, mut exit)) = handle {
            if let Some(stop) = stop {
                let _ = stop.send(());
            }
            // The supervisor publishes once the grace/kill sequence is done.
            exit.wait_for(|code| code.is_some())
                .await
                .map_err(|_| PlanexecError::RunnerPanic("local supervisor vanished".to_string()))?;
            return Ok(CancelAck::Delivered);
        }

        let Some(pid) = execution.process_id else {
            return Ok(CancelAck::NotStarted);
        };
        if signal_group(pid, "-TERM").await {
            Ok(CancelAck::Delivered)
        } else {
            Ok(CancelAck::Unconfirmed(format!(
                "could not signal local process {pid}"
            )))
        }
    }
}

async fn supervise(
    mut child: Child,
    pid: Option<u32>,
    grace: Duration,
    mut stop: oneshot::Receiver<()>,
    exit: watch::Sender<Option<i32>>,
) {
    let code = tokio::select! {
        status = child.wait() => match status {
            Ok(status) => exit_code(status),
            Err(e) => {
                warn!(pid = ?pid, error = %e, "waiting for local process failed");
                -1
            }
        },
        Ok(()) = &mut stop => terminate(&mut child, pid, grace).await,
    };

    debug!(pid = ?pid, exit_code = code, "local process finished");
    let _ = exit.send(Some(code));
}

/// SIGTERM the process group, wait `grace`, then SIGKILL.
async fn terminate(child: &mut Child, pid: Option<u32>, grace: Duration) -> i32 {
    info!(pid = ?pid, grace_ms = grace.as_millis() as u64, "terminating local process");
    if let Some(pid) = pid {
        signal_group(pid, "-TERM").await;
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => exit_code(status),
        Ok(Err(e)) => {
            warn!(pid = ?pid, error = %e, "waiting for terminated process failed");
            -1
        }
        Err(_) => {
            warn!(pid = ?pid, "grace period elapsed; killing local process");
            if let Some(pid) = pid {
                signal_group(pid, "-KILL").await;
            }
            if let Err(e) = child.kill().await {
                warn!(pid = ?pid, error = %e, "failed to kill local process");
            }
            child.wait().await.map(exit_code).unwrap_or(-1)
        }
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return 128 + sig;
        }
    }
    -1
}

async fn signal(pid: u32, sig: &str) -> bool {
    Command::new("kill")
        .arg(sig)
        .arg(pid.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

async fn signal_group(pid: u32, sig: &str) -> bool {
    let group = Command::new("kill")
        .arg(sig)
        .arg("--")
        .arg(format!("-{pid}"))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false);
    group || signal(pid, sig).await
}
