// src/runner/scheduler.rs

//! Batch-scheduler runner (Slurm over SSH).
//!
//! `stage` uploads inputs and a rendered batch script, `start` submits it
//! and records the job id, `poll` reads the live queue and falls back to
//! accounting history and then the script's completion file once the job
//! leaves the queue.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use crate::config::SchedulerSection;
use crate::errors::{PlanexecError, Result};
use crate::execution::{CollectedArtifact, Execution};
use crate::plan::ExecutionPlan;
use crate::runner::remote::{
    RemoteAccess, check_upload_sources, close_session, stage_uploads,
};
use crate::runner::script::{read_exit_command, render_batch_script, scheduler_command};
use crate::runner::{CancelAck, Launch, LogPair, PollStatus, RunnerEnv};

#[derive(Debug)]
pub struct SchedulerRunner {
    remote: RemoteAccess,
    commands: SchedulerSection,
    /// Set once the queue has reported the job as RUNNING.
    seen_running: AtomicBool,
}

impl SchedulerRunner {
    pub fn new(plan: &ExecutionPlan, env: &RunnerEnv) -> Self {
        Self {
            remote: RemoteAccess::new(&plan.context, env),
            commands: env.config.scheduler.clone(),
            seen_running: AtomicBool::new(false),
        }
    }

    pub async fn stage(&self, execution: &Execution, plan: &ExecutionPlan) -> Result<()> {
        check_upload_sources(&self.remote.layout, execution, plan)?;
        let paths = &self.remote.paths(execution);
        let script = &render_batch_script(plan, paths, execution.id);
        let remote = &self.remote;

        remote
            .retry
            .execute("stage", || async move {
                let mut session = remote.open().await?;
                let result = async {
                    stage_uploads(session.as_mut(), &remote.layout, execution, plan, paths).await?;
                    session
                        .write_file(&paths.batch_script(), script.as_bytes())
                        .await
                }
                .await;
                close_session(session).await;
                result
            })
            .await
    }

    /// Submit the staged batch script and return the scheduler's job id.
    pub async fn start(&self, execution: &Execution, _plan: &ExecutionPlan) -> Result<Launch> {
        let paths = self.remote.paths(execution);
        let command = scheduler_command(&self.commands.submit_command, &paths.batch_script());
        let output = self.remote.exec_once(&command).await?;

        if !output.success() {
            return Err(PlanexecError::Scheduler(format!(
                "submission exited {}: {}",
                output.exit_code,
                output.stderr.trim()
            )));
        }

        let job_id = parse_job_id(&output.stdout).ok_or_else(|| {
            PlanexecError::Scheduler(format!(
                "could not parse job id from submission output {:?}",
                output.stdout.trim()
            ))
        })?;

        info!(execution_id = execution.id, job_id = %job_id, "batch job submitted");
        Ok(Launch {
            process_id: None,
            job_id: Some(job_id),
        })
    }

    pub async fn poll(&self, execution: &Execution) -> Result<PollStatus> {
        let Some(job_id) = execution.external_job_id.as_deref() else {
            return Err(PlanexecError::Scheduler(
                "poll requested before a job id was assigned".to_string(),
            ));
        };

        let mut session = self.remote.open().await?;
        let result = self.poll_with(session.as_mut(), execution, job_id).await;
        close_session(session).await;
        result
    }

    async fn poll_with(
        &self,
        session: &mut dyn crate::transport::RemoteSession,
        execution: &Execution,
        job_id: &str,
    ) -> Result<PollStatus> {
        let queue = session
            .exec(&scheduler_command(&self.commands.status_command, job_id))
            .await?;

        if queue.success() {
            if let Some(state) = first_state(&queue.stdout) {
                if state_word(state) == "RUNNING" {
                    self.seen_running.store(true, Ordering::Relaxed);
                }
                return Ok(map_state(state));
            }
        } else if !is_unknown_job(&queue.stderr) {
            return Err(PlanexecError::Scheduler(format!(
                "status query for job {job_id} exited {}: {}",
                queue.exit_code,
                queue.stderr.trim()
            )));
        }

        // The job has left the live queue.
        debug!(job_id, "job not in queue; consulting accounting history");
        let history = session
            .exec(&scheduler_command(&self.commands.history_command, job_id))
            .await?;
        if history.success() {
            if let Some(status) = parse_history(&history.stdout) {
                return Ok(status);
            }
        }

        let exit = session
            .exec(&read_exit_command(&self.remote.paths(execution)))
            .await?;
        if exit.success() {
            if let Ok(code) = exit.stdout.trim().parse::<i32>() {
                debug!(job_id, exit_code = code, "job outcome read from completion file");
                return Ok(PollStatus::Exited(code));
            }
        }

        let seen = if self.seen_running.load(Ordering::Relaxed) {
            "after it was seen running"
        } else {
            "before it was seen running"
        };
        warn!(job_id, "job vanished without a recorded outcome");
        Ok(PollStatus::UnknownTermination(format!(
            "job {job_id} left the scheduler {seen} and left no completion file"
        )))
    }

    /// Download the job's `#SBATCH -o/-e` files.
    pub async fn fetch_logs(&self, execution: &Execution) -> Result<LogPair> {
        let paths = self.remote.paths(execution);
        self.remote
            .fetch_logs(execution, &paths.stdout(), &paths.stderr())
            .await
    }

    pub async fn collect(
        &self,
        execution: &Execution,
        plan: &ExecutionPlan,
    ) -> Result<Vec<CollectedArtifact>> {
        self.remote.collect(execution, plan).await
    }

    pub async fn cancel(&self, execution: &Execution) -> Result<CancelAck> {
        let Some(job_id) = execution.external_job_id.as_deref() else {
            return Ok(CancelAck::NotStarted);
        };

        let command = scheduler_command(&self.commands.cancel_command, job_id);
        match self.remote.exec_once(&command).await {
            Ok(out) if out.success() => {
                info!(execution_id = execution.id, job_id, "scheduler cancel issued");
                Ok(CancelAck::Delivered)
            }
            Ok(out) => Ok(CancelAck::Unconfirmed(format!(
                "cancel of job {job_id} exited {}: {}",
                out.exit_code,
                out.stderr.trim()
            ))),
            Err(e) => Ok(CancelAck::Unconfirmed(e.to_string())),
        }
    }
}

/// `sbatch --parsable` prints `jobid` or `jobid;cluster`.
pub fn parse_job_id(stdout: &str) -> Option<String> {
    let line = stdout.lines().map(str::trim).find(|l| !l.is_empty())?;
    let id = line.split(';').next()?.trim();
    if !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.') {
        Some(id.to_string())
    } else {
        None
    }
}

fn first_state(stdout: &str) -> Option<&str> {
    stdout.lines().map(str::trim).find(|l| !l.is_empty())
}

fn is_unknown_job(stderr: &str) -> bool {
    stderr.to_ascii_lowercase().contains("invalid job id")
}

fn state_word(state: &str) -> String {
    state
        .split_whitespace()
        .next()
        .unwrap_or("")
        .trim_end_matches('+')
        .to_ascii_uppercase()
}

/// Map a scheduler state word (`RUNNING`, `CANCELLED by 42`, `COMPLETED+`)
/// to a poll status.
pub fn map_state(state: &str) -> PollStatus {
    let word = state_word(state);
    match word.as_str() {
        "PENDING" | "CONFIGURING" | "RUNNING" | "COMPLETING" | "SUSPENDED" | "REQUEUED"
        | "RESIZING" | "SIGNALING" | "STAGE_OUT" => PollStatus::Running,
        "COMPLETED" => PollStatus::Exited(0),
        "CANCELLED" => PollStatus::Cancelled,
        "FAILED" | "TIMEOUT" | "OUT_OF_MEMORY" | "NODE_FAIL" | "BOOT_FAIL" | "DEADLINE"
        | "PREEMPTED" | "REVOKED" => PollStatus::Failed {
            exit_code: None,
            detail: format!("scheduler state {word}"),
        },
        other => PollStatus::Failed {
            exit_code: None,
            detail: format!("unrecognised scheduler state {other:?}"),
        },
    }
}

/// Parse `State|ExitCode` lines from the accounting history.
pub fn parse_history(stdout: &str) -> Option<PollStatus> {
    let line = first_state(stdout)?;
    let mut fields = line.split('|');
    let state = fields.next()?.trim();
    if state.is_empty() {
        return None;
    }
    let exit_code = fields
        .next()
        .and_then(|f| f.split(':').next())
        .and_then(|c| c.trim().parse::<i32>().ok());

    Some(match map_state(state) {
        PollStatus::Failed { detail, .. } => PollStatus::Failed {
            exit_code: exit_code.filter(|c| *c != 0),
            detail,
        },
        PollStatus::Exited(_) => PollStatus::Exited(exit_code.unwrap_or(0)),
        other => other,
    })
}
