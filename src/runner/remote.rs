// src/runner/remote.rs

//! Remote-shell runner, plus the staging and collection helpers the
//! scheduler runner shares.
//!
//! Every phase opens its own session and closes it before returning,
//! whether the phase succeeded or not. Staging and collection are retried
//! on transport errors; start, poll and cancel are not.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::errors::{PlanexecError, Result};
use crate::execution::{CollectedArtifact, Execution, digest_file};
use crate::plan::{ExecutionContext, ExecutionPlan};
use crate::runner::script::{
    RemotePaths, kill_command, launch_command, probe_command, render_shell_script,
};
use crate::runner::{CancelAck, Launch, LogPair, PollStatus, RetryPolicy, RunnerEnv};
use crate::store::{ProjectLayout, files_under};
use crate::transport::{RemoteSession, RemoteTarget, RemoteTransport};

#[derive(Debug)]
pub struct RemoteShellRunner {
    remote: RemoteAccess,
}

impl RemoteShellRunner {
    pub fn new(plan: &ExecutionPlan, env: &RunnerEnv) -> Self {
        Self {
            remote: RemoteAccess::new(&plan.context, env),
        }
    }

    /// Upload inputs and the command script.
    pub async fn stage(&self, execution: &Execution, plan: &ExecutionPlan) -> Result<()> {
        check_upload_sources(&self.remote.layout, execution, plan)?;
        let paths = &self.remote.paths(execution);
        let script = &render_shell_script(plan, paths);
        let remote = &self.remote;

        remote
            .retry
            .execute("stage", || async move {
                let mut session = remote.open().await?;
                let result = async {
                    stage_uploads(session.as_mut(), &remote.layout, execution, plan, paths).await?;
                    session.write_file(&paths.script(), script.as_bytes()).await
                }
                .await;
                close_session(session).await;
                result
            })
            .await
    }

    /// Launch the staged script detached and record its pid.
    pub async fn start(&self, execution: &Execution, _plan: &ExecutionPlan) -> Result<Launch> {
        let paths = self.remote.paths(execution);
        let output = self.remote.exec_once(&launch_command(&paths)).await?;
        if !output.success() {
            return Err(PlanexecError::Transport(format!(
                "launching remote script failed (exit {}): {}",
                output.exit_code,
                output.stderr.trim()
            )));
        }

        let pid = output
            .stdout
            .lines()
            .rev()
            .find_map(|l| l.trim().parse::<u32>().ok())
            .ok_or_else(|| {
                PlanexecError::Transport(format!(
                    "could not read remote pid from {:?}",
                    output.stdout.trim()
                ))
            })?;

        info!(execution_id = execution.id, host = %self.remote.target.host, pid, "remote process started");
        Ok(Launch {
            process_id: Some(pid),
            job_id: None,
        })
    }

    pub async fn poll(&self, execution: &Execution) -> Result<PollStatus> {
        let Some(pid) = execution.process_id else {
            return Ok(PollStatus::Orphaned(
                "no remote process id was recorded".to_string(),
            ));
        };

        let paths = self.remote.paths(execution);
        let output = self.remote.exec_once(&probe_command(&paths, pid)).await?;
        parse_probe(output.stdout.trim(), pid)
    }

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

    /// Signal the remote process group over a fresh session.
    pub async fn cancel(&self, execution: &Execution) -> Result<CancelAck> {
        let Some(pid) = execution.process_id else {
            return Ok(CancelAck::NotStarted);
        };

        match self.remote.exec_once(&kill_command(pid)).await {
            Ok(out) if out.success() => Ok(CancelAck::Delivered),
            Ok(out) => Ok(CancelAck::Unconfirmed(format!(
                "kill {pid} exited {}: {}",
                out.exit_code,
                out.stderr.trim()
            ))),
            Err(e) => Ok(CancelAck::Unconfirmed(e.to_string())),
        }
    }
}

/// Interpret the output of [`probe_command`].
pub fn parse_probe(output: &str, pid: u32) -> Result<PollStatus> {
    let line = output.lines().last().unwrap_or("").trim();
    if line == "running" {
        return Ok(PollStatus::Running);
    }
    if line == "missing" {
        return Ok(PollStatus::Orphaned(format!(
            "remote process {pid} is gone and left no exit status"
        )));
    }
    if let Some(code) = line.strip_prefix("exited") {
        return code
            .trim()
            .parse::<i32>()
            .map(PollStatus::Exited)
            .map_err(|_| {
                PlanexecError::Transport(format!("unreadable exit status for {pid}: {line:?}"))
            });
    }
    Err(PlanexecError::Transport(format!(
        "unexpected probe output for {pid}: {line:?}"
    )))
}

/// Session handling shared by the remote-shell and scheduler runners.
#[derive(Debug)]
pub(crate) struct RemoteAccess {
    pub(crate) target: RemoteTarget,
    pub(crate) context: ExecutionContext,
    pub(crate) transport: Arc<dyn RemoteTransport>,
    pub(crate) layout: ProjectLayout,
    pub(crate) retry: RetryPolicy,
}

impl RemoteAccess {
    pub(crate) fn new(context: &ExecutionContext, env: &RunnerEnv) -> Self {
        Self {
            target: RemoteTarget::from_context(context),
            context: context.clone(),
            transport: Arc::clone(&env.transport),
            layout: env.layout.clone(),
            retry: RetryPolicy::new(env.config.retry.clone()),
        }
    }

    pub(crate) fn paths(&self, execution: &Execution) -> RemotePaths {
        RemotePaths::new(&self.context, execution.id)
    }

    pub(crate) async fn open(&self) -> Result<Box<dyn RemoteSession>> {
        self.transport.open(&self.target).await
    }

    /// Run one command over a short-lived session.
    pub(crate) async fn exec_once(&self, command: &str) -> Result<crate::transport::CommandOutput> {
        let mut session = self.open().await?;
        let result = session.exec(command).await;
        close_session(session).await;
        result
    }

    /// Download the remote log files into the execution's log slots.
    ///
    /// A log file that does not exist remotely yet leaves the local slot
    /// untouched.
    pub(crate) async fn fetch_logs(
        &self,
        execution: &Execution,
        remote_stdout: &str,
        remote_stderr: &str,
    ) -> Result<LogPair> {
        let mut session = self.open().await?;
        for (remote, local) in [
            (remote_stdout, &execution.stdout_path),
            (remote_stderr, &execution.stderr_path),
        ] {
            if let Err(e) = session.download(remote, local).await {
                debug!(execution_id = execution.id, remote, error = %e, "log not fetched");
            }
        }
        close_session(session).await;
        LogPair::read(&execution.stdout_path, &execution.stderr_path).await
    }

    /// Pull every download mapping back and digest what arrived.
    pub(crate) async fn collect(
        &self,
        execution: &Execution,
        plan: &ExecutionPlan,
    ) -> Result<Vec<CollectedArtifact>> {
        if plan.context.download.is_empty() {
            return Ok(Vec::new());
        }
        let paths = &self.paths(execution);

        self.retry
            .execute("collect", || async move {
                let mut session = self.open().await?;
                let result =
                    collect_downloads(session.as_mut(), &self.layout, execution, plan, paths).await;
                close_session(session).await;
                result
            })
            .await
    }
}

/// Release a session, logging rather than propagating close failures.
pub(crate) async fn close_session(session: Box<dyn RemoteSession>) {
    if let Err(e) = session.close().await {
        warn!(error = %e, "closing remote session failed");
    }
}

/// Fail fast on missing local inputs; retrying would not help.
pub(crate) fn check_upload_sources(
    layout: &ProjectLayout,
    execution: &Execution,
    plan: &ExecutionPlan,
) -> Result<()> {
    for mapping in &plan.context.upload {
        let local = layout.resolve_local(execution.project_id, &mapping.local);
        if !local.exists() {
            return Err(PlanexecError::Transport(format!(
                "upload source {:?} does not exist",
                local
            )));
        }
    }
    Ok(())
}

/// Copy every upload mapping to the remote host.
pub(crate) async fn stage_uploads(
    session: &mut dyn RemoteSession,
    layout: &ProjectLayout,
    execution: &Execution,
    plan: &ExecutionPlan,
    paths: &RemotePaths,
) -> Result<()> {
    for mapping in &plan.context.upload {
        let local = layout.resolve_local(execution.project_id, &mapping.local);
        let remote = paths.resolve(&mapping.remote);
        debug!(execution_id = execution.id, local = ?local, remote = %remote, "uploading");
        session.upload(&local, &remote).await?;
    }
    Ok(())
}

/// Copy every download mapping back and digest each retrieved file.
pub(crate) async fn collect_downloads(
    session: &mut dyn RemoteSession,
    layout: &ProjectLayout,
    execution: &Execution,
    plan: &ExecutionPlan,
    paths: &RemotePaths,
) -> Result<Vec<CollectedArtifact>> {
    let mut collected = Vec::new();
    for mapping in &plan.context.download {
        let local = layout.resolve_local(execution.project_id, &mapping.local);
        let remote = paths.resolve(&mapping.remote);
        debug!(execution_id = execution.id, remote = %remote, local = ?local, "downloading");
        session.download(&remote, &local).await?;

        for file in files_under(&local)? {
            let digest = digest_file(&file)?;
            collected.push(CollectedArtifact { path: file, digest });
        }
    }
    Ok(collected)
}


