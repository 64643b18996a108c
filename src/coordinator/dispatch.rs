// src/coordinator/dispatch.rs

//! Background unit of work for one execution.
//!
//! `spawn` starts two tasks: a worker that drives the runner through
//! stage, start and the poll loop, and a supervisor that awaits the worker,
//! converts a panic into a Failed execution, drops the execution from the
//! active set, and fills the write-once result channel.

use std::any::Any;
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::coordinator::Inner;
use crate::errors::{ErrorKind, PlanexecError, Result};
use crate::execution::{
    AuditEventKind, Execution, ExecutionStatus, digest_file, record_artifacts,
};
use crate::plan::ExecutionPlan;
use crate::runner::{CancelAck, Launch, PollStatus, Runner};
use crate::types::ExecutionId;

/// How a run ended, before it is written to the store.
#[derive(Debug)]
enum Outcome {
    Succeeded,
    Failed {
        kind: ErrorKind,
        detail: String,
        exit_code: Option<i32>,
    },
    Cancelled {
        detail: String,
        exit_code: Option<i32>,
    },
}

impl Outcome {
    fn from_error(err: &PlanexecError) -> Self {
        Outcome::Failed {
            kind: err.kind(),
            detail: err.to_string(),
            exit_code: None,
        }
    }
}

pub(crate) fn spawn(
    inner: Arc<Inner>,
    execution: Execution,
    plan: ExecutionPlan,
    cancel: CancellationToken,
    done: watch::Sender<Option<Execution>>,
) {
    let id = execution.id;
    tokio::spawn(async move {
        let worker = tokio::spawn(drive(Arc::clone(&inner), execution, plan, cancel));

        let result = match worker.await {
            Ok(Ok(())) => inner.store.get_execution(id),
            Ok(Err(err)) => {
                error!(execution_id = id, error = %err, "execution bookkeeping failed");
                settle(&inner, id, Outcome::from_error(&err))
            }
            Err(join_err) => {
                let message = if join_err.is_panic() {
                    panic_message(join_err.into_panic())
                } else {
                    "execution task was aborted".to_string()
                };
                error!(execution_id = id, message = %message, "runner panicked");
                settle(
                    &inner,
                    id,
                    Outcome::from_error(&PlanexecError::RunnerPanic(message)),
                )
            }
        };

        let result = result.and_then(|execution| digest_logs(&inner, execution));

        inner.active.lock().remove(&id);
        match result {
            Ok(execution) => {
                info!(execution_id = id, status = %execution.status, "execution finished");
                let _ = done.send(Some(execution));
            }
            Err(err) => {
                error!(execution_id = id, error = %err, "could not record final state");
                let _ = done.send(inner.store.get_execution(id).ok());
            }
        }
    });
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

async fn drive(
    inner: Arc<Inner>,
    execution: Execution,
    plan: ExecutionPlan,
    cancel: CancellationToken,
) -> Result<()> {
    let id = execution.id;
    let runner = Runner::for_plan(&plan, &inner.env);
    debug!(execution_id = id, runner = %runner.kind(), "dispatch started");

    // Stage. Cancellation here abandons staging; nothing was launched.
    let staged = tokio::select! {
        res = runner.stage(&execution, &plan) => res,
        _ = cancel.cancelled() => {
            settle_cancelled(&inner, id, Ok(CancelAck::NotStarted))?;
            return Ok(());
        }
    };
    if let Err(err) = staged {
        warn!(execution_id = id, error = %err, "staging failed");
        settle(&inner, id, Outcome::from_error(&err))?;
        return Ok(());
    }
    if runner.kind().is_remote() {
        inner.store.modify_execution(id, |e| {
            e.record(
                AuditEventKind::Staged,
                format!("{} upload(s) staged", plan.context.upload.len()),
            );
            Ok(())
        })?;
    }

    if cancel.is_cancelled() {
        settle_cancelled(&inner, id, Ok(CancelAck::NotStarted))?;
        return Ok(());
    }

    // Start. Not raced against cancellation so the launch is always recorded.
    let launch = match runner.start(&execution, &plan).await {
        Ok(launch) => launch,
        Err(err) => {
            warn!(execution_id = id, error = %err, "start failed");
            settle(&inner, id, Outcome::from_error(&err))?;
            return Ok(());
        }
    };
    let mut current = record_launch(&inner, id, &launch)?;

    // Poll until terminal or cancelled.
    let outcome = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let ack = runner.cancel(&current).await;
                fetch_remote_logs(&inner, &runner, &current).await;
                settle_cancelled(&inner, id, ack)?;
                return Ok(());
            }
            _ = tokio::time::sleep(inner.config.poll_interval) => {}
        }

        current = inner.store.get_execution(id)?;
        match runner.poll(&current).await {
            Ok(PollStatus::Running) => continue,
            Ok(PollStatus::Exited(0)) => break Outcome::Succeeded,
            Ok(PollStatus::Exited(code)) => {
                break Outcome::Failed {
                    kind: ErrorKind::CommandFailed,
                    detail: format!("command batch exited with status {code}"),
                    exit_code: Some(code),
                };
            }
            Ok(PollStatus::Failed { exit_code, detail }) => {
                break Outcome::Failed {
                    kind: ErrorKind::CommandFailed,
                    detail,
                    exit_code,
                };
            }
            Ok(PollStatus::Cancelled) => {
                break Outcome::Cancelled {
                    detail: "backend reports the work as cancelled".to_string(),
                    exit_code: None,
                };
            }
            Ok(PollStatus::Orphaned(detail)) => {
                break Outcome::from_error(&PlanexecError::OrphanedProcess(detail));
            }
            Ok(PollStatus::UnknownTermination(detail)) => {
                break Outcome::from_error(&PlanexecError::UnknownTermination(detail));
            }
            Err(err) => {
                warn!(execution_id = id, error = %err, "poll failed");
                break Outcome::from_error(&err);
            }
        }
    };

    fetch_remote_logs(&inner, &runner, &current).await;
    let succeeded = matches!(outcome, Outcome::Succeeded);
    let finished = settle(&inner, id, outcome)?;

    if succeeded
        && finished.status == ExecutionStatus::Succeeded
        && inner.config.collect_on_success
        && !plan.context.download.is_empty()
    {
        auto_collect(&inner, &runner, &finished, &plan).await?;
    }
    Ok(())
}

fn record_launch(inner: &Inner, id: ExecutionId, launch: &Launch) -> Result<Execution> {
    inner.store.modify_execution(id, |e| {
        e.process_id = launch.process_id;
        e.external_job_id = launch.job_id.clone();

        match (&launch.job_id, launch.process_id) {
            (Some(job), _) => e.record(AuditEventKind::Submitted, format!("job id {job}")),
            (None, Some(pid)) => e.record(AuditEventKind::Started, format!("pid {pid}")),
            (None, None) => e.record(AuditEventKind::Started, "started"),
        }

        // A cancel that raced the launch already moved it to Cancelling.
        if e.status == ExecutionStatus::Pending {
            e.transition(ExecutionStatus::Running, "")?;
        }
        Ok(())
    })
}

/// Pull remote logs into the local slots; failures only reach the audit log.
async fn fetch_remote_logs(inner: &Inner, runner: &Runner, execution: &Execution) {
    let launched = execution.process_id.is_some() || execution.external_job_id.is_some();
    if !runner.kind().is_remote() || !launched {
        return;
    }

    let (kind, detail) = match runner.fetch_logs(execution).await {
        Ok(logs) => (
            AuditEventKind::LogsFetched,
            format!(
                "stdout {} bytes, stderr {} bytes",
                logs.stdout.len(),
                logs.stderr.len()
            ),
        ),
        Err(err) => (AuditEventKind::Error, format!("fetching logs failed: {err}")),
    };

    let recorded = inner.store.modify_execution(execution.id, |e| {
        e.record(kind, detail);
        Ok(())
    });
    if let Err(err) = recorded {
        warn!(execution_id = execution.id, error = %err, "could not record log fetch");
    }
}

/// Record a digest of each local log slot once the run is over.
///
/// Slots that were never written (nothing launched, logs not fetched) are
/// skipped.
fn digest_logs(inner: &Inner, execution: Execution) -> Result<Execution> {
    let slots = [
        ("stdout", &execution.stdout_path),
        ("stderr", &execution.stderr_path),
    ];
    let digests: Vec<String> = slots
        .into_iter()
        .filter(|(_, path)| path.is_file())
        .filter_map(|(slot, path)| match digest_file(path) {
            Ok(digest) => Some(format!("{slot} {} digest={digest}", path.display())),
            Err(err) => {
                warn!(execution_id = execution.id, slot, error = %err, "could not digest log");
                None
            }
        })
        .collect();

    if digests.is_empty() {
        return Ok(execution);
    }
    inner.store.modify_execution(execution.id, |e| {
        for detail in &digests {
            e.record(AuditEventKind::LogsDigested, detail.clone());
        }
        Ok(())
    })
}

async fn auto_collect(
    inner: &Inner,
    runner: &Runner,
    execution: &Execution,
    plan: &ExecutionPlan,
) -> Result<()> {
    match runner.collect(execution, plan).await {
        Ok(artifacts) => {
            info!(execution_id = execution.id, count = artifacts.len(), "artifacts collected");
            inner.store.modify_execution(execution.id, |e| {
                record_artifacts(e, &artifacts);
                Ok(())
            })?;
        }
        Err(err) => {
            // The run itself succeeded; collection can be retried by the caller.
            warn!(execution_id = execution.id, error = %err, "automatic collection failed");
            inner.store.modify_execution(execution.id, |e| {
                e.record(AuditEventKind::Error, format!("collection failed: {err}"));
                Ok(())
            })?;
        }
    }
    Ok(())
}

/// Write a terminal outcome.
///
/// An execution already in Cancelling can only end Cancelled, whatever the
/// backend reported.
fn settle(inner: &Inner, id: ExecutionId, outcome: Outcome) -> Result<Execution> {
    inner.store.modify_execution(id, |e| {
        if e.is_terminal() {
            return Ok(());
        }

        let outcome = match outcome {
            Outcome::Cancelled { .. } => outcome,
            _ if e.status == ExecutionStatus::Cancelling => Outcome::Cancelled {
                detail: "cancelled while finishing".to_string(),
                exit_code: exit_code_of(&outcome),
            },
            other => other,
        };

        match outcome {
            Outcome::Succeeded => {
                e.exit_code = Some(0);
                e.transition(ExecutionStatus::Succeeded, "exit 0")
            }
            Outcome::Failed {
                kind,
                detail,
                exit_code,
            } => {
                e.exit_code = exit_code;
                e.record(AuditEventKind::Error, detail.clone());
                e.fail(kind, detail)
            }
            Outcome::Cancelled { detail, exit_code } => {
                e.exit_code = exit_code;
                e.detail = Some(detail.clone());
                e.transition(ExecutionStatus::Cancelled, detail)
            }
        }
    })
}

fn exit_code_of(outcome: &Outcome) -> Option<i32> {
    match outcome {
        Outcome::Succeeded => Some(0),
        Outcome::Failed { exit_code, .. } | Outcome::Cancelled { exit_code, .. } => *exit_code,
    }
}

/// Finish a cancellation once the signal has (or has not) been delivered.
///
/// Every path ends Cancelled; an unconfirmed signal is flagged in the audit
/// log.
pub(crate) fn settle_cancelled(
    inner: &Inner,
    id: ExecutionId,
    ack: Result<CancelAck>,
) -> Result<Execution> {
    let detail = match &ack {
        Ok(CancelAck::Delivered) => "cancellation signal delivered".to_string(),
        Ok(CancelAck::NotStarted) => "cancelled before anything was launched".to_string(),
        Ok(CancelAck::Unconfirmed(reason)) => format!("cancellation unconfirmed: {reason}"),
        Err(err) => format!("cancellation unconfirmed: {err}"),
    };
    let unconfirmed = !matches!(ack, Ok(CancelAck::Delivered | CancelAck::NotStarted));
    if unconfirmed {
        warn!(execution_id = id, detail = %detail, "cancellation could not be confirmed");
    }

    inner.store.modify_execution(id, |e| {
        if e.is_terminal() {
            return Ok(());
        }
        if unconfirmed {
            e.record(AuditEventKind::CancelUnconfirmed, detail.clone());
        }
        e.detail = Some(detail.clone());
        e.transition(ExecutionStatus::Cancelled, detail.clone())
    })
}
