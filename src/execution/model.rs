// src/execution/model.rs

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{ErrorKind, PlanexecError, Result};
use crate::execution::audit::{AuditEntry, AuditEventKind};
use crate::types::{ExecutionId, PlanId, ProjectId, RunnerKind};

/// Lifecycle state of an execution.
///
/// Transitions only move forward:
///
/// ```text
/// Pending -> Running -> { Succeeded | Failed | Cancelled }
///     \         \
///      \         -> Cancelling -> Cancelled
///       -> Failed | Cancelling | Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Cancelling,
    Succeeded,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Succeeded | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    pub fn can_transition_to(self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        match (self, next) {
            (Pending, Running | Failed | Cancelling | Cancelled) => true,
            (Running, Succeeded | Failed | Cancelling | Cancelled) => true,
            (Cancelling, Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Cancelling => "cancelling",
            ExecutionStatus::Succeeded => "succeeded",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// One run attempt derived from an approved plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub plan_id: PlanId,
    pub project_id: ProjectId,
    pub runner: RunnerKind,
    pub status: ExecutionStatus,
    /// Scheduler-assigned job id; absent for Local/RemoteShell.
    pub external_job_id: Option<String>,
    /// Local or remote process id, kept for cancellation.
    pub process_id: Option<u32>,
    pub exit_code: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
    /// Collected artifact path -> blake3 content digest.
    pub artifacts: BTreeMap<PathBuf, String>,
    pub failure_kind: Option<ErrorKind>,
    pub detail: Option<String>,
    pub audit_log: Vec<AuditEntry>,
}

impl Execution {
    pub fn new(
        plan_id: PlanId,
        project_id: ProjectId,
        runner: RunnerKind,
        stdout_path: PathBuf,
        stderr_path: PathBuf,
    ) -> Self {
        Self {
            id: 0,
            plan_id,
            project_id,
            runner,
            status: ExecutionStatus::Pending,
            external_job_id: None,
            process_id: None,
            exit_code: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            stdout_path,
            stderr_path,
            artifacts: BTreeMap::new(),
            failure_kind: None,
            detail: None,
            audit_log: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Append an audit entry.
    pub fn record(&mut self, kind: AuditEventKind, detail: impl Into<String>) {
        self.audit_log.push(AuditEntry::now(kind, detail));
    }

    /// Move to `next`, stamping timestamps and the audit log.
    pub fn transition(&mut self, next: ExecutionStatus, detail: impl Into<String>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(PlanexecError::InvalidTransition(format!(
                "execution {}: {} -> {}",
                self.id, self.status, next
            )));
        }

        let detail = detail.into();
        let note = if detail.is_empty() {
            format!("{} -> {}", self.status, next)
        } else {
            format!("{} -> {}: {}", self.status, next, detail)
        };

        self.status = next;
        let now = Utc::now();
        if next == ExecutionStatus::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.finished_at = Some(now);
        }
        self.audit_log
            .push(AuditEntry::at(now, AuditEventKind::StatusChanged, note));
        Ok(())
    }

    /// Terminate as `Failed`, keeping the structured kind and detail.
    pub fn fail(&mut self, kind: ErrorKind, detail: impl Into<String>) -> Result<()> {
        let detail = detail.into();
        self.transition(ExecutionStatus::Failed, detail.clone())?;
        self.failure_kind = Some(kind);
        self.detail = Some(detail);
        Ok(())
    }
}
