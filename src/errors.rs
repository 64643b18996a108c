// src/errors.rs

//! Crate-wide error type, structured error kinds, and the `Result` alias.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::execution::ExecutionStatus;
use crate::types::{ExecutionId, PlanId, ProjectId};

#[derive(Error, Debug)]
pub enum PlanexecError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: u64 },

    #[error("plan {0} is not approved")]
    NotApproved(PlanId),

    #[error("plan {0} was rejected")]
    PlanRejected(PlanId),

    #[error("plan {plan_id} was already consumed by execution {execution_id}")]
    AlreadyConsumed {
        plan_id: PlanId,
        execution_id: ExecutionId,
    },

    #[error("project {project_id} already has an active execution ({execution_id})")]
    ConcurrencyLimit {
        project_id: ProjectId,
        execution_id: ExecutionId,
    },

    #[error("execution {execution_id} is already terminal ({status})")]
    AlreadyTerminal {
        execution_id: ExecutionId,
        status: ExecutionStatus,
    },

    #[error("execution {execution_id} is not terminal yet ({status})")]
    NotTerminal {
        execution_id: ExecutionId,
        status: ExecutionStatus,
    },

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("process vanished without an exit code: {0}")]
    OrphanedProcess(String),

    #[error("job left the scheduler without a known outcome: {0}")]
    UnknownTermination(String),

    #[error("runner panicked: {0}")]
    RunnerPanic(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Structured error kind recorded on failed executions and in audit entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    NotApproved,
    PlanRejected,
    AlreadyConsumed,
    ConcurrencyLimit,
    AlreadyTerminal,
    NotTerminal,
    InvalidTransition,
    /// The command batch itself exited non-zero.
    CommandFailed,
    Transport,
    Scheduler,
    OrphanedProcess,
    UnknownTermination,
    RunnerPanic,
    Config,
    Internal,
}

impl PlanexecError {
    pub fn not_found(entity: &'static str, id: u64) -> Self {
        PlanexecError::NotFound { entity, id }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PlanexecError::NotFound { .. } => ErrorKind::NotFound,
            PlanexecError::NotApproved(_) => ErrorKind::NotApproved,
            PlanexecError::PlanRejected(_) => ErrorKind::PlanRejected,
            PlanexecError::AlreadyConsumed { .. } => ErrorKind::AlreadyConsumed,
            PlanexecError::ConcurrencyLimit { .. } => ErrorKind::ConcurrencyLimit,
            PlanexecError::AlreadyTerminal { .. } => ErrorKind::AlreadyTerminal,
            PlanexecError::NotTerminal { .. } => ErrorKind::NotTerminal,
            PlanexecError::InvalidTransition(_) => ErrorKind::InvalidTransition,
            PlanexecError::Transport(_) => ErrorKind::Transport,
            PlanexecError::Scheduler(_) => ErrorKind::Scheduler,
            PlanexecError::OrphanedProcess(_) => ErrorKind::OrphanedProcess,
            PlanexecError::UnknownTermination(_) => ErrorKind::UnknownTermination,
            PlanexecError::RunnerPanic(_) => ErrorKind::RunnerPanic,
            PlanexecError::ConfigError(_) | PlanexecError::TomlError(_) => ErrorKind::Config,
            PlanexecError::IoError(_)
            | PlanexecError::JsonError(_)
            | PlanexecError::Other(_) => ErrorKind::Internal,
        }
    }

    /// Only transport failures during staging/collection are retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PlanexecError::Transport(_))
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, PlanexecError>;
