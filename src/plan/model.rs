// src/plan/model.rs

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{PlanId, ProjectId, RunnerKind};

/// Review state of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Draft,
    Approved,
    Rejected,
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlanStatus::Draft => "draft",
            PlanStatus::Approved => "approved",
            PlanStatus::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// Batch-scheduler resource requests.
///
/// Rendered as `#SBATCH` directives ahead of the plan's commands:
///
/// ```toml
/// [context.resources]
/// partition = "gpu"
/// time_limit = "01:00:00"
/// memory = "16G"
/// cpus = 4
/// gres = "gpu:1"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceDirectives {
    pub partition: Option<String>,
    pub time_limit: Option<String>,
    pub memory: Option<String>,
    pub cpus: Option<u32>,
    pub gres: Option<String>,
}

impl ResourceDirectives {
    pub fn is_empty(&self) -> bool {
        self.partition.is_none()
            && self.time_limit.is_none()
            && self.memory.is_none()
            && self.cpus.is_none()
            && self.gres.is_none()
    }

    /// Fill every unset directive from `other`.
    pub fn inherit_from(&mut self, other: &ResourceDirectives) {
        if self.partition.is_none() {
            self.partition = other.partition.clone();
        }
        if self.time_limit.is_none() {
            self.time_limit = other.time_limit.clone();
        }
        if self.memory.is_none() {
            self.memory = other.memory.clone();
        }
        if self.cpus.is_none() {
            self.cpus = other.cpus;
        }
        if self.gres.is_none() {
            self.gres = other.gres.clone();
        }
    }
}

/// One staging copy: a local path and its remote counterpart.
///
/// For uploads the copy goes local -> remote, for downloads remote -> local.
/// Relative local paths resolve against the project's artifact directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathMapping {
    pub local: PathBuf,
    pub remote: String,
}

impl PathMapping {
    pub fn new(local: impl Into<PathBuf>, remote: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            remote: remote.into(),
        }
    }
}

/// Where and how a remote plan runs.
///
/// Unused by `Local` plans. `credential` is a reference (a key path or
/// agent identity), never key material.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionContext {
    pub host: String,
    pub port: Option<u16>,
    pub username: String,
    pub credential: Option<String>,
    /// Remote working directory; empty means the login directory.
    pub remote_dir: String,
    pub resources: ResourceDirectives,
    /// Commands run before the plan's commands (e.g. `module load ...`).
    pub env_init: Vec<String>,
    pub upload: Vec<PathMapping>,
    pub download: Vec<PathMapping>,
}

impl ExecutionContext {
    /// Fill every empty field from a named profile.
    ///
    /// Lists (`env_init`, `upload`, `download`) are only inherited when the
    /// plan leaves them empty; they are never merged.
    pub fn inherit_from(&mut self, profile: &ExecutionContext) {
        if self.host.is_empty() {
            self.host = profile.host.clone();
        }
        if self.port.is_none() {
            self.port = profile.port;
        }
        if self.username.is_empty() {
            self.username = profile.username.clone();
        }
        if self.credential.is_none() {
            self.credential = profile.credential.clone();
        }
        if self.remote_dir.is_empty() {
            self.remote_dir = profile.remote_dir.clone();
        }
        self.resources.inherit_from(&profile.resources);
        if self.env_init.is_empty() {
            self.env_init = profile.env_init.clone();
        }
        if self.upload.is_empty() {
            self.upload = profile.upload.clone();
        }
        if self.download.is_empty() {
            self.download = profile.download.clone();
        }
    }

    pub fn effective_remote_dir(&self) -> &str {
        if self.remote_dir.trim().is_empty() {
            "."
        } else {
            self.remote_dir.as_str()
        }
    }
}

/// What a caller submits: runner kind, commands, and context.
///
/// This is also the on-disk format read by `planexec plan --file`:
///
/// ```toml
/// runner = "scheduler"
/// profile = "cluster"
/// commands = ["python train.py"]
///
/// [context]
/// download = [{ local = "results/metrics.json", remote = "out/metrics.json" }]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSpec {
    pub runner: RunnerKind,
    pub commands: Vec<String>,
    #[serde(default)]
    pub context: ExecutionContext,
    /// Optional `[profile.<name>]` from `Planexec.toml` to inherit from.
    #[serde(default)]
    pub profile: Option<String>,
}

/// A reviewed batch of commands plus its target-runner context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub id: PlanId,
    pub project_id: ProjectId,
    pub runner: RunnerKind,
    pub commands: Vec<String>,
    pub context: ExecutionContext,
    pub status: PlanStatus,
    pub warnings: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
}

impl ExecutionPlan {
    /// Build a fresh draft; the store assigns the real id on insert.
    pub fn draft(
        project_id: ProjectId,
        runner: RunnerKind,
        commands: Vec<String>,
        context: ExecutionContext,
    ) -> Self {
        Self {
            id: 0,
            project_id,
            runner,
            commands,
            context,
            status: PlanStatus::Draft,
            warnings: Vec::new(),
            created_at: Utc::now(),
            approved_at: None,
        }
    }
}
