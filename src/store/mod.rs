// src/store/mod.rs

//! Plan/Execution store.
//!
//! Holds plans and executions behind one lock and enforces:
//! - approval is idempotent and never resets `approved_at`;
//! - an execution can only be created from an approved, unconsumed plan;
//! - execution updates follow the status state machine and only ever
//!   append to the audit log.
//!
//! With [`StorageMode::File`] every mutation is snapshotted to
//! `<data_dir>/store.json` so ids and history survive restarts.

pub mod layout;

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::{PlanexecError, Result};
use crate::execution::{AuditEventKind, Execution};
use crate::plan::{ExecutionPlan, PlanStatus};
use crate::types::{ExecutionId, PlanId, ProjectId, StorageMode};

pub use layout::{ProjectLayout, files_under};

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreState {
    next_plan_id: u64,
    next_execution_id: u64,
    plans: BTreeMap<PlanId, ExecutionPlan>,
    executions: BTreeMap<ExecutionId, Execution>,
}

impl StoreState {
    fn execution_for_plan(&self, plan_id: PlanId) -> Option<ExecutionId> {
        self.executions
            .values()
            .find(|e| e.plan_id == plan_id)
            .map(|e| e.id)
    }
}

#[derive(Debug)]
pub struct Store {
    layout: ProjectLayout,
    snapshot: Option<PathBuf>,
    state: Mutex<StoreState>,
}

impl Store {
    /// Open a store rooted at `layout` according to `mode`.
    pub fn open(mode: StorageMode, layout: ProjectLayout) -> Result<Self> {
        match mode {
            StorageMode::Memory => Ok(Self::in_memory(layout)),
            StorageMode::File => Self::open_file(layout),
        }
    }

    pub fn in_memory(layout: ProjectLayout) -> Self {
        Self {
            layout,
            snapshot: None,
            state: Mutex::new(StoreState::default()),
        }
    }

    /// Load `store.json` if present, otherwise start empty.
    pub fn open_file(layout: ProjectLayout) -> Result<Self> {
        let path = layout.snapshot_path();
        let state = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            let state: StoreState = serde_json::from_str(&contents)?;
            info!(
                path = ?path,
                plans = state.plans.len(),
                executions = state.executions.len(),
                "loaded store snapshot"
            );
            state
        } else {
            StoreState::default()
        };

        Ok(Self {
            layout,
            snapshot: Some(path),
            state: Mutex::new(state),
        })
    }

    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    /// Insert a new plan and return its id.
    pub fn create(&self, mut plan: ExecutionPlan) -> Result<PlanId> {
        let mut state = self.state.lock();
        state.next_plan_id += 1;
        let id = state.next_plan_id;
        plan.id = id;
        state.plans.insert(id, plan);
        self.persist(&state)?;
        debug!(plan_id = id, "plan created");
        Ok(id)
    }

    /// Approve a plan. Approving an approved plan returns it unchanged.
    pub fn approve(&self, id: PlanId) -> Result<ExecutionPlan> {
        let mut state = self.state.lock();
        let plan = state
            .plans
            .get_mut(&id)
            .ok_or_else(|| PlanexecError::not_found("plan", id))?;

        match plan.status {
            PlanStatus::Approved => return Ok(plan.clone()),
            PlanStatus::Rejected => return Err(PlanexecError::PlanRejected(id)),
            PlanStatus::Draft => {}
        }

        plan.status = PlanStatus::Approved;
        plan.approved_at = Some(Utc::now());
        let approved = plan.clone();
        self.persist(&state)?;
        info!(plan_id = id, "plan approved");
        Ok(approved)
    }

    /// Reject a draft plan. Rejecting a rejected plan is a no-op.
    pub fn reject(&self, id: PlanId) -> Result<ExecutionPlan> {
        let mut state = self.state.lock();
        let plan = state
            .plans
            .get_mut(&id)
            .ok_or_else(|| PlanexecError::not_found("plan", id))?;

        match plan.status {
            PlanStatus::Rejected => return Ok(plan.clone()),
            PlanStatus::Approved => {
                return Err(PlanexecError::InvalidTransition(format!(
                    "plan {id} is already approved"
                )));
            }
            PlanStatus::Draft => {}
        }

        plan.status = PlanStatus::Rejected;
        let rejected = plan.clone();
        self.persist(&state)?;
        info!(plan_id = id, "plan rejected");
        Ok(rejected)
    }

    pub fn get(&self, id: PlanId) -> Result<ExecutionPlan> {
        self.state
            .lock()
            .plans
            .get(&id)
            .cloned()
            .ok_or_else(|| PlanexecError::not_found("plan", id))
    }

    /// Create the single execution an approved plan may ever have.
    pub fn create_execution(&self, plan_id: PlanId) -> Result<Execution> {
        let mut state = self.state.lock();
        let plan = state
            .plans
            .get(&plan_id)
            .ok_or_else(|| PlanexecError::not_found("plan", plan_id))?;

        if plan.status != PlanStatus::Approved {
            return Err(PlanexecError::NotApproved(plan_id));
        }
        if let Some(execution_id) = state.execution_for_plan(plan_id) {
            return Err(PlanexecError::AlreadyConsumed {
                plan_id,
                execution_id,
            });
        }

        let (project_id, runner) = (plan.project_id, plan.runner);
        state.next_execution_id += 1;
        let id = state.next_execution_id;
        let (stdout_path, stderr_path) = self.layout.log_paths(project_id, id);

        let mut execution = Execution::new(plan_id, project_id, runner, stdout_path, stderr_path);
        execution.id = id;
        execution.record(
            AuditEventKind::Created,
            format!("execution {id} created from plan {plan_id} ({runner})"),
        );

        state.executions.insert(id, execution.clone());
        self.persist(&state)?;
        debug!(execution_id = id, plan_id, "execution created");
        Ok(execution)
    }

    pub fn get_execution(&self, id: ExecutionId) -> Result<Execution> {
        self.state
            .lock()
            .executions
            .get(&id)
            .cloned()
            .ok_or_else(|| PlanexecError::not_found("execution", id))
    }

    /// Replace a stored execution, enforcing the update invariants.
    pub fn update(&self, execution: Execution) -> Result<()> {
        let mut state = self.state.lock();
        let current = state
            .executions
            .get(&execution.id)
            .ok_or_else(|| PlanexecError::not_found("execution", execution.id))?;

        check_update(current, &execution)?;
        state.executions.insert(execution.id, execution);
        self.persist(&state)
    }

    /// Atomic read-modify-write of one execution.
    ///
    /// `f` runs on a copy under the store lock; the copy is committed only
    /// if `f` succeeds and the result passes the update invariants.
    pub fn modify_execution<F>(&self, id: ExecutionId, f: F) -> Result<Execution>
    where
        F: FnOnce(&mut Execution) -> Result<()>,
    {
        let mut state = self.state.lock();
        let current = state
            .executions
            .get(&id)
            .ok_or_else(|| PlanexecError::not_found("execution", id))?;

        let mut next = current.clone();
        f(&mut next)?;
        check_update(current, &next)?;

        state.executions.insert(id, next.clone());
        self.persist(&state)?;
        Ok(next)
    }

    /// The execution created from `plan_id`, if the plan has been run.
    pub fn execution_for_plan(&self, plan_id: PlanId) -> Option<ExecutionId> {
        self.state.lock().execution_for_plan(plan_id)
    }

    /// The non-terminal execution of a project, if any.
    pub fn active_execution_for_project(&self, project_id: ProjectId) -> Option<ExecutionId> {
        self.state
            .lock()
            .executions
            .values()
            .find(|e| e.project_id == project_id && !e.is_terminal())
            .map(|e| e.id)
    }

    pub fn executions_for_project(&self, project_id: ProjectId) -> Vec<Execution> {
        self.state
            .lock()
            .executions
            .values()
            .filter(|e| e.project_id == project_id)
            .cloned()
            .collect()
    }

    fn persist(&self, state: &StoreState) -> Result<()> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(state)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

fn check_update(current: &Execution, next: &Execution) -> Result<()> {
    if current.id != next.id || current.plan_id != next.plan_id {
        return Err(PlanexecError::InvalidTransition(format!(
            "execution {} cannot change identity",
            current.id
        )));
    }

    if current.status != next.status && !current.status.can_transition_to(next.status) {
        return Err(PlanexecError::InvalidTransition(format!(
            "execution {}: {} -> {}",
            current.id, current.status, next.status
        )));
    }

    let appended_only = next.audit_log.len() >= current.audit_log.len()
        && next.audit_log[..current.audit_log.len()] == current.audit_log[..];
    if !appended_only {
        return Err(PlanexecError::InvalidTransition(format!(
            "execution {}: audit log entries may only be appended",
            current.id
        )));
    }

    Ok(())
}
