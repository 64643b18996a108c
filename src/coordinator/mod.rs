// src/coordinator/mod.rs

//! Execution Coordinator.
//!
//! Turns approved plans into executions and exposes the operations callers
//! use afterwards: status, logs, cancel, collect. `run` only creates the
//! execution and hands it to a background unit of work (see [`dispatch`]);
//! it never waits for the backend.

mod dispatch;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ConfigFile;
use crate::errors::{PlanexecError, Result};
use crate::execution::{
    AuditEventKind, CollectedArtifact, Execution, ExecutionStatus, record_artifacts,
};
use crate::plan::{ExecutionPlan, PlanSpec, PlanStatus, validate};
use crate::runner::{LogPair, Runner, RunnerEnv};
use crate::store::{ProjectLayout, Store};
use crate::transport::{OpenSshTransport, RemoteTransport};
use crate::types::{ExecutionId, PlanId, ProjectId};

/// What `cancel` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelNote {
    /// The execution was already terminal; nothing changed.
    AlreadyTerminal,
    /// The execution is now Cancelling (or was already).
    Requested,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelOutcome {
    pub execution: Execution,
    pub note: CancelNote,
    pub detail: Option<String>,
}

/// In-process handle on a dispatched execution.
#[derive(Debug)]
struct ActiveRun {
    cancel: CancellationToken,
    done: watch::Receiver<Option<Execution>>,
}

#[derive(Debug)]
struct Inner {
    config: Arc<ConfigFile>,
    store: Store,
    env: RunnerEnv,
    active: Mutex<HashMap<ExecutionId, ActiveRun>>,
    /// Serialises the concurrency check with execution creation.
    run_gate: Mutex<()>,
}

/// Cheap to clone; clones share the same store and active set.
#[derive(Debug, Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    pub fn new(config: ConfigFile, transport: Arc<dyn RemoteTransport>) -> Result<Self> {
        let layout = ProjectLayout::new(&config.data_dir);
        let store = Store::open(config.storage_mode, layout.clone())?;
        let config = Arc::new(config);

        Ok(Self {
            inner: Arc::new(Inner {
                env: RunnerEnv {
                    config: Arc::clone(&config),
                    layout,
                    transport,
                },
                config,
                store,
                active: Mutex::new(HashMap::new()),
                run_gate: Mutex::new(()),
            }),
        })
    }

    /// Coordinator talking to real hosts through the system `ssh`.
    pub fn from_config(config: ConfigFile) -> Result<Self> {
        let transport = Arc::new(OpenSshTransport::new(config.remote.clone()));
        Self::new(config, transport)
    }

    pub fn config(&self) -> &ConfigFile {
        &self.inner.config
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    /// Create a draft plan, resolve its profile, and attach warnings.
    pub fn submit_plan(&self, project_id: ProjectId, spec: PlanSpec) -> Result<(PlanId, Vec<String>)> {
        let mut context = spec.context;
        if let Some(name) = spec.profile.as_deref() {
            let profile = self
                .inner
                .config
                .profile(name)
                .ok_or_else(|| PlanexecError::ConfigError(format!("unknown profile '{name}'")))?;
            context.inherit_from(profile);
        }

        let mut plan = ExecutionPlan::draft(project_id, spec.runner, spec.commands, context);
        let warnings = validate(&plan);
        plan.warnings = warnings.clone();

        let plan_id = self.inner.store.create(plan)?;
        info!(
            plan_id,
            project_id,
            runner = %spec.runner,
            warnings = warnings.len(),
            "plan submitted"
        );
        for warning in &warnings {
            warn!(plan_id, "{warning}");
        }
        Ok((plan_id, warnings))
    }

    pub fn approve_plan(&self, plan_id: PlanId) -> Result<ExecutionPlan> {
        self.inner.store.approve(plan_id)
    }

    pub fn reject_plan(&self, plan_id: PlanId) -> Result<ExecutionPlan> {
        self.inner.store.reject(plan_id)
    }

    pub fn plan(&self, plan_id: PlanId) -> Result<ExecutionPlan> {
        self.inner.store.get(plan_id)
    }

    /// Create an execution for an approved plan and dispatch it.
    ///
    /// Returns as soon as the execution exists; it is still Pending.
    pub async fn run(&self, plan_id: PlanId) -> Result<ExecutionId> {
        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(None);
        let (plan, execution) = {
            let _gate = self.inner.run_gate.lock();
            let plan = self.inner.store.get(plan_id)?;

            if plan.status != PlanStatus::Approved {
                return Err(PlanexecError::NotApproved(plan_id));
            }
            if let Some(execution_id) = self.inner.store.execution_for_plan(plan_id) {
                return Err(PlanexecError::AlreadyConsumed {
                    plan_id,
                    execution_id,
                });
            }
            if let Some(execution_id) =
                self.inner.store.active_execution_for_project(plan.project_id)
            {
                return Err(PlanexecError::ConcurrencyLimit {
                    project_id: plan.project_id,
                    execution_id,
                });
            }

            let execution = self.inner.store.create_execution(plan_id)?;
            self.inner.active.lock().insert(
                execution.id,
                ActiveRun {
                    cancel: cancel.clone(),
                    done: done_rx,
                },
            );
            (plan, execution)
        };

        let id = execution.id;
        let execution = self
            .inner
            .store
            .modify_execution(id, |e| {
                for (i, command) in plan.commands.iter().enumerate() {
                    e.record(
                        AuditEventKind::CommandQueued,
                        format!("[{}] {command}", i + 1),
                    );
                }
                Ok(())
            })
            .inspect_err(|_| {
                self.inner.active.lock().remove(&id);
            })?;

        info!(execution_id = id, plan_id, runner = %plan.runner, "execution dispatched");
        dispatch::spawn(Arc::clone(&self.inner), execution, plan, cancel, done_tx);
        Ok(id)
    }

    pub fn status(&self, execution_id: ExecutionId) -> Result<Execution> {
        self.inner.store.get_execution(execution_id)
    }

    /// Current stdout/stderr, pulling remote logs first where applicable.
    pub async fn fetch_logs(&self, execution_id: ExecutionId) -> Result<LogPair> {
        let execution = self.inner.store.get_execution(execution_id)?;
        let plan = self.inner.store.get(execution.plan_id)?;
        let runner = Runner::for_plan(&plan, &self.inner.env);
        runner.fetch_logs(&execution).await
    }

    /// Request cancellation.
    ///
    /// Cancelling a terminal execution changes nothing and reports
    /// [`CancelNote::AlreadyTerminal`].
    pub async fn cancel(&self, execution_id: ExecutionId) -> Result<CancelOutcome> {
        let current = self.inner.store.get_execution(execution_id)?;
        if current.is_terminal() {
            return Ok(already_terminal(current));
        }
        if current.status == ExecutionStatus::Cancelling {
            return Ok(CancelOutcome {
                execution: current,
                note: CancelNote::Requested,
                detail: None,
            });
        }

        // The supervisor settles before it leaves the active set, so holding
        // the active set across the status change means a non-terminal
        // execution still has its token here if it was dispatched.
        let (requested, token) = {
            let active = self.inner.active.lock();
            let requested = self.inner.store.modify_execution(execution_id, |e| {
                if e.is_terminal() {
                    return Err(PlanexecError::AlreadyTerminal {
                        execution_id: e.id,
                        status: e.status,
                    });
                }
                e.record(AuditEventKind::CancelRequested, "cancel requested");
                e.transition(ExecutionStatus::Cancelling, "cancel requested")
            });
            let token = active.get(&execution_id).map(|run| run.cancel.clone());
            (requested, token)
        };
        let requested = match requested {
            Ok(execution) => execution,
            Err(PlanexecError::AlreadyTerminal { .. }) => {
                return Ok(already_terminal(self.inner.store.get_execution(execution_id)?));
            }
            Err(e) => return Err(e),
        };
        info!(execution_id, "cancellation requested");

        let execution = match token {
            Some(token) => {
                token.cancel();
                requested
            }
            // No unit of work in this process owns it: signal directly.
            None => self.cancel_detached(requested).await?,
        };

        Ok(CancelOutcome {
            execution,
            note: CancelNote::Requested,
            detail: None,
        })
    }

    async fn cancel_detached(&self, execution: Execution) -> Result<Execution> {
        let execution = self.inner.store.get_execution(execution.id)?;
        if execution.is_terminal() {
            return Ok(execution);
        }
        let plan = self.inner.store.get(execution.plan_id)?;
        let runner = Runner::for_plan(&plan, &self.inner.env);
        let ack = runner.cancel(&execution).await;
        dispatch::settle_cancelled(&self.inner, execution.id, ack)
    }

    /// Pull download mappings back and digest them.
    ///
    /// Only terminal executions can be collected.
    pub async fn collect(&self, execution_id: ExecutionId) -> Result<Vec<CollectedArtifact>> {
        let execution = self.inner.store.get_execution(execution_id)?;
        if !execution.is_terminal() {
            return Err(PlanexecError::NotTerminal {
                execution_id,
                status: execution.status,
            });
        }

        let plan = self.inner.store.get(execution.plan_id)?;
        let runner = Runner::for_plan(&plan, &self.inner.env);
        let artifacts = runner.collect(&execution, &plan).await?;

        self.inner.store.modify_execution(execution_id, |e| {
            record_artifacts(e, &artifacts);
            Ok(())
        })?;
        info!(execution_id, count = artifacts.len(), "artifacts collected");
        Ok(artifacts)
    }

    /// Resolve once the execution's background unit of work has finished.
    ///
    /// Executions not dispatched by this coordinator resolve to their
    /// stored state immediately.
    pub async fn wait(&self, execution_id: ExecutionId) -> Result<Execution> {
        let done = self
            .inner
            .active
            .lock()
            .get(&execution_id)
            .map(|run| run.done.clone());

        if let Some(mut done) = done {
            if let Ok(result) = done.wait_for(Option::is_some).await {
                if let Some(execution) = result.clone() {
                    return Ok(execution);
                }
            }
        }
        self.inner.store.get_execution(execution_id)
    }

    pub fn executions_for_project(&self, project_id: ProjectId) -> Vec<Execution> {
        self.inner.store.executions_for_project(project_id)
    }

    /// Files under the project's artifact directory, relative and sorted.
    pub fn list_artifacts(&self, project_id: ProjectId) -> Result<Vec<PathBuf>> {
        Ok(self.inner.env.layout.list_artifacts(project_id)?)
    }
}

fn already_terminal(execution: Execution) -> CancelOutcome {
    let detail = PlanexecError::AlreadyTerminal {
        execution_id: execution.id,
        status: execution.status,
    }
    .to_string();
    CancelOutcome {
        execution,
        note: CancelNote::AlreadyTerminal,
        detail: Some(detail),
    }
}
