// tests/coordinator_lifecycle.rs

mod common;
use crate::common::{ContextBuilder, Harness, PlanSpecBuilder};

use planexec::CancelNote;
use planexec::errors::PlanexecError;
use planexec::execution::ExecutionStatus;
use planexec::plan::PlanStatus;

#[tokio::test]
async fn run_requires_an_approved_plan() {
    let h = Harness::new();
    let (plan_id, _) = h
        .coordinator
        .submit_plan(1, PlanSpecBuilder::local().command("echo hi").build())
        .unwrap();

    match h.coordinator.run(plan_id).await {
        Err(PlanexecError::NotApproved(id)) => assert_eq!(id, plan_id),
        other => panic!("expected NotApproved, got {other:?}"),
    }
    assert!(h.coordinator.executions_for_project(1).is_empty());
}

#[tokio::test]
async fn unknown_plan_is_not_found() {
    let h = Harness::new();
    assert!(matches!(
        h.coordinator.approve_plan(99),
        Err(PlanexecError::NotFound { entity: "plan", id: 99 })
    ));
    assert!(matches!(
        h.coordinator.run(99).await,
        Err(PlanexecError::NotFound { .. })
    ));
}

#[tokio::test]
async fn approve_is_idempotent() {
    let h = Harness::new();
    let (plan_id, _) = h
        .coordinator
        .submit_plan(1, PlanSpecBuilder::local().command("true").build())
        .unwrap();

    let first = h.coordinator.approve_plan(plan_id).unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = h.coordinator.approve_plan(plan_id).unwrap();

    assert_eq!(first.status, PlanStatus::Approved);
    assert!(first.approved_at.is_some());
    assert_eq!(first.approved_at, second.approved_at);
    assert_eq!(first, second);
}

#[tokio::test]
async fn rejected_plans_cannot_be_approved_or_run() {
    let h = Harness::new();
    let (plan_id, _) = h
        .coordinator
        .submit_plan(1, PlanSpecBuilder::local().command("true").build())
        .unwrap();

    let rejected = h.coordinator.reject_plan(plan_id).unwrap();
    assert_eq!(rejected.status, PlanStatus::Rejected);

    assert!(matches!(
        h.coordinator.approve_plan(plan_id),
        Err(PlanexecError::PlanRejected(_))
    ));
    assert!(matches!(
        h.coordinator.run(plan_id).await,
        Err(PlanexecError::NotApproved(_))
    ));
}

#[tokio::test]
async fn approved_plans_cannot_be_rejected() {
    let h = Harness::new();
    let plan_id = h.approved(1, PlanSpecBuilder::local().command("true").build());
    assert!(matches!(
        h.coordinator.reject_plan(plan_id),
        Err(PlanexecError::InvalidTransition(_))
    ));
}

#[tokio::test]
async fn a_plan_is_consumed_by_one_execution() {
    let h = Harness::new();
    let plan_id = h.approved(1, PlanSpecBuilder::local().command("true").build());

    let id = h.coordinator.run(plan_id).await.unwrap();
    h.wait_done(id).await;

    match h.coordinator.run(plan_id).await {
        Err(PlanexecError::AlreadyConsumed {
            plan_id: p,
            execution_id,
        }) => {
            assert_eq!(p, plan_id);
            assert_eq!(execution_id, id);
        }
        other => panic!("expected AlreadyConsumed, got {other:?}"),
    }
}

#[tokio::test]
async fn one_active_execution_per_project() {
    let h = Harness::new();
    let first = h.approved(5, PlanSpecBuilder::local().command("sleep 30").build());
    let second = h.approved(5, PlanSpecBuilder::local().command("echo second").build());
    let other_project = h.approved(6, PlanSpecBuilder::local().command("echo other").build());

    let running = h.coordinator.run(first).await.unwrap();
    h.wait_until(running, |e| e.status == ExecutionStatus::Running)
        .await;

    match h.coordinator.run(second).await {
        Err(PlanexecError::ConcurrencyLimit {
            project_id,
            execution_id,
        }) => {
            assert_eq!(project_id, 5);
            assert_eq!(execution_id, running);
        }
        other => panic!("expected ConcurrencyLimit, got {other:?}"),
    }

    // Other projects are unaffected.
    let other = h.coordinator.run(other_project).await.unwrap();
    assert_eq!(h.wait_done(other).await.status, ExecutionStatus::Succeeded);

    // The rejected plan was not consumed and runs once the slot frees up.
    h.coordinator.cancel(running).await.unwrap();
    h.wait_done(running).await;
    let id = h.coordinator.run(second).await.unwrap();
    assert_eq!(h.wait_done(id).await.status, ExecutionStatus::Succeeded);
}

#[tokio::test]
async fn cancelling_a_terminal_execution_is_a_no_op() {
    let h = Harness::new();
    let plan_id = h.approved(1, PlanSpecBuilder::local().command("echo done").build());
    let id = h.coordinator.run(plan_id).await.unwrap();
    let before = h.wait_done(id).await;

    let outcome = h.coordinator.cancel(id).await.unwrap();
    assert_eq!(outcome.note, CancelNote::AlreadyTerminal);
    assert!(outcome.detail.unwrap().contains("already terminal"));
    assert_eq!(outcome.execution, before);
    assert_eq!(h.coordinator.status(id).unwrap(), before);
}

#[tokio::test]
async fn collect_requires_a_terminal_execution() {
    let h = Harness::new();
    let plan_id = h.approved(1, PlanSpecBuilder::local().command("sleep 30").build());
    let id = h.coordinator.run(plan_id).await.unwrap();
    h.wait_until(id, |e| e.status == ExecutionStatus::Running)
        .await;

    assert!(matches!(
        h.coordinator.collect(id).await,
        Err(PlanexecError::NotTerminal {
            status: ExecutionStatus::Running,
            ..
        })
    ));

    h.coordinator.cancel(id).await.unwrap();
    assert_eq!(h.wait_done(id).await.status, ExecutionStatus::Cancelled);
}

#[tokio::test]
async fn submit_resolves_named_profiles() {
    let h = Harness::with_config(|cfg| {
        cfg.profiles.insert(
            "cluster".to_string(),
            ContextBuilder::cluster().env_init("module load python").build(),
        );
    });

    let spec = PlanSpecBuilder::scheduler()
        .command("python train.py")
        .profile("cluster")
        .context(ContextBuilder::new().remote_dir("/scratch/alice/other").build())
        .build();
    let (plan_id, warnings) = h.coordinator.submit_plan(1, spec).unwrap();

    let plan = h.coordinator.plan(plan_id).unwrap();
    assert_eq!(plan.context.host, "login.example.org");
    assert_eq!(plan.context.remote_dir, "/scratch/alice/other");
    assert_eq!(plan.context.env_init, vec!["module load python".to_string()]);
    assert_eq!(plan.context.resources.partition.as_deref(), Some("gpu"));
    // Only the missing download mapping remains to warn about.
    assert_eq!(warnings.len(), 1, "{warnings:?}");
    assert_eq!(plan.warnings, warnings);
}

#[tokio::test]
async fn unknown_profile_is_a_config_error() {
    let h = Harness::new();
    let spec = PlanSpecBuilder::remote_shell()
        .command("true")
        .profile("nope")
        .build();
    assert!(matches!(
        h.coordinator.submit_plan(1, spec),
        Err(PlanexecError::ConfigError(msg)) if msg.contains("nope")
    ));
}

#[tokio::test]
async fn warnings_never_block_approval() {
    let h = Harness::new();
    let spec = PlanSpecBuilder::local().command("rm -rf build").command("   ").build();
    let (plan_id, warnings) = h.coordinator.submit_plan(1, spec).unwrap();
    assert_eq!(warnings.len(), 2);
    assert_eq!(h.coordinator.plan(plan_id).unwrap().status, PlanStatus::Draft);

    let approved = h.coordinator.approve_plan(plan_id).unwrap();
    assert_eq!(approved.status, PlanStatus::Approved);
    assert_eq!(approved.warnings, warnings);
}
