// tests/scheduler_runner.rs

mod common;
use crate::common::{ContextBuilder, FakeCluster, Harness, PlanSpecBuilder, with_timeout};

use std::sync::Arc;
use std::time::Duration;

use planexec::errors::ErrorKind;
use planexec::execution::{AuditEventKind, ExecutionStatus};
use planexec::plan::PlanStatus;
use planexec::runner::scheduler::{map_state, parse_history, parse_job_id};
use planexec::runner::script::{RemotePaths, render_batch_script};
use planexec::runner::{PollStatus, RunnerEnv, SchedulerRunner};
use planexec::store::ProjectLayout;

fn cluster_plan(command: &str) -> planexec::plan::PlanSpec {
    PlanSpecBuilder::scheduler()
        .command(command)
        .context(ContextBuilder::cluster().build())
        .build()
}

#[tokio::test]
async fn unbounded_job_without_downloads_warns_then_completes() {
    let h = Harness::new();
    let cluster = FakeCluster::install(&h.transport);

    let spec = PlanSpecBuilder::scheduler()
        .command("python train.py")
        .context(ContextBuilder::cluster().no_resources().build())
        .build();
    let (plan_id, warnings) = h.coordinator.submit_plan(1, spec).unwrap();

    assert_eq!(warnings.len(), 2, "{warnings:?}");
    assert!(warnings.iter().any(|w| w.contains("partition or time limit")));
    assert!(warnings.iter().any(|w| w.contains("no download mappings")));
    assert_eq!(h.coordinator.plan(plan_id).unwrap().status, PlanStatus::Draft);
    h.coordinator.approve_plan(plan_id).unwrap();

    let id = h.coordinator.run(plan_id).await.unwrap();
    let running = h
        .wait_until(id, |e| e.status == ExecutionStatus::Running)
        .await;
    assert_eq!(running.external_job_id.as_deref(), Some("J123"));
    assert!(
        h.transport
            .was_executed("sbatch --parsable /scratch/alice/run/.planexec/exec_1.sbatch")
    );
    assert!(
        running
            .audit_log
            .iter()
            .any(|e| e.kind == AuditEventKind::Submitted && e.detail == "job id J123")
    );

    cluster.set_queue_state(None);
    cluster.set_history(Some("COMPLETED|0:0"));

    let done = h.wait_done(id).await;
    assert_eq!(done.status, ExecutionStatus::Succeeded);
    assert_eq!(done.exit_code, Some(0));
    assert!(h.transport.was_executed("sacct"));
}

#[tokio::test]
async fn cancel_issues_scancel_for_the_job() {
    let h = Harness::new();
    let cluster = FakeCluster::install(&h.transport);

    let plan_id = h.approved(1, cluster_plan("python train.py"));
    let id = h.coordinator.run(plan_id).await.unwrap();
    h.wait_until(id, |e| e.status == ExecutionStatus::Running)
        .await;

    h.coordinator.cancel(id).await.unwrap();
    let done = h.wait_done(id).await;

    assert_eq!(done.status, ExecutionStatus::Cancelled);
    assert_eq!(cluster.cancelled(), vec!["J123".to_string()]);
    assert!(h.transport.was_executed("scancel J123"));

    // The scheduler itself now reports the job as cancelled.
    let plan = h.coordinator.plan(plan_id).unwrap();
    let env = RunnerEnv {
        config: Arc::new(h.coordinator.config().clone()),
        layout: ProjectLayout::new(h.data_dir()),
        transport: Arc::new(h.transport.clone()),
    };
    let runner = SchedulerRunner::new(&plan, &env);
    assert_eq!(runner.poll(&done).await.unwrap(), PollStatus::Cancelled);
}

#[tokio::test]
async fn rejected_submission_fails_without_a_job_id() {
    let h = Harness::new();
    let cluster = FakeCluster::install(&h.transport);
    cluster.fail_submission("sbatch: error: invalid partition specified: gpu");

    let plan_id = h.approved(1, cluster_plan("python train.py"));
    let id = h.coordinator.run(plan_id).await.unwrap();
    let done = h.wait_done(id).await;

    assert_eq!(done.status, ExecutionStatus::Failed);
    assert_eq!(done.failure_kind, Some(ErrorKind::Scheduler));
    assert!(done.external_job_id.is_none());
    assert!(done.detail.as_deref().unwrap().contains("invalid partition"));
}

#[tokio::test]
async fn job_missing_from_accounting_uses_the_completion_file() {
    let h = Harness::new();
    let cluster = FakeCluster::install(&h.transport);

    let plan_id = h.approved(1, cluster_plan("python train.py"));
    let id = h.coordinator.run(plan_id).await.unwrap();
    h.wait_until(id, |e| e.status == ExecutionStatus::Running)
        .await;

    cluster.set_completion_code(Some(3));
    cluster.set_queue_state(None);

    let done = h.wait_done(id).await;
    assert_eq!(done.status, ExecutionStatus::Failed);
    assert_eq!(done.exit_code, Some(3));
    assert_eq!(done.failure_kind, Some(ErrorKind::CommandFailed));
}

#[tokio::test]
async fn job_that_vanishes_without_trace_is_unknown_termination() {
    let h = Harness::new();
    let cluster = FakeCluster::install(&h.transport);

    let plan_id = h.approved(1, cluster_plan("python train.py"));
    let id = h.coordinator.run(plan_id).await.unwrap();
    h.wait_until(id, |e| e.status == ExecutionStatus::Running)
        .await;
    with_timeout(async {
        while !h.transport.was_executed("squeue") {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    cluster.set_queue_state(None);

    let done = h.wait_done(id).await;
    assert_eq!(done.status, ExecutionStatus::Failed);
    assert_eq!(done.failure_kind, Some(ErrorKind::UnknownTermination));
    let detail = done.detail.as_deref().unwrap();
    assert!(detail.starts_with("job left the scheduler without a known outcome"), "{detail}");
    assert!(detail.contains("J123"));
    assert!(detail.contains("after it was seen running"), "{detail}");
}

#[tokio::test]
async fn job_that_only_sat_in_the_queue_was_never_seen_running() {
    let h = Harness::new();
    let cluster = FakeCluster::install(&h.transport);
    cluster.set_queue_state(Some("PENDING"));

    let plan_id = h.approved(1, cluster_plan("python train.py"));
    let id = h.coordinator.run(plan_id).await.unwrap();
    h.wait_until(id, |e| e.status == ExecutionStatus::Running)
        .await;
    with_timeout(async {
        while !h.transport.was_executed("squeue") {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    cluster.set_queue_state(None);

    let done = h.wait_done(id).await;
    assert_eq!(done.failure_kind, Some(ErrorKind::UnknownTermination));
    let detail = done.detail.as_deref().unwrap();
    assert!(detail.contains("before it was seen running"), "{detail}");
}

#[tokio::test]
async fn scheduler_timeout_is_a_failure_with_detail() {
    let h = Harness::new();
    let cluster = FakeCluster::install(&h.transport);

    let plan_id = h.approved(1, cluster_plan("python train.py"));
    let id = h.coordinator.run(plan_id).await.unwrap();
    h.wait_until(id, |e| e.status == ExecutionStatus::Running)
        .await;

    cluster.set_queue_state(Some("TIMEOUT"));

    let done = h.wait_done(id).await;
    assert_eq!(done.status, ExecutionStatus::Failed);
    assert_eq!(done.failure_kind, Some(ErrorKind::CommandFailed));
    assert!(done.detail.as_deref().unwrap().contains("TIMEOUT"));
}

#[test]
fn job_ids_come_from_parsable_output() {
    assert_eq!(parse_job_id("123456\n"), Some("123456".to_string()));
    assert_eq!(parse_job_id("\n98765;cluster-a\n"), Some("98765".to_string()));
    assert_eq!(parse_job_id(""), None);
    assert_eq!(parse_job_id("Submitted batch job 42"), None);
}

#[test]
fn scheduler_states_map_to_poll_statuses() {
    assert_eq!(map_state("PENDING"), PollStatus::Running);
    assert_eq!(map_state("running"), PollStatus::Running);
    assert_eq!(map_state("COMPLETED"), PollStatus::Exited(0));
    assert_eq!(map_state("CANCELLED by 1000"), PollStatus::Cancelled);
    assert_eq!(map_state("CANCELLED+"), PollStatus::Cancelled);
    assert!(matches!(
        map_state("OUT_OF_MEMORY"),
        PollStatus::Failed { exit_code: None, ref detail } if detail.contains("OUT_OF_MEMORY")
    ));
    assert!(matches!(map_state("WEIRD"), PollStatus::Failed { .. }));
}

#[test]
fn accounting_history_carries_exit_codes() {
    assert_eq!(parse_history("COMPLETED|0:0\n"), Some(PollStatus::Exited(0)));
    assert_eq!(
        parse_history("FAILED|2:0\n"),
        Some(PollStatus::Failed {
            exit_code: Some(2),
            detail: "scheduler state FAILED".to_string(),
        })
    );
    assert_eq!(parse_history("CANCELLED by 1000|0:15"), Some(PollStatus::Cancelled));
    assert_eq!(parse_history(""), None);
    assert_eq!(parse_history("|0:0"), None);
}

#[test]
fn batch_script_carries_resource_directives() {
    let context = ContextBuilder::cluster()
        .memory("16G")
        .cpus(4)
        .gres("gpu:1")
        .env_init("module load cuda")
        .build();
    let spec = PlanSpecBuilder::scheduler()
        .command("python train.py")
        .context(context.clone())
        .build();
    let plan = planexec::plan::ExecutionPlan::draft(1, spec.runner, spec.commands, spec.context);
    let paths = RemotePaths::new(&context, 7);

    let script = render_batch_script(&plan, &paths, 7);
    let lines: Vec<&str> = script.lines().collect();

    assert_eq!(lines[0], "#!/bin/bash");
    for directive in [
        "#SBATCH -J planexec-7",
        "#SBATCH -p gpu",
        "#SBATCH -t 01:00:00",
        "#SBATCH --mem=16G",
        "#SBATCH -c 4",
        "#SBATCH --gres=gpu:1",
        "#SBATCH -o /scratch/alice/run/.planexec/exec_7.out",
        "#SBATCH -e /scratch/alice/run/.planexec/exec_7.err",
    ] {
        assert!(lines.contains(&directive), "missing {directive}");
    }

    // Directives must precede the first executable line.
    let last_directive = lines.iter().rposition(|l| l.starts_with("#SBATCH")).unwrap();
    let cd = lines.iter().position(|l| l.starts_with("cd ")).unwrap();
    assert!(last_directive < cd);
    assert!(lines.contains(&"trap 'echo $? > .planexec/exec_7.exit' EXIT"));

    let set_e = lines.iter().position(|l| *l == "set -e").unwrap();
    let init = lines.iter().position(|l| *l == "module load cuda").unwrap();
    let cmd = lines.iter().position(|l| *l == "python train.py").unwrap();
    assert!(cd < set_e && set_e < init && init < cmd);
}

#[tokio::test]
async fn cancel_before_submission_never_contacts_the_scheduler() {
    let h = Harness::new();
    let cluster = FakeCluster::install(&h.transport);
    let plan_id = h.approved(1, cluster_plan("python train.py"));

    let id = h.coordinator.run(plan_id).await.unwrap();
    h.coordinator.cancel(id).await.unwrap();
    let done = h.wait_done(id).await;

    assert_eq!(done.status, ExecutionStatus::Cancelled);
    assert!(done.external_job_id.is_none());
    assert_eq!(
        done.detail.as_deref(),
        Some("cancelled before anything was launched")
    );
    assert!(!h.transport.was_executed("sbatch"));
    assert!(!h.transport.was_executed("scancel"));
    assert!(cluster.cancelled().is_empty());
    assert!(
        !done
            .audit_log
            .iter()
            .any(|e| e.kind == AuditEventKind::CancelUnconfirmed)
    );
}
