// tests/local_runner.rs

mod common;
use crate::common::{Harness, PlanSpecBuilder};

use std::path::PathBuf;
use std::time::{Duration, Instant};

use planexec::errors::ErrorKind;
use planexec::execution::audit::digest_bytes;
use planexec::execution::{AuditEventKind, ExecutionStatus};

#[tokio::test]
async fn echo_hello_succeeds_and_captures_stdout() {
    let h = Harness::new();
    let plan_id = h.approved(1, PlanSpecBuilder::local().command("echo hello").build());

    let id = h.coordinator.run(plan_id).await.unwrap();
    let pending = h.coordinator.status(id).unwrap();
    assert_eq!(pending.status, ExecutionStatus::Pending);

    let done = h.wait_done(id).await;
    assert_eq!(done.status, ExecutionStatus::Succeeded);
    assert_eq!(done.exit_code, Some(0));
    assert!(done.started_at.is_some());
    assert!(done.finished_at.is_some());

    let logs = h.coordinator.fetch_logs(id).await.unwrap();
    assert!(logs.stdout.contains("hello"), "stdout was {:?}", logs.stdout);
}

#[tokio::test]
async fn first_failing_command_stops_the_batch() {
    let h = Harness::new();
    let spec = PlanSpecBuilder::local()
        .command("echo one")
        .command("exit 3")
        .command("echo never")
        .build();
    let plan_id = h.approved(1, spec);

    let id = h.coordinator.run(plan_id).await.unwrap();
    let done = h.wait_done(id).await;

    assert_eq!(done.status, ExecutionStatus::Failed);
    assert_eq!(done.exit_code, Some(3));
    assert_eq!(done.failure_kind, Some(ErrorKind::CommandFailed));
    assert!(done.detail.as_deref().unwrap_or("").contains("status 3"));

    let logs = h.coordinator.fetch_logs(id).await.unwrap();
    assert!(logs.stdout.contains("one"));
    assert!(!logs.stdout.contains("never"));
}

#[tokio::test]
async fn commands_run_in_the_project_artifact_dir() {
    let h = Harness::new();
    let plan_id = h.approved(
        7,
        PlanSpecBuilder::local()
            .command("mkdir -p out && echo data > out/result.txt")
            .build(),
    );

    let id = h.coordinator.run(plan_id).await.unwrap();
    let done = h.wait_done(id).await;
    assert_eq!(done.status, ExecutionStatus::Succeeded);

    let files = h.coordinator.list_artifacts(7).unwrap();
    assert!(files.contains(&PathBuf::from("out/result.txt")));
    assert!(files.contains(&PathBuf::from(format!("exec_{id}_stdout.log"))));
    assert!(files.contains(&PathBuf::from(format!("exec_{id}_stderr.log"))));

    // Local outputs are already in place; nothing to collect.
    let collected = h.coordinator.collect(id).await.unwrap();
    assert!(collected.is_empty());
}

#[tokio::test]
async fn stderr_is_captured_separately() {
    let h = Harness::new();
    let plan_id = h.approved(1, PlanSpecBuilder::local().command("echo oops >&2").build());

    let id = h.coordinator.run(plan_id).await.unwrap();
    h.wait_done(id).await;

    let logs = h.coordinator.fetch_logs(id).await.unwrap();
    assert!(logs.stderr.contains("oops"));
    assert!(!logs.stdout.contains("oops"));
}

#[tokio::test]
async fn cancel_terminates_a_running_local_process() {
    let h = Harness::new();
    let plan_id = h.approved(1, PlanSpecBuilder::local().command("sleep 30").build());

    let id = h.coordinator.run(plan_id).await.unwrap();
    h.wait_until(id, |e| e.status == ExecutionStatus::Running).await;

    let outcome = h.coordinator.cancel(id).await.unwrap();
    assert_eq!(outcome.note, planexec::CancelNote::Requested);
    assert_eq!(outcome.execution.status, ExecutionStatus::Cancelling);

    let done = h.wait_done(id).await;
    assert_eq!(done.status, ExecutionStatus::Cancelled);
    assert!(
        done.audit_log
            .iter()
            .any(|e| e.kind == AuditEventKind::CancelRequested)
    );
    assert!(
        !done
            .audit_log
            .iter()
            .any(|e| e.kind == AuditEventKind::CancelUnconfirmed)
    );
}

#[tokio::test]
async fn every_command_is_audited_before_dispatch() {
    let h = Harness::new();
    let plan_id = h.approved(
        1,
        PlanSpecBuilder::local()
            .command("echo a")
            .command("echo b")
            .build(),
    );

    let id = h.coordinator.run(plan_id).await.unwrap();
    let done = h.wait_done(id).await;

    let queued: Vec<&str> = done
        .audit_log
        .iter()
        .filter(|e| e.kind == AuditEventKind::CommandQueued)
        .map(|e| e.detail.as_str())
        .collect();
    assert_eq!(queued, vec!["[1] echo a", "[2] echo b"]);
    assert_eq!(done.audit_log[0].kind, AuditEventKind::Created);

    let timestamps: Vec<_> = done.audit_log.iter().map(|e| e.timestamp).collect();
    assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn captured_logs_are_digested_when_the_run_settles() {
    let h = Harness::new();
    let plan_id = h.approved(1, PlanSpecBuilder::local().command("echo hello").build());

    let id = h.coordinator.run(plan_id).await.unwrap();
    let done = h.wait_done(id).await;
    assert_eq!(done.status, ExecutionStatus::Succeeded);

    let digests: Vec<&str> = done
        .audit_log
        .iter()
        .filter(|e| e.kind == AuditEventKind::LogsDigested)
        .map(|e| e.detail.as_str())
        .collect();
    assert_eq!(digests.len(), 2, "{digests:?}");
    assert!(digests[0].starts_with("stdout "));
    assert!(digests[0].ends_with(&format!("digest={}", digest_bytes(b"hello\n"))));
    assert!(digests[1].starts_with("stderr "));
    assert!(digests[1].ends_with(&format!("digest={}", digest_bytes(b""))));

    // Recorded after the terminal transition.
    let settled = done
        .audit_log
        .iter()
        .position(|e| e.kind == AuditEventKind::StatusChanged && e.detail.contains("succeeded"))
        .unwrap();
    let first_digest = done
        .audit_log
        .iter()
        .position(|e| e.kind == AuditEventKind::LogsDigested)
        .unwrap();
    assert!(settled < first_digest);
}

#[tokio::test]
async fn process_ignoring_sigterm_is_killed_after_the_grace_period() {
    let grace = Duration::from_millis(300);
    let h = Harness::with_config(|c| c.cancel_grace = grace);
    let plan_id = h.approved(
        1,
        PlanSpecBuilder::local()
            .command("trap '' TERM; sleep 30")
            .build(),
    );

    let id = h.coordinator.run(plan_id).await.unwrap();
    h.wait_until(id, |e| e.status == ExecutionStatus::Running).await;
    // Let the shell install its trap.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let asked = Instant::now();
    h.coordinator.cancel(id).await.unwrap();
    let done = h.wait_done(id).await;
    let elapsed = asked.elapsed();

    assert_eq!(done.status, ExecutionStatus::Cancelled);
    assert!(elapsed >= grace, "ended after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(10), "ended after {elapsed:?}");
    assert!(
        !done
            .audit_log
            .iter()
            .any(|e| e.kind == AuditEventKind::CancelUnconfirmed)
    );
}
