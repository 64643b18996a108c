// tests/config_loading.rs

use std::error::Error;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use planexec::config::{load_and_validate, load_or_default, load_plan_spec, parse_duration};
use planexec::errors::{ErrorKind, PlanexecError};
use planexec::types::{RunnerKind, StorageMode};
use tempfile::NamedTempFile;

type TestResult = Result<(), Box<dyn Error>>;

fn config_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file
}

#[test]
fn empty_file_yields_defaults() -> TestResult {
    let file = config_file("");
    let cfg = load_and_validate(file.path())?;

    assert_eq!(cfg.data_dir, PathBuf::from(".planexec"));
    assert_eq!(cfg.storage_mode, StorageMode::File);
    assert_eq!(cfg.poll_interval, Duration::from_secs(2));
    assert_eq!(cfg.cancel_grace, Duration::from_secs(10));
    assert!(cfg.collect_on_success);
    assert_eq!(cfg.retry.max_retries, 3);
    assert_eq!(cfg.retry.initial_delay, Duration::from_millis(500));
    assert_eq!(cfg.remote.ssh_program, "ssh");
    assert_eq!(cfg.scheduler.submit_command, "sbatch --parsable");
    assert!(cfg.profiles.is_empty());
    Ok(())
}

#[test]
fn full_file_is_parsed() -> TestResult {
    let file = config_file(
        r#"
[config]
data_dir = "/var/lib/planexec"
storage_mode = "memory"
poll_interval = "500ms"
cancel_grace = "3s"
collect_on_success = false

[retry]
max_retries = 5
initial_delay = "1s"
max_delay = "1m"
backoff_multiplier = 1.5

[remote]
ssh_program = "/usr/bin/ssh"
connect_timeout = "30s"

[scheduler]
cancel_command = "scancel --signal=TERM"

[profile.cluster]
host = "login.example.org"
port = 2222
username = "alice"
credential = "~/.ssh/id_ed25519"
remote_dir = "/scratch/alice"
env_init = ["module load python/3.11"]

[profile.cluster.resources]
partition = "gpu"
cpus = 8
"#,
    );
    let cfg = load_and_validate(file.path())?;

    assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/planexec"));
    assert_eq!(cfg.storage_mode, StorageMode::Memory);
    assert_eq!(cfg.poll_interval, Duration::from_millis(500));
    assert_eq!(cfg.cancel_grace, Duration::from_secs(3));
    assert!(!cfg.collect_on_success);
    assert_eq!(cfg.retry.max_retries, 5);
    assert_eq!(cfg.retry.max_delay, Duration::from_secs(60));
    assert_eq!(cfg.retry.backoff_multiplier, 1.5);
    assert_eq!(cfg.remote.ssh_program, "/usr/bin/ssh");
    assert_eq!(cfg.remote.scp_program, "scp");
    assert_eq!(cfg.remote.connect_timeout, Duration::from_secs(30));
    assert_eq!(cfg.scheduler.cancel_command, "scancel --signal=TERM");
    assert_eq!(cfg.scheduler.status_command, "squeue --noheader --format=%T --jobs");

    let profile = cfg.profile("cluster").expect("profile should be loaded");
    assert_eq!(profile.port, Some(2222));
    assert_eq!(profile.env_init, vec!["module load python/3.11".to_string()]);
    assert_eq!(profile.resources.partition.as_deref(), Some("gpu"));
    assert_eq!(profile.resources.cpus, Some(8));
    assert!(cfg.profile("other").is_none());
    Ok(())
}

#[test]
fn bad_duration_is_a_config_error() {
    let file = config_file(
        r#"
[config]
poll_interval = "fast"
"#,
    );
    match load_and_validate(file.path()) {
        Err(PlanexecError::ConfigError(msg)) => {
            assert!(msg.contains("config.poll_interval"), "{msg}");
        }
        other => panic!("expected ConfigError, got {other:?}"),
    }
}

#[test]
fn zero_poll_interval_is_rejected() {
    let file = config_file("[config]\npoll_interval = \"0s\"\n");
    assert!(matches!(
        load_and_validate(file.path()),
        Err(PlanexecError::ConfigError(msg)) if msg.contains("greater than zero")
    ));
}

#[test]
fn shrinking_backoff_is_rejected() {
    let file = config_file("[retry]\nbackoff_multiplier = 0.5\n");
    assert!(matches!(
        load_and_validate(file.path()),
        Err(PlanexecError::ConfigError(msg)) if msg.contains("backoff_multiplier")
    ));

    let file = config_file("[retry]\ninitial_delay = \"5s\"\nmax_delay = \"1s\"\n");
    assert!(matches!(
        load_and_validate(file.path()),
        Err(PlanexecError::ConfigError(msg)) if msg.contains("max_delay")
    ));
}

#[test]
fn profile_without_host_is_rejected() {
    let file = config_file(
        r#"
[profile.empty]
username = "alice"
"#,
    );
    assert!(matches!(
        load_and_validate(file.path()),
        Err(PlanexecError::ConfigError(msg)) if msg.contains("'empty'")
    ));
}

#[test]
fn empty_scheduler_command_is_rejected() {
    let file = config_file("[scheduler]\nsubmit_command = \"  \"\n");
    assert!(matches!(
        load_and_validate(file.path()),
        Err(PlanexecError::ConfigError(msg)) if msg.contains("submit_command")
    ));
}

#[test]
fn malformed_toml_maps_to_config_kind() {
    let file = config_file("[config\ndata_dir = ");
    let err = load_and_validate(file.path()).unwrap_err();
    assert!(matches!(err, PlanexecError::TomlError(_)));
    assert_eq!(err.kind(), ErrorKind::Config);
}

#[test]
fn missing_file_falls_back_to_defaults() -> TestResult {
    let dir = tempfile::tempdir()?;
    let cfg = load_or_default(dir.path().join("Planexec.toml"))?;
    assert_eq!(cfg.poll_interval, Duration::from_secs(2));

    let err = load_and_validate(dir.path().join("Planexec.toml")).unwrap_err();
    assert!(matches!(err, PlanexecError::IoError(_)));
    Ok(())
}

#[test]
fn plan_files_are_read_as_specs() -> TestResult {
    let file = config_file(
        r#"
runner = "scheduler"
profile = "cluster"
commands = ["python prep.py", "python train.py"]

[context]
download = [{ local = "results/metrics.json", remote = "out/metrics.json" }]

[context.resources]
time_limit = "02:00:00"
"#,
    );
    let spec = load_plan_spec(file.path())?;

    assert_eq!(spec.runner, RunnerKind::Scheduler);
    assert_eq!(spec.profile.as_deref(), Some("cluster"));
    assert_eq!(spec.commands.len(), 2);
    assert_eq!(spec.context.download.len(), 1);
    assert_eq!(spec.context.download[0].remote, "out/metrics.json");
    assert_eq!(
        spec.context.download[0].local,
        PathBuf::from("results/metrics.json")
    );
    assert_eq!(spec.context.resources.time_limit.as_deref(), Some("02:00:00"));
    assert!(spec.context.host.is_empty());
    Ok(())
}

#[test]
fn durations_accept_the_usual_units() {
    assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
    assert_eq!(parse_duration(" 3s "), Ok(Duration::from_secs(3)));
    assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
    assert_eq!(parse_duration("1h"), Ok(Duration::from_secs(3600)));
    assert!(parse_duration("").is_err());
    assert!(parse_duration("10").is_err());
    assert!(parse_duration("5d").is_err());
}

#[test]
fn oversized_durations_are_rejected_not_wrapped() {
    let huge = format!("{}h", u64::MAX / 60);
    assert!(matches!(parse_duration(&huge), Err(msg) if msg.contains("too large")));
    assert!(parse_duration(&format!("{}m", u64::MAX)).is_err());
    assert_eq!(
        parse_duration(&format!("{}s", u64::MAX)),
        Ok(Duration::from_secs(u64::MAX))
    );

    let file = config_file(&format!("[config]\ncancel_grace = \"{huge}\"\n"));
    assert!(matches!(
        load_and_validate(file.path()),
        Err(PlanexecError::ConfigError(msg)) if msg.contains("config.cancel_grace")
    ));
}
