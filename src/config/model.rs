// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::plan::ExecutionContext;
use crate::runner::retry::RetryConfig;
use crate::types::StorageMode;

/// Top-level configuration as read from `Planexec.toml`.
///
/// ```toml
/// [config]
/// data_dir = ".planexec"
/// poll_interval = "2s"
///
/// [remote]
/// ssh_program = "ssh"
///
/// [profile.cluster]
/// host = "login.example.org"
/// username = "me"
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: ConfigSection,

    #[serde(default)]
    pub retry: RetrySection,

    #[serde(default)]
    pub remote: RemoteSection,

    #[serde(default)]
    pub scheduler: SchedulerSection,

    /// Named execution contexts from `[profile.<name>]`.
    #[serde(default)]
    pub profile: BTreeMap<String, ExecutionContext>,
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Root for `store.json` and `projects/<id>/artifacts`.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub storage_mode: StorageMode,

    /// How often the background unit of work polls its runner.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,

    /// How long a cancelled local process gets between SIGTERM and SIGKILL.
    #[serde(default = "default_cancel_grace")]
    pub cancel_grace: String,

    /// Pull download mappings back automatically once a run succeeds.
    #[serde(default = "default_true")]
    pub collect_on_success: bool,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".planexec")
}

fn default_poll_interval() -> String {
    "2s".to_string()
}

fn default_cancel_grace() -> String {
    "10s".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            storage_mode: StorageMode::default(),
            poll_interval: default_poll_interval(),
            cancel_grace: default_cancel_grace(),
            collect_on_success: true,
        }
    }
}

/// `[retry]` section: bounded backoff for staging/collection transport errors.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay")]
    pub initial_delay: String,
    #[serde(default = "default_max_delay")]
    pub max_delay: String,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay() -> String {
    "500ms".to_string()
}

fn default_max_delay() -> String {
    "10s".to_string()
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

/// `[remote]` section: how SSH sessions are opened.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteSection {
    #[serde(default = "default_ssh_program")]
    pub ssh_program: String,
    #[serde(default = "default_scp_program")]
    pub scp_program: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: String,
    /// Directory for OpenSSH ControlMaster sockets.
    #[serde(default = "default_control_dir")]
    pub control_dir: PathBuf,
}

fn default_ssh_program() -> String {
    "ssh".to_string()
}

fn default_scp_program() -> String {
    "scp".to_string()
}

fn default_connect_timeout() -> String {
    "10s".to_string()
}

fn default_control_dir() -> PathBuf {
    std::env::temp_dir()
}

impl Default for RemoteSection {
    fn default() -> Self {
        Self {
            ssh_program: default_ssh_program(),
            scp_program: default_scp_program(),
            connect_timeout: default_connect_timeout(),
            control_dir: default_control_dir(),
        }
    }
}

/// `[scheduler]` section: the batch system's command-line interface.
///
/// Each command gets the job id (or script path for `submit_command`)
/// appended as its final argument.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SchedulerSection {
    #[serde(default = "default_submit_command")]
    pub submit_command: String,
    #[serde(default = "default_status_command")]
    pub status_command: String,
    #[serde(default = "default_history_command")]
    pub history_command: String,
    #[serde(default = "default_cancel_command")]
    pub cancel_command: String,
}

fn default_submit_command() -> String {
    "sbatch --parsable".to_string()
}

fn default_status_command() -> String {
    "squeue --noheader --format=%T --jobs".to_string()
}

fn default_history_command() -> String {
    "sacct --noheader --allocations --parsable2 --format=State,ExitCode --jobs".to_string()
}

fn default_cancel_command() -> String {
    "scancel".to_string()
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            submit_command: default_submit_command(),
            status_command: default_status_command(),
            history_command: default_history_command(),
            cancel_command: default_cancel_command(),
        }
    }
}

/// Typed SSH settings derived from `[remote]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSettings {
    pub ssh_program: String,
    pub scp_program: String,
    pub connect_timeout: Duration,
    pub control_dir: PathBuf,
}

/// Validated configuration with durations parsed.
///
/// Built through `TryFrom<RawConfigFile>` (see `config::validate`).
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub data_dir: PathBuf,
    pub storage_mode: StorageMode,
    pub poll_interval: Duration,
    pub cancel_grace: Duration,
    pub collect_on_success: bool,
    pub retry: RetryConfig,
    pub remote: RemoteSettings,
    pub scheduler: SchedulerSection,
    pub profiles: BTreeMap<String, ExecutionContext>,
}

impl ConfigFile {
    /// Defaults rooted at `data_dir`, for callers without a config file.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn profile(&self, name: &str) -> Option<&ExecutionContext> {
        self.profiles.get(name)
    }
}

impl Default for ConfigFile {
    fn default() -> Self {
        let remote = RemoteSection::default();
        Self {
            data_dir: default_data_dir(),
            storage_mode: StorageMode::default(),
            poll_interval: Duration::from_secs(2),
            cancel_grace: Duration::from_secs(10),
            collect_on_success: true,
            retry: RetryConfig::default(),
            remote: RemoteSettings {
                ssh_program: remote.ssh_program,
                scp_program: remote.scp_program,
                connect_timeout: Duration::from_secs(10),
                control_dir: remote.control_dir,
            },
            scheduler: SchedulerSection::default(),
            profiles: BTreeMap::new(),
        }
    }
}
