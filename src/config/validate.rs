// src/config/validate.rs

use std::time::Duration;

use crate::config::model::{ConfigFile, RawConfigFile, RemoteSettings};
use crate::errors::{PlanexecError, Result};
use crate::runner::retry::RetryConfig;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = PlanexecError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_config(&raw)?;

        Ok(ConfigFile {
            data_dir: raw.config.data_dir,
            storage_mode: raw.config.storage_mode,
            poll_interval: config_duration("config.poll_interval", &raw.config.poll_interval)?,
            cancel_grace: config_duration("config.cancel_grace", &raw.config.cancel_grace)?,
            collect_on_success: raw.config.collect_on_success,
            retry: RetryConfig {
                max_retries: raw.retry.max_retries,
                initial_delay: config_duration("retry.initial_delay", &raw.retry.initial_delay)?,
                max_delay: config_duration("retry.max_delay", &raw.retry.max_delay)?,
                backoff_multiplier: raw.retry.backoff_multiplier,
            },
            remote: RemoteSettings {
                ssh_program: raw.remote.ssh_program,
                scp_program: raw.remote.scp_program,
                connect_timeout: config_duration(
                    "remote.connect_timeout",
                    &raw.remote.connect_timeout,
                )?,
                control_dir: raw.remote.control_dir,
            },
            scheduler: raw.scheduler,
            profiles: raw.profile,
        })
    }
}

/// Check the semantic invariants `serde` cannot express.
pub fn validate_config(cfg: &RawConfigFile) -> Result<()> {
    validate_global_config(cfg)?;
    validate_retry(cfg)?;
    validate_remote(cfg)?;
    validate_profiles(cfg)?;
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    let poll = config_duration("config.poll_interval", &cfg.config.poll_interval)?;
    if poll.is_zero() {
        return Err(PlanexecError::ConfigError(
            "[config].poll_interval must be greater than zero".to_string(),
        ));
    }
    config_duration("config.cancel_grace", &cfg.config.cancel_grace)?;
    Ok(())
}

fn validate_retry(cfg: &RawConfigFile) -> Result<()> {
    if cfg.retry.backoff_multiplier < 1.0 {
        return Err(PlanexecError::ConfigError(format!(
            "[retry].backoff_multiplier must be >= 1.0 (got {})",
            cfg.retry.backoff_multiplier
        )));
    }
    let initial = config_duration("retry.initial_delay", &cfg.retry.initial_delay)?;
    let max = config_duration("retry.max_delay", &cfg.retry.max_delay)?;
    if max < initial {
        return Err(PlanexecError::ConfigError(
            "[retry].max_delay must not be shorter than initial_delay".to_string(),
        ));
    }
    Ok(())
}

fn validate_remote(cfg: &RawConfigFile) -> Result<()> {
    config_duration("remote.connect_timeout", &cfg.remote.connect_timeout)?;

    let commands = [
        ("submit_command", &cfg.scheduler.submit_command),
        ("status_command", &cfg.scheduler.status_command),
        ("history_command", &cfg.scheduler.history_command),
        ("cancel_command", &cfg.scheduler.cancel_command),
    ];
    for (name, cmd) in commands {
        if cmd.trim().is_empty() {
            return Err(PlanexecError::ConfigError(format!(
                "[scheduler].{name} must not be empty"
            )));
        }
    }
    Ok(())
}

fn validate_profiles(cfg: &RawConfigFile) -> Result<()> {
    for (name, profile) in cfg.profile.iter() {
        if profile.host.trim().is_empty() {
            return Err(PlanexecError::ConfigError(format!(
                "profile '{name}' must set a host"
            )));
        }
    }
    Ok(())
}

fn config_duration(field: &str, value: &str) -> Result<Duration> {
    parse_duration(value)
        .map_err(|e| PlanexecError::ConfigError(format!("invalid duration for {field}: {e}")))
}

/// Parse `"500ms"`, `"3s"`, `"2m"`, `"1h"`.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    // Find the boundary between digits and suffix.
    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    let secs_per_unit = match unit.as_str() {
        "ms" => return Ok(Duration::from_millis(value)),
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        _ => {
            return Err(format!(
                "unsupported duration unit '{}'; expected ms, s, m, or h",
                unit
            ));
        }
    };
    value
        .checked_mul(secs_per_unit)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration '{s}' is too large"))
}
