// src/plan/validate.rs

//! Advisory plan checks.
//!
//! Validation never fails: every problem, including an empty command list,
//! comes back as a warning string so that approval stays a human decision.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::plan::model::ExecutionPlan;
use crate::runner::script::resolve_remote;
use crate::types::RunnerKind;

/// Command fragments that are almost always a mistake in a research batch.
static DENYLIST: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("rm -rf", r"\brm\s+-[a-zA-Z]*(?:r[a-zA-Z]*f|f[a-zA-Z]*r)"),
        ("curl | sh", r"\b(?:curl|wget)\b[^|]*\|\s*(?:sudo\s+)?(?:ba|z)?sh\b"),
        ("mkfs", r"\bmkfs(?:\.\w+)?\b"),
        ("dd if=", r"\bdd\s+if="),
    ]
    .into_iter()
    .filter_map(|(label, pattern)| Regex::new(pattern).ok().map(|re| (label, re)))
    .collect()
});

/// Inspect a plan against its runner's requirements and return warnings.
///
/// Pure function of plan content.
pub fn validate(plan: &ExecutionPlan) -> Vec<String> {
    let mut warnings = Vec::new();

    check_commands(plan, &mut warnings);

    match plan.runner {
        RunnerKind::Local => {}
        RunnerKind::RemoteShell => {
            check_remote_target(plan, &mut warnings);
        }
        RunnerKind::Scheduler => {
            check_remote_target(plan, &mut warnings);
            check_scheduler(plan, &mut warnings);
        }
    }

    warnings
}

fn check_commands(plan: &ExecutionPlan, warnings: &mut Vec<String>) {
    if plan.commands.is_empty() {
        warnings.push("plan has no commands; nothing will run".to_string());
        return;
    }

    for (idx, cmd) in plan.commands.iter().enumerate() {
        if !has_executable_content(cmd) {
            warnings.push(format!(
                "command {} is empty or contains no executable content",
                idx + 1
            ));
            continue;
        }

        for (label, re) in DENYLIST.iter() {
            if re.is_match(cmd) {
                warnings.push(format!(
                    "command {} matches denylisted pattern '{}': {}",
                    idx + 1,
                    label,
                    cmd.trim()
                ));
            }
        }
    }
}

/// False for blank commands and for commands made only of comments.
fn has_executable_content(cmd: &str) -> bool {
    cmd.lines().map(str::trim).any(|line| {
        !line.is_empty() && !line.starts_with('#') && line.chars().any(|c| !c.is_whitespace() && c != ';')
    })
}

fn check_remote_target(plan: &ExecutionPlan, warnings: &mut Vec<String>) {
    let ctx = &plan.context;

    if ctx.host.trim().is_empty() {
        warnings.push("remote host is empty".to_string());
    }
    if ctx.username.trim().is_empty() {
        warnings.push("remote username is empty".to_string());
    }
    if ctx.credential.as_deref().is_none_or(|c| c.trim().is_empty()) {
        warnings.push("credential reference is empty".to_string());
    }

    let base = ctx.effective_remote_dir();
    let upload_targets: HashSet<String> = ctx
        .upload
        .iter()
        .map(|m| resolve_remote(base, &m.remote))
        .collect();
    for mapping in &ctx.download {
        if upload_targets.contains(&resolve_remote(base, &mapping.remote)) {
            warnings.push(format!(
                "download source '{}' is also an upload target and may overwrite staged input",
                mapping.remote
            ));
        }
    }
}

fn check_scheduler(plan: &ExecutionPlan, warnings: &mut Vec<String>) {
    let res = &plan.context.resources;

    if res.partition.is_none() && res.time_limit.is_none() {
        warnings.push(
            "no partition or time limit set; unbounded jobs may be rejected by the cluster"
                .to_string(),
        );
    }
    if plan.context.download.is_empty() {
        warnings.push("no download mappings; nothing will be retrieved after the job".to_string());
    }
}
