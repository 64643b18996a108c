// src/runner/script.rs

//! Shell script rendering for the three runners.
//!
//! Every rendered script runs its commands under `set -e`, so the first
//! failing command ends the batch and its status becomes the exit code.
//! Remote scripts additionally `cd` into the context's remote directory and
//! record their exit status in a completion file on the way out.

use crate::plan::{ExecutionContext, ExecutionPlan};
use crate::types::ExecutionId;

/// Directory (relative to the remote working dir) holding per-execution
/// scripts, logs and completion files.
pub const CONTROL_DIR: &str = ".planexec";

/// Single-quote `s` for POSIX sh.
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@%+,~".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Join a remote path onto a base directory unless it is already rooted.
pub fn resolve_remote(base: &str, path: &str) -> String {
    if path.starts_with('/') || path.starts_with('~') || base.is_empty() || base == "." {
        path.to_string()
    } else {
        format!("{}/{}", base.trim_end_matches('/'), path)
    }
}

/// Remote file locations for one execution.
///
/// All paths are relative to the login directory (or absolute when
/// `remote_dir` is), so they work both for `scp` and inside the scripts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePaths {
    base: String,
    execution_id: ExecutionId,
}

impl RemotePaths {
    pub fn new(ctx: &ExecutionContext, execution_id: ExecutionId) -> Self {
        Self {
            base: ctx.effective_remote_dir().to_string(),
            execution_id,
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    fn file(&self, ext: &str) -> String {
        format!("{}/{}", self.base.trim_end_matches('/'), self.relative(ext))
    }

    fn relative(&self, ext: &str) -> String {
        format!("{CONTROL_DIR}/exec_{}.{ext}", self.execution_id)
    }

    pub fn script(&self) -> String {
        self.file("sh")
    }

    pub fn batch_script(&self) -> String {
        self.file("sbatch")
    }

    pub fn stdout(&self) -> String {
        self.file("out")
    }

    pub fn stderr(&self) -> String {
        self.file("err")
    }

    /// Written by the script's EXIT trap with the final status.
    pub fn exit_file(&self) -> String {
        self.file("exit")
    }

    /// Resolve a staging mapping's remote path against the working dir.
    pub fn resolve(&self, remote: &str) -> String {
        resolve_remote(&self.base, remote)
    }
}

fn push_body(out: &mut String, ctx: &ExecutionContext, commands: &[String]) {
    out.push_str("set -e\n");
    for line in ctx.env_init.iter().chain(commands) {
        out.push_str(line);
        out.push('\n');
    }
}

fn push_remote_prologue(out: &mut String, paths: &RemotePaths) {
    out.push_str(&format!("cd {} || exit 1\n", shell_quote(paths.base())));
    // Relative to the working dir entered above.
    out.push_str(&format!(
        "trap 'echo $? > {}' EXIT\n",
        shell_quote(&paths.relative("exit"))
    ));
}

/// Script body for the local runner; runs in the project's artifact dir.
pub fn render_local_script(plan: &ExecutionPlan) -> String {
    let mut out = String::new();
    push_body(&mut out, &plan.context, &plan.commands);
    out
}

/// Script for the remote-shell runner.
pub fn render_shell_script(plan: &ExecutionPlan, paths: &RemotePaths) -> String {
    let mut out = String::from("#!/bin/sh\n");
    push_remote_prologue(&mut out, paths);
    push_body(&mut out, &plan.context, &plan.commands);
    out
}

/// Batch submission script with `#SBATCH` resource directives.
pub fn render_batch_script(plan: &ExecutionPlan, paths: &RemotePaths, execution_id: ExecutionId) -> String {
    let res = &plan.context.resources;
    let mut out = String::from("#!/bin/bash\n");
    out.push_str(&format!("#SBATCH -J planexec-{execution_id}\n"));
    if let Some(partition) = &res.partition {
        out.push_str(&format!("#SBATCH -p {partition}\n"));
    }
    if let Some(time) = &res.time_limit {
        out.push_str(&format!("#SBATCH -t {time}\n"));
    }
    if let Some(mem) = &res.memory {
        out.push_str(&format!("#SBATCH --mem={mem}\n"));
    }
    if let Some(cpus) = res.cpus {
        out.push_str(&format!("#SBATCH -c {cpus}\n"));
    }
    if let Some(gres) = &res.gres {
        out.push_str(&format!("#SBATCH --gres={gres}\n"));
    }
    out.push_str(&format!("#SBATCH -o {}\n", paths.stdout()));
    out.push_str(&format!("#SBATCH -e {}\n", paths.stderr()));

    push_remote_prologue(&mut out, paths);
    push_body(&mut out, &plan.context, &plan.commands);
    out
}

/// Detach the staged shell script and print its pid.
///
/// `setsid` makes the pid a process group leader so cancellation can
/// signal the whole tree.
pub fn launch_command(paths: &RemotePaths) -> String {
    format!(
        "setsid nohup sh {} > {} 2> {} < /dev/null & echo $!",
        shell_quote(&paths.script()),
        shell_quote(&paths.stdout()),
        shell_quote(&paths.stderr()),
    )
}

/// Prints `running`, `exited <code>` or `missing`.
pub fn probe_command(paths: &RemotePaths, pid: u32) -> String {
    let exit = shell_quote(&paths.exit_file());
    format!(
        "if kill -0 {pid} 2>/dev/null; then echo running; \
         elif [ -f {exit} ]; then echo \"exited $(cat {exit})\"; \
         else echo missing; fi"
    )
}

/// Terminate a process group, falling back to the single pid.
pub fn kill_command(pid: u32) -> String {
    format!("kill -TERM -- -{pid} 2>/dev/null || kill -TERM {pid}")
}

/// Print the completion file if it exists.
pub fn read_exit_command(paths: &RemotePaths) -> String {
    let exit = shell_quote(&paths.exit_file());
    format!("[ -f {exit} ] && cat {exit}")
}

/// Append `arg` to a configured scheduler command line.
pub fn scheduler_command(base: &str, arg: &str) -> String {
    format!("{} {}", base.trim(), shell_quote(arg))
}
