#![allow(dead_code)]

use std::path::PathBuf;

use planexec::plan::{ExecutionContext, PathMapping, PlanSpec};
use planexec::types::RunnerKind;

/// Builder for `PlanSpec` to simplify test setup.
pub struct PlanSpecBuilder {
    spec: PlanSpec,
}

impl PlanSpecBuilder {
    pub fn new(runner: RunnerKind) -> Self {
        Self {
            spec: PlanSpec {
                runner,
                commands: vec![],
                context: ExecutionContext::default(),
                profile: None,
            },
        }
    }

    pub fn local() -> Self {
        Self::new(RunnerKind::Local)
    }

    pub fn remote_shell() -> Self {
        Self::new(RunnerKind::RemoteShell)
    }

    pub fn scheduler() -> Self {
        Self::new(RunnerKind::Scheduler)
    }

    pub fn command(mut self, cmd: &str) -> Self {
        self.spec.commands.push(cmd.to_string());
        self
    }

    pub fn context(mut self, context: ExecutionContext) -> Self {
        self.spec.context = context;
        self
    }

    pub fn profile(mut self, name: &str) -> Self {
        self.spec.profile = Some(name.to_string());
        self
    }

    pub fn build(self) -> PlanSpec {
        self.spec
    }
}

/// Builder for `ExecutionContext`.
pub struct ContextBuilder {
    ctx: ExecutionContext,
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self {
            ctx: ExecutionContext::default(),
        }
    }

    /// A fully specified remote target with bounded resources.
    pub fn cluster() -> Self {
        Self::new()
            .host("login.example.org")
            .username("alice")
            .credential("~/.ssh/id_ed25519")
            .remote_dir("/scratch/alice/run")
            .partition("gpu")
            .time_limit("01:00:00")
    }

    pub fn host(mut self, host: &str) -> Self {
        self.ctx.host = host.to_string();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.ctx.port = Some(port);
        self
    }

    pub fn username(mut self, username: &str) -> Self {
        self.ctx.username = username.to_string();
        self
    }

    pub fn credential(mut self, credential: &str) -> Self {
        self.ctx.credential = Some(credential.to_string());
        self
    }

    pub fn remote_dir(mut self, dir: &str) -> Self {
        self.ctx.remote_dir = dir.to_string();
        self
    }

    pub fn partition(mut self, partition: &str) -> Self {
        self.ctx.resources.partition = Some(partition.to_string());
        self
    }

    pub fn time_limit(mut self, limit: &str) -> Self {
        self.ctx.resources.time_limit = Some(limit.to_string());
        self
    }

    pub fn memory(mut self, memory: &str) -> Self {
        self.ctx.resources.memory = Some(memory.to_string());
        self
    }

    pub fn cpus(mut self, cpus: u32) -> Self {
        self.ctx.resources.cpus = Some(cpus);
        self
    }

    pub fn gres(mut self, gres: &str) -> Self {
        self.ctx.resources.gres = Some(gres.to_string());
        self
    }

    pub fn no_resources(mut self) -> Self {
        self.ctx.resources = Default::default();
        self
    }

    pub fn env_init(mut self, cmd: &str) -> Self {
        self.ctx.env_init.push(cmd.to_string());
        self
    }

    pub fn upload(mut self, local: impl Into<PathBuf>, remote: &str) -> Self {
        self.ctx.upload.push(PathMapping::new(local, remote));
        self
    }

    /// Pull `remote` back into `local` after the run.
    pub fn download(mut self, remote: &str, local: impl Into<PathBuf>) -> Self {
        self.ctx.download.push(PathMapping::new(local, remote));
        self
    }

    pub fn build(self) -> ExecutionContext {
        self.ctx
    }
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}
