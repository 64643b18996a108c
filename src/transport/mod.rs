// src/transport/mod.rs

//! Remote session abstraction.
//!
//! Remote runners never talk to SSH directly; they open a
//! [`RemoteSession`] through a [`RemoteTransport`], use it for one phase
//! (staging, submission, a poll, collection), and close it on every exit
//! path. Production code uses [`openssh::OpenSshTransport`]; tests swap in
//! [`mock::MockTransport`].

pub mod mock;
pub mod openssh;

use std::fmt::Debug;
use std::path::Path;

use async_trait::async_trait;

use crate::errors::Result;
use crate::plan::ExecutionContext;

pub use mock::MockTransport;
pub use openssh::OpenSshTransport;

/// Connection coordinates for a remote host.
///
/// `credential` is a key path or identity reference, never key material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub host: String,
    pub port: Option<u16>,
    pub username: String,
    pub credential: Option<String>,
}

impl RemoteTarget {
    pub fn from_context(ctx: &ExecutionContext) -> Self {
        Self {
            host: ctx.host.clone(),
            port: ctx.port,
            username: ctx.username.clone(),
            credential: ctx.credential.clone(),
        }
    }

    /// `user@host`, or just `host` when no username is set.
    pub fn destination(&self) -> String {
        if self.username.is_empty() {
            self.host.clone()
        } else {
            format!("{}@{}", self.username, self.host)
        }
    }
}

/// Result of a command run over a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Opens sessions to remote hosts.
#[async_trait]
pub trait RemoteTransport: Send + Sync + Debug {
    /// Connect to `target`. Unreachable hosts yield `PlanexecError::Transport`.
    async fn open(&self, target: &RemoteTarget) -> Result<Box<dyn RemoteSession>>;
}

/// One open connection. Errors from these methods are transport-level
/// failures; a command that runs and exits non-zero is a successful `exec`.
#[async_trait]
pub trait RemoteSession: Send {
    async fn exec(&mut self, command: &str) -> Result<CommandOutput>;

    /// Copy a local file or directory to `remote`, creating parent dirs.
    async fn upload(&mut self, local: &Path, remote: &str) -> Result<()>;

    /// Write `contents` to `remote`, creating parent dirs.
    async fn write_file(&mut self, remote: &str, contents: &[u8]) -> Result<()>;

    /// Copy `remote` to `local`, creating local parent dirs.
    async fn download(&mut self, remote: &str, local: &Path) -> Result<()>;

    /// Release the connection.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Parent directory of a remote path, if it has one worth creating.
pub(crate) fn remote_parent(remote: &str) -> Option<&str> {
    let trimmed = remote.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) | None => None,
        Some(idx) => Some(&trimmed[..idx]),
    }
}
