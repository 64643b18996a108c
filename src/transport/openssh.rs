// src/transport/openssh.rs

//! `RemoteTransport` backed by the system OpenSSH client.
//!
//! `open` starts a ControlMaster connection in the background; every
//! `exec`/`upload`/`download` multiplexes over its socket, and `close`
//! tears it down with `-O exit`. A session dropped without `close` tears
//! its master down on the blocking pool.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::RemoteSettings;
use crate::errors::{PlanexecError, Result};
use crate::runner::script::shell_quote;
use crate::transport::{CommandOutput, RemoteSession, RemoteTarget, RemoteTransport, remote_parent};

/// ssh exits with 255 when the connection itself fails.
const SSH_CONNECTION_FAILURE: i32 = 255;

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone)]
pub struct OpenSshTransport {
    settings: RemoteSettings,
}

impl OpenSshTransport {
    pub fn new(settings: RemoteSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl RemoteTransport for OpenSshTransport {
    async fn open(&self, target: &RemoteTarget) -> Result<Box<dyn RemoteSession>> {
        if target.host.trim().is_empty() {
            return Err(PlanexecError::Transport("no remote host configured".to_string()));
        }

        let n = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);
        let socket = self
            .settings
            .control_dir
            .join(format!("planexec-{}-{}.sock", std::process::id(), n));

        let mut cmd = Command::new(&self.settings.ssh_program);
        cmd.arg("-M")
            .arg("-S")
            .arg(&socket)
            .arg("-f")
            .arg("-N")
            .args(common_options(&self.settings, target))
            .arg(target.destination())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        debug!(host = %target.host, socket = ?socket, "opening ssh control master");
        let output = cmd.output().await.map_err(|e| {
            PlanexecError::Transport(format!("spawning {}: {e}", self.settings.ssh_program))
        })?;

        if !output.status.success() {
            return Err(PlanexecError::Transport(format!(
                "connecting to {}: {}",
                target.destination(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        info!(host = %target.host, "ssh session opened");
        Ok(Box::new(OpenSshSession {
            settings: self.settings.clone(),
            target: target.clone(),
            socket,
            closed: false,
        }))
    }
}

fn common_options(settings: &RemoteSettings, target: &RemoteTarget) -> Vec<String> {
    let mut args = vec![
        "-o".to_string(),
        "BatchMode=yes".to_string(),
        "-o".to_string(),
        format!("ConnectTimeout={}", settings.connect_timeout.as_secs().max(1)),
    ];
    if let Some(port) = target.port {
        args.push("-p".to_string());
        args.push(port.to_string());
    }
    if let Some(key) = target.credential.as_deref().filter(|k| !k.trim().is_empty()) {
        args.push("-i".to_string());
        args.push(key.to_string());
    }
    args
}

#[derive(Debug)]
struct OpenSshSession {
    settings: RemoteSettings,
    target: RemoteTarget,
    socket: PathBuf,
    closed: bool,
}

impl OpenSshSession {
    fn ssh(&self) -> Command {
        let mut cmd = Command::new(&self.settings.ssh_program);
        cmd.arg("-S")
            .arg(&self.socket)
            .args(common_options(&self.settings, &self.target))
            .arg(self.target.destination())
            .arg("--");
        cmd
    }

    fn scp(&self) -> Command {
        let mut cmd = Command::new(&self.settings.scp_program);
        cmd.arg("-o")
            .arg(format!("ControlPath={}", self.socket.display()))
            .arg("-o")
            .arg("BatchMode=yes");
        if let Some(port) = self.target.port {
            cmd.arg("-P").arg(port.to_string());
        }
        if let Some(key) = self.target.credential.as_deref().filter(|k| !k.trim().is_empty()) {
            cmd.arg("-i").arg(key);
        }
        cmd
    }

    async fn run_checked(&self, mut cmd: Command, what: &str) -> Result<()> {
        let output = cmd
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| PlanexecError::Transport(format!("{what}: {e}")))?;
        if !output.status.success() {
            return Err(PlanexecError::Transport(format!(
                "{what}: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn ensure_remote_dir(&mut self, remote: &str) -> Result<()> {
        if let Some(parent) = remote_parent(remote) {
            let out = self.exec(&format!("mkdir -p {}", shell_quote(parent))).await?;
            if !out.success() {
                return Err(PlanexecError::Transport(format!(
                    "creating remote dir {parent}: {}",
                    out.stderr.trim()
                )));
            }
        }
        Ok(())
    }

    fn remote_spec(&self, remote: &str) -> String {
        format!("{}:{}", self.target.destination(), remote)
    }
}

#[async_trait]
impl RemoteSession for OpenSshSession {
    async fn exec(&mut self, command: &str) -> Result<CommandOutput> {
        debug!(host = %self.target.host, command, "ssh exec");
        let output = self
            .ssh()
            .arg(command)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| PlanexecError::Transport(format!("running ssh: {e}")))?;

        let exit_code = output.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if exit_code == SSH_CONNECTION_FAILURE {
            return Err(PlanexecError::Transport(format!(
                "ssh to {} failed: {}",
                self.target.destination(),
                stderr.trim()
            )));
        }

        Ok(CommandOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr,
        })
    }

    async fn upload(&mut self, local: &Path, remote: &str) -> Result<()> {
        self.ensure_remote_dir(remote).await?;
        let mut cmd = self.scp();
        if local.is_dir() {
            cmd.arg("-r");
        }
        cmd.arg(local).arg(self.remote_spec(remote));
        self.run_checked(cmd, &format!("uploading {:?} to {remote}", local))
            .await
    }

    async fn write_file(&mut self, remote: &str, contents: &[u8]) -> Result<()> {
        self.ensure_remote_dir(remote).await?;

        let mut child = self
            .ssh()
            .arg(format!("cat > {}", shell_quote(remote)))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| PlanexecError::Transport(format!("running ssh: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(contents)
                .await
                .map_err(|e| PlanexecError::Transport(format!("writing {remote}: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| PlanexecError::Transport(format!("writing {remote}: {e}")))?;
        if !output.status.success() {
            return Err(PlanexecError::Transport(format!(
                "writing {remote}: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn download(&mut self, remote: &str, local: &Path) -> Result<()> {
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut cmd = self.scp();
        cmd.arg("-r").arg(self.remote_spec(remote)).arg(local);
        self.run_checked(cmd, &format!("downloading {remote} to {:?}", local))
            .await
    }

    async fn close(mut self: Box<Self>) -> Result<()> {
        self.closed = true;
        let mut cmd = Command::new(&self.settings.ssh_program);
        cmd.arg("-S")
            .arg(&self.socket)
            .arg("-O")
            .arg("exit")
            .arg(self.target.destination())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Err(e) = cmd.status().await {
            warn!(host = %self.target.host, error = %e, "failed to close ssh control master");
        }
        debug!(host = %self.target.host, "ssh session closed");
        Ok(())
    }
}

impl Drop for OpenSshSession {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        warn!(host = %self.target.host, "ssh session dropped without close; tearing down");
        let mut cmd = std::process::Command::new(&self.settings.ssh_program);
        cmd.arg("-S")
            .arg(&self.socket)
            .arg("-O")
            .arg("exit")
            .arg(self.target.destination())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        // Keep runtime workers free; outside a runtime there is nothing to stall.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || {
                    let _ = cmd.status();
                });
            }
            Err(_) => {
                let _ = cmd.status();
            }
        }
    }
}
