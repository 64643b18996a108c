// src/transport/mock.rs

//! In-memory `RemoteTransport` for tests.
//!
//! The "remote host" is a map from remote path to file contents. Uploads
//! read real local files into the map, downloads write map entries to real
//! local files, and every executed command is recorded. Command output is
//! scripted with [`MockTransport::respond_to`].

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::errors::{PlanexecError, Result};
use crate::store::files_under;
use crate::transport::{CommandOutput, RemoteSession, RemoteTarget, RemoteTransport};

/// Scripted reply for commands matching a pattern.
pub type Responder = Arc<dyn Fn(&str) -> CommandOutput + Send + Sync>;

#[derive(Default)]
struct MockState {
    unreachable: bool,
    fail_next_opens: u32,
    remote_files: HashMap<String, Vec<u8>>,
    executed: Vec<String>,
    uploads: Vec<(PathBuf, String)>,
    downloads: Vec<(String, PathBuf)>,
    targets: Vec<RemoteTarget>,
    opened: usize,
    closed: usize,
    responders: Vec<(String, Responder)>,
}

/// Cloneable handle; clones share the same fake host.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockTransport")
            .field("unreachable", &state.unreachable)
            .field("remote_files", &state.remote_files.len())
            .field("executed", &state.executed.len())
            .finish()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `open` fail with a transport error.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unreachable = unreachable;
    }

    /// Fail the next `n` opens, then behave normally.
    pub fn fail_next_opens(&self, n: u32) {
        self.state.lock().fail_next_opens = n;
    }

    /// Reply to commands containing `pattern`. Later registrations win.
    pub fn respond_to<F>(&self, pattern: impl Into<String>, responder: F)
    where
        F: Fn(&str) -> CommandOutput + Send + Sync + 'static,
    {
        self.state
            .lock()
            .responders
            .push((pattern.into(), Arc::new(responder)));
    }

    pub fn put_remote_file(&self, remote: impl Into<String>, contents: impl Into<Vec<u8>>) {
        self.state
            .lock()
            .remote_files
            .insert(remote.into(), contents.into());
    }

    pub fn remote_file(&self, remote: &str) -> Option<Vec<u8>> {
        self.state.lock().remote_files.get(remote).cloned()
    }

    /// Remote paths currently present, sorted.
    pub fn remote_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.state.lock().remote_files.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn executed(&self) -> Vec<String> {
        self.state.lock().executed.clone()
    }

    /// True if any executed command contains `needle`.
    pub fn was_executed(&self, needle: &str) -> bool {
        self.state.lock().executed.iter().any(|c| c.contains(needle))
    }

    pub fn uploads(&self) -> Vec<(PathBuf, String)> {
        self.state.lock().uploads.clone()
    }

    pub fn downloads(&self) -> Vec<(String, PathBuf)> {
        self.state.lock().downloads.clone()
    }

    pub fn targets(&self) -> Vec<RemoteTarget> {
        self.state.lock().targets.clone()
    }

    pub fn opened_sessions(&self) -> usize {
        self.state.lock().opened
    }

    pub fn closed_sessions(&self) -> usize {
        self.state.lock().closed
    }
}

#[async_trait]
impl RemoteTransport for MockTransport {
    async fn open(&self, target: &RemoteTarget) -> Result<Box<dyn RemoteSession>> {
        let mut state = self.state.lock();
        state.targets.push(target.clone());

        if state.unreachable {
            return Err(PlanexecError::Transport(format!(
                "ssh: connect to host {} port 22: No route to host",
                target.host
            )));
        }
        if state.fail_next_opens > 0 {
            state.fail_next_opens -= 1;
            return Err(PlanexecError::Transport(format!(
                "ssh: connect to host {}: Connection timed out",
                target.host
            )));
        }

        state.opened += 1;
        Ok(Box::new(MockSession {
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockSession {
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl RemoteSession for MockSession {
    async fn exec(&mut self, command: &str) -> Result<CommandOutput> {
        let responder = {
            let mut state = self.state.lock();
            state.executed.push(command.to_string());
            state
                .responders
                .iter()
                .rev()
                .find(|(pattern, _)| command.contains(pattern.as_str()))
                .map(|(_, r)| Arc::clone(r))
        };

        // Run outside the lock so responders may call back into the mock.
        Ok(match responder {
            Some(r) => r(command),
            None => CommandOutput::ok(""),
        })
    }

    async fn upload(&mut self, local: &Path, remote: &str) -> Result<()> {
        let files = read_local_tree(local, remote)
            .map_err(|e| PlanexecError::Transport(format!("uploading {:?}: {e}", local)))?;

        let mut state = self.state.lock();
        state.uploads.push((local.to_path_buf(), remote.to_string()));
        state.remote_files.extend(files);
        Ok(())
    }

    async fn write_file(&mut self, remote: &str, contents: &[u8]) -> Result<()> {
        self.state
            .lock()
            .remote_files
            .insert(remote.to_string(), contents.to_vec());
        Ok(())
    }

    async fn download(&mut self, remote: &str, local: &Path) -> Result<()> {
        let files: Vec<(PathBuf, Vec<u8>)> = {
            let mut state = self.state.lock();
            state.downloads.push((remote.to_string(), local.to_path_buf()));

            if let Some(contents) = state.remote_files.get(remote) {
                vec![(local.to_path_buf(), contents.clone())]
            } else {
                let prefix = format!("{}/", remote.trim_end_matches('/'));
                state
                    .remote_files
                    .iter()
                    .filter_map(|(path, contents)| {
                        path.strip_prefix(&prefix)
                            .map(|rel| (local.join(rel), contents.clone()))
                    })
                    .collect()
            }
        };

        if files.is_empty() {
            return Err(PlanexecError::Transport(format!(
                "scp: {remote}: No such file or directory"
            )));
        }

        for (path, contents) in files {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, contents)?;
        }
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.state.lock().closed += 1;
        Ok(())
    }
}

fn read_local_tree(local: &Path, remote: &str) -> std::io::Result<Vec<(String, Vec<u8>)>> {
    if !local.is_dir() {
        return Ok(vec![(remote.to_string(), std::fs::read(local)?)]);
    }

    let mut files = Vec::new();
    for path in files_under(local)? {
        if let Ok(rel) = path.strip_prefix(local) {
            let key = format!(
                "{}/{}",
                remote.trim_end_matches('/'),
                rel.to_string_lossy().replace('\\', "/")
            );
            files.push((key, std::fs::read(&path)?));
        }
    }
    Ok(files)
}
