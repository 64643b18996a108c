// src/execution/audit.rs

//! Audit entries and artifact digests.
//!
//! Audit logs are append-only: entries are pushed, never edited. Every file
//! pulled back from a run is digested with blake3 so a later re-collection
//! can be compared byte for byte.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use blake3::Hasher;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::execution::model::Execution;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    Created,
    CommandQueued,
    StatusChanged,
    Staged,
    Started,
    Submitted,
    CancelRequested,
    CancelUnconfirmed,
    LogsFetched,
    LogsDigested,
    ArtifactCollected,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: AuditEventKind,
    pub detail: String,
}

impl AuditEntry {
    pub fn now(kind: AuditEventKind, detail: impl Into<String>) -> Self {
        Self::at(Utc::now(), kind, detail)
    }

    pub fn at(timestamp: DateTime<Utc>, kind: AuditEventKind, detail: impl Into<String>) -> Self {
        Self {
            timestamp,
            kind,
            detail: detail.into(),
        }
    }
}

/// A file retrieved from a run, with its content digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectedArtifact {
    pub path: PathBuf,
    pub digest: String,
}

/// Compute the blake3 digest of a single file.
pub fn digest_file(path: &Path) -> Result<String> {
    let mut hasher = Hasher::new();
    let mut file =
        File::open(path).with_context(|| format!("opening artifact for digest: {:?}", path))?;
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let digest = hasher.finalize().to_hex().to_string();
    debug!(path = ?path, digest = %digest, "computed artifact digest");
    Ok(digest)
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// Store collected artifacts on the execution, one audit entry each.
///
/// Re-collecting the same path overwrites the digest; a changed digest is
/// called out in the audit detail.
pub fn record_artifacts(execution: &mut Execution, artifacts: &[CollectedArtifact]) {
    for artifact in artifacts {
        let previous = execution
            .artifacts
            .insert(artifact.path.clone(), artifact.digest.clone());

        let detail = match previous {
            Some(old) if old != artifact.digest => format!(
                "{} digest={} (changed from {})",
                artifact.path.display(),
                artifact.digest,
                old
            ),
            _ => format!("{} digest={}", artifact.path.display(), artifact.digest),
        };
        execution.record(AuditEventKind::ArtifactCollected, detail);
    }
}
