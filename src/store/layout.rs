// src/store/layout.rs

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::types::{ExecutionId, ProjectId};

/// On-disk layout under the data directory:
///
/// ```text
/// <data_dir>/store.json
/// <data_dir>/projects/project_<id>/artifacts/exec_<n>_stdout.log
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    data_dir: PathBuf,
}

impl ProjectLayout {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join("store.json")
    }

    pub fn artifacts_dir(&self, project_id: ProjectId) -> PathBuf {
        self.data_dir
            .join("projects")
            .join(format!("project_{project_id}"))
            .join("artifacts")
    }

    /// Create the artifact directory if needed and return it.
    pub fn ensure_artifacts_dir(&self, project_id: ProjectId) -> Result<PathBuf> {
        let dir = self.artifacts_dir(project_id);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating artifact dir {:?}", dir))?;
        Ok(dir)
    }

    pub fn log_paths(&self, project_id: ProjectId, execution_id: ExecutionId) -> (PathBuf, PathBuf) {
        let dir = self.artifacts_dir(project_id);
        (
            dir.join(format!("exec_{execution_id}_stdout.log")),
            dir.join(format!("exec_{execution_id}_stderr.log")),
        )
    }

    /// Resolve a staging path: relative paths live in the artifact dir.
    pub fn resolve_local(&self, project_id: ProjectId, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.artifacts_dir(project_id).join(path)
        }
    }

    /// Every file under the project's artifact dir, relative and sorted.
    pub fn list_artifacts(&self, project_id: ProjectId) -> Result<Vec<PathBuf>> {
        let base = self.artifacts_dir(project_id);
        if !base.is_dir() {
            return Ok(Vec::new());
        }

        let files = files_under(&base).with_context(|| format!("listing {:?}", base))?;
        Ok(files
            .into_iter()
            .filter_map(|p| p.strip_prefix(&base).ok().map(Path::to_path_buf))
            .collect())
    }
}

/// `path` itself if it is not a directory, otherwise every file beneath it,
/// sorted.
pub fn files_under(path: &Path) -> std::io::Result<Vec<PathBuf>> {
    if !path.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    let mut stack = vec![path.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let p = entry?.path();
            if p.is_dir() {
                stack.push(p);
            } else {
                files.push(p);
            }
        }
    }
    files.sort();
    Ok(files)
}
