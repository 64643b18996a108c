#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use planexec::config::ConfigFile;
use planexec::coordinator::Coordinator;
use planexec::execution::Execution;
use planexec::plan::PlanSpec;
use planexec::store::ProjectLayout;
use planexec::transport::MockTransport;
use planexec::types::{ExecutionId, PlanId, ProjectId};
use tempfile::TempDir;

pub use planexec_test_utils::builders::{ContextBuilder, PlanSpecBuilder};
pub use planexec_test_utils::fake_cluster::{FakeCluster, FakeShellHost};
pub use planexec_test_utils::{init_tracing, test_config, with_timeout};

/// A coordinator over a temp data dir and a mock remote host.
pub struct Harness {
    pub coordinator: Coordinator,
    pub transport: MockTransport,
    pub dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(tweak: impl FnOnce(&mut ConfigFile)) -> Self {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        tweak(&mut config);

        let transport = MockTransport::new();
        let coordinator = Coordinator::new(config, Arc::new(transport.clone())).unwrap();
        Self {
            coordinator,
            transport,
            dir,
        }
    }

    pub fn data_dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn layout(&self) -> ProjectLayout {
        ProjectLayout::new(self.data_dir())
    }

    /// Write a file into the project's artifact dir and return its path.
    pub fn write_artifact(&self, project: ProjectId, rel: &str, contents: &str) -> PathBuf {
        let path = self.layout().artifacts_dir(project).join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, contents).unwrap();
        path
    }

    /// Submit and approve in one step.
    pub fn approved(&self, project: ProjectId, spec: PlanSpec) -> PlanId {
        let (plan_id, _) = self.coordinator.submit_plan(project, spec).unwrap();
        self.coordinator.approve_plan(plan_id).unwrap();
        plan_id
    }

    /// Poll `status` until `pred` holds.
    pub async fn wait_until<F>(&self, id: ExecutionId, pred: F) -> Execution
    where
        F: Fn(&Execution) -> bool,
    {
        with_timeout(async {
            loop {
                let execution = self.coordinator.status(id).unwrap();
                if pred(&execution) {
                    return execution;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
    }

    pub async fn wait_done(&self, id: ExecutionId) -> Execution {
        with_timeout(self.coordinator.wait(id)).await.unwrap()
    }
}
