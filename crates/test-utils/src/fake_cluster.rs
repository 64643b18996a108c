use std::sync::{Arc, Mutex};

use planexec::transport::{CommandOutput, MockTransport};

/// Scripted Slurm front end on top of a [`MockTransport`]:
/// - `sbatch` answers with a fixed job id (default `J123`);
/// - `squeue` reports `queue_state` (empty once the job left the queue);
/// - `sacct` reports `history`;
/// - `scancel` records the job id and moves the job to `CANCELLED`.
#[derive(Clone)]
pub struct FakeCluster {
    state: Arc<Mutex<ClusterState>>,
}

struct ClusterState {
    job_id: String,
    submit_error: Option<String>,
    queue_state: Option<String>,
    history: Option<String>,
    completion_code: Option<i32>,
    cancelled: Vec<String>,
}

impl FakeCluster {
    pub fn install(transport: &MockTransport) -> Self {
        let cluster = Self {
            state: Arc::new(Mutex::new(ClusterState {
                job_id: "J123".to_string(),
                submit_error: None,
                queue_state: Some("RUNNING".to_string()),
                history: None,
                completion_code: None,
                cancelled: vec![],
            })),
        };

        let state = Arc::clone(&cluster.state);
        transport.respond_to("sbatch", move |_| {
            let s = state.lock().unwrap();
            match &s.submit_error {
                Some(err) => CommandOutput::failed(1, err.clone()),
                None => CommandOutput::ok(format!("{}\n", s.job_id)),
            }
        });

        let state = Arc::clone(&cluster.state);
        transport.respond_to("squeue", move |_| {
            let s = state.lock().unwrap();
            CommandOutput::ok(s.queue_state.clone().map(|q| q + "\n").unwrap_or_default())
        });

        let state = Arc::clone(&cluster.state);
        transport.respond_to("sacct", move |_| {
            let s = state.lock().unwrap();
            CommandOutput::ok(s.history.clone().map(|h| h + "\n").unwrap_or_default())
        });

        let state = Arc::clone(&cluster.state);
        transport.respond_to("] && cat", move |_| {
            let s = state.lock().unwrap();
            match s.completion_code {
                Some(code) => CommandOutput::ok(format!("{code}\n")),
                None => CommandOutput::failed(1, ""),
            }
        });

        let state = Arc::clone(&cluster.state);
        transport.respond_to("scancel", move |cmd| {
            let mut s = state.lock().unwrap();
            let job = cmd.split_whitespace().last().unwrap_or("").to_string();
            s.cancelled.push(job);
            s.queue_state = Some("CANCELLED".to_string());
            s.history = Some("CANCELLED by 1000|0:15".to_string());
            CommandOutput::ok("")
        });

        cluster
    }

    pub fn with_job_id(self, job_id: &str) -> Self {
        self.state.lock().unwrap().job_id = job_id.to_string();
        self
    }

    pub fn fail_submission(&self, stderr: &str) {
        self.state.lock().unwrap().submit_error = Some(stderr.to_string());
    }

    /// `None` means the job is no longer in the live queue.
    pub fn set_queue_state(&self, state: Option<&str>) {
        self.state.lock().unwrap().queue_state = state.map(str::to_string);
    }

    pub fn set_history(&self, history: Option<&str>) {
        self.state.lock().unwrap().history = history.map(str::to_string);
    }

    pub fn set_completion_code(&self, code: Option<i32>) {
        self.state.lock().unwrap().completion_code = code;
    }

    /// Job ids passed to `scancel`.
    pub fn cancelled(&self) -> Vec<String> {
        self.state.lock().unwrap().cancelled.clone()
    }
}

/// Scripted remote shell host on top of a [`MockTransport`]:
/// the launcher answers with a pid, the liveness probe with `probe`.
#[derive(Clone)]
pub struct FakeShellHost {
    probe: Arc<Mutex<String>>,
    killed: Arc<Mutex<Vec<String>>>,
}

impl FakeShellHost {
    pub const PID: u32 = 4242;

    pub fn install(transport: &MockTransport) -> Self {
        let host = Self {
            probe: Arc::new(Mutex::new("running".to_string())),
            killed: Arc::new(Mutex::new(vec![])),
        };

        transport.respond_to("setsid nohup", |_| CommandOutput::ok(format!("{}\n", Self::PID)));

        let probe = Arc::clone(&host.probe);
        transport.respond_to("kill -0", move |_| {
            CommandOutput::ok(format!("{}\n", probe.lock().unwrap()))
        });

        let killed = Arc::clone(&host.killed);
        let probe = Arc::clone(&host.probe);
        transport.respond_to("kill -TERM", move |cmd| {
            killed.lock().unwrap().push(cmd.to_string());
            *probe.lock().unwrap() = "exited 143".to_string();
            CommandOutput::ok("")
        });

        host
    }

    /// Make the next probe report the process as finished with `code`.
    pub fn finish(&self, code: i32) {
        *self.probe.lock().unwrap() = format!("exited {code}");
    }

    /// Make the next probe report the process as gone without a status.
    pub fn vanish(&self) {
        *self.probe.lock().unwrap() = "missing".to_string();
    }

    pub fn kill_commands(&self) -> Vec<String> {
        self.killed.lock().unwrap().clone()
    }
}
