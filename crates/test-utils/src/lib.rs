pub mod builders;
pub mod fake_cluster;

use std::path::Path;
use std::sync::Once;
use std::time::Duration;

use planexec::config::ConfigFile;
use planexec::runner::RetryConfig;
use planexec::types::StorageMode;
use tracing_subscriber::{fmt, EnvFilter};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=planexec=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("planexec=info,warn"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer() // print only for failing tests unless --nocapture
            .with_target(true)
            .init();
    });
}

/// Config tuned for tests: in-memory store under `data_dir`, fast polling,
/// short retry backoff.
pub fn test_config(data_dir: &Path) -> ConfigFile {
    ConfigFile {
        storage_mode: StorageMode::Memory,
        poll_interval: Duration::from_millis(20),
        cancel_grace: Duration::from_secs(2),
        retry: RetryConfig {
            max_retries: 2,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            backoff_multiplier: 2.0,
        },
        ..ConfigFile::with_data_dir(data_dir)
    }
}

/// Run a future with a 10-second timeout.
#[allow(dead_code)]
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(Duration::from_secs(10), f)
        .await
        .expect("Test timed out after 10 seconds")
}
