pub mod builders;
pub mod fake_runner;

use std::sync::{Arc, Mutex, Once};

use jobdag::engine::Summary;
use jobdag::report::{JobReport, Reporter};
use tracing_subscriber::{EnvFilter, fmt};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let _ = fmt()
            .with_env_filter(filter)
            .with_test_writer() // print only for failing tests unless --nocapture
            .with_target(true)
            .try_init();
    });
}

/// Run a future with a 10-second timeout.
#[allow(dead_code)]
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(std::time::Duration::from_secs(10), f)
        .await
        .expect("Test timed out after 10 seconds")
}

/// Reporter that keeps every report, shared with the test through an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct RecordingReporter {
    pub reports: Arc<Mutex<Vec<JobReport>>>,
    pub summary: Arc<Mutex<Option<Summary>>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<JobReport> {
        self.reports.lock().unwrap().clone()
    }

    /// The report for `id`; panics if there is not exactly one.
    pub fn report(&self, id: &str) -> JobReport {
        let reports = self.reports();
        let matching: Vec<_> = reports.iter().filter(|r| r.id.as_str() == id).collect();
        assert_eq!(matching.len(), 1, "expected exactly one report for {id}: {reports:?}");
        matching[0].clone()
    }

    pub fn finished_order(&self) -> Vec<String> {
        self.reports().iter().map(|r| r.id.to_string()).collect()
    }
}

impl Reporter for RecordingReporter {
    fn on_job_finished(&mut self, report: &JobReport) {
        self.reports.lock().unwrap().push(report.clone());
    }

    fn on_run_finished(&mut self, summary: &Summary) {
        *self.summary.lock().unwrap() = Some(summary.clone());
    }
}
