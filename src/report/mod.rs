// src/report/mod.rs

//! Result reporting.
//!
//! The dispatch loop and the batch status checker hand every job that reaches
//! a terminal state to a [`Reporter`], exactly once. Deciding what to do with
//! the result (print it, store it, post it somewhere) is the reporter's job.

use std::time::Duration;

use tracing::{info, warn};

use crate::engine::Summary;
use crate::job::{Job, JobId, JobState, JobStatus};

/// Final record of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub id: JobId,
    pub name: String,
    pub status: JobStatus,
    pub exit_code: Option<i32>,
    pub output: String,
    pub elapsed: Duration,
    pub message: Option<String>,
    pub caveats: Vec<String>,
}

impl JobReport {
    pub fn from_state(job: &Job, state: &JobState) -> Self {
        Self {
            id: job.id().clone(),
            name: job.name().to_string(),
            status: state.status(),
            exit_code: state.exit_code(),
            output: state.output(),
            elapsed: state.elapsed().unwrap_or_default(),
            message: state.message().map(str::to_string),
            caveats: job.caveats().to_vec(),
        }
    }
}

/// Receives job results as they become final.
pub trait Reporter: Send {
    fn on_job_finished(&mut self, report: &JobReport);

    fn on_run_finished(&mut self, _summary: &Summary) {}
}

/// Reporter that writes results to the `tracing` log.
#[derive(Debug, Default)]
pub struct LogReporter {
    timings: Vec<(JobId, Duration)>,
    longest: usize,
}

impl LogReporter {
    /// `longest` is how many of the slowest jobs to list at the end of a run.
    pub fn new(longest: usize) -> Self {
        Self {
            timings: Vec::new(),
            longest,
        }
    }
}

impl Reporter for LogReporter {
    fn on_job_finished(&mut self, report: &JobReport) {
        let message = report.message.as_deref().unwrap_or("");
        let caveats = report.caveats.join(",");
        match report.status {
            JobStatus::Succeeded | JobStatus::Skipped => info!(
                job = %report.id,
                status = %report.status,
                elapsed_secs = report.elapsed.as_secs_f64(),
                caveats = %caveats,
                "{message}"
            ),
            _ => warn!(
                job = %report.id,
                status = %report.status,
                exit_code = ?report.exit_code,
                elapsed_secs = report.elapsed.as_secs_f64(),
                caveats = %caveats,
                output = %report.output,
                "{message}"
            ),
        }
        if report.elapsed > Duration::ZERO {
            self.timings.push((report.id.clone(), report.elapsed));
        }
    }

    fn on_run_finished(&mut self, summary: &Summary) {
        info!("run finished: {summary}");

        if self.longest == 0 || self.timings.is_empty() {
            return;
        }
        self.timings.sort_by(|a, b| b.1.cmp(&a.1));
        for (id, elapsed) in self.timings.iter().take(self.longest) {
            info!(job = %id, elapsed_secs = elapsed.as_secs_f64(), "longest running");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{CostPolicy, JobCommand, JobSpec, Transition};

    #[test]
    fn report_carries_state_and_caveats() {
        let mut spec = JobSpec::new("big job", JobCommand::Shell("true".into()));
        spec.min_parallel = 8;
        let job = Job::from_spec(spec, &CostPolicy { parallel: 1, capacity: 4 }).unwrap();

        let mut state = JobState::new(1024);
        state.apply(Transition::to(JobStatus::Running));
        state.apply(
            Transition::to(JobStatus::Crashed)
                .with_exit_code(Some(3))
                .with_message("CRASH (exit code 3)")
                .with_output("boom\n"),
        );

        let report = JobReport::from_state(&job, &state);
        assert_eq!(report.id.as_str(), "bigjob");
        assert_eq!(report.name, "big job");
        assert_eq!(report.status, JobStatus::Crashed);
        assert_eq!(report.exit_code, Some(3));
        assert_eq!(report.output, "boom\n");
        assert_eq!(report.caveats, vec!["min_cpus=8", "capacity_cpus=4"]);
    }

    #[test]
    fn log_reporter_keeps_timings_of_jobs_that_ran() {
        let mut reporter = LogReporter::new(2);
        let mut report = JobReport {
            id: JobId::sanitize("a"),
            name: "a".into(),
            status: JobStatus::Succeeded,
            exit_code: Some(0),
            output: String::new(),
            elapsed: Duration::from_secs(2),
            message: None,
            caveats: Vec::new(),
        };
        reporter.on_job_finished(&report);

        report.id = JobId::sanitize("b");
        report.status = JobStatus::Skipped;
        report.elapsed = Duration::ZERO;
        reporter.on_job_finished(&report);

        assert_eq!(reporter.timings.len(), 1);
    }
}
