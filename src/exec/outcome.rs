// src/exec/outcome.rs

//! Raw process outcomes and their classification into job statuses.
//!
//! Both the local runner and the batch status checker feed their results
//! through [`classify`], so a job is judged the same way no matter where it
//! ran.

use std::time::Duration;

use crate::job::JobStatus;

/// How a job's process came to an end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitKind {
    /// The process exited (or was signalled) on its own.
    Exited,
    /// The wall-clock limit expired and the process group was terminated.
    TimedOut,
    /// The process group was terminated on request (abort).
    Killed,
    /// The batch system ended the job (cancelled, out of memory, node
    /// failure); carries the batch state.
    Terminated(String),
    /// The runner itself failed (spawn error, lost task, unreadable status).
    RunnerError(String),
}

/// Result of one job execution as observed by a runner.
#[derive(Debug, Clone)]
pub struct ExitOutcome {
    pub kind: ExitKind,
    /// `None` when the process was terminated by a signal or never ran.
    pub exit_code: Option<i32>,
    pub output: String,
    pub elapsed: Duration,
}

impl ExitOutcome {
    pub fn exited(exit_code: Option<i32>, output: String, elapsed: Duration) -> Self {
        Self {
            kind: ExitKind::Exited,
            exit_code,
            output,
            elapsed,
        }
    }

    pub fn runner_error(reason: impl Into<String>) -> Self {
        Self {
            kind: ExitKind::RunnerError(reason.into()),
            exit_code: None,
            output: String::new(),
            elapsed: Duration::ZERO,
        }
    }
}

/// Status (and explanatory message) assigned to a finished job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub status: JobStatus,
    pub message: Option<String>,
}

impl Verdict {
    fn new(status: JobStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: Some(message.into()),
        }
    }
}

pub const EXPECTED_CRASH_MISSING: &str = "expected crash did not occur";

/// Judge an outcome.
///
/// `Succeeded` here only means "nothing looked wrong"; richer pass/fail
/// judgement is left to the result reporter.
pub fn classify(should_crash: bool, error_patterns: &[String], outcome: &ExitOutcome) -> Verdict {
    match &outcome.kind {
        ExitKind::TimedOut => return Verdict::new(JobStatus::TimedOut, "TIMEOUT"),
        ExitKind::Killed => return Verdict::new(JobStatus::Failed, "KILLED"),
        ExitKind::Terminated(state) => {
            return Verdict::new(JobStatus::Crashed, format!("CRASH (batch state {state})"));
        }
        ExitKind::RunnerError(reason) => {
            return Verdict::new(JobStatus::Failed, format!("RUNNER ERROR: {reason}"));
        }
        ExitKind::Exited => {}
    }

    let crashed = outcome.exit_code != Some(0);
    match (crashed, should_crash) {
        (false, true) => Verdict::new(JobStatus::Failed, EXPECTED_CRASH_MISSING),
        (true, true) => Verdict {
            status: JobStatus::Succeeded,
            message: None,
        },
        (true, false) => match outcome.exit_code {
            Some(code) => Verdict::new(JobStatus::Crashed, format!("CRASH (exit code {code})")),
            None => Verdict::new(JobStatus::Crashed, "CRASH (terminated by signal)"),
        },
        (false, false) => {
            if let Some(pattern) = error_patterns
                .iter()
                .find(|p| !p.is_empty() && outcome.output.contains(p.as_str()))
            {
                return Verdict::new(JobStatus::Failed, format!("ERRMSG ({pattern})"));
            }
            Verdict {
                status: JobStatus::Succeeded,
                message: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::DEFAULT_ERROR_PATTERNS;

    fn patterns() -> Vec<String> {
        DEFAULT_ERROR_PATTERNS.iter().map(|s| s.to_string()).collect()
    }

    fn exited(code: Option<i32>, output: &str) -> ExitOutcome {
        ExitOutcome::exited(code, output.to_string(), Duration::from_millis(5))
    }

    #[test]
    fn clean_exit_succeeds() {
        let v = classify(false, &patterns(), &exited(Some(0), "all good\n"));
        assert_eq!(v.status, JobStatus::Succeeded);
        assert_eq!(v.message, None);
    }

    #[test]
    fn expected_crash_missing_fails() {
        let v = classify(true, &patterns(), &exited(Some(0), ""));
        assert_eq!(v.status, JobStatus::Failed);
        assert_eq!(v.message.as_deref(), Some(EXPECTED_CRASH_MISSING));
    }

    #[test]
    fn expected_crash_occurring_succeeds() {
        let v = classify(true, &patterns(), &exited(Some(134), "ERROR: boom"));
        assert_eq!(v.status, JobStatus::Succeeded);
    }

    #[test]
    fn unexpected_nonzero_exit_crashes() {
        let v = classify(false, &patterns(), &exited(Some(3), ""));
        assert_eq!(v.status, JobStatus::Crashed);
        assert_eq!(v.message.as_deref(), Some("CRASH (exit code 3)"));

        let v = classify(false, &patterns(), &exited(None, ""));
        assert_eq!(v.status, JobStatus::Crashed);
    }

    #[test]
    fn error_substring_on_clean_exit_fails() {
        let v = classify(false, &patterns(), &exited(Some(0), "sh: foo: command not found\n"));
        assert_eq!(v.status, JobStatus::Failed);
        assert_eq!(v.message.as_deref(), Some("ERRMSG (command not found)"));
    }

    #[test]
    fn timeout_and_kill() {
        let mut o = exited(None, "partial");
        o.kind = ExitKind::TimedOut;
        assert_eq!(classify(false, &[], &o).status, JobStatus::TimedOut);

        o.kind = ExitKind::Killed;
        assert_eq!(classify(true, &[], &o).status, JobStatus::Failed);
    }

    #[test]
    fn batch_termination_crashes_even_when_a_crash_is_expected() {
        let mut o = exited(Some(0), "");
        o.kind = ExitKind::Terminated("NODE_FAIL".into());
        let v = classify(true, &patterns(), &o);
        assert_eq!(v.status, JobStatus::Crashed);
        assert_eq!(v.message.as_deref(), Some("CRASH (batch state NODE_FAIL)"));
    }
}
