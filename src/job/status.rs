// src/job/status.rs

//! Job status state machine and the mutable per-job record.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::job::output::OutputBuffer;

/// Lifecycle status of a job.
///
/// `Pending -> (Queued | Running) -> terminal`. Once terminal, a job never
/// changes status again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    /// Submitted to the batch backend, awaiting a result.
    Queued,
    Running,
    Skipped,
    TimedOut,
    Crashed,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub const TERMINAL: [JobStatus; 5] = [
        JobStatus::Skipped,
        JobStatus::TimedOut,
        JobStatus::Crashed,
        JobStatus::Succeeded,
        JobStatus::Failed,
    ];

    pub fn is_terminal(self) -> bool {
        Self::TERMINAL.contains(&self)
    }

    /// Whether a dependent may treat this status as a satisfied prerequisite.
    pub fn is_success_compatible(self, skipped_satisfies: bool) -> bool {
        match self {
            JobStatus::Succeeded => true,
            JobStatus::Skipped => skipped_satisfies,
            _ => false,
        }
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        match self {
            JobStatus::Pending => next != JobStatus::Pending,
            JobStatus::Queued => next == JobStatus::Running || next.is_terminal(),
            JobStatus::Running => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Skipped => "skipped",
            JobStatus::TimedOut => "timed_out",
            JobStatus::Crashed => "crashed",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A requested status change plus whatever the runner learned alongside it.
#[derive(Debug, Clone)]
pub struct Transition {
    pub status: JobStatus,
    pub message: Option<String>,
    pub external_id: Option<String>,
    pub exit_code: Option<i32>,
    pub output: Option<String>,
}

impl Transition {
    pub fn to(status: JobStatus) -> Self {
        Self {
            status,
            message: None,
            external_id: None,
            exit_code: None,
            output: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_external_id(mut self, id: impl Into<String>) -> Self {
        self.external_id = Some(id.into());
        self
    }

    pub fn with_exit_code(mut self, code: Option<i32>) -> Self {
        self.exit_code = code;
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }
}

/// Mutable record kept for each job by the store.
#[derive(Debug, Clone)]
pub struct JobState {
    status: JobStatus,
    message: Option<String>,
    external_id: Option<String>,
    exit_code: Option<i32>,
    started_at: Option<Instant>,
    ended_at: Option<Instant>,
    output: OutputBuffer,
}

impl JobState {
    pub fn new(max_output_bytes: usize) -> Self {
        Self {
            status: JobStatus::Pending,
            message: None,
            external_id: None,
            exit_code: None,
            started_at: None,
            ended_at: None,
            output: OutputBuffer::new(max_output_bytes),
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn external_id(&self) -> Option<&str> {
        self.external_id.as_deref()
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<Instant> {
        self.ended_at
    }

    pub fn output(&self) -> String {
        self.output.contents()
    }

    /// Time between start and end (or now, while still running).
    ///
    /// `None` if the job never started.
    pub fn elapsed(&self) -> Option<Duration> {
        let start = self.started_at?;
        Some(match self.ended_at {
            Some(end) => end.saturating_duration_since(start),
            None => start.elapsed(),
        })
    }

    /// Apply an already-validated transition.
    pub(crate) fn apply(&mut self, transition: Transition) {
        let now = Instant::now();
        match transition.status {
            JobStatus::Queued | JobStatus::Running => {
                if self.started_at.is_none() {
                    self.started_at = Some(now);
                }
            }
            s if s.is_terminal() => {
                if self.started_at.is_none() {
                    self.started_at = Some(now);
                }
                self.ended_at = Some(now);
            }
            _ => {}
        }

        self.status = transition.status;
        if transition.message.is_some() {
            self.message = transition.message;
        }
        if transition.external_id.is_some() {
            self.external_id = transition.external_id;
        }
        if transition.exit_code.is_some() {
            self.exit_code = transition.exit_code;
        }
        if let Some(out) = transition.output {
            self.output.push(&out);
        }
    }
}
