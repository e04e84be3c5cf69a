// src/errors.rs

//! Crate-wide error type and result alias.
//!
//! Per-job failures (a crash, a timeout, a rejected submission) are recorded
//! as job outcomes and never surface here as a run-aborting error. Only the
//! invariant violations (`InvalidTransition`, `SlotOverRelease`) and setup
//! errors propagate out of the dispatch loop.

use thiserror::Error;

use crate::job::JobStatus;

#[derive(Error, Debug)]
pub enum JobdagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Duplicate job: {0}")]
    DuplicateJob(String),

    #[error("Cycle detected in job dependencies: {0}")]
    DependencyCycle(String),

    #[error("Invalid transition for job '{job}': {from} -> {to}")]
    InvalidTransition {
        job: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Slot over-release: releasing {released} with only {in_use} in use")]
    SlotOverRelease { released: u32, in_use: u32 },

    #[error("Invalid job cost {0}: cost must be at least 1")]
    InvalidCost(u32),

    #[error("Submission failed for job '{job}': {reason}")]
    SubmissionFailure { job: String, reason: String },

    #[error("Ledger entry '{entry}' is corrupt: {reason}")]
    LedgerCorruption { entry: String, reason: String },

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, JobdagError>;
