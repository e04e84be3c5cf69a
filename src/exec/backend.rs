// src/exec/backend.rs

//! Pluggable runner abstraction.
//!
//! The dispatch loop talks to a [`Runner`] instead of spawning processes or
//! calling the batch system itself. This makes it easy to swap in a fake
//! runner in tests while keeping the production implementations in
//! [`crate::exec::local`] and [`crate::batch`].
//!
//! A runner is selected once per run:
//! - `LocalRunner` starts each job as a child process and reports its
//!   outcome when polled.
//! - `BatchLauncher` submits each job to an external batch system and hands
//!   it off as `Queued`; outcomes are collected later by the status checker.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::Notify;

use crate::errors::Result;
use crate::exec::outcome::ExitOutcome;
use crate::job::{Job, JobId, JobStore};
use crate::types::RunnerKind;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Identifies a job accepted by a runner.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Handle {
    pub job: JobId,
    /// Process id for local jobs, batch-system job id for submitted ones.
    pub external_id: String,
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.job, self.external_id)
    }
}

/// What a runner did with a job it accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Launched {
    /// Running locally; the outcome will show up through [`Runner::poll`].
    Running(Handle),
    /// Handed to an external system; no outcome in this invocation.
    Queued(Handle),
}

impl Launched {
    pub fn handle(&self) -> &Handle {
        match self {
            Launched::Running(h) | Launched::Queued(h) => h,
        }
    }
}

/// Trait abstracting how dispatched jobs are executed.
///
/// Production code uses `LocalRunner` or `BatchLauncher`; tests can provide
/// their own implementation that doesn't spawn real processes.
pub trait Runner: Send {
    fn kind(&self) -> RunnerKind;

    /// Whether dependents may be launched while their prerequisites are only
    /// submitted (not finished), because the backend enforces the ordering.
    fn chains_prerequisites(&self) -> bool {
        false
    }

    /// Whether the prerequisites of `job` allow launching it now.
    fn prerequisites_ready(&self, job: &Job, store: &JobStore) -> bool {
        store.prereqs_satisfied(job)
    }

    /// Start a job without waiting for it to finish.
    ///
    /// `prereq_handles` carries the external ids of prerequisites that were
    /// handed to the backend, for runners that chain them.
    fn launch(
        &mut self,
        job: Arc<Job>,
        prereq_handles: Vec<String>,
    ) -> BoxFuture<'_, Result<Launched>>;

    /// Non-blocking: `None` while the job is still running.
    fn poll(&mut self, handle: &Handle) -> Option<ExitOutcome>;

    /// Request termination; the outcome is still delivered through `poll`.
    fn kill(&mut self, handle: &Handle) -> BoxFuture<'_, ()>;

    /// Notified whenever an outcome becomes available, so the dispatch loop
    /// can wake early from its idle wait.
    fn activity(&self) -> Arc<Notify>;
}
