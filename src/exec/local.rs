// src/exec/local.rs

//! Local runner: every job is a child process of this one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::{JobdagError, Result};
use crate::exec::backend::{BoxFuture, Handle, Launched, Runner};
use crate::exec::outcome::ExitOutcome;
use crate::exec::process;
use crate::job::{Job, JobId};
use crate::types::RunnerKind;

/// Internal handle for a currently-running job process.
///
/// - `cancel` asks the watcher task to terminate the process group.
/// - `done` receives the outcome once the watcher task finishes.
/// - `task` is the Tokio task watching the process.
struct ActiveJob {
    cancel: Option<oneshot::Sender<()>>,
    done: oneshot::Receiver<ExitOutcome>,
    task: JoinHandle<()>,
}

/// Runs jobs as local subprocesses.
///
/// Launching never blocks on the job; each process is watched by its own
/// Tokio task, which enforces the job timeout and hands the outcome back
/// through a oneshot channel that [`Runner::poll`] checks without waiting.
pub struct LocalRunner {
    active: HashMap<JobId, ActiveJob>,
    activity: Arc<Notify>,
    kill_grace: Duration,
    max_output_bytes: usize,
}

impl LocalRunner {
    pub fn new(kill_grace: Duration, max_output_bytes: usize) -> Self {
        Self {
            active: HashMap::new(),
            activity: Arc::new(Notify::new()),
            kill_grace,
            max_output_bytes,
        }
    }

    fn start(&mut self, job: &Job) -> Result<Launched> {
        if let Some(existing) = self.active.get(job.id()) {
            if !existing.task.is_finished() {
                return Err(JobdagError::Other(anyhow::anyhow!(
                    "job '{}' is already running",
                    job.id()
                )));
            }
        }

        let child = process::spawn(job)?;
        let pid = child
            .id()
            .map(|p| p.to_string())
            .unwrap_or_else(|| "unknown".to_string());

        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        let (done_tx, done_rx) = oneshot::channel::<ExitOutcome>();
        let activity = self.activity.clone();
        let job_id = job.id().clone();
        let timeout = job.timeout();
        let grace = self.kill_grace;
        let max_output = self.max_output_bytes;

        let task = tokio::spawn(async move {
            let outcome =
                process::watch(child, job_id.clone(), timeout, grace, max_output, cancel_rx).await;
            if done_tx.send(outcome).is_err() {
                debug!(job = %job_id, "runner dropped before outcome was collected");
            }
            activity.notify_one();
        });

        self.active.insert(
            job.id().clone(),
            ActiveJob {
                cancel: Some(cancel_tx),
                done: done_rx,
                task,
            },
        );

        Ok(Launched::Running(Handle {
            job: job.id().clone(),
            external_id: pid,
        }))
    }
}

impl Runner for LocalRunner {
    fn kind(&self) -> RunnerKind {
        RunnerKind::Local
    }

    fn launch(
        &mut self,
        job: Arc<Job>,
        _prereq_handles: Vec<String>,
    ) -> BoxFuture<'_, Result<Launched>> {
        Box::pin(async move { self.start(&job) })
    }

    fn poll(&mut self, handle: &Handle) -> Option<ExitOutcome> {
        let active = self.active.get_mut(&handle.job)?;
        match active.done.try_recv() {
            Ok(outcome) => {
                self.active.remove(&handle.job);
                Some(outcome)
            }
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                warn!(job = %handle.job, "job watcher ended without an outcome");
                self.active.remove(&handle.job);
                Some(ExitOutcome::runner_error("job watcher ended without an outcome"))
            }
        }
    }

    fn kill(&mut self, handle: &Handle) -> BoxFuture<'_, ()> {
        let cancel = self
            .active
            .get_mut(&handle.job)
            .and_then(|a| a.cancel.take());
        let job = handle.job.clone();

        Box::pin(async move {
            match cancel {
                Some(tx) => {
                    info!(job = %job, "cancelling running job");
                    if tx.send(()).is_err() {
                        debug!(job = %job, "job already finished while cancelling");
                    }
                }
                None => debug!(job = %job, "no cancel sender present; job may already be cancelled"),
            }
        })
    }

    fn activity(&self) -> Arc<Notify> {
        self.activity.clone()
    }
}
