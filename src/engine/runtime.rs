// src/engine/runtime.rs

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::batch::ledger::{Ledger, LedgerFile};
use crate::errors::Result;
use crate::exec::{Handle, Launched, Runner};
use crate::job::{Job, JobId, JobStatus};
use crate::report::{JobReport, Reporter};
use crate::types::RunnerKind;

use super::context::SchedulerContext;
use super::core;
use super::summary::Summary;

/// Requests that a running [`Dispatcher`] stop launching and tear down its
/// in-flight jobs.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }
}

/// A job the runner accepted and has not reported back on yet.
#[derive(Debug)]
struct InFlight {
    handle: Handle,
}

/// Drives a run to completion.
///
/// This is the IO shell around [`core`]: each iteration it settles jobs that
/// can never run, launches what the planner selected, and reaps whatever the
/// runner reports as finished. When an iteration makes no progress the loop
/// sleeps for the poll interval, waking early on runner activity or abort.
pub struct Dispatcher<R: Runner> {
    ctx: SchedulerContext,
    runner: R,
    reporter: Box<dyn Reporter>,
    ledger: Option<LedgerFile>,
    in_flight: Vec<InFlight>,
    deferred: HashSet<JobId>,
    abort_tx: Arc<watch::Sender<bool>>,
    abort_rx: watch::Receiver<bool>,
    aborted: bool,
    stall_reported: bool,
}

impl<R: Runner> fmt::Debug for Dispatcher<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("ctx", &self.ctx)
            .field("in_flight", &self.in_flight)
            .field("aborted", &self.aborted)
            .finish_non_exhaustive()
    }
}

impl<R: Runner> Dispatcher<R> {
    pub fn new(ctx: SchedulerContext, runner: R, reporter: Box<dyn Reporter>) -> Self {
        let (abort_tx, abort_rx) = watch::channel(false);
        Self {
            ctx,
            runner,
            reporter,
            ledger: None,
            in_flight: Vec::new(),
            deferred: HashSet::new(),
            abort_tx: Arc::new(abort_tx),
            abort_rx,
            aborted: false,
            stall_reported: false,
        }
    }

    /// Persist the ledger to `ledger` after every state change.
    pub fn with_ledger(mut self, ledger: LedgerFile) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            tx: self.abort_tx.clone(),
        }
    }

    pub fn context(&self) -> &SchedulerContext {
        &self.ctx
    }

    /// Main dispatch loop.
    ///
    /// Returns once every job is terminal, or, for a runner that hands jobs
    /// off as `Queued`, once nothing is left to launch. Per-job failures are
    /// recorded as outcomes; only invariant violations and ledger write
    /// failures end the loop with an error.
    pub async fn run(mut self) -> Result<Summary> {
        let kind = self.runner.kind();
        let chains = self.runner.chains_prerequisites();
        let activity = self.runner.activity();
        info!(
            runner = %kind,
            jobs = self.ctx.store.len(),
            capacity = self.ctx.slots.capacity(),
            "dispatcher started"
        );
        self.persist()?;

        loop {
            if !self.aborted && *self.abort_rx.borrow() {
                self.abort().await?;
            }

            let mut progressed = false;

            let settled = core::settle(&mut self.ctx)?;
            progressed |= !settled.is_empty();
            self.finish_all(settled)?;

            if !self.aborted {
                let runner = &self.runner;
                let plan = core::plan(&mut self.ctx, chains, |job, store| {
                    runner.prerequisites_ready(job, store)
                })?;
                self.note_deferred(&plan.deferred);
                for job in plan.launches {
                    self.launch(job).await?;
                    progressed = true;
                }
            }

            progressed |= self.reap_finished()?;

            if self.is_done(kind) {
                break;
            }

            if !progressed {
                self.check_stall();
                tokio::select! {
                    _ = activity.notified() => {}
                    _ = tokio::time::sleep(self.ctx.options.poll_interval) => {}
                    _ = self.abort_rx.changed() => {}
                }
            }
        }

        let summary = Summary::from_store(&self.ctx.store);
        info!(%summary, "dispatcher finished");
        self.reporter.on_run_finished(&summary);
        Ok(summary)
    }

    async fn launch(&mut self, job: Arc<Job>) -> Result<()> {
        // External ids of prerequisites still waiting in the batch system.
        let prereq_handles: Vec<String> = job
            .prereqs()
            .iter()
            .filter_map(|p| {
                let state = self.ctx.store.state(p.as_str())?;
                if state.status() == JobStatus::Queued {
                    state.external_id().map(str::to_string)
                } else {
                    None
                }
            })
            .collect();

        debug!(job = %job.id(), cost = job.cost(), prereqs = ?prereq_handles, "launching job");
        self.deferred.remove(job.id());

        match self.runner.launch(job.clone(), prereq_handles).await {
            Ok(launched) => {
                core::record_launch(&mut self.ctx, &job, &launched)?;
                match launched {
                    Launched::Running(handle) => {
                        info!(
                            job = %job.id(),
                            external_id = %handle.external_id,
                            slots_in_use = self.ctx.slots.in_use(),
                            "job running"
                        );
                        self.in_flight.push(InFlight { handle });
                    }
                    Launched::Queued(handle) => {
                        info!(job = %job.id(), external_id = %handle.external_id, "job queued");
                    }
                }
                self.persist()?;
            }
            Err(e) => {
                warn!(job = %job.id(), error = %e, "launch failed");
                let report = core::record_launch_failure(&mut self.ctx, &job, &e)?;
                self.finish(report)?;
            }
        }
        Ok(())
    }

    /// Poll every in-flight job once. Returns whether anything finished.
    fn reap_finished(&mut self) -> Result<bool> {
        let mut finished = Vec::new();
        let mut still_running = Vec::with_capacity(self.in_flight.len());

        for entry in self.in_flight.drain(..) {
            match self.runner.poll(&entry.handle) {
                Some(outcome) => finished.push((entry.handle.job, outcome)),
                None => still_running.push(entry),
            }
        }
        self.in_flight = still_running;

        let progressed = !finished.is_empty();
        for (id, outcome) in finished {
            let report = core::reap(&mut self.ctx, &id, outcome)?;
            self.finish(report)?;
        }
        Ok(progressed)
    }

    /// Kill every in-flight job and skip everything still pending.
    ///
    /// Jobs already handed to a batch system keep running there; only the
    /// local bookkeeping stops.
    async fn abort(&mut self) -> Result<()> {
        warn!(in_flight = self.in_flight.len(), "abort requested; stopping run");
        self.aborted = true;

        for entry in &self.in_flight {
            self.runner.kill(&entry.handle).await;
        }

        let skipped = core::abort_pending(&mut self.ctx)?;
        self.finish_all(skipped)?;

        let queued = self.ctx.store.count(JobStatus::Queued);
        if queued > 0 {
            info!(queued, "queued batch jobs are left to the batch system");
        }
        Ok(())
    }

    fn finish(&mut self, report: JobReport) -> Result<()> {
        self.reporter.on_job_finished(&report);
        self.persist()
    }

    fn finish_all(&mut self, reports: Vec<JobReport>) -> Result<()> {
        if reports.is_empty() {
            return Ok(());
        }
        for report in &reports {
            self.reporter.on_job_finished(report);
        }
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        if let Some(file) = &self.ledger {
            file.save(&Ledger::from_store(&self.ctx.store))?;
        }
        Ok(())
    }

    fn note_deferred(&mut self, deferred: &[JobId]) {
        for id in deferred {
            if !self.deferred.insert(id.clone()) {
                continue;
            }
            let waiting_on: Vec<String> = self
                .ctx
                .store
                .job(id.as_str())
                .map(|job| self.ctx.store.unsatisfied(job))
                .unwrap_or_default()
                .iter()
                .map(ToString::to_string)
                .collect();
            debug!(job = %id, ?waiting_on, "deferring job until its prerequisites are accepted");
        }
    }

    fn is_done(&self, kind: RunnerKind) -> bool {
        if !self.in_flight.is_empty() {
            return false;
        }
        match kind {
            RunnerKind::Local => self.ctx.store.all_terminal(),
            _ => self.ctx.store.all_settled(),
        }
    }

    /// Nothing in flight, nothing launched, yet jobs remain pending: only a
    /// dependency cycle gets here.
    fn check_stall(&mut self) {
        if self.stall_reported || !self.in_flight.is_empty() {
            return;
        }
        let stuck: Vec<String> = self
            .ctx
            .store
            .pending()
            .map(|j| j.id().to_string())
            .collect();
        if !stuck.is_empty() {
            warn!(?stuck, "no job can make progress; dependency cycle?");
            self.stall_reported = true;
        }
    }
}
