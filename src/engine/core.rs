// src/engine/core.rs

//! Pure planning and reaping steps of the dispatch loop.
//!
//! Everything here works on a [`SchedulerContext`] and returns what the IO
//! shell (`engine::runtime::Dispatcher`) should do next. There are no Tokio
//! types, no processes and no filesystem access in this module, so each step
//! can be unit tested directly.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, trace};

use crate::engine::context::SchedulerContext;
use crate::engine::{ABORTED_MESSAGE, SKIPPED_DEPENDENCY_MESSAGE};
use crate::errors::{JobdagError, Result};
use crate::exec::{ExitOutcome, Launched, classify};
use crate::job::{Job, JobId, JobStatus, JobStore, Transition};
use crate::report::JobReport;

/// Jobs chosen in one dispatch iteration.
#[derive(Debug, Default)]
pub struct Plan {
    /// Jobs to hand to the runner. Their slots are already reserved.
    pub launches: Vec<Arc<Job>>,
    /// Pending jobs the runner is not ready to accept yet.
    pub deferred: Vec<JobId>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.launches.is_empty()
    }
}

/// Move pending jobs that will never launch to `Skipped`.
///
/// - jobs with a declared skip reason
/// - jobs with a prerequisite that can no longer succeed, together with all
///   of their transitive dependents
pub fn settle(ctx: &mut SchedulerContext) -> Result<Vec<JobReport>> {
    let mut reports = Vec::new();

    let pending: Vec<Arc<Job>> = ctx.store.pending().cloned().collect();
    for job in pending {
        if ctx.store.status(job.id().as_str()) != Some(JobStatus::Pending) {
            // Already swept up by an earlier cascade in this pass.
            continue;
        }

        if let Some(reason) = job.skip_reason() {
            info!(job = %job.id(), reason, "skipping job");
            reports.push(skip(ctx, job.id(), reason)?);
            continue;
        }

        let Some(blocker) = ctx.store.blocking_prereq(&job).cloned() else {
            continue;
        };
        debug!(job = %job.id(), prereq = %blocker, "prerequisite cannot succeed");

        let mut doomed = vec![job.id().clone()];
        doomed.extend(ctx.store.transitive_dependents(job.id().as_str()));
        for id in doomed {
            if ctx.store.status(id.as_str()) == Some(JobStatus::Pending) {
                reports.push(skip(ctx, &id, SKIPPED_DEPENDENCY_MESSAGE)?);
            }
        }
    }

    Ok(reports)
}

fn skip(ctx: &mut SchedulerContext, id: &JobId, reason: &str) -> Result<JobReport> {
    ctx.store
        .record_transition(id.as_str(), Transition::to(JobStatus::Skipped).with_message(reason))?;
    report_for(ctx, id)
}

/// Pick the jobs to launch now and reserve their slots.
///
/// A job that does not fit is left `Pending` and the scan continues, so one
/// large job never holds back smaller ready ones. With `chains` set the
/// candidates are all pending jobs and `ready` alone decides; otherwise only
/// jobs whose prerequisites have all succeeded are considered.
pub fn plan<F>(ctx: &mut SchedulerContext, chains: bool, ready: F) -> Result<Plan>
where
    F: Fn(&Job, &JobStore) -> bool,
{
    let candidates: Vec<Arc<Job>> = if chains {
        ctx.store.pending().cloned().collect()
    } else {
        ctx.store.runnable().cloned().collect()
    };

    let mut plan = Plan::default();
    let mut chosen: HashSet<JobId> = HashSet::new();

    for job in candidates {
        // A dependent must wait for the next iteration when its prerequisite
        // is being launched in this one.
        let prereq_in_flight = job.prereqs().iter().any(|p| chosen.contains(p));
        if prereq_in_flight || !ready(&job, &ctx.store) {
            plan.deferred.push(job.id().clone());
            continue;
        }

        if ctx.slots.try_acquire(job.cost())? {
            trace!(
                job = %job.id(),
                cost = job.cost(),
                slots_in_use = ctx.slots.in_use(),
                "slots reserved"
            );
            chosen.insert(job.id().clone());
            plan.launches.push(job);
        } else {
            trace!(job = %job.id(), cost = job.cost(), available = ctx.slots.available(), "not enough free slots");
        }
    }

    Ok(plan)
}

/// Record what the runner did with a launched job.
///
/// A job handed off as `Queued` no longer occupies local slots.
pub fn record_launch(ctx: &mut SchedulerContext, job: &Job, launched: &Launched) -> Result<()> {
    let status = match launched {
        Launched::Running(_) => JobStatus::Running,
        Launched::Queued(_) => JobStatus::Queued,
    };
    let handle = launched.handle();

    ctx.store.record_transition(
        job.id().as_str(),
        Transition::to(status).with_external_id(handle.external_id.clone()),
    )?;

    if status == JobStatus::Queued {
        ctx.slots.release(job.cost())?;
    }
    Ok(())
}

/// The runner refused the job: release its slots and fail it.
pub fn record_launch_failure(
    ctx: &mut SchedulerContext,
    job: &Job,
    error: &JobdagError,
) -> Result<JobReport> {
    ctx.slots.release(job.cost())?;
    let message = match error {
        JobdagError::SubmissionFailure { reason, .. } => format!("SUBMISSION FAILED: {reason}"),
        other => format!("LAUNCH FAILED: {other}"),
    };
    ctx.store.record_transition(
        job.id().as_str(),
        Transition::to(JobStatus::Failed).with_message(message),
    )?;
    report_for(ctx, job.id())
}

/// Classify a finished job, release its slots and record its final status.
pub fn reap(ctx: &mut SchedulerContext, id: &JobId, outcome: ExitOutcome) -> Result<JobReport> {
    let job = ctx
        .store
        .job(id.as_str())
        .cloned()
        .ok_or_else(|| JobdagError::JobNotFound(id.to_string()))?;

    let verdict = classify(job.should_crash(), job.error_patterns(), &outcome);
    ctx.slots.release(job.cost())?;

    let mut transition = Transition::to(verdict.status)
        .with_exit_code(outcome.exit_code)
        .with_output(outcome.output);
    if let Some(message) = verdict.message {
        transition = transition.with_message(message);
    }
    ctx.store.record_transition(id.as_str(), transition)?;

    debug!(
        job = %id,
        status = %verdict.status,
        slots_in_use = ctx.slots.in_use(),
        "job reaped"
    );
    report_for(ctx, id)
}

/// Skip every job that has not left `Pending` yet.
pub fn abort_pending(ctx: &mut SchedulerContext) -> Result<Vec<JobReport>> {
    let pending: Vec<JobId> = ctx.store.pending().map(|j| j.id().clone()).collect();
    pending
        .iter()
        .map(|id| skip(ctx, id, ABORTED_MESSAGE))
        .collect()
}

fn report_for(ctx: &SchedulerContext, id: &JobId) -> Result<JobReport> {
    let job = ctx
        .store
        .job(id.as_str())
        .ok_or_else(|| JobdagError::JobNotFound(id.to_string()))?;
    let state = ctx
        .store
        .state(id.as_str())
        .ok_or_else(|| JobdagError::JobNotFound(id.to_string()))?;
    Ok(JobReport::from_state(job, state))
}
