// src/job/store.rs

//! The job store: every job of a run, its state, and its dependency edges.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::errors::{JobdagError, Result};
use crate::job::graph::DepGraph;
use crate::job::spec::{Job, JobId};
use crate::job::status::{JobState, JobStatus, Transition};

#[derive(Debug)]
struct Entry {
    job: Arc<Job>,
    state: JobState,
}

/// Holds all jobs for one run.
///
/// Jobs are yielded in insertion order. [`JobStore::record_transition`] is
/// the only way to change a job's state.
#[derive(Debug)]
pub struct JobStore {
    order: Vec<JobId>,
    entries: HashMap<JobId, Entry>,
    graph: DepGraph,
    skipped_satisfies: bool,
    max_output_bytes: usize,
}

impl JobStore {
    /// Create an empty store.
    ///
    /// `skipped_satisfies` decides whether a `Skipped` prerequisite counts as
    /// satisfied for its dependents.
    pub fn new(skipped_satisfies: bool, max_output_bytes: usize) -> Self {
        Self {
            order: Vec::new(),
            entries: HashMap::new(),
            graph: DepGraph::new(),
            skipped_satisfies,
            max_output_bytes,
        }
    }

    /// Add a job in `Pending` state.
    pub fn add(&mut self, job: Job) -> Result<()> {
        let id = job.id().clone();
        if self.entries.contains_key(&id) {
            return Err(JobdagError::DuplicateJob(id.to_string()));
        }

        self.graph.add_node(&id, job.prereqs());
        self.entries.insert(
            id.clone(),
            Entry {
                job: Arc::new(job),
                state: JobState::new(self.max_output_bytes),
            },
        );
        self.order.push(id);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn skipped_satisfies(&self) -> bool {
        self.skipped_satisfies
    }

    pub fn job(&self, id: &str) -> Option<&Arc<Job>> {
        self.entries.get(id).map(|e| &e.job)
    }

    pub fn state(&self, id: &str) -> Option<&JobState> {
        self.entries.get(id).map(|e| &e.state)
    }

    pub fn status(&self, id: &str) -> Option<JobStatus> {
        self.state(id).map(|s| s.status())
    }

    /// All jobs with their current state, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&Arc<Job>, &JobState)> + '_ {
        self.order.iter().filter_map(move |id| {
            let entry = self.entries.get(id)?;
            Some((&entry.job, &entry.state))
        })
    }

    /// Jobs that are still `Pending`, regardless of their prerequisites.
    pub fn pending(&self) -> impl Iterator<Item = &Arc<Job>> + '_ {
        self.iter()
            .filter(|(_, state)| state.status() == JobStatus::Pending)
            .map(|(job, _)| job)
    }

    /// Jobs that are `Pending` and whose prerequisites are all in a
    /// success-compatible terminal state.
    ///
    /// The sequence is computed lazily; call again to restart it.
    pub fn runnable(&self) -> impl Iterator<Item = &Arc<Job>> + '_ {
        self.pending().filter(move |job| self.prereqs_satisfied(job))
    }

    pub fn prereqs_satisfied(&self, job: &Job) -> bool {
        job.prereqs().iter().all(|p| {
            self.status(p.as_str())
                .is_some_and(|s| s.is_success_compatible(self.skipped_satisfies))
        })
    }

    /// Prerequisites of `job` that are not yet terminal (unknown ones included).
    pub fn unsatisfied(&self, job: &Job) -> Vec<JobId> {
        job.prereqs()
            .iter()
            .filter(|p| !self.status(p.as_str()).is_some_and(|s| s.is_terminal()))
            .cloned()
            .collect()
    }

    /// A prerequisite that can never become satisfied: unknown, or terminal
    /// without being success-compatible.
    pub fn blocking_prereq<'a>(&self, job: &'a Job) -> Option<&'a JobId> {
        job.prereqs().iter().find(|p| match self.status(p.as_str()) {
            None => true,
            Some(s) => s.is_terminal() && !s.is_success_compatible(self.skipped_satisfies),
        })
    }

    /// Change a job's status, validating that the transition is legal.
    ///
    /// Returns the previous status.
    pub fn record_transition(&mut self, id: &str, transition: Transition) -> Result<JobStatus> {
        let entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| JobdagError::JobNotFound(id.to_string()))?;

        let from = entry.state.status();
        let to = transition.status;
        if !from.can_transition_to(to) {
            warn!(job = %id, %from, %to, "rejecting illegal job transition");
            return Err(JobdagError::InvalidTransition {
                job: id.to_string(),
                from,
                to,
            });
        }

        debug!(job = %id, %from, %to, "job transition");
        entry.state.apply(transition);
        Ok(from)
    }

    pub fn dependents_of(&self, id: &str) -> &[JobId] {
        self.graph.dependents_of(id)
    }

    pub fn transitive_dependents(&self, id: &str) -> Vec<JobId> {
        self.graph.transitive_dependents(id)
    }

    pub fn all_terminal(&self) -> bool {
        self.iter().all(|(_, s)| s.status().is_terminal())
    }

    /// True once nothing is left for this invocation: every job is terminal or
    /// handed to the batch backend.
    pub fn all_settled(&self) -> bool {
        self.iter()
            .all(|(_, s)| s.status().is_terminal() || s.status() == JobStatus::Queued)
    }

    pub fn count(&self, status: JobStatus) -> usize {
        self.iter().filter(|(_, s)| s.status() == status).count()
    }
}
