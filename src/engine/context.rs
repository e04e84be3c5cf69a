// src/engine/context.rs

use tracing::debug;

use crate::engine::RunOptions;
use crate::engine::slots::SlotAllocator;
use crate::errors::Result;
use crate::job::{CostPolicy, Job, JobSpec, JobStore};

/// Everything one run mutates: the job store, the slot ledger, and the
/// options they were built with.
///
/// Owned by the dispatch loop for the duration of a run.
#[derive(Debug)]
pub struct SchedulerContext {
    pub(crate) store: JobStore,
    pub(crate) slots: SlotAllocator,
    pub(crate) options: RunOptions,
}

impl SchedulerContext {
    /// Build jobs from descriptors and populate a fresh store.
    ///
    /// Fails on the first duplicate identity or invalid descriptor.
    pub fn new(options: RunOptions, specs: impl IntoIterator<Item = JobSpec>) -> Result<Self> {
        let policy = CostPolicy {
            parallel: options.parallel,
            capacity: options.capacity,
        };

        let mut store = JobStore::new(options.skipped_satisfies, options.max_output_bytes);
        for spec in specs {
            let job = Job::from_spec(spec, &policy)?;
            debug!(job = %job.id(), cost = job.cost(), prereqs = job.prereqs().len(), "adding job");
            store.add(job)?;
        }

        Ok(Self {
            store,
            slots: SlotAllocator::new(options.capacity),
            options,
        })
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn slots(&self) -> &SlotAllocator {
        &self.slots
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }
}
