// src/engine/mod.rs

//! Dispatch engine for jobdag.
//!
//! This module ties together:
//! - the job store (what is runnable)
//! - the slot allocator (what fits)
//! - the active runner (local processes or batch submission)
//! - result reporting and ledger persistence
//!
//! The pure planning and reaping logic lives in [`core`]; the async/IO shell
//! that drives a [`Runner`](crate::exec::Runner) is implemented in
//! [`runtime`].

use std::path::PathBuf;
use std::time::Duration;

pub mod context;
pub mod core;
pub mod runtime;
pub mod slots;
pub mod summary;

pub use context::SchedulerContext;
pub use core::Plan;
pub use runtime::{AbortHandle, Dispatcher};
pub use slots::SlotAllocator;
pub use summary::Summary;

/// Message given to jobs that never ran because the run was aborted.
pub const ABORTED_MESSAGE: &str = "run aborted";

/// Message given to jobs skipped because a prerequisite cannot succeed.
pub const SKIPPED_DEPENDENCY_MESSAGE: &str = "skipped dependency";

/// Options shared by the planning core and the async shell.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Total slots available to running jobs.
    pub capacity: u32,
    /// Processor count requested for every job before clamping.
    pub parallel: u32,
    /// Whether a `Skipped` prerequisite counts as satisfied.
    pub skipped_satisfies: bool,
    /// Idle wait between dispatch iterations when nothing progressed.
    pub poll_interval: Duration,
    pub max_output_bytes: usize,
    pub kill_grace: Duration,
    /// Where to persist the ledger after every state change, if anywhere.
    pub ledger: Option<PathBuf>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            capacity: std::thread::available_parallelism()
                .map(|n| n.get() as u32)
                .unwrap_or(1),
            parallel: 1,
            skipped_satisfies: false,
            poll_interval: Duration::from_millis(100),
            max_output_bytes: 1024 * 1024,
            kill_grace: Duration::from_secs(2),
            ledger: None,
        }
    }
}
