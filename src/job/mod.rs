// src/job/mod.rs

//! Jobs, their mutable state, and the store that tracks both.
//!
//! - [`spec`] holds the descriptor a caller hands in ([`JobSpec`]) and the
//!   immutable [`Job`] built from it (identity, clamped cost, staging sets).
//! - [`status`] contains the [`JobStatus`] state machine and the per-job
//!   [`JobState`] record.
//! - [`output`] is the bounded capture buffer for process output.
//! - [`graph`] keeps prerequisite / dependent adjacency keyed by [`JobId`].
//! - [`store`] owns every job of a run and answers "what can run now".

pub mod graph;
pub mod output;
pub mod spec;
pub mod status;
pub mod store;

pub use graph::DepGraph;
pub use output::OutputBuffer;
pub use spec::{CostPolicy, Job, JobCommand, JobId, JobSpec, StagingSpec, DEFAULT_ERROR_PATTERNS};
pub use status::{JobState, JobStatus, Transition};
pub use store::JobStore;
