// src/exec/mod.rs

//! Process execution layer.
//!
//! - [`backend`] provides the `Runner` trait the dispatch loop talks to.
//! - [`local`] is the local-subprocess runner.
//! - [`process`] spawns and watches a single job process (output capture,
//!   timeout, process-group termination).
//! - [`outcome`] turns raw exits into job statuses.

pub mod backend;
pub mod local;
pub mod outcome;
pub mod process;

pub use backend::{BoxFuture, Handle, Launched, Runner};
pub use local::LocalRunner;
pub use outcome::{EXPECTED_CRASH_MISSING, ExitKind, ExitOutcome, Verdict, classify};
