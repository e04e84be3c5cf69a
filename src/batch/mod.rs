// src/batch/mod.rs

//! Batch backend adapter.
//!
//! Two cooperating modes share the ledger:
//! - Launch ([`submit::BatchLauncher`]): stage files, render a submission
//!   script, submit it and record the job as `Queued`.
//! - CheckStatus ([`status::StatusChecker`]): in a later invocation, poll the
//!   batch system for every non-terminal ledger entry and record the outcome.

pub mod ledger;
pub mod staging;
pub mod status;
pub mod submit;
pub mod system;
pub mod template;

pub use ledger::{Ledger, LedgerEntry, LedgerFile};
pub use status::{RemoteState, StatusChecker};
pub use submit::BatchLauncher;
pub use system::BatchSettings;
pub use template::TemplateVars;
