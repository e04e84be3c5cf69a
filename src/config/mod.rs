// src/config/mod.rs

//! Job file loading and validation for jobdag.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a job file from disk (`loader.rs`).
//! - Validate it: prerequisites, cycles, identities, batch settings
//!   (`validate.rs`).
//!
//! The scheduler itself never sees this module; it only receives the
//! `JobSpec`s and `RunOptions` a `JobFile` produces.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path};
pub use model::{BatchSection, ConfigSection, JobConfig, JobFile, RawJobFile};
