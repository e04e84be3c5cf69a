// src/job/spec.rs

//! Job descriptors and the immutable [`Job`] built from them.

use std::borrow::Borrow;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{JobdagError, Result};

/// Substrings that mark a zero exit as a failure unless a job overrides them.
pub const DEFAULT_ERROR_PATTERNS: &[&str] = &[
    "ERROR",
    "command not found",
    "terminate called after throwing an instance of",
];

/// Stable, path-safe job identity.
///
/// Built from a logical name by dropping every character that is not ASCII
/// alphanumeric, `_` or `-`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn sanitize(name: &str) -> Self {
        let cleaned: String = name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        Self(cleaned)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for JobId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for JobId {
    fn from(name: &str) -> Self {
        JobId::sanitize(name)
    }
}

/// What to execute: a shell string or an argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobCommand {
    Shell(String),
    Argv(Vec<String>),
}

impl JobCommand {
    /// Render as a single shell line (used in submission scripts and logs).
    pub fn render(&self) -> String {
        match self {
            JobCommand::Shell(s) => s.clone(),
            JobCommand::Argv(args) => args
                .iter()
                .map(|a| shell_quote(a))
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

impl fmt::Display for JobCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Files to place into a job's working directory before a batch launch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagingSpec {
    /// Directory whose contents are copied into the working directory.
    /// `None` disables the bulk copy.
    pub source_dir: Option<PathBuf>,
    /// Extra paths copied in addition to the parent directory contents.
    pub copy_files: Vec<String>,
    /// Paths that are symlinked rather than copied.
    pub link_files: Vec<String>,
    /// Glob patterns excluded from the parent-directory copy.
    pub no_copy: Vec<String>,
}

impl StagingSpec {
    pub fn is_empty(&self) -> bool {
        self.source_dir.is_none() && self.copy_files.is_empty() && self.link_files.is_empty()
    }
}

/// Caller-supplied job descriptor.
///
/// Producing these (from a config file or elsewhere) is up to the caller;
/// [`Job::from_spec`] turns one into a schedulable job.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub name: String,
    pub command: JobCommand,
    pub min_parallel: u32,
    pub max_parallel: u32,
    pub timeout: Duration,
    pub prereqs: Vec<String>,
    pub working_dir: PathBuf,
    pub input_name: Option<String>,
    pub staging: StagingSpec,
    pub should_crash: bool,
    pub error_patterns: Vec<String>,
    /// If set, the job is skipped with this reason instead of being launched.
    pub skip: Option<String>,
}

impl JobSpec {
    pub fn new(name: impl Into<String>, command: JobCommand) -> Self {
        Self {
            name: name.into(),
            command,
            min_parallel: 1,
            max_parallel: 1000,
            timeout: Duration::from_secs(300),
            prereqs: Vec::new(),
            working_dir: PathBuf::from("."),
            input_name: None,
            staging: StagingSpec::default(),
            should_crash: false,
            error_patterns: DEFAULT_ERROR_PATTERNS.iter().map(|s| s.to_string()).collect(),
            skip: None,
        }
    }
}

/// Global inputs to the cost computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostPolicy {
    /// Processor count requested for every job (e.g. `-p N`).
    pub parallel: u32,
    /// Total slots of the allocator; no job may cost more.
    pub capacity: u32,
}

/// Immutable description of one unit of work.
#[derive(Debug, Clone)]
pub struct Job {
    id: JobId,
    name: String,
    command: JobCommand,
    cost: u32,
    timeout: Duration,
    prereqs: Vec<JobId>,
    working_dir: PathBuf,
    input_name: Option<String>,
    staging: StagingSpec,
    should_crash: bool,
    error_patterns: Vec<String>,
    skip: Option<String>,
    caveats: Vec<String>,
}

impl Job {
    /// Build a job, clamping its processor count.
    ///
    /// The requested count is raised to `min_parallel`, lowered to
    /// `max_parallel`, and finally lowered to the allocator capacity so that an
    /// oversized job still runs instead of being dropped.
    pub fn from_spec(spec: JobSpec, policy: &CostPolicy) -> Result<Self> {
        let id = JobId::sanitize(&spec.name);
        if id.as_str().is_empty() {
            return Err(JobdagError::ConfigError(format!(
                "job name '{}' has no path-safe characters",
                spec.name
            )));
        }
        if spec.max_parallel == 0 || policy.capacity == 0 {
            return Err(JobdagError::InvalidCost(0));
        }

        let mut caveats = Vec::new();

        // Raise the floor
        let mut cost = policy.parallel.max(spec.min_parallel).max(1);
        // Lower the ceiling
        cost = cost.min(spec.max_parallel);
        if cost > policy.parallel {
            caveats.push(format!("min_cpus={cost}"));
        } else if cost < policy.parallel {
            caveats.push(format!("max_cpus={cost}"));
        }

        if cost > policy.capacity {
            debug!(
                job = %id,
                requested = cost,
                capacity = policy.capacity,
                "clamping job cost to allocator capacity"
            );
            cost = policy.capacity;
            caveats.push(format!("capacity_cpus={cost}"));
        }

        let prereqs = spec.prereqs.iter().map(|p| JobId::sanitize(p)).collect();

        Ok(Self {
            id,
            name: spec.name,
            command: spec.command,
            cost,
            timeout: spec.timeout,
            prereqs,
            working_dir: spec.working_dir,
            input_name: spec.input_name,
            staging: spec.staging,
            should_crash: spec.should_crash,
            error_patterns: spec.error_patterns,
            skip: spec.skip,
            caveats,
        })
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    /// Logical (unsanitised) name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn command(&self) -> &JobCommand {
        &self.command
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn prereqs(&self) -> &[JobId] {
        &self.prereqs
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn input_name(&self) -> Option<&str> {
        self.input_name.as_deref()
    }

    pub fn staging(&self) -> &StagingSpec {
        &self.staging
    }

    pub fn should_crash(&self) -> bool {
        self.should_crash
    }

    pub fn error_patterns(&self) -> &[String] {
        &self.error_patterns
    }

    pub fn skip_reason(&self) -> Option<&str> {
        self.skip.as_deref()
    }

    pub fn caveats(&self) -> &[String] {
        &self.caveats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(parallel: u32, capacity: u32) -> CostPolicy {
        CostPolicy { parallel, capacity }
    }

    #[test]
    fn sanitize_keeps_only_path_safe_characters() {
        assert_eq!(JobId::sanitize("kernels/simple.test").as_str(), "kernelssimpletest");
        assert_eq!(JobId::sanitize("a_b-c 9!").as_str(), "a_b-c9");
    }

    #[test]
    fn cost_is_clamped_to_capacity() {
        let mut spec = JobSpec::new("big", JobCommand::Shell("true".into()));
        spec.min_parallel = 3;
        let job = Job::from_spec(spec, &policy(1, 2)).unwrap();
        assert_eq!(job.cost(), 2);
        assert!(job.caveats().iter().any(|c| c == "capacity_cpus=2"));
    }

    #[test]
    fn cost_floor_and_ceiling() {
        let mut spec = JobSpec::new("j", JobCommand::Shell("true".into()));
        spec.max_parallel = 2;
        let job = Job::from_spec(spec.clone(), &policy(4, 16)).unwrap();
        assert_eq!(job.cost(), 2);
        assert_eq!(job.caveats(), ["max_cpus=2".to_string()]);

        spec.max_parallel = 100;
        spec.min_parallel = 8;
        let job = Job::from_spec(spec, &policy(4, 16)).unwrap();
        assert_eq!(job.cost(), 8);
        assert_eq!(job.caveats(), ["min_cpus=8".to_string()]);
    }

    #[test]
    fn empty_identity_is_rejected() {
        let spec = JobSpec::new("///", JobCommand::Shell("true".into()));
        assert!(matches!(
            Job::from_spec(spec, &policy(1, 1)),
            Err(JobdagError::ConfigError(_))
        ));
    }

    #[test]
    fn argv_render_quotes_unsafe_args() {
        let cmd = JobCommand::Argv(vec!["echo".into(), "hello world".into(), "it's".into()]);
        assert_eq!(cmd.render(), r"echo 'hello world' 'it'\''s'");
    }
}
