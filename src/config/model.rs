// src/config/model.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::batch::system::{BatchSettings, compile};
use crate::engine::RunOptions;
use crate::errors::{JobdagError, Result};
use crate::fs::FileSystem;
use crate::job::{DEFAULT_ERROR_PATTERNS, JobCommand, JobSpec, StagingSpec};
use crate::types::BatchScheduler;

/// Job file exactly as deserialized from TOML, before validation.
///
/// ```toml
/// [config]
/// capacity = 4
/// ledger = "jobdag-ledger.json"
///
/// [batch]
/// scheduler = "slurm"
/// queue = "short"
///
/// [job.build]
/// cmd = "make -j4"
/// min_parallel = 4
///
/// [job.test_a]
/// args = ["./run-tests", "--suite", "a"]
/// after = ["build"]
/// timeout_secs = 120
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RawJobFile {
    #[serde(default)]
    pub config: ConfigSection,

    /// Present only when jobs go to a batch system.
    #[serde(default)]
    pub batch: Option<BatchSection>,

    /// Keys are the job names as written (before identity sanitising).
    #[serde(default)]
    pub job: BTreeMap<String, JobConfig>,
}

/// Validated job file.
///
/// Only obtainable through `TryFrom<RawJobFile>` (see `validate.rs`).
#[derive(Debug, Clone)]
pub struct JobFile {
    config: ConfigSection,
    batch: Option<BatchSection>,
    job: BTreeMap<String, JobConfig>,
    /// Directory relative paths in the file are resolved against.
    base_dir: PathBuf,
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Total slots; defaults to the number of available CPUs.
    #[serde(default)]
    pub capacity: Option<u32>,

    /// Processor count requested for every job before clamping.
    #[serde(default = "default_parallel")]
    pub parallel: u32,

    #[serde(default)]
    pub skipped_satisfies_prereqs: bool,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,

    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,

    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,

    /// Ledger written during the run. Required for batch runs.
    #[serde(default)]
    pub ledger: Option<PathBuf>,
}

fn default_parallel() -> u32 {
    1
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_max_output_bytes() -> usize {
    1024 * 1024
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_kill_grace_ms() -> u64 {
    2000
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            capacity: None,
            parallel: default_parallel(),
            skipped_satisfies_prereqs: false,
            poll_interval_ms: default_poll_interval_ms(),
            max_output_bytes: default_max_output_bytes(),
            default_timeout_secs: default_timeout_secs(),
            kill_grace_ms: default_kill_grace_ms(),
            ledger: None,
        }
    }
}

/// `[batch]` section. Anything left out comes from the scheduler presets.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchSection {
    #[serde(default)]
    pub scheduler: BatchScheduler,
    /// Path of a submission script template; the built-in one if absent.
    #[serde(default)]
    pub template: Option<PathBuf>,
    #[serde(default)]
    pub submit_cmd: Option<Vec<String>>,
    #[serde(default)]
    pub status_cmd: Option<Vec<String>>,
    #[serde(default)]
    pub job_id_regex: Option<String>,
    #[serde(default)]
    pub state_regex: Option<String>,
    #[serde(default)]
    pub exit_code_regex: Option<String>,
    #[serde(default)]
    pub finished_states: Option<Vec<String>>,
    #[serde(default)]
    pub failed_states: Option<Vec<String>>,
    #[serde(default)]
    pub timeout_states: Option<Vec<String>>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub queue: Option<String>,
    #[serde(default)]
    pub dependency_separator: Option<String>,
    #[serde(default)]
    pub command_timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_passes: Option<u32>,
}

/// `[job.<name>]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobConfig {
    /// Shell command line. Exactly one of `cmd` and `args` must be set.
    #[serde(default)]
    pub cmd: Option<String>,

    /// Argument vector, run without a shell.
    #[serde(default)]
    pub args: Option<Vec<String>>,

    #[serde(default)]
    pub min_parallel: Option<u32>,

    #[serde(default)]
    pub max_parallel: Option<u32>,

    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Prerequisites: this job waits for all jobs listed here.
    #[serde(default)]
    pub after: Vec<String>,

    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Name of the job's main input file, for reporting and templates.
    #[serde(default)]
    pub input: Option<String>,

    /// Directory whose contents are staged into `working_dir` before a batch
    /// submission.
    #[serde(default)]
    pub stage_from: Option<PathBuf>,

    #[serde(default)]
    pub copy_files: Vec<String>,

    #[serde(default)]
    pub link_files: Vec<String>,

    /// Glob patterns left out of the `stage_from` copy.
    #[serde(default)]
    pub no_copy: Vec<String>,

    #[serde(default)]
    pub should_crash: bool,

    /// Output substrings that turn a clean exit into a failure.
    #[serde(default)]
    pub errors: Option<Vec<String>>,

    /// Skip the job with this reason instead of running it.
    #[serde(default)]
    pub skip: Option<String>,
}

impl JobConfig {
    /// The command, if exactly one form is given.
    pub fn command(&self) -> Option<JobCommand> {
        match (&self.cmd, &self.args) {
            (Some(cmd), None) => Some(JobCommand::Shell(cmd.clone())),
            (None, Some(args)) => Some(JobCommand::Argv(args.clone())),
            _ => None,
        }
    }
}

impl JobFile {
    pub(crate) fn new_unchecked(
        config: ConfigSection,
        batch: Option<BatchSection>,
        job: BTreeMap<String, JobConfig>,
    ) -> Self {
        Self {
            config,
            batch,
            job,
            base_dir: PathBuf::from("."),
        }
    }

    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    pub fn config(&self) -> &ConfigSection {
        &self.config
    }

    pub fn batch(&self) -> Option<&BatchSection> {
        self.batch.as_ref()
    }

    pub fn jobs(&self) -> &BTreeMap<String, JobConfig> {
        &self.job
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_relative() {
            self.base_dir.join(path)
        } else {
            path.to_path_buf()
        }
    }

    /// The ledger path, resolved against the job file's directory.
    pub fn ledger_path(&self) -> Option<PathBuf> {
        self.config.ledger.as_deref().map(|p| self.resolve(p))
    }

    pub fn run_options(&self) -> RunOptions {
        let defaults = RunOptions::default();
        RunOptions {
            capacity: self.config.capacity.unwrap_or(defaults.capacity),
            parallel: self.config.parallel,
            skipped_satisfies: self.config.skipped_satisfies_prereqs,
            poll_interval: Duration::from_millis(self.config.poll_interval_ms),
            max_output_bytes: self.config.max_output_bytes,
            kill_grace: Duration::from_millis(self.config.kill_grace_ms),
            ledger: self.ledger_path(),
        }
    }

    /// Job descriptors in file order (sorted by name).
    pub fn job_specs(&self) -> Result<Vec<JobSpec>> {
        self.job
            .iter()
            .map(|(name, cfg)| self.job_spec(name, cfg))
            .collect()
    }

    fn job_spec(&self, name: &str, cfg: &JobConfig) -> Result<JobSpec> {
        let command = cfg.command().ok_or_else(|| {
            JobdagError::ConfigError(format!("job '{name}' must set exactly one of `cmd` or `args`"))
        })?;

        let mut spec = JobSpec::new(name, command);
        if let Some(min) = cfg.min_parallel {
            spec.min_parallel = min;
        }
        if let Some(max) = cfg.max_parallel {
            spec.max_parallel = max;
        }
        spec.timeout =
            Duration::from_secs(cfg.timeout_secs.unwrap_or(self.config.default_timeout_secs));
        spec.prereqs = cfg.after.clone();
        spec.working_dir = self.resolve(cfg.working_dir.as_deref().unwrap_or(Path::new(".")));
        spec.input_name = cfg.input.clone();
        spec.staging = StagingSpec {
            source_dir: cfg.stage_from.as_deref().map(|p| self.resolve(p)),
            copy_files: cfg.copy_files.clone(),
            link_files: cfg.link_files.clone(),
            no_copy: cfg.no_copy.clone(),
        };
        spec.should_crash = cfg.should_crash;
        spec.error_patterns = cfg
            .errors
            .clone()
            .unwrap_or_else(|| DEFAULT_ERROR_PATTERNS.iter().map(|s| s.to_string()).collect());
        spec.skip = cfg.skip.clone();
        Ok(spec)
    }

    /// Batch settings from `[batch]`, or `None` for a local run.
    pub fn batch_settings(&self, fs: &dyn FileSystem) -> Result<Option<Arc<BatchSettings>>> {
        let Some(section) = &self.batch else {
            return Ok(None);
        };

        let mut s = BatchSettings::for_scheduler(section.scheduler)?;
        if let Some(path) = &section.template {
            s.template = fs.read_to_string(&self.resolve(path))?;
        }
        if let Some(cmd) = &section.submit_cmd {
            s.submit_cmd = cmd.clone();
        }
        if let Some(cmd) = &section.status_cmd {
            s.status_cmd = cmd.clone();
        }
        if let Some(re) = &section.job_id_regex {
            s.job_id_regex = compile(re)?;
        }
        if let Some(re) = &section.state_regex {
            s.state_regex = compile(re)?;
        }
        if let Some(re) = &section.exit_code_regex {
            s.exit_code_regex = compile(re)?;
        }
        if let Some(states) = &section.finished_states {
            s.finished_states = states.clone();
        }
        if let Some(states) = &section.failed_states {
            s.failed_states = states.clone();
        }
        if let Some(states) = &section.timeout_states {
            s.timeout_states = states.clone();
        }
        s.project = section.project.clone();
        s.queue = section.queue.clone();
        if let Some(sep) = &section.dependency_separator {
            s.dependency_separator = sep.clone();
        }
        if let Some(secs) = section.command_timeout_secs {
            s.command_timeout = Duration::from_secs(secs);
        }
        if let Some(passes) = section.max_passes {
            s.max_passes = passes;
        }
        Ok(Some(Arc::new(s)))
    }
}
