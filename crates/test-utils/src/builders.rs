#![allow(dead_code)]

use std::collections::BTreeMap;
use std::time::Duration;

use jobdag::config::{BatchSection, ConfigSection, JobConfig, JobFile, RawJobFile};
use jobdag::job::{JobCommand, JobSpec};

/// Builder for `JobFile` to simplify test setup.
pub struct JobFileBuilder {
    config: RawJobFile,
}

impl JobFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawJobFile {
                config: ConfigSection::default(),
                batch: None,
                job: BTreeMap::new(),
            },
        }
    }

    pub fn with_job(mut self, name: &str, job: JobConfig) -> Self {
        self.config.job.insert(name.to_string(), job);
        self
    }

    pub fn with_capacity(mut self, capacity: u32) -> Self {
        self.config.config.capacity = Some(capacity);
        self
    }

    pub fn with_ledger(mut self, path: &str) -> Self {
        self.config.config.ledger = Some(path.into());
        self
    }

    pub fn with_batch(mut self, batch: BatchSection) -> Self {
        self.config.batch = Some(batch);
        self
    }

    pub fn build(self) -> JobFile {
        JobFile::try_from(self.config).expect("Failed to build valid job file from builder")
    }

    pub fn try_build(self) -> jobdag::errors::Result<JobFile> {
        JobFile::try_from(self.config)
    }
}

impl Default for JobFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `JobConfig`.
pub struct JobConfigBuilder {
    job: JobConfig,
}

impl JobConfigBuilder {
    pub fn new(cmd: &str) -> Self {
        Self {
            job: JobConfig {
                cmd: Some(cmd.to_string()),
                ..JobConfig::default()
            },
        }
    }

    pub fn after(mut self, deps: &[&str]) -> Self {
        self.job.after = deps.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn parallel(mut self, min: u32, max: u32) -> Self {
        self.job.min_parallel = Some(min);
        self.job.max_parallel = Some(max);
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.job.timeout_secs = Some(secs);
        self
    }

    pub fn should_crash(mut self) -> Self {
        self.job.should_crash = true;
        self
    }

    pub fn skip(mut self, reason: &str) -> Self {
        self.job.skip = Some(reason.to_string());
        self
    }

    pub fn build(self) -> JobConfig {
        self.job
    }
}

/// Builder for `JobSpec`, for driving the dispatcher without a job file.
pub struct JobSpecBuilder {
    spec: JobSpec,
}

impl JobSpecBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            spec: JobSpec::new(name, JobCommand::Shell("true".to_string())),
        }
    }

    pub fn cmd(mut self, cmd: &str) -> Self {
        self.spec.command = JobCommand::Shell(cmd.to_string());
        self
    }

    pub fn after(mut self, deps: &[&str]) -> Self {
        self.spec.prereqs = deps.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Fix the job's cost by pinning both processor bounds.
    pub fn cost(mut self, cost: u32) -> Self {
        self.spec.min_parallel = cost;
        self.spec.max_parallel = cost;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.spec.timeout = timeout;
        self
    }

    pub fn working_dir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.spec.working_dir = dir.into();
        self
    }

    pub fn should_crash(mut self) -> Self {
        self.spec.should_crash = true;
        self
    }

    pub fn skip(mut self, reason: &str) -> Self {
        self.spec.skip = Some(reason.to_string());
        self
    }

    pub fn build(self) -> JobSpec {
        self.spec
    }
}
