// src/batch/system.rs

//! Settings for talking to the external batch system, and the bounded
//! command invocation both batch modes use.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use regex::Regex;
use tokio::process::Command;
use tracing::debug;

use crate::batch::template::default_template;
use crate::types::BatchScheduler;

/// Everything needed to submit jobs and query their state.
#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub scheduler: BatchScheduler,
    /// Submission script template contents.
    pub template: String,
    /// Submission command; the script path is appended.
    pub submit_cmd: Vec<String>,
    /// Status command; the external job id is appended.
    pub status_cmd: Vec<String>,
    /// First capture group is the external id in the submit output.
    pub job_id_regex: Regex,
    /// First capture group is the job state in the status output.
    pub state_regex: Regex,
    /// First capture group is the exit code in the status output; an optional
    /// second group is the terminating signal.
    pub exit_code_regex: Regex,
    pub finished_states: Vec<String>,
    /// Finished states that mean the batch system ended the job early.
    pub failed_states: Vec<String>,
    /// Finished states that mean the batch system killed the job for time.
    pub timeout_states: Vec<String>,
    pub project: Option<String>,
    pub queue: Option<String>,
    pub dependency_separator: String,
    /// Upper bound on each submit/status command.
    pub command_timeout: Duration,
    /// How many status passes a check makes before giving up for now.
    pub max_passes: u32,
}

impl BatchSettings {
    /// Settings with every value taken from the scheduler's presets.
    pub fn for_scheduler(scheduler: BatchScheduler) -> Result<Self> {
        Ok(Self {
            scheduler,
            template: default_template(scheduler).to_string(),
            submit_cmd: scheduler.default_submit_cmd(),
            status_cmd: scheduler.default_status_cmd(),
            job_id_regex: compile(scheduler.default_job_id_regex())?,
            state_regex: compile(scheduler.default_state_regex())?,
            exit_code_regex: compile(scheduler.default_exit_code_regex())?,
            finished_states: scheduler.default_finished_states(),
            failed_states: scheduler.default_failed_states(),
            timeout_states: scheduler.default_timeout_states(),
            project: None,
            queue: None,
            dependency_separator: ":".to_string(),
            command_timeout: Duration::from_secs(60),
            max_passes: 1,
        })
    }

    pub fn is_finished(&self, state: &str) -> bool {
        self.finished_states.iter().any(|s| s == state)
    }

    pub fn is_failed(&self, state: &str) -> bool {
        self.failed_states.iter().any(|s| s == state)
    }

    pub fn is_timeout(&self, state: &str) -> bool {
        self.timeout_states.iter().any(|s| s == state)
    }

    /// File extension of rendered submission scripts.
    pub fn script_extension(&self) -> &'static str {
        match self.scheduler {
            BatchScheduler::Pbs => "pbs",
            BatchScheduler::Slurm => "sbatch",
        }
    }
}

pub fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).with_context(|| format!("invalid regex: {pattern}"))
}

/// First capture group of `re` in `text`.
pub fn capture<'t>(re: &Regex, text: &'t str) -> Option<&'t str> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
}

/// Exit code and signal from a status report.
///
/// A non-zero signal means the job did not exit on its own, so no exit code is
/// reported for it.
pub fn exit_status(re: &Regex, text: &str) -> (Option<i32>, Option<i32>) {
    let Some(caps) = re.captures(text) else {
        return (None, None);
    };
    let parse = |i: usize| caps.get(i).and_then(|m| m.as_str().trim().parse::<i32>().ok());
    match (parse(1), parse(2)) {
        (_, Some(signal)) if signal != 0 => (None, Some(signal)),
        (code, signal) => (code, signal),
    }
}

/// Output of a finished batch-system command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Run `argv` plus `extra` and wait for it, at most `limit`.
pub async fn run_command(
    argv: &[String],
    extra: &str,
    cwd: Option<&Path>,
    limit: Duration,
) -> Result<CommandOutput> {
    let Some((program, rest)) = argv.split_first() else {
        bail!("batch command is empty");
    };

    let mut cmd = Command::new(program);
    cmd.args(rest)
        .arg(extra)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    debug!(program = %program, arg = extra, "running batch command");
    let output = tokio::time::timeout(limit, cmd.output())
        .await
        .map_err(|_| anyhow!("'{program}' did not finish within {}s", limit.as_secs()))?
        .with_context(|| format!("running '{program}'"))?;

    Ok(CommandOutput {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
