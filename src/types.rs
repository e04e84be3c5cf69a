use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// Which runner drives the jobs of one invocation.
///
/// Selected once per run and never changed while the dispatch loop is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerKind {
    /// Jobs run as local child processes.
    Local,
    /// Jobs are rendered into submission scripts and handed to a batch system.
    BatchLaunch,
}

impl fmt::Display for RunnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunnerKind::Local => "local",
            RunnerKind::BatchLaunch => "batch-launch",
        };
        f.write_str(s)
    }
}

/// Flavour of external batch system.
///
/// Only decides the defaults for commands and output-parsing regexes; every
/// one of them can be overridden in the `[batch]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BatchScheduler {
    #[default]
    Pbs,
    Slurm,
}

impl FromStr for BatchScheduler {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pbs" => Ok(BatchScheduler::Pbs),
            "slurm" => Ok(BatchScheduler::Slurm),
            other => Err(format!(
                "invalid batch scheduler: {other} (expected \"pbs\" or \"slurm\")"
            )),
        }
    }
}

impl BatchScheduler {
    pub fn default_submit_cmd(self) -> Vec<String> {
        match self {
            BatchScheduler::Pbs => vec!["qsub".to_string()],
            BatchScheduler::Slurm => vec!["sbatch".to_string()],
        }
    }

    pub fn default_status_cmd(self) -> Vec<String> {
        let parts: &[&str] = match self {
            BatchScheduler::Pbs => &["qstat", "-x", "-f"],
            BatchScheduler::Slurm => &["sacct", "-n", "-P", "-X", "-o", "State,ExitCode", "-j"],
        };
        parts.iter().map(|s| s.to_string()).collect()
    }

    pub fn default_job_id_regex(self) -> &'static str {
        match self {
            BatchScheduler::Pbs => r"^\s*(\d+(?:\.\S+)?)",
            BatchScheduler::Slurm => r"Submitted batch job (\d+)",
        }
    }

    pub fn default_state_regex(self) -> &'static str {
        match self {
            BatchScheduler::Pbs => r"job_state\s*=\s*(\w+)",
            BatchScheduler::Slurm => r"(?m)^\s*([A-Z_]+)",
        }
    }

    pub fn default_exit_code_regex(self) -> &'static str {
        match self {
            BatchScheduler::Pbs => r"Exit_status\s*=\s*(-?\d+)",
            BatchScheduler::Slurm => r"\|(\d+):(\d+)",
        }
    }

    pub fn default_finished_states(self) -> Vec<String> {
        let states: &[&str] = match self {
            BatchScheduler::Pbs => &["F", "C"],
            BatchScheduler::Slurm => &[
                "COMPLETED",
                "FAILED",
                "CANCELLED",
                "TIMEOUT",
                "OUT_OF_MEMORY",
                "NODE_FAIL",
            ],
        };
        states.iter().map(|s| s.to_string()).collect()
    }

    /// Finished states in which the batch system, not the job, ended the run.
    pub fn default_failed_states(self) -> Vec<String> {
        let states: &[&str] = match self {
            BatchScheduler::Pbs => &[],
            BatchScheduler::Slurm => &["FAILED", "CANCELLED", "OUT_OF_MEMORY", "NODE_FAIL"],
        };
        states.iter().map(|s| s.to_string()).collect()
    }

    pub fn default_timeout_states(self) -> Vec<String> {
        match self {
            BatchScheduler::Pbs => Vec::new(),
            BatchScheduler::Slurm => vec!["TIMEOUT".to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_scheduler_from_str() {
        assert_eq!("PBS".parse::<BatchScheduler>(), Ok(BatchScheduler::Pbs));
        assert_eq!(" slurm".parse::<BatchScheduler>(), Ok(BatchScheduler::Slurm));
        assert!("lsf".parse::<BatchScheduler>().is_err());
    }
}
