// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Command-line arguments for `jobdag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "jobdag",
    version,
    about = "Run a dependency graph of test jobs locally or on a batch system.",
    long_about = None
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `JOBDAG_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run every job: locally, or by submitting to the batch system when the
    /// job file has a `[batch]` section.
    Run(RunArgs),

    /// Check the batch system for jobs recorded in a ledger by an earlier
    /// `run`, and record their results.
    Check(CheckArgs),
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Path to the job file (TOML).
    #[arg(long, value_name = "PATH", default_value = "Jobdag.toml")]
    pub jobs: String,

    /// Override `[config].capacity`.
    #[arg(long, value_name = "SLOTS")]
    pub capacity: Option<u32>,

    /// Parse + validate, print the jobs, but don't execute anything.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Args)]
pub struct CheckArgs {
    /// Path to the job file (TOML) holding the `[batch]` settings.
    #[arg(long, value_name = "PATH", default_value = "Jobdag.toml")]
    pub jobs: String,

    /// Ledger to check; defaults to `[config].ledger` of the job file.
    #[arg(long, value_name = "PATH")]
    pub ledger: Option<String>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_overrides() {
        let args =
            CliArgs::try_parse_from(["jobdag", "run", "--jobs", "ci.toml", "--capacity", "8", "--dry-run"])
                .unwrap();
        match args.command {
            Command::Run(run) => {
                assert_eq!(run.jobs, "ci.toml");
                assert_eq!(run.capacity, Some(8));
                assert!(run.dry_run);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn parses_check_with_global_log_level() {
        let args =
            CliArgs::try_parse_from(["jobdag", "check", "--ledger", "l.json", "--log-level", "debug"])
                .unwrap();
        assert!(matches!(args.log_level, Some(LogLevel::Debug)));
        match args.command {
            Command::Check(check) => {
                assert_eq!(check.ledger.as_deref(), Some("l.json"));
                assert_eq!(check.jobs, "Jobdag.toml");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
