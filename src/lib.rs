// src/lib.rs

pub mod batch;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod job;
pub mod logging;
pub mod report;
pub mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, warn};

use crate::batch::{BatchLauncher, BatchSettings, LedgerFile, StatusChecker};
use crate::cli::{CheckArgs, CliArgs, Command, RunArgs};
use crate::config::{JobFile, load_and_validate};
use crate::engine::{Dispatcher, RunOptions, SchedulerContext, Summary};
use crate::exec::{LocalRunner, Runner};
use crate::fs::{FileSystem, RealFileSystem};
use crate::job::JobSpec;
use crate::report::{LogReporter, Reporter};

/// How many of the slowest jobs the log reporter lists.
const LONGEST_JOBS: usize = 5;

/// Build a dispatcher for `specs`, persisting the ledger if
/// `options.ledger` is set.
pub fn dispatcher<R: Runner>(
    specs: Vec<JobSpec>,
    options: RunOptions,
    runner: R,
    reporter: Box<dyn Reporter>,
    fs: Arc<dyn FileSystem>,
) -> errors::Result<Dispatcher<R>> {
    let ledger = options.ledger.clone();
    let ctx = SchedulerContext::new(options, specs)?;
    let mut dispatcher = Dispatcher::new(ctx, runner, reporter);
    if let Some(path) = ledger {
        dispatcher = dispatcher.with_ledger(LedgerFile::new(path, fs));
    }
    Ok(dispatcher)
}

/// Run `specs` to completion as local processes.
pub async fn run_jobs(
    specs: Vec<JobSpec>,
    options: RunOptions,
    reporter: Box<dyn Reporter>,
) -> errors::Result<Summary> {
    let runner = LocalRunner::new(options.kill_grace, options.max_output_bytes);
    dispatcher(specs, options, runner, reporter, Arc::new(RealFileSystem))?
        .run()
        .await
}

/// Check the batch system for every unfinished job in the ledger at
/// `ledger_path` and record the results there.
pub async fn resume(
    ledger_path: impl AsRef<Path>,
    settings: Arc<BatchSettings>,
    options: &RunOptions,
    reporter: &mut dyn Reporter,
) -> errors::Result<Summary> {
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let file = LedgerFile::new(ledger_path.as_ref(), fs.clone());
    let checker = StatusChecker::new(settings, fs, options.max_output_bytes, options.poll_interval);
    checker.resume(&file, reporter).await
}

/// High-level entry point used by `main.rs`.
pub async fn run(args: CliArgs) -> Result<Summary> {
    match args.command {
        Command::Run(run_args) => run_command(run_args).await,
        Command::Check(check_args) => check_command(check_args).await,
    }
}

async fn run_command(args: RunArgs) -> Result<Summary> {
    let jobs_path = PathBuf::from(&args.jobs);
    let cfg = load_and_validate(&jobs_path)
        .with_context(|| format!("loading job file {}", jobs_path.display()))?;

    let mut options = cfg.run_options();
    if let Some(capacity) = args.capacity {
        if capacity == 0 {
            return Err(anyhow!("--capacity must be >= 1"));
        }
        options.capacity = capacity;
    }
    let specs = cfg.job_specs()?;

    if args.dry_run {
        print_dry_run(&cfg, options, specs)?;
        return Ok(Summary::default());
    }

    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let reporter = Box::new(LogReporter::new(LONGEST_JOBS));
    let summary = match cfg.batch_settings(fs.as_ref())? {
        None => {
            let runner = LocalRunner::new(options.kill_grace, options.max_output_bytes);
            drive(dispatcher(specs, options, runner, reporter, fs)?).await?
        }
        Some(settings) => {
            let runner = BatchLauncher::new(settings, fs.clone());
            drive(dispatcher(specs, options, runner, reporter, fs)?).await?
        }
    };

    println!("{summary}");
    if summary.outstanding() > 0 {
        if let Some(ledger) = cfg.ledger_path() {
            println!(
                "{} job(s) queued; run `jobdag check --jobs {}` later (ledger: {})",
                summary.outstanding(),
                args.jobs,
                ledger.display()
            );
        }
    }
    Ok(summary)
}

/// Run a dispatcher with Ctrl-C wired to its abort handle.
async fn drive<R: Runner>(dispatcher: Dispatcher<R>) -> Result<Summary> {
    let abort = dispatcher.abort_handle();
    let listener = tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            return;
        }
        abort.abort();
    });

    let result = dispatcher.run().await;
    listener.abort();
    Ok(result?)
}

async fn check_command(args: CheckArgs) -> Result<Summary> {
    let jobs_path = PathBuf::from(&args.jobs);
    let cfg = load_and_validate(&jobs_path)
        .with_context(|| format!("loading job file {}", jobs_path.display()))?;

    let settings = cfg
        .batch_settings(&RealFileSystem)?
        .ok_or_else(|| anyhow!("{} has no [batch] section to check against", args.jobs))?;

    let ledger = match &args.ledger {
        Some(path) => PathBuf::from(path),
        None => cfg
            .ledger_path()
            .ok_or_else(|| anyhow!("no --ledger given and [config].ledger is not set"))?,
    };
    info!(ledger = %ledger.display(), "checking batch jobs");

    let options = cfg.run_options();
    let mut reporter = LogReporter::new(LONGEST_JOBS);
    let summary = resume(&ledger, settings, &options, &mut reporter).await?;

    println!("{summary}");
    Ok(summary)
}

/// Dry-run output: jobs, clamped costs, prerequisites and commands.
fn print_dry_run(cfg: &JobFile, options: RunOptions, specs: Vec<JobSpec>) -> Result<()> {
    let mode = if cfg.batch().is_some() { "batch" } else { "local" };
    let ctx = SchedulerContext::new(options, specs)?;

    println!("jobdag dry-run");
    println!("  mode = {mode}");
    println!("  capacity = {}", ctx.options().capacity);
    if let Some(ledger) = &ctx.options().ledger {
        println!("  ledger = {}", ledger.display());
    }
    println!();

    println!("jobs ({}):", ctx.store().len());
    for (job, _) in ctx.store().iter() {
        println!("  - {}", job.id());
        println!("      cmd: {}", job.command());
        println!("      cost: {}", job.cost());
        println!("      timeout: {}s", job.timeout().as_secs());
        if !job.prereqs().is_empty() {
            let prereqs: Vec<&str> = job.prereqs().iter().map(|p| p.as_str()).collect();
            println!("      after: {prereqs:?}");
        }
        if !job.caveats().is_empty() {
            println!("      caveats: {}", job.caveats().join(", "));
        }
        if let Some(reason) = job.skip_reason() {
            println!("      skip: {reason}");
        }
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}
