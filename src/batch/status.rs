// src/batch/status.rs

//! CheckStatus mode: poll the batch system for jobs recorded in a ledger and
//! reconcile their outcomes.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::batch::ledger::{Ledger, LedgerEntry, LedgerFile};
use crate::batch::submit::output_path;
use crate::batch::system::{BatchSettings, capture, exit_status, run_command};
use crate::engine::{SKIPPED_DEPENDENCY_MESSAGE, Summary};
use crate::errors::{JobdagError, Result};
use crate::exec::{ExitKind, ExitOutcome, classify};
use crate::fs::FileSystem;
use crate::job::{JobId, JobStatus, OutputBuffer};
use crate::report::{JobReport, Reporter};

/// What the batch system said about one job.
#[derive(Debug, Clone)]
pub enum RemoteState {
    /// Finished; output (if any) was collected.
    Finished(ExitOutcome),
    /// Still queued or running under the given batch state.
    Waiting(String),
    /// The status query itself failed; try again on a later pass.
    Unknown(String),
}

/// Polls submitted jobs and writes their results back into the ledger.
///
/// Nothing is ever resubmitted; entries that are already terminal are left
/// alone, so checking an unchanged ledger twice gives the same result.
#[derive(Debug)]
pub struct StatusChecker {
    settings: Arc<BatchSettings>,
    fs: Arc<dyn FileSystem>,
    max_output_bytes: usize,
    poll_interval: Duration,
}

impl StatusChecker {
    pub fn new(
        settings: Arc<BatchSettings>,
        fs: Arc<dyn FileSystem>,
        max_output_bytes: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            settings,
            fs,
            max_output_bytes,
            poll_interval,
        }
    }

    /// Ask the batch system about one submitted job.
    pub async fn query(&self, id: &str, entry: &LedgerEntry, external_id: &str) -> RemoteState {
        let out = match run_command(
            &self.settings.status_cmd,
            external_id,
            None,
            self.settings.command_timeout,
        )
        .await
        {
            Ok(out) => out,
            Err(e) => return RemoteState::Unknown(format!("{e:#}")),
        };

        let Some(state) = capture(&self.settings.state_regex, &out.stdout) else {
            let detail = match out.stderr.trim() {
                "" => "no state in status output".to_string(),
                err => err.to_string(),
            };
            return RemoteState::Unknown(detail);
        };

        if !self.settings.is_finished(state) {
            return RemoteState::Waiting(state.to_string());
        }

        let (exit_code, signal) = exit_status(&self.settings.exit_code_regex, &out.stdout);
        let kind = if self.settings.is_timeout(state) {
            ExitKind::TimedOut
        } else if self.settings.is_failed(state) && exit_code.is_none_or(|c| c == 0) {
            // No failing exit code of its own: the batch system ended it.
            ExitKind::Terminated(state.to_string())
        } else {
            ExitKind::Exited
        };
        if let Some(signal) = signal.filter(|s| *s != 0) {
            debug!(job = id, external_id, state, signal, "batch job ended by signal");
        }

        RemoteState::Finished(ExitOutcome {
            kind,
            exit_code,
            output: self.read_output(id, entry),
            elapsed: Duration::ZERO,
        })
    }

    fn read_output(&self, id: &str, entry: &LedgerEntry) -> String {
        let path = output_path(&entry.working_dir, id);
        match self.fs.read_to_string(&path) {
            Ok(text) => {
                let mut buf = OutputBuffer::new(self.max_output_bytes);
                buf.push(&text);
                buf.contents()
            }
            Err(e) => {
                debug!(job = id, path = %path.display(), error = %e, "no batch output file");
                String::new()
            }
        }
    }

    /// One status pass over every non-terminal entry.
    ///
    /// The ledger is saved after each entry that changes. Returns how many
    /// entries became terminal.
    pub async fn check_pass(
        &self,
        ledger: &mut Ledger,
        file: &LedgerFile,
        reporter: &mut dyn Reporter,
    ) -> Result<usize> {
        let mut finished = 0;

        for id in ledger.non_terminal() {
            let Some(entry) = ledger.get(&id).cloned() else {
                continue;
            };

            if entry.status == JobStatus::Pending {
                warn!(job = %id, "job was never submitted; nothing to check");
                continue;
            }
            let Some(external_id) = entry.external_id.clone() else {
                let err = JobdagError::LedgerCorruption {
                    entry: id.clone(),
                    reason: format!("status '{}' without an external id", entry.status),
                };
                warn!(error = %err, "skipping ledger entry");
                continue;
            };

            let outcome = match self.query(&id, &entry, &external_id).await {
                RemoteState::Finished(outcome) => outcome,
                RemoteState::Waiting(state) => {
                    debug!(job = %id, external_id, state, "still in the batch system");
                    continue;
                }
                RemoteState::Unknown(reason) => {
                    warn!(job = %id, external_id, reason, "status query failed; will retry");
                    continue;
                }
            };

            let verdict = classify(entry.should_crash, &entry.error_patterns, &outcome);
            if !entry.status.can_transition_to(verdict.status) {
                return Err(JobdagError::InvalidTransition {
                    job: id,
                    from: entry.status,
                    to: verdict.status,
                });
            }

            let report = JobReport {
                id: JobId::sanitize(&id),
                name: entry.job_name.clone(),
                status: verdict.status,
                exit_code: outcome.exit_code,
                output: outcome.output,
                elapsed: outcome.elapsed,
                message: verdict.message.clone(),
                caveats: Vec::new(),
            };

            if let Some(slot) = ledger.get_mut(&id) {
                slot.status = verdict.status;
                slot.exit_code = outcome.exit_code;
                slot.message = verdict.message;
                slot.skipped = verdict.status == JobStatus::Skipped;
            }
            file.save(ledger)?;

            info!(job = %id, external_id, status = %report.status, "batch job finished");
            reporter.on_job_finished(&report);
            finished += 1;
        }

        finished += self.skip_blocked(ledger, file, reporter)?;
        Ok(finished)
    }

    /// Skip queued entries chained after a job that can no longer succeed.
    ///
    /// Repeats until nothing changes, so a whole chain is settled in one pass.
    /// The batch system is left to drop the remote jobs itself.
    fn skip_blocked(
        &self,
        ledger: &mut Ledger,
        file: &LedgerFile,
        reporter: &mut dyn Reporter,
    ) -> Result<usize> {
        let mut skipped = 0;
        loop {
            let blocked: Vec<(String, String)> = ledger
                .iter()
                .filter(|(_, e)| e.status == JobStatus::Queued)
                .filter_map(|(id, e)| {
                    e.prereqs
                        .iter()
                        .find(|p| ledger.get(p.as_str()).is_some_and(LedgerEntry::blocks_dependents))
                        .map(|p| (id.to_string(), p.clone()))
                })
                .collect();
            if blocked.is_empty() {
                return Ok(skipped);
            }

            for (id, prereq) in blocked {
                let Some(entry) = ledger.get_mut(&id) else {
                    continue;
                };
                entry.status = JobStatus::Skipped;
                entry.skipped = true;
                entry.message = Some(SKIPPED_DEPENDENCY_MESSAGE.to_string());
                let report = JobReport {
                    id: JobId::sanitize(&id),
                    name: entry.job_name.clone(),
                    status: JobStatus::Skipped,
                    exit_code: None,
                    output: String::new(),
                    elapsed: Duration::ZERO,
                    message: entry.message.clone(),
                    caveats: Vec::new(),
                };
                file.save(ledger)?;

                info!(job = %id, prereq, "prerequisite did not succeed; skipping batch job");
                reporter.on_job_finished(&report);
                skipped += 1;
            }
        }
    }

    /// Load the ledger and check it, repeating passes until nothing is left
    /// or the configured number of passes is used up.
    pub async fn resume(&self, file: &LedgerFile, reporter: &mut dyn Reporter) -> Result<Summary> {
        let mut ledger = file.load()?;
        let passes = self.settings.max_passes.max(1);

        for pass in 1..=passes {
            let outstanding = ledger.non_terminal().len();
            if outstanding == 0 {
                break;
            }
            info!(pass, outstanding, ledger = %file.path().display(), "checking batch status");
            let finished = self.check_pass(&mut ledger, file, reporter).await?;
            debug!(pass, finished, "status pass done");

            if pass < passes && !ledger.non_terminal().is_empty() {
                tokio::time::sleep(self.poll_interval).await;
            }
        }

        let summary = Summary::from_statuses(ledger.statuses());
        if summary.outstanding() > 0 {
            info!(outstanding = summary.outstanding(), "jobs still running; check again later");
        }
        reporter.on_run_finished(&summary);
        Ok(summary)
    }
}
