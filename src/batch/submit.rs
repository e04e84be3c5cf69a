// src/batch/submit.rs

//! Launch mode: stage, render, submit, hand off as `Queued`.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::batch::staging;
use crate::batch::system::{BatchSettings, capture, run_command};
use crate::batch::template::{TemplateVars, dependency_directive, walltime};
use crate::errors::{JobdagError, Result};
use crate::exec::{BoxFuture, ExitOutcome, Handle, Launched, Runner};
use crate::fs::FileSystem;
use crate::job::{Job, JobStatus, JobStore};
use crate::types::RunnerKind;

/// Where a batch job's merged output ends up.
pub fn output_path(working_dir: &std::path::Path, job_id: &str) -> PathBuf {
    working_dir.join(format!("{job_id}.batch.out"))
}

/// Runner that submits every job to the batch system.
///
/// Dependents are submitted as soon as their prerequisites have external ids,
/// with a dependency directive so the batch system itself holds them back.
#[derive(Debug)]
pub struct BatchLauncher {
    settings: Arc<BatchSettings>,
    fs: Arc<dyn FileSystem>,
    activity: Arc<Notify>,
}

impl BatchLauncher {
    pub fn new(settings: Arc<BatchSettings>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            settings,
            fs,
            activity: Arc::new(Notify::new()),
        }
    }

    /// Render the submission script for `job`.
    pub fn render_script(&self, job: &Job, prereq_ids: &[String]) -> String {
        let s = &self.settings;
        let output = output_path(job.working_dir(), job.id().as_str());

        let mut vars = TemplateVars::new();
        vars.set("JOB_NAME", job.id().as_str())
            .set("MPI_PROCS", job.cost().to_string())
            .set("WORKING_DIR", job.working_dir().display().to_string())
            .set("COMMAND", job.command().render())
            .set("WALLTIME", walltime(job.timeout()))
            .set("OUTPUT_FILE", output.display().to_string())
            .set("PREREQ_IDS", prereq_ids.join(&s.dependency_separator))
            .set(
                "DEPENDENCY_DIRECTIVE",
                dependency_directive(s.scheduler, prereq_ids, &s.dependency_separator),
            );
        if let Some(project) = &s.project {
            vars.set("PROJECT", project.as_str());
        }
        if let Some(queue) = &s.queue {
            vars.set("QUEUE", queue.as_str());
        }
        if let Some(input) = job.input_name() {
            vars.set("INPUT_NAME", input);
        }

        let missing = vars.missing(&s.template);
        if !missing.is_empty() {
            debug!(job = %job.id(), ?missing, "template placeholders rendered empty");
        }
        vars.render(&s.template)
    }

    async fn submit(&self, job: Arc<Job>, prereq_ids: Vec<String>) -> Result<Launched> {
        let failure = |reason: String| JobdagError::SubmissionFailure {
            job: job.id().to_string(),
            reason,
        };

        staging::stage(self.fs.as_ref(), &job).map_err(|e| failure(format!("{e:#}")))?;

        let script = job
            .working_dir()
            .join(format!("{}.{}", job.id(), self.settings.script_extension()));
        let contents = self.render_script(&job, &prereq_ids);
        self.fs
            .write(&script, contents.as_bytes())
            .map_err(|e| failure(format!("{e:#}")))?;

        let script_arg = script.display().to_string();
        let out = run_command(
            &self.settings.submit_cmd,
            &script_arg,
            Some(job.working_dir()),
            self.settings.command_timeout,
        )
        .await
        .map_err(|e| failure(format!("{e:#}")))?;

        if !out.success {
            let reason = match out.stderr.trim() {
                "" => out.stdout.trim().to_string(),
                err => err.to_string(),
            };
            return Err(failure(reason));
        }

        let Some(external_id) = capture(&self.settings.job_id_regex, &out.stdout) else {
            return Err(failure(format!(
                "no job id in submit output: {}",
                out.stdout.trim()
            )));
        };

        info!(job = %job.id(), external_id, script = %script.display(), "submitted");
        Ok(Launched::Queued(Handle {
            job: job.id().clone(),
            external_id: external_id.to_string(),
        }))
    }
}

impl Runner for BatchLauncher {
    fn kind(&self) -> RunnerKind {
        RunnerKind::BatchLaunch
    }

    fn chains_prerequisites(&self) -> bool {
        true
    }

    /// Every prerequisite is either submitted with a known id, or finished in
    /// a state its dependents accept.
    fn prerequisites_ready(&self, job: &Job, store: &JobStore) -> bool {
        job.prereqs().iter().all(|p| match store.state(p.as_str()) {
            Some(state) if state.status() == JobStatus::Queued => state.external_id().is_some(),
            Some(state) => state.status().is_success_compatible(store.skipped_satisfies()),
            None => false,
        })
    }

    fn launch(
        &mut self,
        job: Arc<Job>,
        prereq_handles: Vec<String>,
    ) -> BoxFuture<'_, Result<Launched>> {
        Box::pin(self.submit(job, prereq_handles))
    }

    fn poll(&mut self, _handle: &Handle) -> Option<ExitOutcome> {
        // Submitted jobs are only observed by a later status check.
        None
    }

    fn kill(&mut self, handle: &Handle) -> BoxFuture<'_, ()> {
        let handle = handle.clone();
        Box::pin(async move {
            warn!(job = %handle.job, external_id = %handle.external_id, "batch jobs are not cancelled remotely");
        })
    }

    fn activity(&self) -> Arc<Notify> {
        self.activity.clone()
    }
}
