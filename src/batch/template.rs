// src/batch/template.rs

//! Submission-script templating.
//!
//! Templates contain upper-case bracketed placeholders such as `<JOB_NAME>`.
//! Rendering replaces each one from an explicit key/value map; a placeholder
//! with no value becomes the empty string.

use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Duration;

use regex::{Captures, Regex};
use tracing::trace;

use crate::types::BatchScheduler;

pub const PBS_TEMPLATE: &str = r#"#!/bin/bash
#PBS -N <JOB_NAME>
#PBS -l select=1:ncpus=<MPI_PROCS>
#PBS -l walltime=<WALLTIME>
#PBS -P <PROJECT>
#PBS -q <QUEUE>
#PBS -j oe
#PBS -o <OUTPUT_FILE>
<DEPENDENCY_DIRECTIVE>

cd <WORKING_DIR>
<COMMAND>
"#;

pub const SLURM_TEMPLATE: &str = r#"#!/bin/bash
#SBATCH --job-name=<JOB_NAME>
#SBATCH --ntasks=<MPI_PROCS>
#SBATCH --time=<WALLTIME>
#SBATCH --account=<PROJECT>
#SBATCH --partition=<QUEUE>
#SBATCH --output=<OUTPUT_FILE>
<DEPENDENCY_DIRECTIVE>

cd <WORKING_DIR>
<COMMAND>
"#;

pub fn default_template(scheduler: BatchScheduler) -> &'static str {
    match scheduler {
        BatchScheduler::Pbs => PBS_TEMPLATE,
        BatchScheduler::Slurm => SLURM_TEMPLATE,
    }
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<([A-Z][A-Z0-9_]*)>").expect("placeholder pattern is valid"))
}

/// Values substituted into a template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateVars {
    values: BTreeMap<String, String>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Replace every placeholder in `template`.
    pub fn render(&self, template: &str) -> String {
        placeholder_re()
            .replace_all(template, |caps: &Captures<'_>| match self.values.get(&caps[1]) {
                Some(value) => value.clone(),
                None => {
                    trace!(placeholder = &caps[1], "no value for placeholder");
                    String::new()
                }
            })
            .into_owned()
    }

    /// Placeholders used by `template` that have no value.
    pub fn missing(&self, template: &str) -> Vec<String> {
        placeholder_re()
            .captures_iter(template)
            .map(|c| c[1].to_string())
            .filter(|name| !self.values.contains_key(name))
            .collect()
    }
}

/// `HH:MM:SS`, rounding partial seconds up.
pub fn walltime(timeout: Duration) -> String {
    let mut secs = timeout.as_secs();
    if timeout.subsec_nanos() > 0 {
        secs += 1;
    }
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Scheduler directive that holds a job until its prerequisites succeed.
///
/// Empty when there are no prerequisite ids.
pub fn dependency_directive(scheduler: BatchScheduler, ids: &[String], separator: &str) -> String {
    if ids.is_empty() {
        return String::new();
    }
    let joined = ids.join(separator);
    match scheduler {
        BatchScheduler::Pbs => format!("#PBS -W depend=afterok{separator}{joined}"),
        BatchScheduler::Slurm => format!("#SBATCH --dependency=afterok{separator}{joined}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_known_and_blanks_unknown() {
        let mut vars = TemplateVars::new();
        vars.set("JOB_NAME", "solve").set("MPI_PROCS", "4");

        let out = vars.render("name=<JOB_NAME> procs=<MPI_PROCS> q=<QUEUE>|<lower> <>");
        assert_eq!(out, "name=solve procs=4 q=|<lower> <>");
        assert_eq!(vars.missing("<JOB_NAME><QUEUE>"), vec!["QUEUE"]);
    }

    #[test]
    fn rendered_value_is_not_rescanned() {
        let mut vars = TemplateVars::new();
        vars.set("COMMAND", "echo <JOB_NAME>");
        assert_eq!(vars.render("<COMMAND>"), "echo <JOB_NAME>");
    }

    #[test]
    fn walltime_format() {
        assert_eq!(walltime(Duration::from_secs(300)), "00:05:00");
        assert_eq!(walltime(Duration::from_secs(3 * 3600 + 61)), "03:01:01");
        assert_eq!(walltime(Duration::from_millis(1500)), "00:00:02");
    }

    #[test]
    fn dependency_directive_per_scheduler() {
        let ids = vec!["1.srv".to_string(), "2.srv".to_string()];
        assert_eq!(
            dependency_directive(BatchScheduler::Pbs, &ids, ":"),
            "#PBS -W depend=afterok:1.srv:2.srv"
        );
        assert_eq!(
            dependency_directive(BatchScheduler::Slurm, &ids[..1], ":"),
            "#SBATCH --dependency=afterok:1.srv"
        );
        assert_eq!(dependency_directive(BatchScheduler::Pbs, &[], ":"), "");
    }

    #[test]
    fn default_templates_only_use_known_placeholders() {
        let mut vars = TemplateVars::new();
        for key in [
            "JOB_NAME",
            "MPI_PROCS",
            "WALLTIME",
            "PROJECT",
            "QUEUE",
            "OUTPUT_FILE",
            "DEPENDENCY_DIRECTIVE",
            "WORKING_DIR",
            "COMMAND",
        ] {
            vars.set(key, "x");
        }
        assert!(vars.missing(PBS_TEMPLATE).is_empty());
        assert!(vars.missing(SLURM_TEMPLATE).is_empty());
    }
}
