// src/config/validate.rs

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::batch::system::compile;
use crate::config::model::{JobFile, RawJobFile};
use crate::errors::{JobdagError, Result};
use crate::job::{JobCommand, JobId};

impl TryFrom<RawJobFile> for JobFile {
    type Error = JobdagError;

    fn try_from(raw: RawJobFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_job_file(&raw)?;
        Ok(JobFile::new_unchecked(raw.config, raw.batch, raw.job))
    }
}

fn validate_raw_job_file(cfg: &RawJobFile) -> Result<()> {
    ensure_has_jobs(cfg)?;
    validate_global_config(cfg)?;
    validate_jobs(cfg)?;
    validate_job_dependencies(cfg)?;
    validate_dag(cfg)?;
    validate_batch(cfg)?;
    Ok(())
}

fn ensure_has_jobs(cfg: &RawJobFile) -> Result<()> {
    if cfg.job.is_empty() {
        return Err(JobdagError::ConfigError(
            "job file must contain at least one [job.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawJobFile) -> Result<()> {
    if cfg.config.capacity == Some(0) {
        return Err(JobdagError::ConfigError(
            "[config].capacity must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.config.parallel == 0 {
        return Err(JobdagError::ConfigError(
            "[config].parallel must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.config.poll_interval_ms == 0 {
        return Err(JobdagError::ConfigError(
            "[config].poll_interval_ms must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_jobs(cfg: &RawJobFile) -> Result<()> {
    let mut identities: HashMap<JobId, &str> = HashMap::new();

    for (name, job) in cfg.job.iter() {
        match job.command() {
            None => {
                return Err(JobdagError::ConfigError(format!(
                    "job '{name}' must set exactly one of `cmd` or `args`"
                )));
            }
            Some(JobCommand::Argv(args)) if args.is_empty() => {
                return Err(JobdagError::ConfigError(format!(
                    "job '{name}' has an empty `args` list"
                )));
            }
            Some(_) => {}
        }

        if job.max_parallel == Some(0) {
            return Err(JobdagError::ConfigError(format!(
                "job '{name}': max_parallel must be >= 1"
            )));
        }
        if let (Some(min), Some(max)) = (job.min_parallel, job.max_parallel) {
            if min > max {
                return Err(JobdagError::ConfigError(format!(
                    "job '{name}': min_parallel ({min}) exceeds max_parallel ({max})"
                )));
            }
        }
        if job.timeout_secs == Some(0) {
            return Err(JobdagError::ConfigError(format!(
                "job '{name}': timeout_secs must be >= 1"
            )));
        }

        let id = JobId::sanitize(name);
        if id.as_str().is_empty() {
            return Err(JobdagError::ConfigError(format!(
                "job name '{name}' has no path-safe characters"
            )));
        }
        if let Some(other) = identities.insert(id.clone(), name) {
            return Err(JobdagError::DuplicateJob(format!(
                "'{other}' and '{name}' both map to '{id}'"
            )));
        }
    }
    Ok(())
}

fn validate_job_dependencies(cfg: &RawJobFile) -> Result<()> {
    for (name, job) in cfg.job.iter() {
        for dep in job.after.iter() {
            if !cfg.job.contains_key(dep) {
                return Err(JobdagError::ConfigError(format!(
                    "job '{}' has unknown prerequisite '{}' in `after`",
                    name, dep
                )));
            }
            if dep == name {
                return Err(JobdagError::ConfigError(format!(
                    "job '{}' cannot depend on itself in `after`",
                    name
                )));
            }
        }
    }
    Ok(())
}

fn validate_dag(cfg: &RawJobFile) -> Result<()> {
    // Edge direction: prerequisite -> dependent.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.job.keys() {
        graph.add_node(name.as_str());
    }

    for (name, job) in cfg.job.iter() {
        for dep in job.after.iter() {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(JobdagError::DependencyCycle(format!(
            "cycle in job prerequisites involving job '{}'",
            cycle.node_id()
        ))),
    }
}

fn validate_batch(cfg: &RawJobFile) -> Result<()> {
    let Some(batch) = &cfg.batch else {
        return Ok(());
    };

    if cfg.config.ledger.is_none() {
        return Err(JobdagError::ConfigError(
            "[batch] runs need [config].ledger so their status can be checked later".to_string(),
        ));
    }

    for re in [&batch.job_id_regex, &batch.state_regex, &batch.exit_code_regex]
        .into_iter()
        .flatten()
    {
        compile(re).map_err(|e| JobdagError::ConfigError(format!("[batch]: {e:#}")))?;
    }

    for (key, cmd) in [("submit_cmd", &batch.submit_cmd), ("status_cmd", &batch.status_cmd)] {
        if cmd.as_ref().is_some_and(|c| c.is_empty()) {
            return Err(JobdagError::ConfigError(format!("[batch].{key} must not be empty")));
        }
    }
    if batch.max_passes == Some(0) {
        return Err(JobdagError::ConfigError(
            "[batch].max_passes must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<JobFile> {
        let raw: RawJobFile = toml::from_str(text)?;
        JobFile::try_from(raw)
    }

    #[test]
    fn accepts_a_small_dag() {
        let cfg = parse(
            r#"
            [config]
            capacity = 2

            [job.build]
            cmd = "make"

            [job.test]
            args = ["./test"]
            after = ["build"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.jobs().len(), 2);
        assert_eq!(cfg.run_options().capacity, 2);
    }

    #[test]
    fn rejects_cycles() {
        let err = parse(
            r#"
            [job.a]
            cmd = "true"
            after = ["b"]

            [job.b]
            cmd = "true"
            after = ["a"]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, JobdagError::DependencyCycle(_)));
    }

    #[test]
    fn rejects_bad_references_and_commands() {
        for text in [
            "[job.a]\ncmd = \"x\"\nafter = [\"ghost\"]\n",
            "[job.a]\ncmd = \"x\"\nafter = [\"a\"]\n",
            "[job.a]\ncmd = \"x\"\nargs = [\"x\"]\n",
            "[job.a]\nargs = []\n",
            "[job.a]\ncmd = \"x\"\nmin_parallel = 4\nmax_parallel = 2\n",
            "[config]\ncapacity = 0\n[job.a]\ncmd = \"x\"\n",
            "[config]\n",
        ] {
            let err = parse(text).unwrap_err();
            assert!(matches!(err, JobdagError::ConfigError(_)), "{text}: {err}");
        }
    }

    #[test]
    fn rejects_colliding_identities() {
        let err = parse("[job.\"a b\"]\ncmd = \"x\"\n[job.ab]\ncmd = \"y\"\n").unwrap_err();
        assert!(matches!(err, JobdagError::DuplicateJob(_)));
    }

    #[test]
    fn batch_needs_a_ledger_and_valid_regexes() {
        let err = parse("[batch]\n[job.a]\ncmd = \"x\"\n").unwrap_err();
        assert!(matches!(err, JobdagError::ConfigError(_)));

        let err = parse(
            "[config]\nledger = \"l.json\"\n[batch]\nstate_regex = \"(\"\n[job.a]\ncmd = \"x\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, JobdagError::ConfigError(_)));

        assert!(parse("[config]\nledger = \"l.json\"\n[batch]\nscheduler = \"slurm\"\n[job.a]\ncmd = \"x\"\n").is_ok());
    }
}
