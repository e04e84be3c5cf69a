use std::error::Error;
use std::time::Duration;

use jobdag::config::load_and_validate;
use jobdag::errors::JobdagError;
use jobdag::fs::RealFileSystem;
use jobdag::job::JobCommand;
use jobdag::types::BatchScheduler;
use jobdag_test_utils::builders::{JobConfigBuilder, JobFileBuilder};
use jobdag_test_utils::init_tracing;
use tempfile::tempdir;

const JOBS: &str = r#"
[config]
capacity = 4
parallel = 2
skipped_satisfies_prereqs = true
ledger = "out/ledger.json"

[job.build]
cmd = "make -j4"
min_parallel = 4
working_dir = "build"

[job."test a"]
args = ["./run-tests", "--suite", "a"]
after = ["build"]
timeout_secs = 120
max_parallel = 1
should_crash = true
errors = ["FATAL"]
"#;

#[test]
fn loads_job_file_relative_to_its_directory() -> Result<(), Box<dyn Error>> {
    init_tracing();
    let dir = tempdir()?;
    let path = dir.path().join("Jobdag.toml");
    std::fs::write(&path, JOBS)?;

    let cfg = load_and_validate(&path)?;

    let options = cfg.run_options();
    assert_eq!(options.capacity, 4);
    assert_eq!(options.parallel, 2);
    assert!(options.skipped_satisfies);
    assert_eq!(options.ledger, Some(dir.path().join("out/ledger.json")));

    let specs = cfg.job_specs()?;
    assert_eq!(specs.len(), 2);

    let build = &specs[0];
    assert_eq!(build.name, "build");
    assert_eq!(build.command, JobCommand::Shell("make -j4".into()));
    assert_eq!(build.min_parallel, 4);
    assert_eq!(build.working_dir, dir.path().join("build"));
    assert_eq!(build.timeout, Duration::from_secs(300));

    let test = &specs[1];
    assert_eq!(test.name, "test a");
    assert_eq!(test.prereqs, vec!["build".to_string()]);
    assert_eq!(test.timeout, Duration::from_secs(120));
    assert!(test.should_crash);
    assert_eq!(test.error_patterns, vec!["FATAL".to_string()]);
    assert!(cfg.batch_settings(&RealFileSystem)?.is_none());
    Ok(())
}

#[test]
fn batch_section_overrides_presets_and_reads_template() -> Result<(), Box<dyn Error>> {
    init_tracing();
    let dir = tempdir()?;
    std::fs::write(dir.path().join("job.tmpl"), "#!/bin/sh\n<COMMAND>\n")?;
    let path = dir.path().join("Jobdag.toml");
    std::fs::write(
        &path,
        r#"
[config]
ledger = "ledger.json"

[batch]
scheduler = "slurm"
template = "job.tmpl"
submit_cmd = ["fake-sbatch", "--parsable"]
queue = "debug"
max_passes = 3

[job.solve]
cmd = "solver"
"#,
    )?;

    let cfg = load_and_validate(&path)?;
    let settings = cfg.batch_settings(&RealFileSystem)?.expect("batch settings");

    assert_eq!(settings.scheduler, BatchScheduler::Slurm);
    assert_eq!(settings.template, "#!/bin/sh\n<COMMAND>\n");
    assert_eq!(settings.submit_cmd, vec!["fake-sbatch", "--parsable"]);
    assert_eq!(settings.status_cmd, BatchScheduler::Slurm.default_status_cmd());
    assert_eq!(settings.queue.as_deref(), Some("debug"));
    assert_eq!(settings.max_passes, 3);
    assert!(settings.is_timeout("TIMEOUT"));
    Ok(())
}

#[test]
fn reports_errors_for_invalid_files() -> Result<(), Box<dyn Error>> {
    init_tracing();
    let dir = tempdir()?;

    let cyclic = dir.path().join("cyclic.toml");
    std::fs::write(
        &cyclic,
        "[job.a]\ncmd = \"true\"\nafter = [\"c\"]\n[job.b]\ncmd = \"true\"\nafter = [\"a\"]\n[job.c]\ncmd = \"true\"\nafter = [\"b\"]\n",
    )?;
    assert!(matches!(
        load_and_validate(&cyclic),
        Err(JobdagError::DependencyCycle(_))
    ));

    let garbled = dir.path().join("garbled.toml");
    std::fs::write(&garbled, "[job.a\ncmd = ")?;
    assert!(matches!(load_and_validate(&garbled), Err(JobdagError::TomlError(_))));

    assert!(matches!(
        load_and_validate(dir.path().join("missing.toml")),
        Err(JobdagError::IoError(_))
    ));
    Ok(())
}

#[test]
fn builder_produces_the_same_validation() {
    let cfg = JobFileBuilder::new()
        .with_capacity(2)
        .with_job("build", JobConfigBuilder::new("make").parallel(1, 8).build())
        .with_job("test", JobConfigBuilder::new("./test").after(&["build"]).build())
        .build();
    assert_eq!(cfg.jobs().len(), 2);

    let err = JobFileBuilder::new()
        .with_job("a", JobConfigBuilder::new("true").after(&["b"]).build())
        .with_job("b", JobConfigBuilder::new("true").after(&["a"]).build())
        .try_build()
        .unwrap_err();
    assert!(matches!(err, JobdagError::DependencyCycle(_)));
}
