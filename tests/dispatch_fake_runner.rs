use std::sync::{Arc, Mutex};
use std::time::Duration;

use jobdag::engine::{ABORTED_MESSAGE, Dispatcher, RunOptions, SKIPPED_DEPENDENCY_MESSAGE, SchedulerContext, Summary};
use jobdag::exec::EXPECTED_CRASH_MISSING;
use jobdag::job::{JobSpec, JobStatus};
use jobdag_test_utils::builders::JobSpecBuilder;
use jobdag_test_utils::fake_runner::{FakeLog, FakeRunner, Scripted};
use jobdag_test_utils::{RecordingReporter, init_tracing, with_timeout};

fn options(capacity: u32) -> RunOptions {
    RunOptions {
        capacity,
        poll_interval: Duration::from_millis(5),
        ..RunOptions::default()
    }
}

async fn run(specs: Vec<JobSpec>, options: RunOptions, runner: FakeRunner) -> (Summary, RecordingReporter) {
    let reporter = RecordingReporter::new();
    let ctx = SchedulerContext::new(options, specs).unwrap();
    let summary = with_timeout(Dispatcher::new(ctx, runner, Box::new(reporter.clone())).run())
        .await
        .unwrap();
    (summary, reporter)
}

fn build_and_tests() -> Vec<JobSpec> {
    vec![
        JobSpecBuilder::new("build").build(),
        JobSpecBuilder::new("test_a").after(&["build"]).build(),
        JobSpecBuilder::new("test_b").after(&["build"]).build(),
    ]
}

#[tokio::test]
async fn build_runs_alone_before_its_tests() {
    init_tracing();
    let log = Arc::new(Mutex::new(FakeLog::default()));

    let (summary, reporter) = run(build_and_tests(), options(1), FakeRunner::new(log.clone())).await;

    let log = log.lock().unwrap();
    assert_eq!(log.launched[0], "build");
    assert!(log.finished_before_launch("build", "test_a"));
    assert!(log.finished_before_launch("build", "test_b"));
    assert_eq!(log.max_slots_in_use, 1);

    assert_eq!(summary.count(JobStatus::Succeeded), 3);
    assert_eq!(summary.total(), 3);
    assert_eq!(reporter.reports().len(), 3);
}

#[tokio::test]
async fn independent_jobs_share_capacity() {
    init_tracing();
    let log = Arc::new(Mutex::new(FakeLog::default()));
    let specs = (0..6)
        .map(|i| JobSpecBuilder::new(&format!("job{i}")).cost(2).build())
        .collect();
    let mut runner = FakeRunner::new(log.clone());
    for i in 0..6 {
        runner = runner.script(
            &format!("job{i}"),
            Scripted::Exit { code: 0, output: String::new(), polls: 2 },
        );
    }

    let (summary, _) = run(specs, options(4), runner).await;

    let log = log.lock().unwrap();
    assert_eq!(log.max_slots_in_use, 4);
    assert_eq!(log.slots_in_use, 0);
    assert_eq!(summary.count(JobStatus::Succeeded), 6);
}

#[tokio::test]
async fn oversized_job_is_clamped_and_still_runs() {
    init_tracing();
    let log = Arc::new(Mutex::new(FakeLog::default()));
    let specs = vec![JobSpecBuilder::new("big").cost(3).build()];

    let (summary, reporter) = run(specs, options(2), FakeRunner::new(log.clone())).await;

    assert_eq!(summary.count(JobStatus::Succeeded), 1);
    assert_eq!(log.lock().unwrap().max_slots_in_use, 2);
    assert!(reporter.report("big").caveats.contains(&"capacity_cpus=2".to_string()));
}

#[tokio::test]
async fn big_job_does_not_block_smaller_ready_jobs() {
    init_tracing();
    let log = Arc::new(Mutex::new(FakeLog::default()));
    let specs = vec![
        JobSpecBuilder::new("a").cost(2).build(),
        JobSpecBuilder::new("b").cost(3).build(),
        JobSpecBuilder::new("c").cost(1).build(),
    ];
    let runner = FakeRunner::new(log.clone())
        .script("a", Scripted::Exit { code: 0, output: String::new(), polls: 3 });

    let (summary, _) = run(specs, options(3), runner).await;

    let log = log.lock().unwrap();
    // `b` cannot fit next to `a`, but `c` can.
    assert_eq!(&log.launched[..2], &["a".to_string(), "c".to_string()]);
    assert_eq!(summary.count(JobStatus::Succeeded), 3);
}

#[tokio::test]
async fn missing_expected_crash_fails_the_job() {
    init_tracing();
    let log = Arc::new(Mutex::new(FakeLog::default()));
    let specs = vec![JobSpecBuilder::new("crashy").should_crash().build()];

    let (summary, reporter) = run(specs, options(1), FakeRunner::new(log)).await;

    let report = reporter.report("crashy");
    assert_eq!(report.status, JobStatus::Failed);
    assert_eq!(report.message.as_deref(), Some(EXPECTED_CRASH_MISSING));
    assert!(summary.has_failures());
}

#[tokio::test]
async fn failure_skips_every_transitive_dependent() {
    init_tracing();
    let log = Arc::new(Mutex::new(FakeLog::default()));
    let specs = vec![
        JobSpecBuilder::new("a").build(),
        JobSpecBuilder::new("b").after(&["a"]).build(),
        JobSpecBuilder::new("c").after(&["b"]).build(),
        JobSpecBuilder::new("d").build(),
    ];
    let runner = FakeRunner::new(log.clone()).script("a", Scripted::exit(1));

    let (summary, reporter) = run(specs, options(2), runner).await;

    assert_eq!(reporter.report("a").status, JobStatus::Crashed);
    for id in ["b", "c"] {
        let report = reporter.report(id);
        assert_eq!(report.status, JobStatus::Skipped);
        assert_eq!(report.message.as_deref(), Some(SKIPPED_DEPENDENCY_MESSAGE));
    }
    assert_eq!(reporter.report("d").status, JobStatus::Succeeded);
    assert_eq!(summary.count(JobStatus::Skipped), 2);

    let log = log.lock().unwrap();
    assert!(!log.launched.contains(&"b".to_string()));
    assert!(!log.launched.contains(&"c".to_string()));
}

#[tokio::test]
async fn timed_out_job_is_reported_and_run_continues() {
    init_tracing();
    let log = Arc::new(Mutex::new(FakeLog::default()));
    let specs = vec![JobSpecBuilder::new("slow").build(), JobSpecBuilder::new("fast").build()];
    let runner = FakeRunner::new(log).script("slow", Scripted::TimedOut);

    let (summary, reporter) = run(specs, options(2), runner).await;

    assert_eq!(reporter.report("slow").status, JobStatus::TimedOut);
    assert_eq!(reporter.report("fast").status, JobStatus::Succeeded);
    assert_eq!(summary.count(JobStatus::TimedOut), 1);
}

#[tokio::test]
async fn skipped_prerequisite_follows_the_policy() {
    init_tracing();
    let specs = || {
        vec![
            JobSpecBuilder::new("a").skip("heavy").build(),
            JobSpecBuilder::new("b").after(&["a"]).build(),
        ]
    };

    let log = Arc::new(Mutex::new(FakeLog::default()));
    let (_, reporter) = run(specs(), options(1), FakeRunner::new(log)).await;
    assert_eq!(reporter.report("a").message.as_deref(), Some("heavy"));
    assert_eq!(reporter.report("b").status, JobStatus::Skipped);

    let log = Arc::new(Mutex::new(FakeLog::default()));
    let lenient = RunOptions {
        skipped_satisfies: true,
        ..options(1)
    };
    let (_, reporter) = run(specs(), lenient, FakeRunner::new(log)).await;
    assert_eq!(reporter.report("a").status, JobStatus::Skipped);
    assert_eq!(reporter.report("b").status, JobStatus::Succeeded);
}

#[tokio::test]
async fn rejected_launch_fails_only_that_job() {
    init_tracing();
    let log = Arc::new(Mutex::new(FakeLog::default()));
    let specs = vec![
        JobSpecBuilder::new("a").build(),
        JobSpecBuilder::new("b").after(&["a"]).build(),
        JobSpecBuilder::new("c").build(),
    ];
    let runner = FakeRunner::new(log).script("a", Scripted::Reject("queue closed".into()));

    let (summary, reporter) = run(specs, options(1), runner).await;

    let a = reporter.report("a");
    assert_eq!(a.status, JobStatus::Failed);
    assert_eq!(a.message.as_deref(), Some("SUBMISSION FAILED: queue closed"));
    assert_eq!(reporter.report("b").status, JobStatus::Skipped);
    assert_eq!(reporter.report("c").status, JobStatus::Succeeded);
    assert_eq!(summary.total(), 3);
}

#[tokio::test]
async fn abort_kills_running_and_skips_pending() {
    init_tracing();
    let log = Arc::new(Mutex::new(FakeLog::default()));
    let specs = vec![
        JobSpecBuilder::new("a").build(),
        JobSpecBuilder::new("b").after(&["a"]).build(),
        JobSpecBuilder::new("c").build(),
    ];
    let runner = FakeRunner::new(log.clone()).script("a", Scripted::hang());
    let reporter = RecordingReporter::new();
    let ctx = SchedulerContext::new(options(1), specs).unwrap();
    let dispatcher = Dispatcher::new(ctx, runner, Box::new(reporter.clone()));

    let abort = dispatcher.abort_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        abort.abort();
    });
    let summary = with_timeout(dispatcher.run()).await.unwrap();

    let a = reporter.report("a");
    assert_eq!(a.status, JobStatus::Failed);
    assert_eq!(a.message.as_deref(), Some("KILLED"));
    for id in ["b", "c"] {
        assert_eq!(reporter.report(id).message.as_deref(), Some(ABORTED_MESSAGE));
    }
    assert_eq!(log.lock().unwrap().killed, vec!["a".to_string()]);
    assert_eq!(summary.outstanding(), 0);
}

#[tokio::test]
async fn batch_launch_chains_dependents_on_external_ids() {
    init_tracing();
    let log = Arc::new(Mutex::new(FakeLog::default()));

    let (summary, reporter) = run(build_and_tests(), options(1), FakeRunner::batch(log.clone())).await;

    assert_eq!(summary.count(JobStatus::Queued), 3);
    assert_eq!(summary.outstanding(), 3);
    assert!(reporter.reports().is_empty());

    let log = log.lock().unwrap();
    assert_eq!(log.launched[0], "build");
    assert_eq!(log.prereq_handles["build"], Vec::<String>::new());
    assert_eq!(log.prereq_handles["test_a"], vec!["1001".to_string()]);
    assert_eq!(log.prereq_handles["test_b"], vec!["1001".to_string()]);
}
