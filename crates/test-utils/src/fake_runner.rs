use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

use jobdag::errors::{JobdagError, Result};
use jobdag::exec::{BoxFuture, ExitKind, ExitOutcome, Handle, Launched, Runner};
use jobdag::job::{Job, JobStore};
use jobdag::types::RunnerKind;

/// What the fake runner does with one job.
#[derive(Debug, Clone)]
pub enum Scripted {
    /// Exit with this code after `polls` polls.
    Exit { code: i32, output: String, polls: u32 },
    /// Report a timeout.
    TimedOut,
    /// Refuse the launch.
    Reject(String),
}

impl Scripted {
    pub fn exit(code: i32) -> Self {
        Scripted::Exit {
            code,
            output: String::new(),
            polls: 0,
        }
    }

    /// Never finishes on its own; only a kill ends it.
    pub fn hang() -> Self {
        Scripted::Exit {
            code: 0,
            output: String::new(),
            polls: u32::MAX,
        }
    }
}

/// Observable side of a [`FakeRunner`], shared with the test.
#[derive(Debug, Default)]
pub struct FakeLog {
    /// Job ids in launch order.
    pub launched: Vec<String>,
    /// Job ids in the order their outcome was delivered.
    pub finished: Vec<String>,
    /// Prerequisite ids handed to each launch.
    pub prereq_handles: HashMap<String, Vec<String>>,
    pub killed: Vec<String>,
    /// `+id` on launch and `-id` on completion, interleaved.
    pub timeline: Vec<String>,
    pub slots_in_use: u32,
    pub max_slots_in_use: u32,
}

struct Running {
    cost: u32,
    remaining_polls: u32,
    outcome: ExitOutcome,
}

/// Runner that never spawns anything.
///
/// Every job succeeds immediately unless scripted otherwise. As a
/// `BatchLaunch` runner it hands every job off as `Queued`.
pub struct FakeRunner {
    kind: RunnerKind,
    script: HashMap<String, Scripted>,
    running: HashMap<String, Running>,
    log: Arc<Mutex<FakeLog>>,
    activity: Arc<Notify>,
    next_id: u64,
}

impl FakeLog {
    /// Whether `a` finished before `b` was launched.
    pub fn finished_before_launch(&self, a: &str, b: &str) -> bool {
        let done = self.timeline.iter().position(|e| *e == format!("-{a}"));
        let start = self.timeline.iter().position(|e| *e == format!("+{b}"));
        matches!((done, start), (Some(d), Some(s)) if d < s)
    }
}

impl FakeRunner {
    pub fn new(log: Arc<Mutex<FakeLog>>) -> Self {
        Self {
            kind: RunnerKind::Local,
            script: HashMap::new(),
            running: HashMap::new(),
            log,
            activity: Arc::new(Notify::new()),
            next_id: 1000,
        }
    }

    pub fn batch(log: Arc<Mutex<FakeLog>>) -> Self {
        Self {
            kind: RunnerKind::BatchLaunch,
            ..Self::new(log)
        }
    }

    pub fn script(mut self, job: &str, scripted: Scripted) -> Self {
        self.script.insert(job.to_string(), scripted);
        self
    }
}

impl Runner for FakeRunner {
    fn kind(&self) -> RunnerKind {
        self.kind
    }

    fn chains_prerequisites(&self) -> bool {
        self.kind == RunnerKind::BatchLaunch
    }

    fn prerequisites_ready(&self, job: &Job, store: &JobStore) -> bool {
        if self.kind != RunnerKind::BatchLaunch {
            return store.prereqs_satisfied(job);
        }
        job.prereqs().iter().all(|p| {
            store.state(p.as_str()).is_some_and(|s| {
                s.external_id().is_some()
                    || s.status().is_success_compatible(store.skipped_satisfies())
            })
        })
    }

    fn launch(
        &mut self,
        job: Arc<Job>,
        prereq_handles: Vec<String>,
    ) -> BoxFuture<'_, Result<Launched>> {
        Box::pin(async move {
            let id = job.id().to_string();
            let scripted = self
                .script
                .get(&id)
                .cloned()
                .unwrap_or_else(|| Scripted::exit(0));

            if let Scripted::Reject(reason) = scripted {
                return Err(JobdagError::SubmissionFailure { job: id, reason });
            }

            self.next_id += 1;
            let handle = Handle {
                job: job.id().clone(),
                external_id: self.next_id.to_string(),
            };

            {
                let mut log = self.log.lock().unwrap();
                log.launched.push(id.clone());
                log.timeline.push(format!("+{id}"));
                log.prereq_handles.insert(id.clone(), prereq_handles);
            }

            if self.kind == RunnerKind::BatchLaunch {
                return Ok(Launched::Queued(handle));
            }

            let (outcome, polls) = match scripted {
                Scripted::Exit { code, output, polls } => (
                    ExitOutcome::exited(Some(code), output, Duration::from_millis(10)),
                    polls,
                ),
                Scripted::TimedOut => (
                    ExitOutcome {
                        kind: ExitKind::TimedOut,
                        exit_code: None,
                        output: String::new(),
                        elapsed: job.timeout(),
                    },
                    0,
                ),
                Scripted::Reject(_) => unreachable!(),
            };

            {
                let mut log = self.log.lock().unwrap();
                log.slots_in_use += job.cost();
                log.max_slots_in_use = log.max_slots_in_use.max(log.slots_in_use);
            }
            self.running.insert(
                id,
                Running {
                    cost: job.cost(),
                    remaining_polls: polls,
                    outcome,
                },
            );
            Ok(Launched::Running(handle))
        })
    }

    fn poll(&mut self, handle: &Handle) -> Option<ExitOutcome> {
        let id = handle.job.as_str();
        let running = self.running.get_mut(id)?;
        if running.remaining_polls > 0 {
            running.remaining_polls -= 1;
            return None;
        }
        let running = self.running.remove(id)?;

        let mut log = self.log.lock().unwrap();
        log.slots_in_use -= running.cost;
        log.finished.push(id.to_string());
        log.timeline.push(format!("-{id}"));
        self.activity.notify_one();
        Some(running.outcome)
    }

    fn kill(&mut self, handle: &Handle) -> BoxFuture<'_, ()> {
        let id = handle.job.to_string();
        Box::pin(async move {
            if let Some(running) = self.running.get_mut(&id) {
                running.remaining_polls = 0;
                running.outcome = ExitOutcome {
                    kind: ExitKind::Killed,
                    exit_code: None,
                    output: String::new(),
                    elapsed: Duration::from_millis(10),
                };
            }
            self.log.lock().unwrap().killed.push(id);
            self.activity.notify_one();
        })
    }

    fn activity(&self) -> Arc<Notify> {
        self.activity.clone()
    }
}
