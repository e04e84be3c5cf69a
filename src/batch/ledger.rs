// src/batch/ledger.rs

//! On-disk job ledger.
//!
//! The ledger is how a launch invocation hands its jobs to a later status
//! check, possibly run by a different process. It is a JSON document keyed by
//! job identity:
//!
//! ```json
//! {
//!   "version": 1,
//!   "jobs": {
//!     "build": { "job_name": "build", "status": "queued", "external_id": "101.server", ... }
//!   }
//! }
//! ```
//!
//! Writes always go through [`FileSystem::write_atomic`], so a reader sees
//! either the previous or the next complete document.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{JobdagError, Result};
use crate::fs::FileSystem;
use crate::job::{JobStatus, JobStore};

pub const LEDGER_VERSION: u32 = 1;

/// One job's record in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub job_name: String,
    #[serde(default)]
    pub input_name: Option<String>,
    pub working_dir: PathBuf,
    #[serde(default)]
    pub skipped: bool,
    pub status: JobStatus,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub elapsed_secs: Option<f64>,
    /// Carried so a status check can judge the job without its descriptor.
    #[serde(default)]
    pub should_crash: bool,
    #[serde(default)]
    pub error_patterns: Vec<String>,
    /// Identities of the jobs this one was chained after.
    #[serde(default)]
    pub prereqs: Vec<String>,
}

impl LedgerEntry {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// True when a batch job chained after this one can never start.
    ///
    /// A skipped entry only counts if it had been submitted: jobs skipped
    /// before submission were never chained on.
    pub fn blocks_dependents(&self) -> bool {
        match self.status {
            JobStatus::Failed | JobStatus::Crashed | JobStatus::TimedOut => true,
            JobStatus::Skipped => self.external_id.is_some(),
            _ => false,
        }
    }
}

/// All ledger entries, keyed by job identity.
///
/// Entries that failed to parse are kept verbatim and written back on save,
/// so a resume never destroys records it cannot read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ledger {
    entries: BTreeMap<String, LedgerEntry>,
    corrupt: BTreeMap<String, Value>,
}

impl Ledger {
    pub fn from_store(store: &JobStore) -> Self {
        let entries = store
            .iter()
            .map(|(job, state)| {
                let entry = LedgerEntry {
                    job_name: job.name().to_string(),
                    input_name: job.input_name().map(str::to_string),
                    working_dir: job.working_dir().to_path_buf(),
                    skipped: state.status() == JobStatus::Skipped,
                    status: state.status(),
                    exit_code: state.exit_code(),
                    external_id: state.external_id().map(str::to_string),
                    message: state.message().map(str::to_string),
                    elapsed_secs: state
                        .ended_at()
                        .and(state.elapsed())
                        .map(|d| d.as_secs_f64()),
                    should_crash: job.should_crash(),
                    error_patterns: job.error_patterns().to_vec(),
                    prereqs: job.prereqs().iter().map(ToString::to_string).collect(),
                };
                (job.id().to_string(), entry)
            })
            .collect();
        Self {
            entries,
            corrupt: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, id: impl Into<String>, entry: LedgerEntry) {
        self.entries.insert(id.into(), entry);
    }

    pub fn get(&self, id: &str) -> Option<&LedgerEntry> {
        self.entries.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut LedgerEntry> {
        self.entries.get_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &LedgerEntry)> + '_ {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Identities of entries that still await a result.
    pub fn non_terminal(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, e)| !e.is_terminal())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn statuses(&self) -> impl Iterator<Item = JobStatus> + '_ {
        self.entries.values().map(|e| e.status)
    }

    /// Identities of entries that could not be parsed.
    pub fn corrupt(&self) -> impl Iterator<Item = &str> + '_ {
        self.corrupt.keys().map(String::as_str)
    }

    pub fn to_json(&self) -> Result<String> {
        let mut jobs = serde_json::Map::new();
        for (id, raw) in &self.corrupt {
            jobs.insert(id.clone(), raw.clone());
        }
        for (id, entry) in &self.entries {
            jobs.insert(id.clone(), serde_json::to_value(entry)?);
        }
        let doc = serde_json::json!({
            "version": LEDGER_VERSION,
            "jobs": jobs,
        });
        Ok(serde_json::to_string_pretty(&doc)?)
    }

    /// Parse a ledger document.
    ///
    /// An entry that does not parse is set aside with a warning; the rest of
    /// the ledger is still returned. A document that is not a ledger at all
    /// is an error.
    pub fn from_json(text: &str) -> Result<Self> {
        let doc: Value = serde_json::from_str(text).map_err(|e| JobdagError::LedgerCorruption {
            entry: "<document>".to_string(),
            reason: e.to_string(),
        })?;

        let jobs = doc
            .get("jobs")
            .and_then(Value::as_object)
            .ok_or_else(|| JobdagError::LedgerCorruption {
                entry: "<document>".to_string(),
                reason: "missing 'jobs' table".to_string(),
            })?;

        if let Some(version) = doc.get("version").and_then(Value::as_u64) {
            if version != u64::from(LEDGER_VERSION) {
                warn!(version, expected = LEDGER_VERSION, "ledger version mismatch; reading anyway");
            }
        }

        let mut entries = BTreeMap::new();
        let mut corrupt = BTreeMap::new();
        for (id, raw) in jobs {
            match serde_json::from_value::<LedgerEntry>(raw.clone()) {
                Ok(entry) => {
                    entries.insert(id.clone(), entry);
                }
                Err(e) => {
                    let err = JobdagError::LedgerCorruption {
                        entry: id.clone(),
                        reason: e.to_string(),
                    };
                    warn!(error = %err, "skipping ledger entry");
                    corrupt.insert(id.clone(), raw.clone());
                }
            }
        }

        Ok(Self { entries, corrupt })
    }
}

/// A ledger's location plus the filesystem it lives on.
#[derive(Debug, Clone)]
pub struct LedgerFile {
    path: PathBuf,
    fs: Arc<dyn FileSystem>,
}

impl LedgerFile {
    pub fn new(path: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            path: path.into(),
            fs,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Ledger> {
        let text = self.fs.read_to_string(&self.path)?;
        let ledger = Ledger::from_json(&text)?;
        debug!(path = %self.path.display(), entries = ledger.len(), "ledger loaded");
        Ok(ledger)
    }

    pub fn save(&self, ledger: &Ledger) -> Result<()> {
        let json = ledger.to_json()?;
        self.fs.write_atomic(&self.path, json.as_bytes())?;
        debug!(path = %self.path.display(), entries = ledger.len(), "ledger saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;
    use crate::job::{CostPolicy, Job, JobCommand, JobSpec, Transition};

    fn entry(status: JobStatus) -> LedgerEntry {
        LedgerEntry {
            job_name: "solve".into(),
            input_name: Some("solve.i".into()),
            working_dir: PathBuf::from("tests/solve"),
            skipped: false,
            status,
            exit_code: None,
            external_id: Some("17.pbs".into()),
            message: None,
            elapsed_secs: None,
            should_crash: false,
            error_patterns: vec!["ERROR".into()],
            prereqs: Vec::new(),
        }
    }

    #[test]
    fn save_and_load_through_filesystem() {
        let fs = Arc::new(MockFileSystem::new());
        let file = LedgerFile::new("run/ledger.json", fs.clone());

        let mut ledger = Ledger::default();
        ledger.insert("solve", entry(JobStatus::Queued));
        ledger.insert("mesh", {
            let mut e = entry(JobStatus::Succeeded);
            e.exit_code = Some(0);
            e
        });
        file.save(&ledger).unwrap();

        let loaded = file.load().unwrap();
        assert_eq!(loaded, ledger);
        assert_eq!(loaded.non_terminal(), vec!["solve".to_string()]);
    }

    #[test]
    fn corrupt_entry_is_skipped() {
        let text = r#"{
            "version": 1,
            "jobs": {
                "good": {
                    "job_name": "good",
                    "working_dir": ".",
                    "status": "queued",
                    "external_id": "5"
                },
                "bad": { "job_name": "bad", "status": "exploded" }
            }
        }"#;
        let ledger = Ledger::from_json(text).unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.get("good").map(|e| e.status), Some(JobStatus::Queued));
        assert!(ledger.get("bad").is_none());
        assert_eq!(ledger.corrupt().collect::<Vec<_>>(), vec!["bad"]);

        let reread = Ledger::from_json(&ledger.to_json().unwrap()).unwrap();
        assert_eq!(reread, ledger);
    }

    #[test]
    fn unreadable_document_is_corruption() {
        let err = Ledger::from_json("not json").unwrap_err();
        assert!(matches!(err, JobdagError::LedgerCorruption { .. }));

        let err = Ledger::from_json(r#"{"version": 1}"#).unwrap_err();
        assert!(matches!(err, JobdagError::LedgerCorruption { .. }));
    }

    #[test]
    fn only_failures_and_submitted_skips_block_dependents() {
        assert!(entry(JobStatus::Crashed).blocks_dependents());
        assert!(entry(JobStatus::TimedOut).blocks_dependents());
        assert!(!entry(JobStatus::Succeeded).blocks_dependents());
        assert!(!entry(JobStatus::Queued).blocks_dependents());
        assert!(entry(JobStatus::Skipped).blocks_dependents());

        let mut never_submitted = entry(JobStatus::Skipped);
        never_submitted.external_id = None;
        assert!(!never_submitted.blocks_dependents());
    }

    #[test]
    fn entries_mirror_the_store() {
        let mut spec = JobSpec::new("a job", JobCommand::Shell("true".into()));
        spec.input_name = Some("a.i".into());
        let job = Job::from_spec(spec, &CostPolicy { parallel: 1, capacity: 1 }).unwrap();

        let mut store = JobStore::new(false, 1024);
        store.add(job).unwrap();
        store
            .record_transition("ajob", Transition::to(JobStatus::Skipped).with_message("heavy"))
            .unwrap();

        let ledger = Ledger::from_store(&store);
        let e = ledger.get("ajob").unwrap();
        assert!(e.prereqs.is_empty());
        assert_eq!(e.job_name, "a job");
        assert_eq!(e.input_name.as_deref(), Some("a.i"));
        assert!(e.skipped);
        assert_eq!(e.message.as_deref(), Some("heavy"));
    }
}
