// src/engine/summary.rs

use std::collections::BTreeMap;
use std::fmt;

use crate::job::{JobStatus, JobStore};

/// Count of jobs per status at the end of a run or resume.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    counts: BTreeMap<JobStatus, usize>,
}

impl Summary {
    pub fn from_statuses(statuses: impl IntoIterator<Item = JobStatus>) -> Self {
        let mut counts = BTreeMap::new();
        for status in statuses {
            *counts.entry(status).or_insert(0) += 1;
        }
        Self { counts }
    }

    pub fn from_store(store: &JobStore) -> Self {
        Self::from_statuses(store.iter().map(|(_, state)| state.status()))
    }

    pub fn count(&self, status: JobStatus) -> usize {
        self.counts.get(&status).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    /// True if any job failed, crashed or timed out.
    pub fn has_failures(&self) -> bool {
        [JobStatus::Failed, JobStatus::Crashed, JobStatus::TimedOut]
            .into_iter()
            .any(|s| self.count(s) > 0)
    }

    /// Jobs left for a later status check.
    pub fn outstanding(&self) -> usize {
        self.counts
            .iter()
            .filter(|(s, _)| !s.is_terminal())
            .map(|(_, n)| n)
            .sum()
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.counts.is_empty() {
            return f.write_str("no jobs");
        }
        let parts: Vec<String> = self
            .counts
            .iter()
            .map(|(status, n)| format!("{n} {status}"))
            .collect();
        write!(f, "{} ({} total)", parts.join(", "), self.total())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_and_display() {
        let summary = Summary::from_statuses([
            JobStatus::Succeeded,
            JobStatus::Succeeded,
            JobStatus::Crashed,
            JobStatus::Queued,
        ]);
        assert_eq!(summary.count(JobStatus::Succeeded), 2);
        assert_eq!(summary.count(JobStatus::Failed), 0);
        assert_eq!(summary.total(), 4);
        assert_eq!(summary.outstanding(), 1);
        assert!(summary.has_failures());
        assert_eq!(
            summary.to_string(),
            "1 queued, 1 crashed, 2 succeeded (4 total)"
        );
    }

    #[test]
    fn skips_are_not_failures() {
        let summary = Summary::from_statuses([JobStatus::Skipped, JobStatus::Succeeded]);
        assert!(!summary.has_failures());
        assert_eq!(Summary::default().to_string(), "no jobs");
    }
}
