// src/batch/staging.rs

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, trace};

use crate::fs::FileSystem;
use crate::job::Job;

/// What staging put into a working directory.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub copied: Vec<PathBuf>,
    pub linked: Vec<PathBuf>,
    pub excluded: Vec<PathBuf>,
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = Glob::new(pat).with_context(|| format!("invalid no_copy pattern: {pat}"))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

fn resolve(base: Option<&Path>, path: &str) -> PathBuf {
    let p = Path::new(path);
    match base {
        Some(base) if p.is_relative() => base.join(p),
        _ => p.to_path_buf(),
    }
}

/// Copy `from` to `to`, leaving out the `prune` subtree wherever it occurs
/// below `from`.
fn copy_tree(fs: &dyn FileSystem, from: &Path, to: &Path, prune: &Path) -> Result<()> {
    if from == prune {
        return Ok(());
    }
    if fs.is_dir(from) {
        fs.create_dir_all(to)?;
        for child in fs.read_dir(from)? {
            if let Some(name) = child.file_name() {
                copy_tree(fs, &child, &to.join(name), prune)?;
            }
        }
        Ok(())
    } else {
        fs.copy_file(from, to)
    }
}

/// Place a job's input files into its working directory.
///
/// In order:
/// 1. everything in the staging source directory whose name does not match a
///    `no_copy` pattern (the working directory is never copied into itself,
///    however deep below the source it sits)
/// 2. every `copy_files` entry, excluded or not
/// 3. a symlink for every `link_files` entry that is not already present, so
///    a hard copy always wins over a link
pub fn stage(fs: &dyn FileSystem, job: &Job) -> Result<StageReport> {
    let staging = job.staging();
    let dest = job.working_dir();
    let source = staging.source_dir.as_deref();
    let mut report = StageReport::default();

    fs.create_dir_all(dest)?;

    if let Some(src) = source.filter(|s| *s != dest) {
        let excluded = build_globset(&staging.no_copy)?;
        for entry in fs.read_dir(src)? {
            let Some(name) = entry.file_name() else {
                continue;
            };
            if entry == dest {
                continue;
            }
            if excluded.is_match(Path::new(name)) {
                trace!(job = %job.id(), path = %entry.display(), "excluded from staging");
                report.excluded.push(entry);
                continue;
            }
            let target = dest.join(name);
            copy_tree(fs, &entry, &target, dest)
                .with_context(|| format!("staging {:?} for job '{}'", entry, job.id()))?;
            report.copied.push(target);
        }
    }

    for file in &staging.copy_files {
        let from = resolve(source, file);
        let Some(name) = from.file_name() else {
            continue;
        };
        let target = dest.join(name);
        copy_tree(fs, &from, &target, dest)
            .with_context(|| format!("copying {:?} for job '{}'", from, job.id()))?;
        if !report.copied.contains(&target) {
            report.copied.push(target);
        }
    }

    for file in &staging.link_files {
        let from = resolve(source, file);
        let Some(name) = from.file_name() else {
            continue;
        };
        let link = dest.join(name);
        if fs.exists(&link) {
            trace!(job = %job.id(), path = %link.display(), "already copied; not linking");
            continue;
        }
        let target = std::path::absolute(&from).unwrap_or(from);
        fs.symlink(&target, &link)?;
        report.linked.push(link);
    }

    debug!(
        job = %job.id(),
        copied = report.copied.len(),
        linked = report.linked.len(),
        excluded = report.excluded.len(),
        "staged working directory"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::{MockEntry, MockFileSystem};
    use crate::job::{CostPolicy, JobCommand, JobSpec, StagingSpec};

    fn job(staging: StagingSpec) -> Job {
        let mut spec = JobSpec::new("solve", JobCommand::Shell("true".into()));
        spec.working_dir = PathBuf::from("/work/solve/run");
        spec.staging = staging;
        Job::from_spec(spec, &CostPolicy { parallel: 1, capacity: 1 }).unwrap()
    }

    fn fixture() -> MockFileSystem {
        let fs = MockFileSystem::new();
        fs.add_file("/work/solve/input.i", "mesh");
        fs.add_file("/work/solve/gold/out.csv", "1,2");
        fs.add_file("/work/solve/big.e", "huge");
        fs.add_file("/work/shared/table.dat", "t");
        fs.add_dir("/work/solve/run");
        fs
    }

    #[test]
    fn copies_parent_contents_minus_exclusions() {
        let fs = fixture();
        let j = job(StagingSpec {
            source_dir: Some(PathBuf::from("/work/solve")),
            no_copy: vec!["*.e".into()],
            ..StagingSpec::default()
        });

        let report = stage(&fs, &j).unwrap();

        assert!(fs.is_file(Path::new("/work/solve/run/input.i")));
        assert!(fs.is_file(Path::new("/work/solve/run/gold/out.csv")));
        assert!(!fs.exists(Path::new("/work/solve/run/big.e")));
        assert!(!fs.exists(Path::new("/work/solve/run/run")));
        assert_eq!(report.excluded, vec![PathBuf::from("/work/solve/big.e")]);
    }

    #[test]
    fn explicit_copies_beat_links() {
        let fs = fixture();
        let j = job(StagingSpec {
            source_dir: Some(PathBuf::from("/work/solve")),
            copy_files: vec!["big.e".into()],
            link_files: vec!["big.e".into(), "/work/shared/table.dat".into()],
            no_copy: vec!["*.e".into()],
        });

        let report = stage(&fs, &j).unwrap();

        assert_eq!(
            fs.entry("/work/solve/run/big.e"),
            Some(MockEntry::File(b"huge".to_vec()))
        );
        assert_eq!(
            fs.entry("/work/solve/run/table.dat"),
            Some(MockEntry::Link(PathBuf::from("/work/shared/table.dat")))
        );
        assert_eq!(report.linked, vec![PathBuf::from("/work/solve/run/table.dat")]);
    }

    #[test]
    fn no_source_only_creates_directory() {
        let fs = MockFileSystem::new();
        let report = stage(&fs, &job(StagingSpec::default())).unwrap();
        assert!(fs.is_dir(Path::new("/work/solve/run")));
        assert_eq!(report, StageReport::default());
    }

    #[test]
    fn nested_working_dir_is_left_out_of_its_own_copy() {
        let fs = MockFileSystem::new();
        fs.add_file("/t/input.i", "mesh");
        fs.add_file("/t/runs/old/log.txt", "previous run");
        fs.add_dir("/t/runs/job1");

        let mut spec = JobSpec::new("job1", JobCommand::Shell("true".into()));
        spec.working_dir = PathBuf::from("/t/runs/job1");
        spec.staging = StagingSpec {
            source_dir: Some(PathBuf::from("/t")),
            ..StagingSpec::default()
        };
        let j = Job::from_spec(spec, &CostPolicy { parallel: 1, capacity: 1 }).unwrap();

        stage(&fs, &j).unwrap();

        assert!(fs.is_file(Path::new("/t/runs/job1/input.i")));
        assert!(fs.is_file(Path::new("/t/runs/job1/runs/old/log.txt")));
        assert!(fs.is_dir(Path::new("/t/runs/job1/runs")));
        assert!(!fs.exists(Path::new("/t/runs/job1/runs/job1")));
    }

    #[test]
    fn bad_pattern_is_an_error() {
        let fs = fixture();
        let j = job(StagingSpec {
            source_dir: Some(PathBuf::from("/work/solve")),
            no_copy: vec!["[".into()],
            ..StagingSpec::default()
        });
        assert!(stage(&fs, &j).is_err());
    }
}
