// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{JobFile, RawJobFile};
use crate::errors::Result;

/// Load a job file from a given path and return the raw `RawJobFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation (prerequisites, cycles, etc.). Use [`load_and_validate`] for
/// that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawJobFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let raw: RawJobFile = toml::from_str(&contents)?;

    Ok(raw)
}

/// Load a job file and validate it.
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks for:
///   - unknown or self-referencing `after` entries,
///   - dependency cycles,
///   - job identities that collide after sanitising,
///   - basic global and `[batch]` sanity.
///
/// Relative paths inside the file are resolved against its directory.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<JobFile> {
    let path = path.as_ref();
    let raw = load_from_path(path)?;
    let file = JobFile::try_from(raw)?.with_base_dir(base_dir_of(path));
    Ok(file)
}

/// Directory relative paths in `path` are resolved against.
///
/// A bare file name (parent = "") resolves against ".".
fn base_dir_of(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn paths_resolve_against_file_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.toml");
        let mut f = fs::File::create(&path).unwrap();
        writeln!(
            f,
            "[config]\nledger = \"out/ledger.json\"\n[job.a]\ncmd = \"true\"\nworking_dir = \"a\"\n"
        )
        .unwrap();

        let cfg = load_and_validate(&path).unwrap();
        assert_eq!(cfg.ledger_path(), Some(dir.path().join("out/ledger.json")));

        let specs = cfg.job_specs().unwrap();
        assert_eq!(specs[0].working_dir, dir.path().join("a"));
    }

    #[test]
    fn bare_file_name_uses_current_dir() {
        assert_eq!(base_dir_of(Path::new("Jobdag.toml")), PathBuf::from("."));
        assert_eq!(base_dir_of(Path::new("ci/jobs.toml")), PathBuf::from("ci"));
    }
}
