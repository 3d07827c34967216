//! Working-tree change detection.
//!
//! The session loop only needs "which paths are dirty right now". Git is the
//! default source; tests script their own.

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use tokio::process::Command;

use crate::{Error, Result};

#[async_trait]
pub trait ChangeDetector: Send + Sync {
    /// Paths, relative to the repository root, that differ from the last
    /// clean reference. Transient failures are `TransientIo`.
    async fn dirty_files(&self) -> Result<BTreeSet<String>>;
}

const DEFAULT_STATUS_TIMEOUT: Duration = Duration::from_secs(10);

/// `git status` in porcelain v1 form, NUL separated.
#[derive(Debug, Clone)]
pub struct GitStatusDetector {
    root: PathBuf,
    timeout: Duration,
}

impl GitStatusDetector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            timeout: DEFAULT_STATUS_TIMEOUT,
        }
    }

    /// A `git status` still running after `timeout` is killed and the poll
    /// fails with `TransientIo`.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ChangeDetector for GitStatusDetector {
    async fn dirty_files(&self) -> Result<BTreeSet<String>> {
        let status = Command::new("git")
            .arg("-C")
            .arg(&self.root)
            .args(["status", "--porcelain=v1", "-z", "--untracked-files=all"])
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(self.timeout, status)
            .await
            .map_err(|_| {
                Error::TransientIo(format!("git status timed out after {:?}", self.timeout))
            })?
            .map_err(|e| Error::TransientIo(format!("Failed to run git status: {e}")))?;

        if !output.status.success() {
            return Err(Error::TransientIo(format!(
                "git status failed ({}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(parse_porcelain_z(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Parse `git status --porcelain=v1 -z` output.
///
/// Entries are `XY PATH`; renames and copies are followed by an extra entry
/// holding the original path, which is skipped.
pub fn parse_porcelain_z(raw: &str) -> BTreeSet<String> {
    let mut files = BTreeSet::new();
    let mut entries = raw.split('\0').filter(|entry| !entry.is_empty());

    while let Some(entry) = entries.next() {
        let Some(path) = entry.get(3..).filter(|p| !p.is_empty()) else {
            continue;
        };
        let status = entry.get(..2).unwrap_or_default();
        if status.contains('R') || status.contains('C') {
            entries.next();
        }
        if path == ".git" || path.starts_with(".git/") {
            continue;
        }
        files.insert(path.to_string());
    }
    files
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn modified_and_untracked_entries() {
        let files = parse_porcelain_z(" M src/lib.rs\0?? notes.txt\0A  new.rs\0");
        let expected: BTreeSet<String> = ["new.rs", "notes.txt", "src/lib.rs"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(files, expected);
    }

    #[test]
    fn rename_reports_new_path_only() {
        let files = parse_porcelain_z("R  renamed.rs\0original.rs\0 M other.rs\0");
        assert!(files.contains("renamed.rs"));
        assert!(!files.contains("original.rs"));
        assert!(files.contains("other.rs"));
    }

    #[test]
    fn paths_with_spaces_survive() {
        let files = parse_porcelain_z("?? dir with space/file name.md\0");
        assert!(files.contains("dir with space/file name.md"));
    }

    #[test]
    fn git_internals_are_ignored() {
        assert!(parse_porcelain_z("?? .git/index.lock\0").is_empty());
    }

    #[tokio::test]
    async fn hung_status_is_a_transient_failure() {
        let git_available = std::process::Command::new("git")
            .arg("--version")
            .output()
            .is_ok_and(|out| out.status.success());
        if !git_available {
            return;
        }

        let detector = GitStatusDetector::new(std::env::temp_dir()).with_timeout(Duration::ZERO);
        match detector.dirty_files().await {
            Err(Error::TransientIo(msg)) => assert!(msg.contains("timed out"), "{msg}"),
            other => panic!("expected a timeout, got {other:?}"),
        }
    }

    #[test]
    fn empty_output_is_clean() {
        assert!(parse_porcelain_z("").is_empty());
    }

    proptest! {
        #[test]
        fn every_modified_path_is_reported(
            paths in prop::collection::btree_set("[a-z]{1,8}(/[a-z]{1,8}){0,2}\\.rs", 0..12)
        ) {
            let raw: String = paths.iter().map(|p| format!(" M {p}\0")).collect();
            prop_assert_eq!(parse_porcelain_z(&raw), paths);
        }

        #[test]
        fn parser_never_panics(raw in ".*") {
            let _ = parse_porcelain_z(&raw);
        }
    }
}
