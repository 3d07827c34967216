//! Lease coordination: lock manager, activity recorder and work items.

mod conflict;
mod guards;
mod lease;
mod locks;
mod recorder;
mod suggest;
mod work_items;

pub use conflict::{
    Conflict, ConflictFilter, ConflictKind, ConflictStatus, OverlapPolicy, Severity, Suggestion,
};
pub use lease::{
    BlockedClaim, ClaimOutcome, DeniedRenewal, DenialReason, FailedClaim, Lease, LeaseStatus,
    PathState, PathStatus, ReleaseOutcome, RenewOutcome, SkipReason, SkippedRelease,
};
pub use locks::LockManager;
pub use recorder::{ActionKind, ActionRecord, ActivityRecorder, NewAction, RecordedAction};
pub use suggest::{CommandSuggester, SuggestionProvider};
pub use work_items::{TransitionError as WorkTransitionError, WorkItem, WorkQueue, WorkStatus};

use std::collections::BTreeSet;

use crate::{Error, Result};

/// Trim, drop a leading `./`, reject blanks, dedupe. Output is sorted.
pub(crate) fn normalize_paths<P: AsRef<str>>(paths: &[P]) -> Result<Vec<String>> {
    paths
        .iter()
        .map(|raw| {
            let raw = raw.as_ref();
            let mut path = raw.trim();
            while let Some(rest) = path.strip_prefix("./") {
                path = rest;
            }
            if path.is_empty() || path.contains('\0') {
                return Err(Error::InvalidInput(format!("invalid file path: {raw:?}")));
            }
            Ok(path.to_string())
        })
        .collect::<Result<BTreeSet<String>>>()
        .map(|set| set.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_trimmed_deduped_and_sorted() -> Result<()> {
        let paths = normalize_paths(&["./b.py", " a.py", "b.py"])?;
        assert_eq!(paths, vec!["a.py".to_string(), "b.py".to_string()]);
        Ok(())
    }

    #[test]
    fn blank_path_is_invalid() {
        assert!(matches!(
            normalize_paths(&["ok.py", "  "]),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(normalize_paths(&["./"]), Err(Error::InvalidInput(_))));
    }
}
