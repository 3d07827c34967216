#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Auto-coordination against a real git working tree.

mod common;

use std::{path::Path, process::Command, sync::Arc, time::Duration};

use agentsync_core::{
    coordination::PathState,
    session::{ChangeDetector, GitStatusDetector, SessionOptions, SessionState},
    AgentIdentity, AutoCoordinator, ClientKind, Config, Error, Result,
};
use tempfile::TempDir;

fn git(root: &Path, args: &[&str]) -> bool {
    Command::new("git")
        .arg("-C")
        .arg(root)
        .args(args)
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

/// A committed repo with `a.py` and `b.py`, or `None` when git is unavailable.
fn repo() -> Option<TempDir> {
    let dir = TempDir::new().ok()?;
    let root = dir.path();
    let ok = git(root, &["init", "-q"])
        && git(root, &["config", "user.email", "test@example.com"])
        && git(root, &["config", "user.name", "test"])
        && git(root, &["config", "commit.gpgsign", "false"])
        && std::fs::write(root.join("a.py"), "a = 1\n").is_ok()
        && std::fs::write(root.join("b.py"), "b = 1\n").is_ok()
        && git(root, &["add", "."])
        && git(root, &["commit", "-q", "-m", "init"]);
    ok.then_some(dir)
}

fn identity() -> AgentIdentity {
    AgentIdentity {
        agent_id: "claude-test-1-abc123".to_string(),
        client: ClientKind::Claude,
        session_label: "claude-repo-1".to_string(),
    }
}

#[tokio::test]
async fn git_detector_reports_modified_and_untracked() -> Result<()> {
    let Some(dir) = repo() else {
        eprintln!("git unavailable; skipping");
        return Ok(());
    };
    std::fs::write(dir.path().join("a.py"), "a = 2\n")?;
    std::fs::write(dir.path().join("new.py"), "")?;

    let dirty = GitStatusDetector::new(dir.path()).dirty_files().await?;
    assert!(dirty.contains("a.py"));
    assert!(dirty.contains("new.py"));
    assert!(!dirty.contains("b.py"));
    Ok(())
}

#[tokio::test]
async fn git_detector_outside_a_repo_is_transient() -> Result<()> {
    let dir = TempDir::new()?;
    if !git(dir.path(), &["--version"]) {
        return Ok(());
    }
    let result = GitStatusDetector::new(dir.path().join("missing")).dirty_files().await;
    assert!(matches!(result, Err(Error::TransientIo(_))));
    Ok(())
}

/// Baseline `a.py`, edit and commit `b.py`, then exit.
#[tokio::test]
async fn session_claims_only_what_it_changed() -> Result<()> {
    let Some(dir) = repo() else {
        eprintln!("git unavailable; skipping");
        return Ok(());
    };
    let root = dir.path();
    let h = common::in_memory().await?;
    let locks = h.service.locks().clone();

    std::fs::write(root.join("a.py"), "a = 2\n")?;
    let options =
        SessionOptions::from_config(&Config::default(), Some(Duration::from_secs(60)), None)?;
    let mut session = AutoCoordinator::new(
        &h.service,
        identity(),
        Box::new(GitStatusDetector::new(root)),
        options,
    );
    session.start().await?;

    let baseline = session.tick().await?;
    assert_eq!(baseline.baselined, common::paths(&["a.py"]));
    assert_eq!(session.state(), SessionState::Active);

    std::fs::write(root.join("b.py"), "b = 2\n")?;
    let tick = session.tick().await?;
    assert_eq!(tick.claimed, common::paths(&["b.py"]));
    assert_eq!(locks.status(&["a.py"]).await?[0].state, PathState::Free);

    assert!(git(root, &["commit", "-q", "-m", "b", "--", "b.py"]));
    let tick = session.tick().await?;
    assert_eq!(tick.released, common::paths(&["b.py"]));
    assert!(tick.claimed.is_empty(), "baseline file claimed: {:?}", tick.claimed);

    session.drain(false).await?;
    assert_eq!(session.state(), SessionState::Closed);
    assert!(locks.active_work().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn unrenewed_lease_frees_after_default_ttl() -> Result<()> {
    let h = common::in_memory().await?;
    let clock = Arc::clone(&h.clock);
    h.service
        .locks()
        .claim(&["shared.rs"], "manual", "hand edit", None)
        .await?;

    let holder = h.service.locks().status(&["shared.rs"]).await?;
    assert_eq!(holder[0].holder(), Some("manual"));

    clock.advance(Duration::from_secs(1801));
    let after = h.service.locks().status(&["shared.rs"]).await?;
    assert_eq!(after[0].state, PathState::Free);
    Ok(())
}
