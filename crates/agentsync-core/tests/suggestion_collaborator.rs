#![cfg(unix)]
#![allow(clippy::unwrap_used, clippy::expect_used)]
//! The external suggestion command is advisory only.

mod common;

use std::{sync::Arc, time::Duration};

use agentsync_core::{
    coordination::{ActionKind, CommandSuggester, NewAction, OverlapPolicy},
    ActivityRecorder, ConflictFilter, CoordinationDb, EventLog, ManualClock, Result,
};

fn sh(script: &str) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script.to_string()]
}

async fn recorder(argv: Vec<String>, timeout: Duration) -> Result<ActivityRecorder> {
    let db = CoordinationDb::open_in_memory(Arc::new(ManualClock::starting_now())).await?;
    let events = EventLog::new(db.clone());
    Ok(
        ActivityRecorder::new(db, events, OverlapPolicy::default())
            .with_suggester(Arc::new(CommandSuggester::new(argv)?), timeout),
    )
}

fn edit(agent: &str) -> NewAction {
    NewAction {
        agent_id: agent.to_string(),
        kind: ActionKind::Edit,
        files: common::paths(&["lib.rs"]),
        intent: format!("{agent} refactor"),
        work_item_id: None,
    }
}

#[tokio::test]
async fn suggestion_is_attached_to_open_conflict() -> Result<()> {
    let recorder = recorder(
        sh(r#"cat > /dev/null; printf '{"strategy":"rebase onto A","confidence":1.7}'"#),
        Duration::from_secs(5),
    )
    .await?;
    recorder.record_action(edit("A")).await?;
    let recorded = tokio_test::assert_ok!(recorder.record_action(edit("B")).await);
    assert_eq!(recorded.opened.len(), 1);

    let open = recorder.list_open_conflicts(&ConflictFilter::default()).await?;
    let suggestion = open[0].suggestion.clone().expect("suggestion stored");
    assert_eq!(suggestion.strategy, "rebase onto A");
    assert!((suggestion.confidence - 1.0).abs() < f64::EPSILON);
    assert!(open[0].resolution_strategy.is_none());
    Ok(())
}

#[tokio::test]
async fn failing_command_leaves_conflict_open_without_suggestion() -> Result<()> {
    let recorder = recorder(sh("exit 1"), Duration::from_secs(5)).await?;
    recorder.record_action(edit("A")).await?;
    recorder.record_action(edit("B")).await?;

    let open = recorder.list_open_conflicts(&ConflictFilter::default()).await?;
    assert_eq!(open.len(), 1);
    assert!(open[0].suggestion.is_none());
    Ok(())
}

#[tokio::test]
async fn slow_command_times_out() -> Result<()> {
    let recorder = recorder(sh("sleep 5"), Duration::from_millis(100)).await?;
    recorder.record_action(edit("A")).await?;
    tokio_test::assert_ok!(recorder.record_action(edit("B")).await);

    let open = recorder.list_open_conflicts(&ConflictFilter::default()).await?;
    assert!(open[0].suggestion.is_none());
    Ok(())
}

#[test]
fn empty_command_is_rejected() {
    tokio_test::assert_err!(CommandSuggester::new(Vec::new()));
}
