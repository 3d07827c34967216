//! Work items: a caller-declared group of files under one intent.
//!
//! ```text
//! in_progress -> done       (with optional commit reference)
//! in_progress -> abandoned
//! ```
//!
//! Leases point at work items weakly; finishing an item never touches leases.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use thiserror::Error;
use tracing::info;

use crate::{agents::AgentRegistry, clock::from_millis, db::CoordinationDb, Error, Result};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid work item transition: cannot transition from {from} to {to}")]
pub struct TransitionError {
    pub from: WorkStatus,
    pub to: WorkStatus,
}

impl From<TransitionError> for Error {
    fn from(err: TransitionError) -> Self {
        Self::InvalidInput(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    InProgress,
    Done,
    Abandoned,
}

impl WorkStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Abandoned => "abandoned",
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Abandoned)
    }

    pub fn validate_transition(&self, target: Self) -> std::result::Result<(), TransitionError> {
        match (self, target) {
            (Self::InProgress, Self::Done | Self::Abandoned) => Ok(()),
            _ => Err(TransitionError {
                from: *self,
                to: target,
            }),
        }
    }
}

impl fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "in_progress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            "abandoned" => Ok(Self::Abandoned),
            _ => Err(Error::TransientIo(format!("Invalid stored work status: {s}"))),
        }
    }
}

impl TryFrom<String> for WorkStatus {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::from_str(&s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkItem {
    pub work_item_id: i64,
    pub agent_id: String,
    pub description: String,
    pub files: Vec<String>,
    pub priority: i64,
    pub status: WorkStatus,
    pub commit_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(FromRow)]
struct WorkItemRow {
    work_item_id: i64,
    agent_id: String,
    description: String,
    files: String,
    priority: i64,
    #[sqlx(try_from = "String")]
    status: WorkStatus,
    commit_ref: Option<String>,
    created_at_ms: i64,
    completed_at_ms: Option<i64>,
}

impl WorkItemRow {
    fn into_item(self) -> Result<WorkItem> {
        let files = serde_json::from_str(&self.files).map_err(|e| {
            Error::TransientIo(format!("Corrupt file list for work item #{}: {e}", self.work_item_id))
        })?;
        Ok(WorkItem {
            work_item_id: self.work_item_id,
            agent_id: self.agent_id,
            description: self.description,
            files,
            priority: self.priority,
            status: self.status,
            commit_ref: self.commit_ref,
            created_at: from_millis(self.created_at_ms)?,
            completed_at: self.completed_at_ms.map(from_millis).transpose()?,
        })
    }
}

const WORK_COLUMNS: &str = "work_item_id, agent_id, description, files, priority, status, \
     commit_ref, created_at_ms, completed_at_ms";

#[derive(Debug, Clone)]
pub struct WorkQueue {
    db: CoordinationDb,
    registry: AgentRegistry,
}

impl WorkQueue {
    pub fn new(db: CoordinationDb) -> Self {
        Self {
            registry: AgentRegistry::new(db.clone()),
            db,
        }
    }

    pub async fn create(
        &self,
        agent_id: &str,
        description: &str,
        files: &[String],
        priority: i64,
    ) -> Result<WorkItem> {
        self.registry.touch(agent_id).await?;
        let files_json = serde_json::to_string(files)?;

        let work_item_id = sqlx::query(
            "INSERT INTO work_items (agent_id, description, files, priority, status, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, 'in_progress', ?5)",
        )
        .bind(agent_id)
        .bind(description)
        .bind(files_json)
        .bind(priority)
        .bind(self.db.now_millis())
        .execute(self.db.pool())
        .await?
        .last_insert_rowid();

        info!(work_item_id, agent_id, files = files.len(), "work item started");
        self.get(work_item_id).await
    }

    pub async fn get(&self, work_item_id: i64) -> Result<WorkItem> {
        let row: Option<WorkItemRow> = sqlx::query_as(&format!(
            "SELECT {WORK_COLUMNS} FROM work_items WHERE work_item_id = ?1"
        ))
        .bind(work_item_id)
        .fetch_optional(self.db.pool())
        .await?;

        row.ok_or_else(|| Error::NotFound(format!("work item #{work_item_id}")))
            .and_then(WorkItemRow::into_item)
    }

    pub async fn complete(&self, work_item_id: i64, commit_ref: Option<&str>) -> Result<WorkItem> {
        self.finish(work_item_id, WorkStatus::Done, commit_ref).await
    }

    pub async fn abandon(&self, work_item_id: i64) -> Result<WorkItem> {
        self.finish(work_item_id, WorkStatus::Abandoned, None).await
    }

    /// Complete the agent's newest in-progress item.
    pub async fn complete_latest(&self, agent_id: &str, commit_ref: Option<&str>) -> Result<WorkItem> {
        let latest: Option<i64> = sqlx::query_scalar(
            "SELECT work_item_id FROM work_items
             WHERE agent_id = ?1 AND status = 'in_progress'
             ORDER BY created_at_ms DESC, work_item_id DESC LIMIT 1",
        )
        .bind(agent_id)
        .fetch_optional(self.db.pool())
        .await?;

        let work_item_id = latest
            .ok_or_else(|| Error::NotFound(format!("no work in progress for {agent_id}")))?;
        self.complete(work_item_id, commit_ref).await
    }

    async fn finish(
        &self,
        work_item_id: i64,
        target: WorkStatus,
        commit_ref: Option<&str>,
    ) -> Result<WorkItem> {
        let current = self.get(work_item_id).await?;
        current.status.validate_transition(target)?;

        sqlx::query(
            "UPDATE work_items SET status = ?1, commit_ref = COALESCE(?2, commit_ref), completed_at_ms = ?3
             WHERE work_item_id = ?4 AND status = 'in_progress'",
        )
        .bind(target.as_str())
        .bind(commit_ref)
        .bind(self.db.now_millis())
        .bind(work_item_id)
        .execute(self.db.pool())
        .await?;

        info!(work_item_id, status = %target, commit_ref, "work item finished");
        self.get(work_item_id).await
    }

    /// In-progress items, highest priority first, then newest.
    pub async fn list_active(&self, agent_id: Option<&str>) -> Result<Vec<WorkItem>> {
        let rows: Vec<WorkItemRow> = sqlx::query_as(&format!(
            "SELECT {WORK_COLUMNS} FROM work_items
             WHERE status = 'in_progress' AND (?1 IS NULL OR agent_id = ?1)
             ORDER BY priority DESC, created_at_ms DESC, work_item_id DESC"
        ))
        .bind(agent_id)
        .fetch_all(self.db.pool())
        .await?;

        rows.into_iter().map(WorkItemRow::into_item).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::clock::ManualClock;

    async fn setup() -> Result<(WorkQueue, Arc<ManualClock>)> {
        let clock = Arc::new(ManualClock::starting_now());
        let db = CoordinationDb::open_in_memory(clock.clone()).await?;
        Ok((WorkQueue::new(db), clock))
    }

    fn files(paths: &[&str]) -> Vec<String> {
        paths.iter().map(|p| (*p).to_string()).collect()
    }

    #[test]
    fn only_in_progress_items_can_finish() {
        assert!(WorkStatus::InProgress
            .validate_transition(WorkStatus::Done)
            .is_ok());
        assert!(WorkStatus::Done
            .validate_transition(WorkStatus::Abandoned)
            .is_err());
        assert!(WorkStatus::Abandoned.is_terminal());
    }

    #[tokio::test]
    async fn complete_latest_finishes_newest_item() -> Result<()> {
        let (queue, clock) = setup().await?;
        let older = queue.create("a", "first", &files(&["x.py"]), 0).await?;
        clock.advance(Duration::from_secs(1));
        let newer = queue.create("a", "second", &files(&["y.py"]), 0).await?;

        let done = queue.complete_latest("a", Some("abc123")).await?;
        assert_eq!(done.work_item_id, newer.work_item_id);
        assert_eq!(done.status, WorkStatus::Done);
        assert_eq!(done.commit_ref.as_deref(), Some("abc123"));
        assert_eq!(queue.get(older.work_item_id).await?.status, WorkStatus::InProgress);
        Ok(())
    }

    #[tokio::test]
    async fn complete_latest_without_work_is_not_found() -> Result<()> {
        let (queue, _) = setup().await?;
        assert!(matches!(
            queue.complete_latest("a", None).await,
            Err(Error::NotFound(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn finished_items_cannot_finish_again() -> Result<()> {
        let (queue, _) = setup().await?;
        let item = queue.create("a", "task", &files(&["x.py"]), 0).await?;
        queue.abandon(item.work_item_id).await?;

        assert!(matches!(
            queue.complete(item.work_item_id, None).await,
            Err(Error::InvalidInput(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn active_items_sort_by_priority() -> Result<()> {
        let (queue, _) = setup().await?;
        queue.create("a", "low", &files(&["x.py"]), 1).await?;
        queue.create("b", "high", &files(&["y.py"]), 9).await?;

        let all = queue.list_active(None).await?;
        let order: Vec<&str> = all.iter().map(|w| w.description.as_str()).collect();
        assert_eq!(order, vec!["high", "low"]);

        let only_a = queue.list_active(Some("a")).await?;
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a[0].files, vec!["x.py".to_string()]);
        Ok(())
    }
}
