//! Shared store for leases, actions, conflicts, work items and events.
//!
//! One `CoordinationDb` is an isolated coordination authority: it owns the
//! pool and the clock, and nothing in this crate keeps global state.

use std::{path::Path, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};
use tracing::debug;

use crate::{
    clock::{Clock, SystemClock},
    Error, Result,
};

pub const SCHEMA_VERSION: i64 = 1;

/// Database schema as SQL string - executed once on open
pub(crate) const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS agents (
    agent_id TEXT PRIMARY KEY,
    agent_type TEXT NOT NULL DEFAULT 'unknown',
    user_id TEXT,
    first_seen_ms INTEGER NOT NULL,
    last_active_ms INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'active' CHECK(status IN ('active', 'idle', 'gone'))
);

CREATE TABLE IF NOT EXISTS file_leases (
    lease_id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_path TEXT NOT NULL,
    agent_id TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    granted_at_ms INTEGER NOT NULL,
    expires_at_ms INTEGER NOT NULL,
    released_at_ms INTEGER,
    status TEXT NOT NULL CHECK(status IN ('active', 'released', 'expired')),
    work_item_id INTEGER
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_file_leases_one_active
    ON file_leases(file_path) WHERE status = 'active';
CREATE INDEX IF NOT EXISTS idx_file_leases_agent ON file_leases(agent_id, status);
CREATE INDEX IF NOT EXISTS idx_file_leases_path ON file_leases(file_path, lease_id);

CREATE TABLE IF NOT EXISTS work_items (
    work_item_id INTEGER PRIMARY KEY AUTOINCREMENT,
    agent_id TEXT NOT NULL,
    description TEXT NOT NULL,
    files TEXT NOT NULL DEFAULT '[]',
    priority INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL CHECK(status IN ('in_progress', 'done', 'abandoned')),
    commit_ref TEXT,
    created_at_ms INTEGER NOT NULL,
    completed_at_ms INTEGER
);

CREATE INDEX IF NOT EXISTS idx_work_items_agent ON work_items(agent_id, status);

CREATE TABLE IF NOT EXISTS agent_actions (
    action_id INTEGER PRIMARY KEY AUTOINCREMENT,
    agent_id TEXT NOT NULL,
    action_kind TEXT NOT NULL,
    intent TEXT NOT NULL DEFAULT '',
    work_item_id INTEGER,
    recorded_at_ms INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS action_files (
    action_id INTEGER NOT NULL REFERENCES agent_actions(action_id),
    file_path TEXT NOT NULL,
    PRIMARY KEY (action_id, file_path)
);

CREATE INDEX IF NOT EXISTS idx_action_files_path ON action_files(file_path);
CREATE INDEX IF NOT EXISTS idx_agent_actions_time ON agent_actions(recorded_at_ms);

CREATE TABLE IF NOT EXISTS conflicts (
    conflict_id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_path TEXT NOT NULL,
    agent_a TEXT NOT NULL,
    agent_b TEXT NOT NULL,
    kind TEXT NOT NULL CHECK(kind IN ('lock_contention', 'semantic_overlap')),
    severity TEXT NOT NULL CHECK(severity IN ('low', 'medium', 'high')),
    description TEXT NOT NULL,
    detected_at_ms INTEGER NOT NULL,
    status TEXT NOT NULL CHECK(status IN ('open', 'resolved')),
    resolution_strategy TEXT,
    resolved_at_ms INTEGER,
    first_action_id INTEGER,
    second_action_id INTEGER,
    suggested_strategy TEXT,
    suggestion_confidence REAL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_conflicts_one_open
    ON conflicts(file_path, agent_a, agent_b, kind) WHERE status = 'open';
CREATE INDEX IF NOT EXISTS idx_conflicts_status ON conflicts(status, detected_at_ms);

CREATE TABLE IF NOT EXISTS event_log (
    event_id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    agent_id TEXT,
    file_path TEXT,
    detail TEXT NOT NULL DEFAULT '',
    created_at_ms INTEGER NOT NULL
);
";

/// Handle to the coordination store.
#[derive(Debug, Clone)]
pub struct CoordinationDb {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl CoordinationDb {
    /// Open (creating if needed) a file-backed store.
    pub async fn open(path: &Path, clock: Arc<dyn Clock>) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::TransientIo(format!(
                    "Failed to create database directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| {
                Error::TransientIo(format!(
                    "Failed to open database {}: {e}",
                    path.display()
                ))
            })?;

        debug!(path = %path.display(), "opened coordination database");
        Self::with_pool(pool, clock).await
    }

    /// Open a private in-memory store. Each call is an isolated instance.
    pub async fn open_in_memory(clock: Arc<dyn Clock>) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| Error::TransientIo(format!("Failed to open in-memory database: {e}")))?;

        Self::with_pool(pool, clock).await
    }

    /// In-memory store on the wall clock.
    pub async fn open_in_memory_system() -> Result<Self> {
        Self::open_in_memory(Arc::new(SystemClock)).await
    }

    async fn with_pool(pool: SqlitePool, clock: Arc<dyn Clock>) -> Result<Self> {
        let db = Self { pool, clock };
        db.init_schema().await?;
        Ok(db)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::TransientIo(format!("Failed to initialize schema: {e}")))?;

        sqlx::query("INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', ?)")
            .bind(SCHEMA_VERSION.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn now_millis(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }

    pub async fn schema_version(&self) -> Result<i64> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM schema_meta WHERE key = 'schema_version'")
                .fetch_optional(&self.pool)
                .await?;

        row.ok_or_else(|| Error::NotFound("schema version".to_string()))
            .and_then(|(value,)| {
                value
                    .parse()
                    .map_err(|e| Error::TransientIo(format!("Corrupt schema version '{value}': {e}")))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_instances_are_isolated() -> Result<()> {
        let first = CoordinationDb::open_in_memory_system().await?;
        let second = CoordinationDb::open_in_memory_system().await?;

        sqlx::query(
            "INSERT INTO agents (agent_id, first_seen_ms, last_active_ms) VALUES ('a', 0, 0)",
        )
        .execute(first.pool())
        .await?;

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM agents")
            .fetch_one(second.pool())
            .await?;
        assert_eq!(count, 0);
        Ok(())
    }

    #[tokio::test]
    async fn file_database_is_created_with_schema() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("state.db");

        let db = CoordinationDb::open(&path, Arc::new(SystemClock)).await?;
        assert!(path.exists());
        assert_eq!(db.schema_version().await?, SCHEMA_VERSION);

        let reopened = CoordinationDb::open(&path, Arc::new(SystemClock)).await?;
        assert_eq!(reopened.schema_version().await?, SCHEMA_VERSION);
        Ok(())
    }

    #[tokio::test]
    async fn second_active_lease_on_a_path_is_rejected_by_storage() -> Result<()> {
        let db = CoordinationDb::open_in_memory_system().await?;
        let insert = "INSERT INTO file_leases
            (file_path, agent_id, granted_at_ms, expires_at_ms, status)
            VALUES ('x.py', ?, 0, 1, 'active')";

        sqlx::query(insert).bind("a").execute(db.pool()).await?;
        let second = sqlx::query(insert).bind("b").execute(db.pool()).await;
        assert!(second.is_err());
        Ok(())
    }
}
