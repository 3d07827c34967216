//! Agent registry with activity tracking.
//!
//! Agents are created on first contact and never deleted; stale agents only
//! move to `idle` or `gone`.

use std::{fmt, str::FromStr, time::Duration};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use tracing::{debug, info};

use crate::{
    clock::{from_millis, positive_millis},
    db::CoordinationDb,
    Error, Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Idle,
    Gone,
}

impl AgentStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Idle => "idle",
            Self::Gone => "gone",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "idle" => Ok(Self::Idle),
            "gone" => Ok(Self::Gone),
            _ => Err(Error::InvalidInput(format!("Invalid agent status: {s}"))),
        }
    }
}

impl TryFrom<String> for AgentStatus {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::from_str(&s)
    }
}

/// A registered agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Agent {
    pub agent_id: String,
    pub agent_type: String,
    pub user_id: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub status: AgentStatus,
}

#[derive(FromRow)]
struct AgentRow {
    agent_id: String,
    agent_type: String,
    user_id: Option<String>,
    first_seen_ms: i64,
    last_active_ms: i64,
    #[sqlx(try_from = "String")]
    status: AgentStatus,
}

impl AgentRow {
    fn into_agent(self) -> Result<Agent> {
        Ok(Agent {
            agent_id: self.agent_id,
            agent_type: self.agent_type,
            user_id: self.user_id,
            first_seen: from_millis(self.first_seen_ms)?,
            last_active: from_millis(self.last_active_ms)?,
            status: self.status,
        })
    }
}

const AGENT_COLUMNS: &str =
    "agent_id, agent_type, user_id, first_seen_ms, last_active_ms, status";

/// Agent registry backed by the coordination store.
#[derive(Debug, Clone)]
pub struct AgentRegistry {
    db: CoordinationDb,
}

impl AgentRegistry {
    pub const fn new(db: CoordinationDb) -> Self {
        Self { db }
    }

    /// Register or refresh an agent with its declared type.
    pub async fn register(
        &self,
        agent_id: &str,
        agent_type: &str,
        user_id: Option<&str>,
    ) -> Result<Agent> {
        validate_agent_id(agent_id)?;
        let now = self.db.now_millis();

        sqlx::query(
            "INSERT INTO agents (agent_id, agent_type, user_id, first_seen_ms, last_active_ms, status)
             VALUES (?1, ?2, ?3, ?4, ?4, 'active')
             ON CONFLICT(agent_id) DO UPDATE SET
                agent_type = ?2,
                user_id = COALESCE(?3, user_id),
                last_active_ms = ?4,
                status = 'active'",
        )
        .bind(agent_id)
        .bind(agent_type)
        .bind(user_id)
        .bind(now)
        .execute(self.db.pool())
        .await?;

        info!(agent_id, agent_type, "agent registered");
        self.get(agent_id).await
    }

    /// Record activity, creating the agent on first contact.
    pub async fn touch(&self, agent_id: &str) -> Result<()> {
        validate_agent_id(agent_id)?;
        let now = self.db.now_millis();

        sqlx::query(
            "INSERT INTO agents (agent_id, first_seen_ms, last_active_ms, status)
             VALUES (?1, ?2, ?2, 'active')
             ON CONFLICT(agent_id) DO UPDATE SET last_active_ms = ?2, status = 'active'",
        )
        .bind(agent_id)
        .bind(now)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    pub async fn set_status(&self, agent_id: &str, status: AgentStatus) -> Result<()> {
        let result = sqlx::query("UPDATE agents SET status = ?1 WHERE agent_id = ?2")
            .bind(status.as_str())
            .bind(agent_id)
            .execute(self.db.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("agent '{agent_id}'")));
        }
        debug!(agent_id, status = %status, "agent status changed");
        Ok(())
    }

    /// Move active agents with no activity for `stale_after` to idle.
    pub async fn mark_stale_idle(&self, stale_after: Duration) -> Result<u64> {
        let cutoff = self.db.now_millis() - positive_millis("stale_after", stale_after)?;

        let result = sqlx::query(
            "UPDATE agents SET status = 'idle' WHERE status = 'active' AND last_active_ms < ?1",
        )
        .bind(cutoff)
        .execute(self.db.pool())
        .await?;

        let marked = result.rows_affected();
        if marked > 0 {
            info!(count = marked, "marked stale agents idle");
        }
        Ok(marked)
    }

    pub async fn get(&self, agent_id: &str) -> Result<Agent> {
        let row: Option<AgentRow> =
            sqlx::query_as(&format!("SELECT {AGENT_COLUMNS} FROM agents WHERE agent_id = ?1"))
                .bind(agent_id)
                .fetch_optional(self.db.pool())
                .await?;

        row.ok_or_else(|| Error::NotFound(format!("agent '{agent_id}'")))
            .and_then(AgentRow::into_agent)
    }

    /// All agents, optionally filtered by status, most recently active first.
    pub async fn list(&self, status: Option<AgentStatus>) -> Result<Vec<Agent>> {
        let rows: Vec<AgentRow> = sqlx::query_as(&format!(
            "SELECT {AGENT_COLUMNS} FROM agents
             WHERE ?1 IS NULL OR status = ?1
             ORDER BY last_active_ms DESC, agent_id ASC"
        ))
        .bind(status.map(|s| s.as_str()))
        .fetch_all(self.db.pool())
        .await?;

        rows.into_iter().map(AgentRow::into_agent).collect()
    }
}

pub(crate) fn validate_agent_id(agent_id: &str) -> Result<()> {
    if agent_id.trim().is_empty() {
        return Err(Error::InvalidInput("agent id cannot be empty".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::clock::ManualClock;

    async fn setup() -> Result<(AgentRegistry, Arc<ManualClock>)> {
        let clock = Arc::new(ManualClock::starting_now());
        let db = CoordinationDb::open_in_memory(clock.clone()).await?;
        Ok((AgentRegistry::new(db), clock))
    }

    #[tokio::test]
    async fn touch_creates_agent_on_first_contact() -> Result<()> {
        let (registry, _) = setup().await?;
        registry.touch("agent-1").await?;

        let agent = registry.get("agent-1").await?;
        assert_eq!(agent.agent_type, "unknown");
        assert_eq!(agent.status, AgentStatus::Active);
        assert_eq!(agent.first_seen, agent.last_active);
        Ok(())
    }

    #[tokio::test]
    async fn touch_keeps_first_seen_and_bumps_last_active() -> Result<()> {
        let (registry, clock) = setup().await?;
        registry.register("agent-1", "codex", Some("alice")).await?;
        let first = registry.get("agent-1").await?;

        clock.advance(Duration::from_secs(30));
        registry.touch("agent-1").await?;

        let after = registry.get("agent-1").await?;
        assert_eq!(after.first_seen, first.first_seen);
        assert!(after.last_active > first.last_active);
        assert_eq!(after.agent_type, "codex");
        assert_eq!(after.user_id.as_deref(), Some("alice"));
        Ok(())
    }

    #[tokio::test]
    async fn stale_agents_go_idle_and_return_on_activity() -> Result<()> {
        let (registry, clock) = setup().await?;
        registry.touch("old").await?;
        clock.advance(Duration::from_secs(120));
        registry.touch("fresh").await?;

        let marked = registry.mark_stale_idle(Duration::from_secs(90)).await?;
        assert_eq!(marked, 1);
        assert_eq!(registry.get("old").await?.status, AgentStatus::Idle);
        assert_eq!(registry.get("fresh").await?.status, AgentStatus::Active);

        registry.touch("old").await?;
        assert_eq!(registry.get("old").await?.status, AgentStatus::Active);
        Ok(())
    }

    #[tokio::test]
    async fn agents_are_never_deleted() -> Result<()> {
        let (registry, _) = setup().await?;
        registry.touch("agent-1").await?;
        registry.set_status("agent-1", AgentStatus::Gone).await?;

        let gone = registry.list(Some(AgentStatus::Gone)).await?;
        assert_eq!(gone.len(), 1);
        assert_eq!(registry.list(None).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_agent_is_not_found() -> Result<()> {
        let (registry, _) = setup().await?;
        assert!(matches!(
            registry.get("ghost").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            registry.set_status("ghost", AgentStatus::Idle).await,
            Err(Error::NotFound(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn empty_agent_id_is_invalid() -> Result<()> {
        let (registry, _) = setup().await?;
        assert!(matches!(
            registry.touch("  ").await,
            Err(Error::InvalidInput(_))
        ));
        Ok(())
    }
}
