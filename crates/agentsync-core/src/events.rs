//! Append-only event log with in-process fan-out.
//!
//! Every lease and conflict transition is written to `event_log` and then
//! broadcast to live subscribers. A lagging or absent subscriber never
//! blocks the writer.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use tokio::sync::broadcast;
use tracing::trace;

use crate::{clock::from_millis, db::CoordinationDb, Error, Result};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    LeaseGranted,
    LeaseRenewed,
    LeaseBlocked,
    LeaseReleased,
    LeaseExpired,
    ConflictOpened,
    ConflictResolved,
    SessionStarted,
    SessionBaselined,
    SessionDraining,
    SessionClosed,
}

impl EventKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::LeaseGranted => "lease_granted",
            Self::LeaseRenewed => "lease_renewed",
            Self::LeaseBlocked => "lease_blocked",
            Self::LeaseReleased => "lease_released",
            Self::LeaseExpired => "lease_expired",
            Self::ConflictOpened => "conflict_opened",
            Self::ConflictResolved => "conflict_resolved",
            Self::SessionStarted => "session_started",
            Self::SessionBaselined => "session_baselined",
            Self::SessionDraining => "session_draining",
            Self::SessionClosed => "session_closed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "lease_granted" => Ok(Self::LeaseGranted),
            "lease_renewed" => Ok(Self::LeaseRenewed),
            "lease_blocked" => Ok(Self::LeaseBlocked),
            "lease_released" => Ok(Self::LeaseReleased),
            "lease_expired" => Ok(Self::LeaseExpired),
            "conflict_opened" => Ok(Self::ConflictOpened),
            "conflict_resolved" => Ok(Self::ConflictResolved),
            "session_started" => Ok(Self::SessionStarted),
            "session_baselined" => Ok(Self::SessionBaselined),
            "session_draining" => Ok(Self::SessionDraining),
            "session_closed" => Ok(Self::SessionClosed),
            _ => Err(Error::InvalidInput(format!("Invalid event kind: {s}"))),
        }
    }
}

impl TryFrom<String> for EventKind {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::from_str(&s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoordinationEvent {
    pub kind: EventKind,
    pub agent_id: Option<String>,
    pub file_path: Option<String>,
    pub detail: String,
    pub at: DateTime<Utc>,
}

#[derive(FromRow)]
struct EventRow {
    #[sqlx(try_from = "String")]
    kind: EventKind,
    agent_id: Option<String>,
    file_path: Option<String>,
    detail: String,
    created_at_ms: i64,
}

#[derive(Debug, Clone)]
pub struct EventLog {
    db: CoordinationDb,
    sender: broadcast::Sender<CoordinationEvent>,
}

impl EventLog {
    pub fn new(db: CoordinationDb) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { db, sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinationEvent> {
        self.sender.subscribe()
    }

    pub async fn append(
        &self,
        kind: EventKind,
        agent_id: Option<&str>,
        file_path: Option<&str>,
        detail: impl Into<String>,
    ) -> Result<()> {
        let event = CoordinationEvent {
            kind,
            agent_id: agent_id.map(String::from),
            file_path: file_path.map(String::from),
            detail: detail.into(),
            at: self.db.now(),
        };

        sqlx::query(
            "INSERT INTO event_log (kind, agent_id, file_path, detail, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(kind.as_str())
        .bind(&event.agent_id)
        .bind(&event.file_path)
        .bind(&event.detail)
        .bind(event.at.timestamp_millis())
        .execute(self.db.pool())
        .await?;

        trace!(kind = %kind, "event appended");
        // No receivers is not an error.
        let _ = self.sender.send(event);
        Ok(())
    }

    /// Most recent events first.
    pub async fn list_recent(&self, limit: u32) -> Result<Vec<CoordinationEvent>> {
        let rows: Vec<EventRow> = sqlx::query_as(
            "SELECT kind, agent_id, file_path, detail, created_at_ms
             FROM event_log ORDER BY event_id DESC LIMIT ?1",
        )
        .bind(i64::from(limit))
        .fetch_all(self.db.pool())
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(CoordinationEvent {
                    kind: row.kind,
                    agent_id: row.agent_id,
                    file_path: row.file_path,
                    detail: row.detail,
                    at: from_millis(row.created_at_ms)?,
                })
            })
            .collect()
    }
}
