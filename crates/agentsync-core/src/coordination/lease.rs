//! Lease entities (pure data, no I/O).
//!
//! ```text
//! active -> released   (explicit release or session drain)
//! active -> expired    (expires_at passed, written lazily)
//! ```
//!
//! `released` and `expired` are terminal. A stored `active` row is only
//! trusted after comparing `expires_at` with the current time.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

use crate::{clock::from_millis, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseStatus {
    Active,
    Released,
    Expired,
}

impl LeaseStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Released => "released",
            Self::Expired => "expired",
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Released | Self::Expired)
    }
}

impl fmt::Display for LeaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeaseStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "released" => Ok(Self::Released),
            "expired" => Ok(Self::Expired),
            _ => Err(Error::TransientIo(format!("Invalid stored lease status: {s}"))),
        }
    }
}

impl TryFrom<String> for LeaseStatus {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::from_str(&s)
    }
}

/// A time-bounded exclusive claim on one file path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lease {
    pub lease_id: i64,
    pub file_path: String,
    pub agent_id: String,
    pub description: String,
    pub granted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
    pub status: LeaseStatus,
    pub work_item_id: Option<i64>,
}

impl Lease {
    /// Held right now: stored as active and not yet past due.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.status == LeaseStatus::Active && self.expires_at > now
    }
}

pub(crate) const LEASE_COLUMNS: &str = "lease_id, file_path, agent_id, description, \
     granted_at_ms, expires_at_ms, released_at_ms, status, work_item_id";

#[derive(Debug, FromRow)]
pub(crate) struct LeaseRow {
    pub lease_id: i64,
    pub file_path: String,
    pub agent_id: String,
    pub description: String,
    pub granted_at_ms: i64,
    pub expires_at_ms: i64,
    pub released_at_ms: Option<i64>,
    #[sqlx(try_from = "String")]
    pub status: LeaseStatus,
    pub work_item_id: Option<i64>,
}

impl LeaseRow {
    pub fn is_live_at(&self, now_ms: i64) -> bool {
        self.status == LeaseStatus::Active && self.expires_at_ms > now_ms
    }

    pub fn into_lease(self) -> Result<Lease> {
        Ok(Lease {
            lease_id: self.lease_id,
            file_path: self.file_path,
            agent_id: self.agent_id,
            description: self.description,
            granted_at: from_millis(self.granted_at_ms)?,
            expires_at: from_millis(self.expires_at_ms)?,
            released_at: self.released_at_ms.map(from_millis).transpose()?,
            status: self.status,
            work_item_id: self.work_item_id,
        })
    }
}

/// A path that could not be claimed, with who holds it and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockedClaim {
    pub file_path: String,
    pub holder: String,
    pub description: String,
    pub expires_at: DateTime<Utc>,
}

impl BlockedClaim {
    pub fn to_error(&self) -> Error {
        Error::Conflict {
            path: self.file_path.clone(),
            holder: self.holder.clone(),
            description: self.description.clone(),
        }
    }
}

/// Result of a claim: disjoint granted and blocked sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClaimOutcome {
    pub granted: Vec<Lease>,
    pub blocked: Vec<BlockedClaim>,
    /// Granted paths the caller already held; only their expiry moved.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extended: Vec<String>,
    /// Paths that got no answer; nothing was written for them.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<FailedClaim>,
}

/// A path whose claim hit a retryable failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedClaim {
    pub file_path: String,
    pub error: String,
}

impl ClaimOutcome {
    pub fn is_fully_granted(&self) -> bool {
        self.blocked.is_empty()
    }

    /// Leases created by this claim, as opposed to re-claims.
    pub fn newly_granted(&self) -> impl Iterator<Item = &Lease> {
        self.granted
            .iter()
            .filter(|lease| !self.extended.contains(&lease.file_path))
    }

    pub fn granted_paths(&self) -> impl Iterator<Item = &str> {
        self.granted.iter().map(|l| l.file_path.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DenialReason {
    /// The caller's lease lapsed; it must claim again.
    Expired,
    HeldByOther { holder: String, description: String },
    /// The caller never held this path, or already released it.
    NotHeld,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeniedRenewal {
    pub file_path: String,
    #[serde(flatten)]
    pub reason: DenialReason,
}

impl DeniedRenewal {
    pub fn to_error(&self, agent_id: &str) -> Error {
        match &self.reason {
            DenialReason::Expired => Error::Expired {
                path: self.file_path.clone(),
                agent_id: agent_id.to_string(),
            },
            DenialReason::HeldByOther {
                holder,
                description,
            } => Error::Conflict {
                path: self.file_path.clone(),
                holder: holder.clone(),
                description: description.clone(),
            },
            DenialReason::NotHeld => Error::NotFound(format!(
                "no lease on '{}' held by {agent_id}",
                self.file_path
            )),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RenewOutcome {
    pub renewed: Vec<Lease>,
    pub denied: Vec<DeniedRenewal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotHeld,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRelease {
    pub file_path: String,
    pub reason: SkipReason,
}

/// Release never fails per path; paths the caller did not hold are skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReleaseOutcome {
    pub released: Vec<String>,
    pub skipped: Vec<SkippedRelease>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PathState {
    Held {
        agent_id: String,
        description: String,
        expires_at: DateTime<Utc>,
    },
    Free,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathStatus {
    pub file_path: String,
    #[serde(flatten)]
    pub state: PathState,
}

impl PathStatus {
    pub fn holder(&self) -> Option<&str> {
        match &self.state {
            PathState::Held { agent_id, .. } => Some(agent_id),
            PathState::Free => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn past_due_active_lease_is_not_live() -> Result<()> {
        let row = LeaseRow {
            lease_id: 1,
            file_path: "x.py".into(),
            agent_id: "a".into(),
            description: String::new(),
            granted_at_ms: 1_000,
            expires_at_ms: 2_000,
            released_at_ms: None,
            status: LeaseStatus::Active,
            work_item_id: None,
        };
        assert!(row.is_live_at(1_999));
        assert!(!row.is_live_at(2_000));

        let lease = row.into_lease()?;
        assert!(!lease.is_live(lease.expires_at));
        Ok(())
    }

    #[test]
    fn terminal_statuses() {
        assert!(!LeaseStatus::Active.is_terminal());
        assert!(LeaseStatus::Released.is_terminal());
        assert!(LeaseStatus::Expired.is_terminal());
    }

    #[test]
    fn expired_denial_instructs_reclaim() {
        let denial = DeniedRenewal {
            file_path: "z.py".into(),
            reason: DenialReason::Expired,
        };
        let err = denial.to_error("agent-a");
        assert_eq!(err.code(), "LEASE_EXPIRED");
        assert!(err.to_string().contains("claim the file again"));
    }

    #[test]
    fn blocked_claim_reports_holder_and_intent() {
        let blocked = BlockedClaim {
            file_path: "y.py".into(),
            holder: "agent-a".into(),
            description: "split module".into(),
            expires_at: Utc::now(),
        };
        let msg = blocked.to_error().to_string();
        assert!(msg.contains("agent-a") && msg.contains("split module"));
    }
}
