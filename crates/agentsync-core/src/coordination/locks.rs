//! File lease manager for agent coordination.
//!
//! Grants, renews and releases exclusive, time-bounded leases on file paths.
//! Expiry is computed, never scheduled: every operation first writes the
//! `expired` transition for a past-due lease on the path it touches, and
//! every read compares `expires_at` with the clock.
//!
//! Each path is handled in its own transaction under its own guard, so a
//! multi-path call can partially succeed and calls on disjoint paths do
//! not wait on each other.

use std::{collections::BTreeMap, fmt::Display, future::Future, time::Duration};

use sqlx::{Sqlite, Transaction};
use tracing::{debug, info, warn};

use super::{
    guards::PathGuards,
    lease::{LeaseRow, LEASE_COLUMNS},
    normalize_paths, ActivityRecorder, BlockedClaim, ClaimOutcome, DeniedRenewal, DenialReason,
    FailedClaim, Lease, PathState, PathStatus, ReleaseOutcome, RenewOutcome, SkipReason,
    SkippedRelease,
};
use crate::{
    agents::{validate_agent_id, AgentRegistry},
    clock::{from_millis, positive_millis},
    config::Config,
    db::CoordinationDb,
    events::{EventKind, EventLog},
    Error, Result,
};

enum Claimed {
    Granted(Lease),
    Extended(Lease),
    Blocked(BlockedClaim),
}

enum Renewed {
    Renewed(Lease),
    Denied(DeniedRenewal),
}

enum Released {
    Released,
    Skipped(SkipReason),
}

/// Manages exclusive file leases backed by `SQLite`.
#[derive(Debug, Clone)]
pub struct LockManager {
    db: CoordinationDb,
    registry: AgentRegistry,
    recorder: ActivityRecorder,
    events: EventLog,
    guards: PathGuards,
    default_ttl: Duration,
    operation_timeout: Duration,
}

impl LockManager {
    /// Create a `LockManager` with default TTL and operation timeout.
    pub fn new(db: CoordinationDb, recorder: ActivityRecorder, events: EventLog) -> Self {
        Self::from_config(db, recorder, events, &Config::default())
    }

    pub fn from_config(
        db: CoordinationDb,
        recorder: ActivityRecorder,
        events: EventLog,
        config: &Config,
    ) -> Self {
        Self {
            registry: AgentRegistry::new(db.clone()),
            db,
            recorder,
            events,
            guards: PathGuards::default(),
            default_ttl: config.default_ttl(),
            operation_timeout: config.operation_timeout(),
        }
    }

    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub const fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub const fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Bound a call so a slow store surfaces as a retryable failure.
    async fn bounded<T>(&self, op: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.operation_timeout, fut)
            .await
            .map_err(|_| {
                Error::TransientIo(format!(
                    "{op} did not complete within {:?}",
                    self.operation_timeout
                ))
            })?
    }

    // ═══════════════════════════════════════════════════════════════════════
    // CLAIM
    // ═══════════════════════════════════════════════════════════════════════

    /// Claim each path for `agent_id`.
    ///
    /// A path is granted when it is free or already held by the same agent
    /// (the TTL is extended on the existing lease). Otherwise it is blocked
    /// and the result names the holder and their description. Granted paths
    /// stay granted even when other paths in the same call are blocked.
    ///
    /// Each path is bounded by the operation timeout on its own. A path that
    /// fails transiently is listed in `failed` and the rest still proceed;
    /// the error is returned only when no path got an answer.
    pub async fn claim(
        &self,
        paths: &[impl AsRef<str> + Sync],
        agent_id: &str,
        description: &str,
        ttl: Option<Duration>,
    ) -> Result<ClaimOutcome> {
        let paths = normalize_paths(paths)?;
        validate_agent_id(agent_id)?;
        let ttl_ms = positive_millis("ttl", ttl.unwrap_or(self.default_ttl))?;

        self.bounded("claim", self.registry.touch(agent_id)).await?;
        let mut outcome = ClaimOutcome::default();
        let mut first_error = None;
        for path in &paths {
            match self.claim_one(path, agent_id, description, ttl_ms).await {
                Ok(Claimed::Granted(lease)) => outcome.granted.push(lease),
                Ok(Claimed::Extended(lease)) => {
                    outcome.extended.push(lease.file_path.clone());
                    outcome.granted.push(lease);
                }
                Ok(Claimed::Blocked(blocked)) => outcome.blocked.push(blocked),
                Err(err) if err.is_retryable() => {
                    warn!(path, agent_id, error = %err, "claim failed for path");
                    outcome.failed.push(FailedClaim {
                        file_path: path.clone(),
                        error: err.to_string(),
                    });
                    first_error.get_or_insert(err);
                }
                Err(err) => return Err(err),
            }
        }

        match first_error {
            Some(err) if outcome.granted.is_empty() && outcome.blocked.is_empty() => Err(err),
            _ => Ok(outcome),
        }
    }

    async fn claim_one(
        &self,
        path: &str,
        agent_id: &str,
        description: &str,
        ttl_ms: i64,
    ) -> Result<Claimed> {
        let (claimed, lapsed) = self
            .bounded("claim", self.claim_in_tx(path, agent_id, description, ttl_ms))
            .await?;

        self.note_lapsed(path, &lapsed).await;
        match &claimed {
            Claimed::Granted(lease) => {
                info!(path, agent_id, expires_at = %lease.expires_at, "lease granted");
                self.note(EventKind::LeaseGranted, agent_id, path, description)
                    .await;
            }
            Claimed::Extended(lease) => {
                debug!(path, agent_id, expires_at = %lease.expires_at, "lease extended by re-claim");
                self.note(EventKind::LeaseRenewed, agent_id, path, "re-claim")
                    .await;
            }
            Claimed::Blocked(blocked) => {
                info!(path, agent_id, holder = %blocked.holder, "claim blocked");
                self.note(
                    EventKind::LeaseBlocked,
                    agent_id,
                    path,
                    format!("held by {}", blocked.holder),
                )
                .await;
                log_failure(
                    "record lock contention",
                    self.recorder
                        .record_contention(path, &blocked.holder, &blocked.description, agent_id)
                        .await,
                );
            }
        }
        Ok(claimed)
    }

    /// The store side of a claim. A timeout drops the transaction
    /// uncommitted.
    async fn claim_in_tx(
        &self,
        path: &str,
        agent_id: &str,
        description: &str,
        ttl_ms: i64,
    ) -> Result<(Claimed, Vec<String>)> {
        let _guard = self.guards.lock(path).await;
        let now = self.db.now_millis();
        let expires_at = now + ttl_ms;

        let mut tx = self.db.pool().begin().await?;
        let lapsed = expire_path(&mut tx, path, now).await?;
        let current = active_lease(&mut tx, path).await?;

        let claimed = match current {
            Some(row) if row.agent_id == agent_id => {
                sqlx::query(
                    "UPDATE file_leases
                     SET expires_at_ms = ?1, description = CASE WHEN ?2 = '' THEN description ELSE ?2 END
                     WHERE lease_id = ?3",
                )
                .bind(expires_at)
                .bind(description)
                .bind(row.lease_id)
                .execute(&mut *tx)
                .await?;
                Claimed::Extended(lease_by_id(&mut tx, row.lease_id).await?)
            }
            Some(row) => Claimed::Blocked(BlockedClaim {
                file_path: path.to_string(),
                holder: row.agent_id,
                description: row.description,
                expires_at: from_millis(row.expires_at_ms)?,
            }),
            None => {
                let lease_id = sqlx::query(
                    "INSERT INTO file_leases
                        (file_path, agent_id, description, granted_at_ms, expires_at_ms, status)
                     VALUES (?1, ?2, ?3, ?4, ?5, 'active')",
                )
                .bind(path)
                .bind(agent_id)
                .bind(description)
                .bind(now)
                .bind(expires_at)
                .execute(&mut *tx)
                .await?
                .last_insert_rowid();
                Claimed::Granted(lease_by_id(&mut tx, lease_id).await?)
            }
        };
        tx.commit().await?;
        Ok((claimed, lapsed))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // RENEW
    // ═══════════════════════════════════════════════════════════════════════

    /// Extend leases the caller currently holds.
    ///
    /// A lease that already lapsed is denied with `Expired` and is never
    /// brought back; the caller has to claim the path again.
    pub async fn renew(
        &self,
        paths: &[impl AsRef<str> + Sync],
        agent_id: &str,
        ttl: Option<Duration>,
    ) -> Result<RenewOutcome> {
        let paths = normalize_paths(paths)?;
        validate_agent_id(agent_id)?;
        let ttl_ms = positive_millis("ttl", ttl.unwrap_or(self.default_ttl))?;

        self.bounded("renew", async {
            self.registry.touch(agent_id).await?;
            let mut outcome = RenewOutcome::default();
            for path in &paths {
                match self.renew_one(path, agent_id, ttl_ms).await? {
                    Renewed::Renewed(lease) => outcome.renewed.push(lease),
                    Renewed::Denied(denied) => outcome.denied.push(denied),
                }
            }
            Ok(outcome)
        })
        .await
    }

    async fn renew_one(&self, path: &str, agent_id: &str, ttl_ms: i64) -> Result<Renewed> {
        let _guard = self.guards.lock(path).await;
        let now = self.db.now_millis();

        let mut tx = self.db.pool().begin().await?;
        let lapsed = expire_path(&mut tx, path, now).await?;
        let current = active_lease(&mut tx, path).await?;

        let renewed = match current {
            Some(row) if row.agent_id == agent_id => {
                sqlx::query("UPDATE file_leases SET expires_at_ms = ?1 WHERE lease_id = ?2")
                    .bind(now + ttl_ms)
                    .bind(row.lease_id)
                    .execute(&mut *tx)
                    .await?;
                Renewed::Renewed(lease_by_id(&mut tx, row.lease_id).await?)
            }
            Some(row) => Renewed::Denied(DeniedRenewal {
                file_path: path.to_string(),
                reason: DenialReason::HeldByOther {
                    holder: row.agent_id,
                    description: row.description,
                },
            }),
            None => {
                let reason = if last_own_lease_expired(&mut tx, path, agent_id).await? {
                    DenialReason::Expired
                } else {
                    DenialReason::NotHeld
                };
                Renewed::Denied(DeniedRenewal {
                    file_path: path.to_string(),
                    reason,
                })
            }
        };
        tx.commit().await?;

        self.note_lapsed(path, &lapsed).await;
        match &renewed {
            Renewed::Renewed(lease) => {
                debug!(path, agent_id, expires_at = %lease.expires_at, "lease renewed");
                self.note(EventKind::LeaseRenewed, agent_id, path, "").await;
            }
            Renewed::Denied(denied) => {
                info!(path, agent_id, reason = ?denied.reason, "renewal denied");
            }
        }
        Ok(renewed)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // RELEASE
    // ═══════════════════════════════════════════════════════════════════════

    /// Release the caller's leases. Paths the caller does not hold are
    /// skipped without error and without any state change.
    pub async fn release(
        &self,
        paths: &[impl AsRef<str> + Sync],
        agent_id: &str,
    ) -> Result<ReleaseOutcome> {
        let paths = normalize_paths(paths)?;
        validate_agent_id(agent_id)?;

        self.bounded("release", async {
            self.registry.touch(agent_id).await?;
            let mut outcome = ReleaseOutcome::default();
            for path in paths {
                match self.release_one(&path, agent_id).await? {
                    Released::Released => outcome.released.push(path),
                    Released::Skipped(reason) => outcome.skipped.push(SkippedRelease {
                        file_path: path,
                        reason,
                    }),
                }
            }
            Ok(outcome)
        })
        .await
    }

    async fn release_one(&self, path: &str, agent_id: &str) -> Result<Released> {
        let _guard = self.guards.lock(path).await;
        let now = self.db.now_millis();

        let mut tx = self.db.pool().begin().await?;
        let lapsed = expire_path(&mut tx, path, now).await?;

        let released: Option<i64> = sqlx::query_scalar(
            "UPDATE file_leases SET status = 'released', released_at_ms = ?1
             WHERE file_path = ?2 AND agent_id = ?3 AND status = 'active'
             RETURNING lease_id",
        )
        .bind(now)
        .bind(path)
        .bind(agent_id)
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = match released {
            Some(_) => Released::Released,
            None if last_own_lease_expired(&mut tx, path, agent_id).await? => {
                Released::Skipped(SkipReason::Expired)
            }
            None => Released::Skipped(SkipReason::NotHeld),
        };
        tx.commit().await?;

        self.note_lapsed(path, &lapsed).await;
        match outcome {
            Released::Released => {
                info!(path, agent_id, "lease released");
                self.note(EventKind::LeaseReleased, agent_id, path, "").await;
                log_failure(
                    "resolve conflicts after release",
                    self.recorder.resolve_after_release(path, agent_id).await,
                );
            }
            Released::Skipped(reason) => {
                debug!(path, agent_id, ?reason, "release skipped");
            }
        }
        Ok(outcome)
    }

    /// Release every live lease held by `agent_id`.
    pub async fn release_all(&self, agent_id: &str) -> Result<ReleaseOutcome> {
        let held: Vec<String> = self
            .locks_for_agent(agent_id)
            .await?
            .into_iter()
            .map(|lease| lease.file_path)
            .collect();

        if held.is_empty() {
            return Ok(ReleaseOutcome::default());
        }
        self.release(&held, agent_id).await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // QUERIES
    // ═══════════════════════════════════════════════════════════════════════

    /// Current holder of each path, judged against the clock. A past-due
    /// lease reads as free whatever its stored status.
    pub async fn status(&self, paths: &[impl AsRef<str> + Sync]) -> Result<Vec<PathStatus>> {
        let paths = normalize_paths(paths)?;

        self.bounded("status", async {
            let now = self.db.now_millis();
            let mut statuses = Vec::with_capacity(paths.len());
            for path in paths {
                let row: Option<LeaseRow> = sqlx::query_as(&format!(
                    "SELECT {LEASE_COLUMNS} FROM file_leases
                     WHERE file_path = ?1 AND status = 'active'"
                ))
                .bind(&path)
                .fetch_optional(self.db.pool())
                .await?;

                let state = match row.filter(|row| row.is_live_at(now)) {
                    Some(row) => PathState::Held {
                        expires_at: from_millis(row.expires_at_ms)?,
                        agent_id: row.agent_id,
                        description: row.description,
                    },
                    None => PathState::Free,
                };
                statuses.push(PathStatus {
                    file_path: path,
                    state,
                });
            }
            Ok(statuses)
        })
        .await
    }

    /// All live leases grouped by holder.
    pub async fn active_work(&self) -> Result<BTreeMap<String, Vec<Lease>>> {
        self.bounded("active_work", async {
            let rows: Vec<LeaseRow> = sqlx::query_as(&format!(
                "SELECT {LEASE_COLUMNS} FROM file_leases
                 WHERE status = 'active' AND expires_at_ms > ?1
                 ORDER BY agent_id, file_path"
            ))
            .bind(self.db.now_millis())
            .fetch_all(self.db.pool())
            .await?;

            let mut grouped: BTreeMap<String, Vec<Lease>> = BTreeMap::new();
            for row in rows {
                let lease = row.into_lease()?;
                grouped.entry(lease.agent_id.clone()).or_default().push(lease);
            }
            Ok(grouped)
        })
        .await
    }

    pub async fn locks_for_agent(&self, agent_id: &str) -> Result<Vec<Lease>> {
        self.bounded("locks_for_agent", async {
            let rows: Vec<LeaseRow> = sqlx::query_as(&format!(
                "SELECT {LEASE_COLUMNS} FROM file_leases
                 WHERE agent_id = ?1 AND status = 'active' AND expires_at_ms > ?2
                 ORDER BY file_path"
            ))
            .bind(agent_id)
            .bind(self.db.now_millis())
            .fetch_all(self.db.pool())
            .await?;

            rows.into_iter().map(LeaseRow::into_lease).collect()
        })
        .await
    }

    /// Write the `expired` transition for every past-due lease. Housekeeping
    /// only: liveness never depends on this having run.
    pub async fn sweep_expired(&self) -> Result<u64> {
        self.bounded("sweep_expired", async {
            let swept: Vec<(String, String)> = sqlx::query_as(
                "UPDATE file_leases SET status = 'expired'
                 WHERE status = 'active' AND expires_at_ms <= ?1
                 RETURNING file_path, agent_id",
            )
            .bind(self.db.now_millis())
            .fetch_all(self.db.pool())
            .await?;

            for (path, agent_id) in &swept {
                self.note(EventKind::LeaseExpired, agent_id, path, "swept")
                    .await;
            }
            if !swept.is_empty() {
                info!(count = swept.len(), "expired leases swept");
            }
            Ok(swept.len() as u64)
        })
        .await
    }

    /// Attach granted leases to the work item they were claimed for.
    pub async fn link_work_item(&self, lease_ids: &[i64], work_item_id: i64) -> Result<()> {
        self.bounded("link_work_item", async {
            for lease_id in lease_ids {
                sqlx::query("UPDATE file_leases SET work_item_id = ?1 WHERE lease_id = ?2")
                    .bind(work_item_id)
                    .bind(lease_id)
                    .execute(self.db.pool())
                    .await?;
            }
            Ok(())
        })
        .await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // EVENTS
    // ═══════════════════════════════════════════════════════════════════════

    async fn note(&self, kind: EventKind, agent_id: &str, path: &str, detail: impl Into<String>) {
        log_failure(
            "append event",
            self.events
                .append(kind, Some(agent_id), Some(path), detail)
                .await,
        );
    }

    async fn note_lapsed(&self, path: &str, lapsed: &[String]) {
        for agent_id in lapsed {
            info!(path, agent_id = %agent_id, "lease expired");
            self.note(EventKind::LeaseExpired, agent_id, path, "").await;
        }
    }
}

/// Derived records (events, conflicts) must not undo a committed lease
/// transition, so their failures are logged rather than returned.
fn log_failure<T, E: Display>(what: &str, result: std::result::Result<T, E>) {
    if let Err(err) = result {
        warn!(error = %err, "failed to {what}");
    }
}

/// Mark a past-due active lease on `path` expired. Returns the former holders.
async fn expire_path(tx: &mut Transaction<'_, Sqlite>, path: &str, now: i64) -> Result<Vec<String>> {
    let lapsed = sqlx::query_scalar::<_, String>(
        "UPDATE file_leases SET status = 'expired'
         WHERE file_path = ?1 AND status = 'active' AND expires_at_ms <= ?2
         RETURNING agent_id",
    )
    .bind(path)
    .bind(now)
    .fetch_all(&mut **tx)
    .await?;
    Ok(lapsed)
}

async fn active_lease(tx: &mut Transaction<'_, Sqlite>, path: &str) -> Result<Option<LeaseRow>> {
    let row = sqlx::query_as(&format!(
        "SELECT {LEASE_COLUMNS} FROM file_leases WHERE file_path = ?1 AND status = 'active'"
    ))
    .bind(path)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(row)
}

async fn lease_by_id(tx: &mut Transaction<'_, Sqlite>, lease_id: i64) -> Result<Lease> {
    let row: LeaseRow = sqlx::query_as(&format!(
        "SELECT {LEASE_COLUMNS} FROM file_leases WHERE lease_id = ?1"
    ))
    .bind(lease_id)
    .fetch_one(&mut **tx)
    .await?;
    row.into_lease()
}

/// Whether the caller's most recent lease on `path` ended by expiry.
async fn last_own_lease_expired(
    tx: &mut Transaction<'_, Sqlite>,
    path: &str,
    agent_id: &str,
) -> Result<bool> {
    let status: Option<String> = sqlx::query_scalar(
        "SELECT status FROM file_leases WHERE file_path = ?1 AND agent_id = ?2
         ORDER BY lease_id DESC LIMIT 1",
    )
    .bind(path)
    .bind(agent_id)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(status.as_deref() == Some("expired"))
}
