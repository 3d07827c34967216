//! Request/response surface over the coordination engine.
//!
//! Every operation takes and returns plain serde values so a tool front end
//! (the CLI, or any transport) can forward them without touching the store.

use std::{collections::BTreeMap, path::Path, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    agents::{AgentRegistry, AgentStatus},
    clock::SystemClock,
    config::Config,
    coordination::{
        ActivityRecorder, ClaimOutcome, CommandSuggester, Conflict, ConflictFilter, Lease,
        LockManager, NewAction, PathStatus, RecordedAction, ReleaseOutcome, RenewOutcome,
        WorkItem, WorkQueue,
    },
    db::CoordinationDb,
    events::EventLog,
    Error, Result,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRequest {
    pub agent_id: String,
    pub files: Vec<String>,
    #[serde(default)]
    pub description: String,
    /// Falls back to the configured default TTL.
    #[serde(default)]
    pub ttl_secs: Option<u64>,
    #[serde(default)]
    pub priority: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimResponse {
    #[serde(flatten)]
    pub outcome: ClaimOutcome,
    /// Work item grouping the granted files, if anything was granted.
    pub work_item: Option<WorkItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenewRequest {
    pub agent_id: String,
    pub files: Vec<String>,
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRequest {
    pub agent_id: String,
    pub files: Vec<String>,
    #[serde(default)]
    pub commit_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseResponse {
    #[serde(flatten)]
    pub outcome: ReleaseOutcome,
    /// Work item completed by this release's commit reference.
    pub completed: Option<WorkItem>,
}

/// Point-in-time summary of the coordination store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoordinationStats {
    pub active_leases: usize,
    pub agents_holding_leases: usize,
    pub active_work_items: usize,
    pub open_conflicts: usize,
    pub active_agents: usize,
    pub known_agents: usize,
}

/// All coordination components wired to one store and one event log.
#[derive(Debug, Clone)]
pub struct CoordinationService {
    config: Config,
    db: CoordinationDb,
    locks: LockManager,
    recorder: ActivityRecorder,
    work: WorkQueue,
    registry: AgentRegistry,
    events: EventLog,
}

impl CoordinationService {
    /// Open the store named by `config.db_path` on the wall clock.
    pub async fn open(config: &Config) -> Result<Self> {
        let db = CoordinationDb::open(Path::new(&config.db_path), Arc::new(SystemClock)).await?;
        Self::from_db(db, config)
    }

    pub fn from_db(db: CoordinationDb, config: &Config) -> Result<Self> {
        let events = EventLog::new(db.clone());
        let mut recorder =
            ActivityRecorder::new(db.clone(), events.clone(), config.overlap_policy());
        if let Some(argv) = &config.suggestions.command {
            let suggester = CommandSuggester::new(argv.clone())?;
            debug!(command = ?argv, "suggestion command configured");
            recorder = recorder.with_suggester(Arc::new(suggester), config.suggestion_timeout());
        }
        let locks = LockManager::from_config(db.clone(), recorder.clone(), events.clone(), config);

        Ok(Self {
            config: config.clone(),
            work: WorkQueue::new(db.clone()),
            registry: AgentRegistry::new(db.clone()),
            db,
            locks,
            recorder,
            events,
        })
    }

    pub const fn config(&self) -> &Config {
        &self.config
    }

    pub const fn db(&self) -> &CoordinationDb {
        &self.db
    }

    pub const fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub const fn recorder(&self) -> &ActivityRecorder {
        &self.recorder
    }

    pub const fn work(&self) -> &WorkQueue {
        &self.work
    }

    pub const fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub const fn events(&self) -> &EventLog {
        &self.events
    }

    /// Claim files and group newly granted ones under a new work item.
    ///
    /// Re-claims of files the caller already holds only extend the lease and
    /// keep the work item it was linked to.
    pub async fn claim(&self, request: ClaimRequest) -> Result<ClaimResponse> {
        let ttl = request.ttl_secs.map(Duration::from_secs);
        let outcome = self
            .locks
            .claim(&request.files, &request.agent_id, &request.description, ttl)
            .await?;

        let fresh: Vec<&Lease> = outcome.newly_granted().collect();
        if fresh.is_empty() {
            return Ok(ClaimResponse {
                outcome,
                work_item: None,
            });
        }

        let files: Vec<String> = fresh.iter().map(|l| l.file_path.clone()).collect();
        let lease_ids: Vec<i64> = fresh.iter().map(|l| l.lease_id).collect();
        let work_item = self
            .work
            .create(&request.agent_id, &request.description, &files, request.priority)
            .await?;
        self.locks
            .link_work_item(&lease_ids, work_item.work_item_id)
            .await?;

        let outcome = ClaimOutcome {
            granted: outcome
                .granted
                .into_iter()
                .map(|lease| {
                    if lease_ids.contains(&lease.lease_id) {
                        Lease {
                            work_item_id: Some(work_item.work_item_id),
                            ..lease
                        }
                    } else {
                        lease
                    }
                })
                .collect(),
            ..outcome
        };
        Ok(ClaimResponse {
            outcome,
            work_item: Some(work_item),
        })
    }

    pub async fn renew(&self, request: RenewRequest) -> Result<RenewOutcome> {
        self.locks
            .renew(
                &request.files,
                &request.agent_id,
                request.ttl_secs.map(Duration::from_secs),
            )
            .await
    }

    /// Release files; a commit reference completes the caller's newest work item.
    pub async fn release(&self, request: ReleaseRequest) -> Result<ReleaseResponse> {
        let outcome = self.locks.release(&request.files, &request.agent_id).await?;

        let completed = match request.commit_ref.as_deref() {
            Some(commit_ref) => match self
                .work
                .complete_latest(&request.agent_id, Some(commit_ref))
                .await
            {
                Ok(item) => Some(item),
                Err(Error::NotFound(_)) => None,
                Err(err) => return Err(err),
            },
            None => None,
        };

        Ok(ReleaseResponse { outcome, completed })
    }

    pub async fn status(&self, files: &[String]) -> Result<Vec<PathStatus>> {
        self.locks.status(files).await
    }

    pub async fn active_work(&self) -> Result<BTreeMap<String, Vec<Lease>>> {
        self.locks.active_work().await
    }

    pub async fn record_action(&self, action: NewAction) -> Result<RecordedAction> {
        self.recorder.record_action(action).await
    }

    pub async fn list_conflicts(&self, filter: &ConflictFilter) -> Result<Vec<Conflict>> {
        self.recorder.list_open_conflicts(filter).await
    }

    pub async fn resolve_conflict(&self, conflict_id: i64, strategy: &str) -> Result<Conflict> {
        self.recorder.resolve_conflict(conflict_id, strategy).await
    }

    /// Ask the suggestion collaborator about an open conflict now.
    pub async fn suggest_resolution(&self, conflict_id: i64) -> Result<Conflict> {
        self.recorder.suggest(conflict_id).await
    }

    pub async fn stats(&self) -> Result<CoordinationStats> {
        let active = self.locks.active_work().await?;
        let agents = self.registry.list(None).await?;
        Ok(CoordinationStats {
            active_leases: active.values().map(Vec::len).sum(),
            agents_holding_leases: active.len(),
            active_work_items: self.work.list_active(None).await?.len(),
            open_conflicts: self
                .recorder
                .list_open_conflicts(&ConflictFilter::default())
                .await?
                .len(),
            active_agents: agents
                .iter()
                .filter(|agent| agent.status == AgentStatus::Active)
                .count(),
            known_agents: agents.len(),
        })
    }
}
