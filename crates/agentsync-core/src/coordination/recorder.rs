//! Activity log and conflict derivation.
//!
//! The recorder is the only writer of `conflicts`. Conflicts come from two
//! places: overlapping actions of different agents within the configured
//! window (`semantic_overlap`), and claims blocked by the lock manager
//! (`lock_contention`). At most one conflict per (file, agent pair, kind) is
//! open at a time.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite};
use tracing::{debug, info, warn};

use super::{
    conflict::{ordered_pair, ConflictRow, CONFLICT_COLUMNS},
    normalize_paths,
    suggest::SuggestionProvider,
    Conflict, ConflictFilter, ConflictKind, ConflictStatus, OverlapPolicy, Severity, Suggestion,
};
use crate::{
    agents::AgentRegistry,
    clock::{from_millis, positive_millis},
    db::CoordinationDb,
    events::{EventKind, EventLog},
    Error, Result,
};

/// Strategy recorded when a conflict closes because its leases were released.
pub const RELEASED_STRATEGY: &str = "released";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Edit,
    Create,
    Delete,
    Rename,
}

impl ActionKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Edit => "edit",
            Self::Create => "create",
            Self::Delete => "delete",
            Self::Rename => "rename",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "edit" | "modify" => Ok(Self::Edit),
            "create" => Ok(Self::Create),
            "delete" => Ok(Self::Delete),
            "rename" => Ok(Self::Rename),
            _ => Err(Error::InvalidInput(format!(
                "Invalid action kind '{s}' (expected edit, create, delete or rename)"
            ))),
        }
    }
}

/// Immutable log entry: an agent touched files with a stated intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionRecord {
    pub action_id: i64,
    pub agent_id: String,
    pub kind: ActionKind,
    pub files: Vec<String>,
    pub intent: String,
    pub work_item_id: Option<i64>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewAction {
    pub agent_id: String,
    pub kind: ActionKind,
    pub files: Vec<String>,
    #[serde(default)]
    pub intent: String,
    #[serde(default)]
    pub work_item_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordedAction {
    pub action: ActionRecord,
    /// Conflicts this action opened. Already-open conflicts are not repeated.
    pub opened: Vec<Conflict>,
}

struct OpenConflict<'a> {
    file_path: &'a str,
    agents: (&'a str, &'a str),
    kind: ConflictKind,
    severity: Severity,
    description: String,
    first_action_id: Option<i64>,
    second_action_id: Option<i64>,
}

#[derive(sqlx::FromRow)]
struct OverlapHit {
    action_id: i64,
    agent_id: String,
    intent: String,
    recorded_at_ms: i64,
    file_path: String,
}

#[derive(Debug, Clone)]
pub struct ActivityRecorder {
    db: CoordinationDb,
    registry: AgentRegistry,
    events: EventLog,
    policy: OverlapPolicy,
    suggester: Option<Arc<dyn SuggestionProvider>>,
    suggestion_timeout: Duration,
}

impl ActivityRecorder {
    pub fn new(db: CoordinationDb, events: EventLog, policy: OverlapPolicy) -> Self {
        Self {
            registry: AgentRegistry::new(db.clone()),
            db,
            events,
            policy,
            suggester: None,
            suggestion_timeout: Duration::from_secs(2),
        }
    }

    /// Attach the optional suggestion collaborator.
    pub fn with_suggester(mut self, provider: Arc<dyn SuggestionProvider>, timeout: Duration) -> Self {
        self.suggester = Some(provider);
        self.suggestion_timeout = timeout;
        self
    }

    pub const fn policy(&self) -> &OverlapPolicy {
        &self.policy
    }

    /// Append an action, then open overlap conflicts against other agents'
    /// recent actions on the same files.
    pub async fn record_action(&self, action: NewAction) -> Result<RecordedAction> {
        let files = normalize_paths(&action.files)?;
        if files.is_empty() {
            return Err(Error::InvalidInput(
                "an action must touch at least one file".to_string(),
            ));
        }
        self.registry.touch(&action.agent_id).await?;

        let now_ms = self.db.now_millis();
        let mut tx = self.db.pool().begin().await?;

        let action_id = sqlx::query(
            "INSERT INTO agent_actions (agent_id, action_kind, intent, work_item_id, recorded_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&action.agent_id)
        .bind(action.kind.as_str())
        .bind(&action.intent)
        .bind(action.work_item_id)
        .bind(now_ms)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        for file in &files {
            sqlx::query("INSERT INTO action_files (action_id, file_path) VALUES (?1, ?2)")
                .bind(action_id)
                .bind(file)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        let record = ActionRecord {
            action_id,
            agent_id: action.agent_id,
            kind: action.kind,
            files,
            intent: action.intent,
            work_item_id: action.work_item_id,
            recorded_at: from_millis(now_ms)?,
        };
        debug!(action_id, agent_id = %record.agent_id, files = record.files.len(), "action recorded");

        let opened = self.derive_overlaps(&record, now_ms).await?;
        Ok(RecordedAction {
            action: record,
            opened,
        })
    }

    async fn derive_overlaps(&self, record: &ActionRecord, now_ms: i64) -> Result<Vec<Conflict>> {
        let since = now_ms - positive_millis("overlap window", self.policy.window)?;

        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT a.action_id, a.agent_id, a.intent, a.recorded_at_ms, f.file_path
             FROM agent_actions a JOIN action_files f ON f.action_id = a.action_id
             WHERE a.agent_id <> ",
        );
        query.push_bind(&record.agent_id);
        query.push(" AND a.recorded_at_ms >= ");
        query.push_bind(since);
        query.push(" AND f.file_path IN (");
        let mut paths = query.separated(", ");
        for file in &record.files {
            paths.push_bind(file);
        }
        paths.push_unseparated(")");
        query.push(" ORDER BY a.recorded_at_ms DESC, a.action_id DESC");

        let hits: Vec<OverlapHit> = query.build_query_as().fetch_all(self.db.pool()).await?;

        // Newest hit per (other agent, file); rows arrive newest first.
        let mut by_agent: BTreeMap<&str, BTreeMap<&str, &OverlapHit>> = BTreeMap::new();
        for hit in &hits {
            by_agent
                .entry(hit.agent_id.as_str())
                .or_default()
                .entry(hit.file_path.as_str())
                .or_insert(hit);
        }

        let mut opened = Vec::new();
        for (other, files) in by_agent {
            let breadth = files.len();
            for (file, hit) in files {
                let age_ms = u64::try_from(now_ms - hit.recorded_at_ms).unwrap_or(0);
                let severity = self.policy.score(Duration::from_millis(age_ms), breadth);
                let description = format!(
                    "{other} and {} both touched {file}: \"{}\" vs \"{}\"",
                    record.agent_id, hit.intent, record.intent
                );

                let conflict = self
                    .open_conflict(OpenConflict {
                        file_path: file,
                        agents: ordered_pair(other, &record.agent_id),
                        kind: ConflictKind::SemanticOverlap,
                        severity,
                        description,
                        first_action_id: Some(hit.action_id),
                        second_action_id: Some(record.action_id),
                    })
                    .await?;

                if let Some(conflict) = conflict {
                    let actions = [self.load_action(hit.action_id).await?, record.clone()];
                    opened.push(self.enrich(conflict, &actions).await?);
                }
            }
        }
        Ok(opened)
    }

    /// Called by the lock manager when `requester` is blocked by `holder`.
    pub async fn record_contention(
        &self,
        file_path: &str,
        holder: &str,
        holder_description: &str,
        requester: &str,
    ) -> Result<Option<Conflict>> {
        let description = if holder_description.is_empty() {
            format!("{requester} was blocked on {file_path}, held by {holder}")
        } else {
            format!("{requester} was blocked on {file_path}, held by {holder}: {holder_description}")
        };

        self.open_conflict(OpenConflict {
            file_path,
            agents: ordered_pair(holder, requester),
            kind: ConflictKind::LockContention,
            severity: Severity::High,
            description,
            first_action_id: None,
            second_action_id: None,
        })
        .await
    }

    /// Insert unless the same (file, pair, kind) is already open.
    async fn open_conflict(&self, new: OpenConflict<'_>) -> Result<Option<Conflict>> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO conflicts
                (file_path, agent_a, agent_b, kind, severity, description, detected_at_ms,
                 status, first_action_id, second_action_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'open', ?8, ?9)",
        )
        .bind(new.file_path)
        .bind(new.agents.0)
        .bind(new.agents.1)
        .bind(new.kind.as_str())
        .bind(new.severity.as_str())
        .bind(&new.description)
        .bind(self.db.now_millis())
        .bind(new.first_action_id)
        .bind(new.second_action_id)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            debug!(file_path = new.file_path, kind = %new.kind, "conflict already open");
            return Ok(None);
        }

        let conflict = self.get_conflict(result.last_insert_rowid()).await?;
        info!(
            conflict_id = conflict.conflict_id,
            file_path = %conflict.file_path,
            kind = %conflict.kind,
            severity = %conflict.severity,
            "conflict opened"
        );
        self.events
            .append(
                EventKind::ConflictOpened,
                None,
                Some(&conflict.file_path),
                format!("#{} {} {}", conflict.conflict_id, conflict.kind, conflict.severity),
            )
            .await?;
        Ok(Some(conflict))
    }

    /// Ask the collaborator for an advisory strategy. Never fails the caller
    /// on collaborator trouble.
    async fn enrich(&self, mut conflict: Conflict, actions: &[ActionRecord]) -> Result<Conflict> {
        let Some(provider) = &self.suggester else {
            return Ok(conflict);
        };

        match self.ask(provider.as_ref(), &conflict, actions).await {
            Ok(suggestion) => {
                self.store_suggestion(conflict.conflict_id, &suggestion)
                    .await?;
                conflict.suggestion = Some(suggestion);
            }
            Err(err) => {
                warn!(conflict_id = conflict.conflict_id, error = %err, "suggestion unavailable");
            }
        }
        Ok(conflict)
    }

    /// Request a suggestion for an open conflict now, storing it on success.
    ///
    /// Unlike the inline request made when a conflict opens, collaborator
    /// failures are returned as `CollaboratorUnavailable`.
    pub async fn suggest(&self, conflict_id: i64) -> Result<Conflict> {
        let mut conflict = self.get_conflict(conflict_id).await?;
        if conflict.status != ConflictStatus::Open {
            return Err(Error::InvalidInput(format!(
                "conflict #{conflict_id} is already resolved"
            )));
        }
        let Some(provider) = &self.suggester else {
            return Err(Error::CollaboratorUnavailable(
                "no suggestion provider is configured".to_string(),
            ));
        };

        let actions = self.conflict_actions(&conflict).await?;
        let suggestion = self.ask(provider.as_ref(), &conflict, &actions).await?;
        self.store_suggestion(conflict_id, &suggestion).await?;
        info!(conflict_id, strategy = %suggestion.strategy, "suggestion stored");
        conflict.suggestion = Some(suggestion);
        Ok(conflict)
    }

    async fn ask(
        &self,
        provider: &dyn SuggestionProvider,
        conflict: &Conflict,
        actions: &[ActionRecord],
    ) -> Result<Suggestion> {
        tokio::time::timeout(self.suggestion_timeout, provider.suggest(conflict, actions))
            .await
            .unwrap_or_else(|_| {
                Err(Error::CollaboratorUnavailable(format!(
                    "no suggestion within {:?}",
                    self.suggestion_timeout
                )))
            })
    }

    async fn store_suggestion(&self, conflict_id: i64, suggestion: &Suggestion) -> Result<()> {
        sqlx::query(
            "UPDATE conflicts SET suggested_strategy = ?1, suggestion_confidence = ?2
             WHERE conflict_id = ?3",
        )
        .bind(&suggestion.strategy)
        .bind(suggestion.confidence)
        .bind(conflict_id)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// The actions behind a conflict, oldest first. Overlaps carry their
    /// pair; contention falls back to each agent's latest action on the file.
    async fn conflict_actions(&self, conflict: &Conflict) -> Result<Vec<ActionRecord>> {
        let (first, second): (Option<i64>, Option<i64>) = sqlx::query_as(
            "SELECT first_action_id, second_action_id FROM conflicts WHERE conflict_id = ?1",
        )
        .bind(conflict.conflict_id)
        .fetch_one(self.db.pool())
        .await?;

        let mut ids: Vec<i64> = first.into_iter().chain(second).collect();
        if ids.is_empty() {
            for agent_id in [&conflict.agents.0, &conflict.agents.1] {
                let latest: Option<i64> = sqlx::query_scalar(
                    "SELECT a.action_id FROM agent_actions a
                     JOIN action_files f ON f.action_id = a.action_id
                     WHERE f.file_path = ?1 AND a.agent_id = ?2
                     ORDER BY a.recorded_at_ms DESC, a.action_id DESC LIMIT 1",
                )
                .bind(&conflict.file_path)
                .bind(agent_id)
                .fetch_optional(self.db.pool())
                .await?;
                ids.extend(latest);
            }
        }

        let mut actions = Vec::with_capacity(ids.len());
        for id in ids {
            actions.push(self.load_action(id).await?);
        }
        actions.sort_by_key(|action| (action.recorded_at, action.action_id));
        Ok(actions)
    }

    /// Open conflicts matching the filter, newest first.
    pub async fn list_open_conflicts(&self, filter: &ConflictFilter) -> Result<Vec<Conflict>> {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {CONFLICT_COLUMNS} FROM conflicts WHERE status = 'open'"
        ));
        if let Some(path) = &filter.file_path {
            query.push(" AND file_path = ").push_bind(path);
        }
        if let Some(agent) = &filter.agent_id {
            query.push(" AND (agent_a = ").push_bind(agent);
            query.push(" OR agent_b = ").push_bind(agent).push(")");
        }
        if let Some(kind) = filter.kind {
            query.push(" AND kind = ").push_bind(kind.as_str());
        }
        query.push(" ORDER BY detected_at_ms DESC, conflict_id DESC");

        let rows: Vec<ConflictRow> = query.build_query_as().fetch_all(self.db.pool()).await?;
        rows.into_iter().map(ConflictRow::into_conflict).collect()
    }

    pub async fn get_conflict(&self, conflict_id: i64) -> Result<Conflict> {
        let row: Option<ConflictRow> = sqlx::query_as(&format!(
            "SELECT {CONFLICT_COLUMNS} FROM conflicts WHERE conflict_id = ?1"
        ))
        .bind(conflict_id)
        .fetch_optional(self.db.pool())
        .await?;

        row.ok_or_else(|| Error::NotFound(format!("conflict #{conflict_id}")))
            .and_then(ConflictRow::into_conflict)
    }

    /// Mark resolved. Resolving an already-resolved conflict returns it unchanged.
    pub async fn resolve_conflict(&self, conflict_id: i64, strategy: &str) -> Result<Conflict> {
        if strategy.trim().is_empty() {
            return Err(Error::InvalidInput(
                "resolution strategy cannot be empty".to_string(),
            ));
        }

        let result = sqlx::query(
            "UPDATE conflicts SET status = 'resolved', resolution_strategy = ?1, resolved_at_ms = ?2
             WHERE conflict_id = ?3 AND status = 'open'",
        )
        .bind(strategy)
        .bind(self.db.now_millis())
        .bind(conflict_id)
        .execute(self.db.pool())
        .await?;

        let conflict = self.get_conflict(conflict_id).await?;
        if result.rows_affected() > 0 {
            info!(conflict_id, strategy, "conflict resolved");
            self.events
                .append(
                    EventKind::ConflictResolved,
                    None,
                    Some(&conflict.file_path),
                    format!("#{conflict_id} {strategy}"),
                )
                .await?;
        }
        Ok(conflict)
    }

    /// After `agent_id` released `file_path`, resolve its open conflicts on
    /// that path once neither agent of the pair holds a live lease there.
    pub async fn resolve_after_release(&self, file_path: &str, agent_id: &str) -> Result<Vec<i64>> {
        let holders: BTreeSet<String> = sqlx::query_scalar::<_, String>(
            "SELECT agent_id FROM file_leases
             WHERE file_path = ?1 AND status = 'active' AND expires_at_ms > ?2",
        )
        .bind(file_path)
        .bind(self.db.now_millis())
        .fetch_all(self.db.pool())
        .await?
        .into_iter()
        .collect();

        let filter = ConflictFilter {
            file_path: Some(file_path.to_string()),
            agent_id: Some(agent_id.to_string()),
            kind: None,
        };

        let mut resolved = Vec::new();
        for conflict in self.list_open_conflicts(&filter).await? {
            let (a, b) = &conflict.agents;
            if holders.contains(a) || holders.contains(b) {
                continue;
            }
            self.resolve_conflict(conflict.conflict_id, RELEASED_STRATEGY)
                .await?;
            resolved.push(conflict.conflict_id);
        }
        Ok(resolved)
    }

    pub async fn load_action(&self, action_id: i64) -> Result<ActionRecord> {
        let row: Option<(String, String, String, Option<i64>, i64)> = sqlx::query_as(
            "SELECT agent_id, action_kind, intent, work_item_id, recorded_at_ms
             FROM agent_actions WHERE action_id = ?1",
        )
        .bind(action_id)
        .fetch_optional(self.db.pool())
        .await?;

        let (agent_id, kind, intent, work_item_id, recorded_at_ms) =
            row.ok_or_else(|| Error::NotFound(format!("action #{action_id}")))?;

        let files: Vec<String> = sqlx::query_scalar(
            "SELECT file_path FROM action_files WHERE action_id = ?1 ORDER BY file_path",
        )
        .bind(action_id)
        .fetch_all(self.db.pool())
        .await?;

        Ok(ActionRecord {
            action_id,
            agent_id,
            kind: kind
                .parse()
                .map_err(|_| Error::TransientIo(format!("Invalid stored action kind: {kind}")))?,
            files,
            intent,
            work_item_id,
            recorded_at: from_millis(recorded_at_ms)?,
        })
    }
}
