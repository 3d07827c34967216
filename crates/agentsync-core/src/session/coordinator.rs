//! Auto-coordination session loop.
//!
//! Wraps one agent process and derives lease operations from working-tree
//! changes: baseline on the first poll, then claim newly dirty files, renew
//! owned files before their TTL lapses and release files that turned clean.
//! When the process exits the session releases what it acquired, and only
//! that.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    time::Duration,
};

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ChangeDetector, SessionState, WrappedProcess};
use crate::{
    agents::{AgentIdentity, AgentRegistry, AgentStatus},
    clock::{to_millis, Clock},
    config::Config,
    coordination::{DenialReason, LockManager},
    events::{EventKind, EventLog},
    service::CoordinationService,
    Error, Result,
};

/// Timing and budget for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub ttl: Duration,
    /// Always shorter than `ttl`.
    pub renew_interval: Duration,
    pub poll_interval: Duration,
    pub max_consecutive_failures: u32,
    pub agent_stale_after: Duration,
    pub description: String,
}

impl SessionOptions {
    /// Session timing for a lease TTL and poll cadence, falling back to the
    /// configured values.
    ///
    /// The renew interval is kept at or below `ttl - poll_interval`, so a
    /// lease is renewed at least one poll before it could lapse. A poll
    /// interval that is not shorter than the TTL is rejected.
    pub fn from_config(
        config: &Config,
        ttl: Option<Duration>,
        poll_interval: Option<Duration>,
    ) -> Result<Self> {
        let ttl = ttl.unwrap_or_else(|| config.default_ttl());
        let poll_interval = poll_interval.unwrap_or_else(|| config.poll_interval());
        if poll_interval.is_zero() || ttl.is_zero() {
            return Err(Error::InvalidInput(
                "ttl and poll interval must be positive".to_string(),
            ));
        }
        if poll_interval >= ttl {
            return Err(Error::InvalidInput(format!(
                "poll interval ({poll_interval:?}) must be shorter than the lease ttl ({ttl:?})"
            )));
        }

        let renew_interval = Some(config.renew_interval(ttl))
            .filter(|interval| *interval < ttl)
            .unwrap_or(ttl / 2)
            .min(ttl - poll_interval);

        Ok(Self {
            ttl,
            renew_interval,
            poll_interval,
            max_consecutive_failures: config.session.max_consecutive_failures,
            agent_stale_after: config.agent_stale_after(),
            description: String::new(),
        })
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    pub baselined: Vec<String>,
    pub claimed: Vec<String>,
    pub blocked: Vec<String>,
    pub renewed: Vec<String>,
    pub released: Vec<String>,
    /// Owned files now held by another agent.
    pub lost: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionReport {
    pub session_id: String,
    pub agent_id: String,
    pub claimed_ever: Vec<String>,
    pub released_on_drain: Vec<String>,
    pub forced_drain: bool,
    pub interrupted: bool,
    pub exit_code: Option<i32>,
}

pub struct AutoCoordinator {
    session_id: String,
    identity: AgentIdentity,
    locks: LockManager,
    registry: AgentRegistry,
    events: EventLog,
    clock: Arc<dyn Clock>,
    detector: Box<dyn ChangeDetector>,
    options: SessionOptions,
    state: SessionState,
    baseline: BTreeSet<String>,
    /// Session-owned path -> last claim or renewal, in epoch millis.
    owned: BTreeMap<String, i64>,
    claimed_ever: BTreeSet<String>,
    released_on_drain: Vec<String>,
    consecutive_failures: u32,
    forced_drain: bool,
}

impl AutoCoordinator {
    pub fn new(
        service: &CoordinationService,
        identity: AgentIdentity,
        detector: Box<dyn ChangeDetector>,
        options: SessionOptions,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            identity,
            locks: service.locks().clone(),
            registry: service.registry().clone(),
            events: service.events().clone(),
            clock: service.db().clock(),
            detector,
            options,
            state: SessionState::Starting,
            baseline: BTreeSet::new(),
            owned: BTreeMap::new(),
            claimed_ever: BTreeSet::new(),
            released_on_drain: Vec::new(),
            consecutive_failures: 0,
            forced_drain: false,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn agent_id(&self) -> &str {
        &self.identity.agent_id
    }

    pub const fn state(&self) -> SessionState {
        self.state
    }

    pub const fn baseline(&self) -> &BTreeSet<String> {
        &self.baseline
    }

    /// Paths this session currently holds.
    pub fn owned(&self) -> impl Iterator<Item = &str> {
        self.owned.keys().map(String::as_str)
    }

    pub const fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Whether the failure budget is spent and the session must drain.
    pub const fn must_drain(&self) -> bool {
        self.consecutive_failures >= self.options.max_consecutive_failures
    }

    fn transition(&mut self, next: SessionState) -> Result<()> {
        self.state = self.state.transition(next)?;
        debug!(session_id = %self.session_id, state = %self.state, "session state");
        Ok(())
    }

    async fn note(&self, kind: EventKind, detail: impl Into<String>) {
        if let Err(err) = self
            .events
            .append(kind, Some(&self.identity.agent_id), None, detail)
            .await
        {
            warn!(error = %err, "failed to append session event");
        }
    }

    /// Register the agent and move to `baselining`.
    pub async fn start(&mut self) -> Result<()> {
        self.registry
            .register(&self.identity.agent_id, self.identity.client.as_str(), None)
            .await?;
        self.transition(SessionState::Baselining)?;
        info!(
            session_id = %self.session_id,
            agent_id = %self.identity.agent_id,
            label = %self.identity.session_label,
            "session started"
        );
        self.note(EventKind::SessionStarted, self.identity.session_label.clone())
            .await;
        Ok(())
    }

    /// One poll. A failure is counted and returned; the caller decides to
    /// retry on the next tick or drain once [`Self::must_drain`] holds.
    pub async fn tick(&mut self) -> Result<TickSummary> {
        let result = match self.state {
            SessionState::Baselining => self.take_baseline().await,
            SessionState::Active => self.reconcile().await,
            state => Err(Error::InvalidInput(format!("cannot poll a session that is {state}"))),
        };

        match result {
            Ok(summary) => {
                self.consecutive_failures = 0;
                self.heartbeat().await;
                Ok(summary)
            }
            Err(err) => {
                self.consecutive_failures += 1;
                warn!(
                    session_id = %self.session_id,
                    failures = self.consecutive_failures,
                    budget = self.options.max_consecutive_failures,
                    error = %err,
                    "session poll failed"
                );
                Err(err)
            }
        }
    }

    async fn take_baseline(&mut self) -> Result<TickSummary> {
        self.baseline = self.detector.dirty_files().await?;
        self.transition(SessionState::Active)?;
        info!(
            session_id = %self.session_id,
            files = self.baseline.len(),
            "baseline recorded; pre-existing changes will not be claimed"
        );
        self.note(
            EventKind::SessionBaselined,
            format!("{} pre-existing changes", self.baseline.len()),
        )
        .await;

        Ok(TickSummary {
            baselined: self.baseline.iter().cloned().collect(),
            ..TickSummary::default()
        })
    }

    async fn reconcile(&mut self) -> Result<TickSummary> {
        let dirty: BTreeSet<String> = self
            .detector
            .dirty_files()
            .await?
            .difference(&self.baseline)
            .cloned()
            .collect();
        let mut summary = TickSummary::default();

        let clean: Vec<String> = self
            .owned
            .keys()
            .filter(|path| !dirty.contains(*path))
            .cloned()
            .collect();
        if !clean.is_empty() {
            let outcome = self.locks.release(&clean, &self.identity.agent_id).await?;
            for path in &clean {
                self.owned.remove(path);
            }
            summary.released = outcome.released;
        }

        // A path is due when waiting for the next poll would overshoot its
        // renew interval, so a slow cadence renews early rather than late.
        let now = to_millis(self.clock.now());
        let renew_after = i64::try_from(self.options.renew_interval.as_millis()).unwrap_or(i64::MAX);
        let poll = i64::try_from(self.options.poll_interval.as_millis()).unwrap_or(i64::MAX);
        let due: Vec<String> = self
            .owned
            .iter()
            .filter(|(_, last)| now.saturating_sub(**last).saturating_add(poll) >= renew_after)
            .map(|(path, _)| path.clone())
            .collect();
        if !due.is_empty() {
            let outcome = self
                .locks
                .renew(&due, &self.identity.agent_id, Some(self.options.ttl))
                .await?;
            for lease in outcome.renewed {
                self.owned.insert(lease.file_path.clone(), now);
                summary.renewed.push(lease.file_path);
            }
            for denied in outcome.denied {
                self.owned.remove(&denied.file_path);
                match denied.reason {
                    DenialReason::Expired | DenialReason::NotHeld => {
                        info!(path = %denied.file_path, "lease lapsed; claiming again");
                    }
                    DenialReason::HeldByOther { holder, .. } => {
                        warn!(path = %denied.file_path, %holder, "lease lost to another agent");
                        summary.lost.push(denied.file_path);
                    }
                }
            }
        }

        let wanted: Vec<String> = dirty
            .iter()
            .filter(|path| !self.owned.contains_key(*path))
            .cloned()
            .collect();
        if !wanted.is_empty() {
            let description = if self.options.description.is_empty() {
                format!("auto-coordination: {}", self.identity.session_label)
            } else {
                self.options.description.clone()
            };
            let outcome = self
                .locks
                .claim(&wanted, &self.identity.agent_id, &description, Some(self.options.ttl))
                .await?;
            for lease in outcome.granted {
                self.owned.insert(lease.file_path.clone(), now);
                self.claimed_ever.insert(lease.file_path.clone());
                summary.claimed.push(lease.file_path);
            }
            for blocked in outcome.blocked {
                info!(
                    path = %blocked.file_path,
                    holder = %blocked.holder,
                    "claim blocked; retrying next tick"
                );
                summary.blocked.push(blocked.file_path);
            }
            for failed in outcome.failed {
                warn!(
                    path = %failed.file_path,
                    error = %failed.error,
                    "claim failed; retrying next tick"
                );
            }
        }

        Ok(summary)
    }

    async fn heartbeat(&self) {
        if let Err(err) = self.registry.touch(&self.identity.agent_id).await {
            warn!(error = %err, "session heartbeat failed");
        }
        match self.registry.mark_stale_idle(self.options.agent_stale_after).await {
            Ok(0) => {}
            Ok(count) => debug!(count, "marked stale agents idle"),
            Err(err) => warn!(error = %err, "failed to mark stale agents idle"),
        }
    }

    /// Release every lease this session acquired, then close.
    ///
    /// Release failures are logged, not returned: the TTL reclaims anything
    /// left behind.
    pub async fn drain(&mut self, forced: bool) -> Result<()> {
        if matches!(self.state, SessionState::Draining | SessionState::Closed) {
            return Ok(());
        }
        self.transition(SessionState::Draining)?;
        self.forced_drain = forced;
        self.note(
            EventKind::SessionDraining,
            if forced { "failure budget spent" } else { "process exited" },
        )
        .await;

        let owned: Vec<String> = self.owned.keys().cloned().collect();
        if !owned.is_empty() {
            match self.locks.release(&owned, &self.identity.agent_id).await {
                Ok(outcome) => self.released_on_drain = outcome.released,
                Err(err) => warn!(error = %err, "drain release failed; leases will expire"),
            }
        }
        self.owned.clear();

        if let Err(err) = self
            .registry
            .set_status(&self.identity.agent_id, AgentStatus::Gone)
            .await
        {
            warn!(error = %err, "failed to mark session agent gone");
        }

        self.transition(SessionState::Closed)?;
        info!(
            session_id = %self.session_id,
            released = self.released_on_drain.len(),
            forced,
            "session closed"
        );
        self.note(EventKind::SessionClosed, "").await;
        Ok(())
    }

    /// Drive the session until the wrapped process exits.
    ///
    /// Ctrl-C terminates the process and drains. When the failure budget is
    /// spent the session drains early and the process keeps running
    /// uncoordinated until it exits.
    pub async fn run(mut self, process: &mut dyn WrappedProcess) -> Result<SessionReport> {
        self.start().await?;
        let mut exit_code = None;
        let mut exited = false;
        let mut interrupted = false;

        loop {
            tokio::select! {
                status = process.wait() => {
                    exit_code = status?;
                    exited = true;
                    break;
                }
                () = tokio::time::sleep(self.options.poll_interval) => {
                    if self.tick().await.is_err() && self.must_drain() {
                        warn!(session_id = %self.session_id, "failure budget spent; draining");
                        break;
                    }
                }
                signal = tokio::signal::ctrl_c() => {
                    signal?;
                    info!(session_id = %self.session_id, "interrupted; stopping wrapped process");
                    interrupted = true;
                    process.terminate().await?;
                    exit_code = process.wait().await?;
                    exited = true;
                    break;
                }
            }
        }

        let forced = !exited;
        self.drain(forced).await?;

        if !exited {
            exit_code = process.wait().await?;
        }

        Ok(SessionReport {
            session_id: self.session_id,
            agent_id: self.identity.agent_id,
            claimed_ever: self.claimed_ever.into_iter().collect(),
            released_on_drain: self.released_on_drain,
            forced_drain: self.forced_drain,
            interrupted,
            exit_code,
        })
    }
}
