//! Configuration for the coordination engine.
//!
//! Loaded from defaults → global → project → env vars → CLI flags. Later
//! layers override earlier ones key by key.

mod load;
mod validate;

use std::time::Duration;

pub use load::{global_config_path, load_config, load_config_from, load_toml_file, project_config_path};
use serde::{Deserialize, Serialize};

use crate::coordination::OverlapPolicy;

/// Default lease TTL in seconds (30 minutes).
pub const DEFAULT_TTL_SECS: u64 = 1800;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub db_path: String,
    pub log_level: String,
    pub locks: LocksConfig,
    pub overlap: OverlapConfig,
    pub session: SessionConfig,
    pub suggestions: SuggestionsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LocksConfig {
    pub default_ttl_secs: u64,
    /// Upper bound on any single lock manager call.
    pub operation_timeout_ms: u64,
}

/// Thresholds for semantic-overlap severity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OverlapConfig {
    /// How far back other agents' actions are compared.
    pub window_secs: u64,
    pub high_within_secs: u64,
    pub medium_within_secs: u64,
    /// Shared-file count at which severity is bumped one level.
    pub breadth_bump: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    pub poll_interval_ms: u64,
    /// Derived from the TTL when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub renew_interval_secs: Option<u64>,
    pub max_consecutive_failures: u32,
    pub agent_stale_after_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SuggestionsConfig {
    /// External command that answers suggestion requests on stdin/stdout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    pub timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: ".agentsync/state.db".to_string(),
            log_level: "info".to_string(),
            locks: LocksConfig::default(),
            overlap: OverlapConfig::default(),
            session: SessionConfig::default(),
            suggestions: SuggestionsConfig::default(),
        }
    }
}

impl Default for LocksConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: DEFAULT_TTL_SECS,
            operation_timeout_ms: 5_000,
        }
    }
}

impl Default for OverlapConfig {
    fn default() -> Self {
        Self {
            window_secs: 24 * 60 * 60,
            high_within_secs: 60,
            medium_within_secs: 60 * 60,
            breadth_bump: 3,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            renew_interval_secs: None,
            max_consecutive_failures: 5,
            agent_stale_after_secs: 90,
        }
    }
}

impl Default for SuggestionsConfig {
    fn default() -> Self {
        Self {
            command: None,
            timeout_ms: 2_000,
        }
    }
}

impl Config {
    pub const fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.locks.default_ttl_secs)
    }

    pub const fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.locks.operation_timeout_ms)
    }

    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.session.poll_interval_ms)
    }

    /// Renew cadence for session-owned leases of the given TTL.
    ///
    /// Unless configured explicitly this is half the TTL clamped to 3..=60
    /// seconds, and always strictly less than the TTL.
    pub fn renew_interval(&self, ttl: Duration) -> Duration {
        if let Some(secs) = self.session.renew_interval_secs {
            return Duration::from_secs(secs);
        }
        let half = ttl / 2;
        let clamped = half.clamp(Duration::from_secs(3), Duration::from_secs(60));
        if clamped < ttl {
            clamped
        } else {
            half
        }
    }

    pub const fn agent_stale_after(&self) -> Duration {
        Duration::from_secs(self.session.agent_stale_after_secs)
    }

    pub const fn suggestion_timeout(&self) -> Duration {
        Duration::from_millis(self.suggestions.timeout_ms)
    }

    pub const fn overlap_policy(&self) -> OverlapPolicy {
        OverlapPolicy {
            window: Duration::from_secs(self.overlap.window_secs),
            high_within: Duration::from_secs(self.overlap.high_within_secs),
            medium_within: Duration::from_secs(self.overlap.medium_within_secs),
            breadth_bump: self.overlap.breadth_bump,
        }
    }
}
