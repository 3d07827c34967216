//! Conflict entities and the severity policy for semantic overlap.
//!
//! Scoring is relative, not absolute: closer in time is never less severe
//! than further apart, and wider overlap is never less severe than narrower.

use std::{fmt, str::FromStr, time::Duration};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

use crate::{clock::from_millis, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// A claim was blocked by another agent's live lease.
    LockContention,
    /// Two agents recorded actions on the same file within the window.
    SemanticOverlap,
}

impl ConflictKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::LockContention => "lock_contention",
            Self::SemanticOverlap => "semantic_overlap",
        }
    }
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.replace('-', "_").as_str() {
            "lock_contention" => Ok(Self::LockContention),
            "semantic_overlap" => Ok(Self::SemanticOverlap),
            _ => Err(Error::InvalidInput(format!("Invalid conflict kind: {s}"))),
        }
    }
}

impl TryFrom<String> for ConflictKind {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::from_str(&s)
    }
}

/// Ordered: `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    const fn bumped(self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium | Self::High => Self::High,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(Error::InvalidInput(format!("Invalid severity: {s}"))),
        }
    }
}

impl TryFrom<String> for Severity {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::from_str(&s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    Open,
    Resolved,
}

impl ConflictStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Resolved => "resolved",
        }
    }
}

impl FromStr for ConflictStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "open" => Ok(Self::Open),
            "resolved" => Ok(Self::Resolved),
            _ => Err(Error::TransientIo(format!("Invalid stored conflict status: {s}"))),
        }
    }
}

impl TryFrom<String> for ConflictStatus {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::from_str(&s)
    }
}

/// Advisory output of the suggestion collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize)]
pub struct Suggestion {
    pub strategy: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conflict {
    pub conflict_id: i64,
    pub file_path: String,
    /// The pair is stored in lexicographic order.
    pub agents: (String, String),
    pub kind: ConflictKind,
    pub severity: Severity,
    pub description: String,
    pub detected_at: DateTime<Utc>,
    pub status: ConflictStatus,
    pub resolution_strategy: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub suggestion: Option<Suggestion>,
}

impl Conflict {
    pub fn involves(&self, agent_id: &str) -> bool {
        self.agents.0 == agent_id || self.agents.1 == agent_id
    }
}

pub(crate) const CONFLICT_COLUMNS: &str = "conflict_id, file_path, agent_a, agent_b, kind, \
     severity, description, detected_at_ms, status, resolution_strategy, resolved_at_ms, \
     suggested_strategy, suggestion_confidence";

#[derive(Debug, FromRow)]
pub(crate) struct ConflictRow {
    conflict_id: i64,
    file_path: String,
    agent_a: String,
    agent_b: String,
    #[sqlx(try_from = "String")]
    kind: ConflictKind,
    #[sqlx(try_from = "String")]
    severity: Severity,
    description: String,
    detected_at_ms: i64,
    #[sqlx(try_from = "String")]
    status: ConflictStatus,
    resolution_strategy: Option<String>,
    resolved_at_ms: Option<i64>,
    suggested_strategy: Option<String>,
    suggestion_confidence: Option<f64>,
}

impl ConflictRow {
    pub fn into_conflict(self) -> Result<Conflict> {
        let suggestion = self
            .suggested_strategy
            .map(|strategy| Suggestion {
                strategy,
                confidence: self.suggestion_confidence.unwrap_or(0.0),
            });

        Ok(Conflict {
            conflict_id: self.conflict_id,
            file_path: self.file_path,
            agents: (self.agent_a, self.agent_b),
            kind: self.kind,
            severity: self.severity,
            description: self.description,
            detected_at: from_millis(self.detected_at_ms)?,
            status: self.status,
            resolution_strategy: self.resolution_strategy,
            resolved_at: self.resolved_at_ms.map(from_millis).transpose()?,
            suggestion,
        })
    }
}

/// Orders an agent pair so `(a, b)` and `(b, a)` share one open conflict.
pub(crate) fn ordered_pair<'a>(first: &'a str, second: &'a str) -> (&'a str, &'a str) {
    if first <= second {
        (first, second)
    } else {
        (second, first)
    }
}

/// Filter for listing open conflicts. Empty matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConflictFilter {
    pub file_path: Option<String>,
    pub agent_id: Option<String>,
    pub kind: Option<ConflictKind>,
}

/// Severity thresholds for semantic overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlapPolicy {
    pub window: Duration,
    pub high_within: Duration,
    pub medium_within: Duration,
    pub breadth_bump: usize,
}

impl Default for OverlapPolicy {
    fn default() -> Self {
        crate::Config::default().overlap_policy()
    }
}

impl OverlapPolicy {
    /// Score an overlap from how long ago the other action happened and how
    /// many files the two actions share.
    pub fn score(&self, age: Duration, shared_files: usize) -> Severity {
        let base = if age <= self.high_within {
            Severity::High
        } else if age <= self.medium_within {
            Severity::Medium
        } else {
            Severity::Low
        };

        if shared_files >= self.breadth_bump {
            base.bumped()
        } else {
            base
        }
    }

    pub fn within_window(&self, age: Duration) -> bool {
        age <= self.window
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn same_file_same_minute_is_high() {
        let policy = OverlapPolicy::default();
        assert_eq!(policy.score(Duration::from_secs(10), 1), Severity::High);
    }

    #[test]
    fn same_file_hours_apart_is_low() {
        let policy = OverlapPolicy::default();
        assert_eq!(policy.score(Duration::from_secs(3 * 3600), 1), Severity::Low);
    }

    #[test]
    fn broad_overlap_bumps_one_level() {
        let policy = OverlapPolicy::default();
        assert_eq!(policy.score(Duration::from_secs(3 * 3600), 3), Severity::Medium);
        assert_eq!(policy.score(Duration::from_secs(600), 5), Severity::High);
    }

    #[test]
    fn pair_order_is_canonical() {
        assert_eq!(ordered_pair("b", "a"), ("a", "b"));
        assert_eq!(ordered_pair("a", "b"), ("a", "b"));
    }

    #[test]
    fn kinds_parse_with_either_separator() {
        assert_eq!(
            "lock-contention".parse::<ConflictKind>().ok(),
            Some(ConflictKind::LockContention)
        );
        assert_eq!(
            "semantic_overlap".parse::<ConflictKind>().ok(),
            Some(ConflictKind::SemanticOverlap)
        );
    }

    proptest! {
        #[test]
        fn closer_in_time_is_never_less_severe(a in 0u64..200_000, b in 0u64..200_000, n in 1usize..6) {
            let policy = OverlapPolicy::default();
            let (near, far) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(
                policy.score(Duration::from_secs(near), n) >= policy.score(Duration::from_secs(far), n)
            );
        }

        #[test]
        fn wider_overlap_is_never_less_severe(age in 0u64..200_000, n in 1usize..10, extra in 0usize..10) {
            let policy = OverlapPolicy::default();
            let age = Duration::from_secs(age);
            prop_assert!(policy.score(age, n + extra) >= policy.score(age, n));
        }
    }
}
