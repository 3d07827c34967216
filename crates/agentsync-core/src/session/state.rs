//! Session lifecycle state machine.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::Error;

/// Lifecycle of one auto-coordination session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Session id assigned, wrapped process launched.
    Starting,
    /// First poll: pre-existing changes are recorded, never claimed.
    Baselining,
    /// Claiming, renewing and releasing on each tick.
    Active,
    /// Releasing the leases this session acquired.
    Draining,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid session transition: {from} -> {to}")]
pub struct TransitionError {
    pub from: SessionState,
    pub to: SessionState,
}

impl From<TransitionError> for Error {
    fn from(err: TransitionError) -> Self {
        Self::InvalidInput(err.to_string())
    }
}

impl SessionState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Baselining => "baselining",
            Self::Active => "active",
            Self::Draining => "draining",
            Self::Closed => "closed",
        }
    }

    /// A process can exit at any point, so every live state may drain.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Starting, Self::Baselining | Self::Draining)
                | (Self::Baselining, Self::Active | Self::Draining)
                | (Self::Active, Self::Draining)
                | (Self::Draining, Self::Closed)
        )
    }

    pub fn valid_next_states(self) -> Vec<Self> {
        match self {
            Self::Starting => vec![Self::Baselining, Self::Draining],
            Self::Baselining => vec![Self::Active, Self::Draining],
            Self::Active => vec![Self::Draining],
            Self::Draining => vec![Self::Closed],
            Self::Closed => vec![],
        }
    }

    pub fn transition(self, next: Self) -> Result<Self, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError {
                from: self,
                to: next,
            })
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [SessionState; 5] = [
        SessionState::Starting,
        SessionState::Baselining,
        SessionState::Active,
        SessionState::Draining,
        SessionState::Closed,
    ];

    #[test]
    fn happy_path_is_linear() {
        let path = [
            SessionState::Starting,
            SessionState::Baselining,
            SessionState::Active,
            SessionState::Draining,
            SessionState::Closed,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn closed_is_terminal() {
        assert!(SessionState::Closed.is_terminal());
        assert!(SessionState::Closed.valid_next_states().is_empty());
        for next in ALL {
            assert!(SessionState::Closed.transition(next).is_err());
        }
    }

    #[test]
    fn valid_next_states_agree_with_can_transition_to() {
        for from in ALL {
            for to in ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    from.valid_next_states().contains(&to),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn no_going_back_to_baselining() {
        let err = SessionState::Active.transition(SessionState::Baselining);
        assert_eq!(
            err,
            Err(TransitionError {
                from: SessionState::Active,
                to: SessionState::Baselining
            })
        );
    }
}
