//! Error taxonomy for the coordination engine.
//!
//! Every failure the lock manager, recorder or session loop can raise is one of
//! these kinds, so callers can branch on it:
//!
//! - **User errors**: `InvalidInput`, `InvalidConfig` (exit code 1)
//! - **System errors**: `TransientIo`, `CollaboratorUnavailable` (exit code 2)
//! - **Lookup errors**: `NotFound` (exit code 3)
//! - **Lease errors**: `Conflict`, `Expired` (exit code 4)

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// Unknown path, agent, conflict or work item.
    #[error("not found: {0}")]
    NotFound(String),

    /// The path is actively held by another agent.
    #[error("'{path}' is held by {holder}: {description}")]
    Conflict {
        path: String,
        holder: String,
        description: String,
    },

    /// The caller's lease lapsed before it was renewed or released.
    #[error("lease on '{path}' held by {agent_id} has expired; claim the file again")]
    Expired { path: String, agent_id: String },

    /// Storage or change-detection failure. Safe to retry.
    #[error("transient I/O failure: {0}")]
    TransientIo(String),

    /// The suggestion collaborator could not be reached.
    #[error("collaborator unavailable: {0}")]
    CollaboratorUnavailable(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Stable machine-readable code for JSON output.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict { .. } => "LEASE_HELD",
            Self::Expired { .. } => "LEASE_EXPIRED",
            Self::TransientIo(_) => "TRANSIENT_IO",
            Self::CollaboratorUnavailable(_) => "COLLABORATOR_UNAVAILABLE",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
        }
    }

    /// Process exit code for the command-line surface.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidInput(_) | Self::InvalidConfig(_) => 1,
            Self::TransientIo(_) | Self::CollaboratorUnavailable(_) => 2,
            Self::NotFound(_) => 3,
            Self::Conflict { .. } | Self::Expired { .. } => 4,
        }
    }

    /// Only storage and change-detection failures are worth retrying.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientIo(_))
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::TransientIo(format!("database: {err}"))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::TransientIo(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidInput(format!("json: {err}"))
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::InvalidConfig(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
