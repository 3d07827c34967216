//! Command implementations.
//!
//! Each command prints its result through [`crate::output`] and returns an
//! error for outcomes the caller must act on (blocked claims, lapsed
//! renewals) so the exit code reflects them.

pub mod agents;
pub mod auto;
pub mod conflicts;
pub mod init;
pub mod leases;
pub mod work;

use agentsync_core::CoordinationService;

use crate::output::OutputFormat;

/// Everything a command needs.
pub struct Context {
    pub service: CoordinationService,
    pub agent_id: String,
    pub format: OutputFormat,
}
