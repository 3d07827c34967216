//! # AgentSync Core
//!
//! Lease coordination for agents editing a shared file tree.
//!
//! ## Laws (Compiler Enforced)
//!
//! - No `unwrap()` - returns `Result` instead
//! - No `expect()` - returns `Result` instead
//! - No `panic!()` - returns `Result` instead
//! - No `unsafe` - safe Rust only
//!
//! ## Layout
//!
//! - [`coordination::LockManager`] owns every lease transition.
//! - [`coordination::ActivityRecorder`] owns conflict creation and resolution.
//! - [`session::AutoCoordinator`] drives the lock manager from working-tree changes.
//! - [`service::CoordinationService`] is the request/response surface used by tools.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

pub mod agents;
pub mod clock;
pub mod config;
pub mod coordination;
pub mod db;
mod error;
pub mod events;
pub mod service;
pub mod session;

pub use agents::{AgentIdentity, AgentRegistry, AgentStatus, ClientKind};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use coordination::{
    ActivityRecorder, ClaimOutcome, Conflict, ConflictFilter, LockManager, ReleaseOutcome,
    RenewOutcome, WorkQueue,
};
pub use db::CoordinationDb;
pub use error::{Error, Result};
pub use events::{CoordinationEvent, EventKind, EventLog};
pub use service::CoordinationService;
pub use session::{AutoCoordinator, SessionReport, SessionState};
