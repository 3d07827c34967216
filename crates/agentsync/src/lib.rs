//! AgentSync - coordinate agents editing one working tree
//!
//! Command-line surface over `agentsync-core`: manual lease commands plus
//! `auto`, which wraps an agent process in an auto-coordination session.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod cli;
pub mod commands;
pub mod output;
