//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use agentsync_core::{Config, CoordinationDb, CoordinationService, ManualClock, Result};
use tempfile::TempDir;

pub struct Harness {
    pub service: CoordinationService,
    pub clock: Arc<ManualClock>,
}

/// Isolated in-memory store on a manual clock.
pub async fn in_memory() -> Result<Harness> {
    let clock = Arc::new(ManualClock::starting_now());
    let db = CoordinationDb::open_in_memory(clock.clone()).await?;
    Ok(Harness {
        service: CoordinationService::from_db(db, &Config::default())?,
        clock,
    })
}

/// File-backed store with a real connection pool, for concurrency tests.
pub async fn on_disk() -> Result<(Harness, TempDir)> {
    let dir = TempDir::new()?;
    let clock = Arc::new(ManualClock::starting_now());
    let db = CoordinationDb::open(&dir.path().join("state.db"), clock.clone()).await?;
    Ok((
        Harness {
            service: CoordinationService::from_db(db, &Config::default())?,
            clock,
        },
        dir,
    ))
}

pub fn paths(items: &[&str]) -> Vec<String> {
    items.iter().map(|p| (*p).to_string()).collect()
}
