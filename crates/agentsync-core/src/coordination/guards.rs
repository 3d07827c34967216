//! In-process per-path mutual exclusion.
//!
//! Claim, renew and release on one path are linearized by holding that
//! path's guard for the whole read-modify-write. Disjoint paths use disjoint
//! guards and never wait on each other here.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Idle guards are dropped once the map grows past this size.
const PRUNE_THRESHOLD: usize = 1024;

#[derive(Debug, Clone, Default)]
pub(crate) struct PathGuards {
    slots: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl PathGuards {
    pub async fn lock(&self, path: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock().await;
            if slots.len() >= PRUNE_THRESHOLD {
                slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            }
            Arc::clone(slots.entry(path.to_string()).or_default())
        };
        slot.lock_owned().await
    }
}
