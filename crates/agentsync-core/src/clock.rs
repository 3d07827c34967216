//! Time source for every liveness decision.
//!
//! Lease expiry is computed from `now`, never scheduled, so the clock is the
//! only thing tests need to control.

use std::{
    fmt,
    sync::atomic::{AtomicI64, Ordering},
    time::Duration,
};

use chrono::{DateTime, Utc};

use crate::{Error, Result};

pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(start.timestamp_millis()),
        }
    }

    /// Starts at the current wall-clock instant.
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    pub fn advance(&self, by: Duration) {
        let delta = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.millis.fetch_add(delta, Ordering::SeqCst);
    }

    pub fn set(&self, at: DateTime<Utc>) {
        self.millis.store(at.timestamp_millis(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        from_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_default()
    }
}

/// Storage representation of an instant.
pub fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub fn from_millis(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| Error::TransientIo(format!("stored timestamp out of range: {millis}")))
}

/// Converts a TTL or window into whole milliseconds, rejecting zero.
pub fn positive_millis(what: &str, duration: Duration) -> Result<i64> {
    match i64::try_from(duration.as_millis()) {
        Ok(0) => Err(Error::InvalidInput(format!("{what} must be positive"))),
        Ok(ms) => Ok(ms),
        Err(_) => Err(Error::InvalidInput(format!("{what} is too large"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_only_moves_when_advanced() {
        let clock = ManualClock::starting_now();
        let before = clock.now();
        assert_eq!(clock.now(), before);
        clock.advance(Duration::from_secs(6));
        assert_eq!((clock.now() - before).num_seconds(), 6);
    }

    #[test]
    fn millis_round_trip_preserves_instant() -> Result<()> {
        let clock = ManualClock::starting_now();
        let now = clock.now();
        assert_eq!(from_millis(to_millis(now))?, now);
        Ok(())
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let result = positive_millis("ttl", Duration::ZERO);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
