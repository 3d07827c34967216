//! Configuration validation

use super::Config;
use crate::{Error, Result};

impl Config {
    /// Reject values the coordination engine cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.db_path.trim().is_empty() {
            return Err(Error::InvalidConfig("db_path cannot be empty".to_string()));
        }

        if self.locks.default_ttl_secs == 0 {
            return Err(Error::InvalidConfig(
                "locks.default_ttl_secs must be positive".to_string(),
            ));
        }

        if self.locks.operation_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "locks.operation_timeout_ms must be positive".to_string(),
            ));
        }

        if self.session.poll_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "session.poll_interval_ms must be positive".to_string(),
            ));
        }

        if self.session.poll_interval_ms >= self.locks.default_ttl_secs.saturating_mul(1_000) {
            return Err(Error::InvalidConfig(format!(
                "session.poll_interval_ms ({}) must be shorter than the lease TTL ({}s)",
                self.session.poll_interval_ms, self.locks.default_ttl_secs
            )));
        }

        if self.session.max_consecutive_failures == 0 {
            return Err(Error::InvalidConfig(
                "session.max_consecutive_failures must be at least 1".to_string(),
            ));
        }

        if let Some(renew) = self.session.renew_interval_secs {
            if renew == 0 || renew >= self.locks.default_ttl_secs {
                return Err(Error::InvalidConfig(format!(
                    "session.renew_interval_secs ({renew}) must be between 1 and the lease TTL ({}) exclusive",
                    self.locks.default_ttl_secs
                )));
            }
        }

        let overlap = &self.overlap;
        if overlap.high_within_secs > overlap.medium_within_secs
            || overlap.medium_within_secs > overlap.window_secs
        {
            return Err(Error::InvalidConfig(
                "overlap thresholds must satisfy high_within_secs <= medium_within_secs <= window_secs"
                    .to_string(),
            ));
        }

        if overlap.breadth_bump == 0 {
            return Err(Error::InvalidConfig(
                "overlap.breadth_bump must be at least 1".to_string(),
            ));
        }

        if self.suggestions.command.as_ref().is_some_and(Vec::is_empty) {
            return Err(Error::InvalidConfig(
                "suggestions.command must name a program".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let mut config = Config::default();
        config.locks.default_ttl_secs = 0;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn renew_interval_must_be_below_ttl() {
        let mut config = Config::default();
        config.locks.default_ttl_secs = 30;
        config.session.renew_interval_secs = Some(30);
        assert!(config.validate().is_err());

        config.session.renew_interval_secs = Some(29);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn poll_interval_must_be_below_ttl() {
        let mut config = Config::default();
        config.locks.default_ttl_secs = 5;
        config.session.renew_interval_secs = Some(3);
        config.session.poll_interval_ms = 5_000;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        config.session.poll_interval_ms = 4_999;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn overlap_thresholds_must_be_ordered() {
        let mut config = Config::default();
        config.overlap.high_within_secs = 7200;
        assert!(config.validate().is_err());
    }
}
