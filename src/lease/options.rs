//! Lease timing configuration.

use crate::error::{Result, WalError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default cadence of background renewals: 10 seconds.
fn default_renewal_interval_ms() -> u64 {
    10_000
}

/// Default age at which an un-renewed marker becomes stale: 60 seconds.
fn default_lease_timeout_ms() -> u64 {
    60_000
}

/// Timing knobs for a lease.
///
/// `lease_timeout_ms` must exceed `renewal_interval_ms` — otherwise the
/// normal heartbeat cadence would let the lease self-expire between
/// renewals. [`WalLock::acquire_with`](super::WalLock::acquire_with)
/// rejects options that violate this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseOptions {
    /// Milliseconds between automatic background renewals.
    #[serde(default = "default_renewal_interval_ms")]
    pub renewal_interval_ms: u64,

    /// Milliseconds after which an un-renewed marker is considered
    /// stale and eligible for takeover by any other instance.
    #[serde(default = "default_lease_timeout_ms")]
    pub lease_timeout_ms: u64,
}

impl Default for LeaseOptions {
    fn default() -> Self {
        Self {
            renewal_interval_ms: default_renewal_interval_ms(),
            lease_timeout_ms: default_lease_timeout_ms(),
        }
    }
}

impl LeaseOptions {
    /// Build options from durations, truncating to millisecond
    /// precision (the marker name encoding's resolution).
    pub fn new(renewal_interval: Duration, lease_timeout: Duration) -> Self {
        Self {
            renewal_interval_ms: renewal_interval.as_millis() as u64,
            lease_timeout_ms: lease_timeout.as_millis() as u64,
        }
    }

    pub fn renewal_interval(&self) -> Duration {
        Duration::from_millis(self.renewal_interval_ms)
    }

    pub fn lease_timeout(&self) -> Duration {
        Duration::from_millis(self.lease_timeout_ms)
    }

    /// Reject timings under which the protocol cannot work.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.renewal_interval_ms == 0 {
            return Err(WalError::InvalidOptions(
                "renewal interval must be positive".to_string(),
            ));
        }
        if self.lease_timeout_ms <= self.renewal_interval_ms {
            return Err(WalError::InvalidOptions(format!(
                "lease timeout ({}ms) must exceed renewal interval ({}ms), \
                 or the heartbeat cadence itself would expire the lease",
                self.lease_timeout_ms, self.renewal_interval_ms
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_keep_timeout_above_interval() {
        let opts = LeaseOptions::default();
        assert!(opts.lease_timeout_ms > opts.renewal_interval_ms);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn from_durations() {
        let opts = LeaseOptions::new(Duration::from_millis(500), Duration::from_secs(1));
        assert_eq!(opts.renewal_interval_ms, 500);
        assert_eq!(opts.lease_timeout_ms, 1000);
        assert_eq!(opts.renewal_interval(), Duration::from_millis(500));
        assert_eq!(opts.lease_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn validate_rejects_zero_interval() {
        let opts = LeaseOptions::new(Duration::ZERO, Duration::from_secs(1));
        assert!(matches!(
            opts.validate().unwrap_err(),
            WalError::InvalidOptions(_)
        ));
    }

    #[test]
    fn validate_rejects_timeout_at_or_below_interval() {
        let equal = LeaseOptions::new(Duration::from_secs(1), Duration::from_secs(1));
        assert!(equal.validate().is_err());

        let below = LeaseOptions::new(Duration::from_secs(2), Duration::from_secs(1));
        assert!(below.validate().is_err());
    }

    #[test]
    fn serde_fills_missing_fields_with_defaults() {
        let opts: LeaseOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(opts, LeaseOptions::default());

        let opts: LeaseOptions =
            serde_json::from_str(r#"{"renewal_interval_ms": 500, "lease_timeout_ms": 1000}"#)
                .unwrap();
        assert_eq!(opts.renewal_interval_ms, 500);
        assert_eq!(opts.lease_timeout_ms, 1000);
    }
}
