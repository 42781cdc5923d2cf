//! Configuration for signature verification.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Verification configuration.
#[derive(Debug, Clone)]
pub struct VerifyConfig {
    /// Longest certificate chain (signer excluded) the evaluator will build.
    pub max_chain_depth: usize,

    /// How long a single revocation query may take.
    pub revocation_timeout: Duration,

    /// Time at which certificates must be valid.
    ///
    /// Defaults to the time of verification. The signing time claimed in the
    /// signature is reported but never used here.
    pub validation_time: Option<DateTime<Utc>>,

    /// Query the revocation oracle, when one is configured.
    pub check_revocation: bool,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl VerifyConfig {
    /// Create new configuration with defaults.
    pub fn new() -> Self {
        Self {
            max_chain_depth: 10,
            revocation_timeout: Duration::from_secs(5),
            validation_time: None,
            check_revocation: true,
        }
    }

    /// Cap the chain length.
    pub fn with_max_chain_depth(mut self, depth: usize) -> Self {
        self.max_chain_depth = depth;
        self
    }

    /// Bound each revocation query.
    pub fn with_revocation_timeout(mut self, timeout: Duration) -> Self {
        self.revocation_timeout = timeout;
        self
    }

    /// Validate certificates at a fixed time.
    pub fn with_validation_time(mut self, time: DateTime<Utc>) -> Self {
        self.validation_time = Some(time);
        self
    }

    /// Enable or disable revocation queries.
    pub fn with_revocation_check(mut self, enable: bool) -> Self {
        self.check_revocation = enable;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = VerifyConfig::default();
        assert_eq!(config.max_chain_depth, 10);
        assert_eq!(config.revocation_timeout, Duration::from_secs(5));
        assert!(config.validation_time.is_none());
        assert!(config.check_revocation);
    }

    #[test]
    fn test_builder() {
        let now = Utc::now();
        let config = VerifyConfig::new()
            .with_max_chain_depth(2)
            .with_revocation_timeout(Duration::from_millis(100))
            .with_validation_time(now)
            .with_revocation_check(false);
        assert_eq!(config.max_chain_depth, 2);
        assert_eq!(config.validation_time, Some(now));
        assert!(!config.check_revocation);
    }
}
