//! Runtime configuration: ledger endpoint and timing knobs.

use std::time::Duration;

/// Default timeout for ledger requests (30 seconds).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout used specifically for the lightweight connectivity probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default interval between periodic background drain passes.
pub const DEFAULT_DRAIN_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Normalised base URL of the remote sales ledger.
    pub base_url: String,
    /// Per-request bound on sale submission; a timeout is handled like any
    /// other network failure.
    pub request_timeout: Duration,
    /// Bound on the connectivity probe.
    pub probe_timeout: Duration,
    /// Interval between periodic background drains.
    pub drain_interval: Duration,
}

impl CoreConfig {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: crate::api::normalize_base_url(base_url),
            ..Self::default()
        }
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            drain_interval: DEFAULT_DRAIN_INTERVAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_normalises_the_base_url() {
        let config = CoreConfig::new("ledger.example.com/api/");
        assert_eq!(config.base_url, "https://ledger.example.com");
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
    }
}
