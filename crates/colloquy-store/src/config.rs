//! Store configuration.
//!
//! A single connection URL identifies the target engine and credentials.
//! Pool tuning rides along as query parameters (`pool_size`,
//! `max_overflow`, `pool_timeout`, `pool_recycle`) and is stripped from
//! the URL before it reaches the driver; everything else in the query
//! string passes through untouched.

use std::time::Duration;

use crate::error::{Result, StoreError};

/// Default base pool size.
pub const DEFAULT_POOL_SIZE: u32 = 5;
/// Default overflow above the base pool size.
pub const DEFAULT_MAX_OVERFLOW: u32 = 10;
/// Default acquire timeout.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Retry policy for transient connection/pool failures.
///
/// Applied only around connection acquisition — a transaction that may
/// have committed is never retried.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum retry attempts after the first failure.
    pub max_attempts: u32,
    /// Base delay for exponential backoff in ms.
    pub base_delay_ms: u64,
    /// Cap on the backoff delay in ms.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
        }
    }
}

impl RetryConfig {
    /// Backoff delay in ms for a zero-based attempt index: `base * 2^attempt`, capped.
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        self.base_delay_ms
            .saturating_mul(1u64 << attempt.min(31))
            .min(self.max_delay_ms)
    }
}

/// Connection and pool configuration for one store instance.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Backend URL, with pool-tuning parameters removed.
    pub url: String,
    /// Base pool size — connections kept ready.
    pub pool_size: u32,
    /// Extra connections allowed above the base under load.
    pub max_overflow: u32,
    /// How long an acquire may wait before failing with `PoolExhausted`.
    pub acquire_timeout: Duration,
    /// Recycle connections older than this, if set.
    pub recycle: Option<Duration>,
    /// Transient-failure retry policy.
    pub retry: RetryConfig,
}

impl StoreConfig {
    /// Configuration with defaults for the given URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            pool_size: DEFAULT_POOL_SIZE,
            max_overflow: DEFAULT_MAX_OVERFLOW,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            recycle: None,
            retry: RetryConfig::default(),
        }
    }

    /// Parse a URL, consuming any pool-tuning query parameters.
    ///
    /// `pool_size` and `max_overflow` are connection counts;
    /// `pool_timeout` and `pool_recycle` are whole seconds. Unknown
    /// parameters stay on the URL for the driver.
    pub fn from_url(url: &str) -> Result<Self> {
        let Some((base, query)) = url.split_once('?') else {
            return Ok(Self::new(url));
        };

        let mut config = Self::new(base);
        let mut passthrough = Vec::new();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            match key {
                "pool_size" => config.pool_size = parse_num(key, value)?,
                "max_overflow" => config.max_overflow = parse_num(key, value)?,
                "pool_timeout" => {
                    config.acquire_timeout = Duration::from_secs(parse_num(key, value)?);
                }
                "pool_recycle" => {
                    config.recycle = Some(Duration::from_secs(parse_num(key, value)?));
                }
                _ => passthrough.push(pair),
            }
        }
        if !passthrough.is_empty() {
            config.url = format!("{base}?{}", passthrough.join("&"));
        }
        Ok(config)
    }

    /// Upper bound on live connections: base plus overflow, at least one.
    pub fn max_connections(&self) -> u32 {
        (self.pool_size + self.max_overflow).max(1)
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| StoreError::Config(format!("invalid value for {key}: {value:?}")))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn defaults() {
        let config = StoreConfig::new("sqlite:///tmp/a.db");
        assert_eq!(config.pool_size, DEFAULT_POOL_SIZE);
        assert_eq!(config.max_overflow, DEFAULT_MAX_OVERFLOW);
        assert_eq!(config.acquire_timeout, DEFAULT_ACQUIRE_TIMEOUT);
        assert!(config.recycle.is_none());
    }

    #[test]
    fn from_url_without_query() {
        let config = StoreConfig::from_url("postgres://db/sessions").unwrap();
        assert_eq!(config.url, "postgres://db/sessions");
        assert_eq!(config.pool_size, DEFAULT_POOL_SIZE);
    }

    #[test]
    fn from_url_consumes_pool_params() {
        let config = StoreConfig::from_url(
            "postgres://db/sessions?pool_size=2&max_overflow=3&pool_timeout=7&pool_recycle=1800",
        )
        .unwrap();
        assert_eq!(config.url, "postgres://db/sessions");
        assert_eq!(config.pool_size, 2);
        assert_eq!(config.max_overflow, 3);
        assert_eq!(config.acquire_timeout, Duration::from_secs(7));
        assert_eq!(config.recycle, Some(Duration::from_secs(1800)));
    }

    #[test]
    fn from_url_keeps_driver_params() {
        let config =
            StoreConfig::from_url("sqlite:///tmp/a.db?mode=rwc&pool_size=1").unwrap();
        assert_eq!(config.url, "sqlite:///tmp/a.db?mode=rwc");
        assert_eq!(config.pool_size, 1);
    }

    #[test]
    fn from_url_rejects_bad_value() {
        let err = StoreConfig::from_url("sqlite:///tmp/a.db?pool_size=lots").unwrap_err();
        assert_matches!(err, StoreError::Config(_));
    }

    #[test]
    fn max_connections_is_at_least_one() {
        let mut config = StoreConfig::new("sqlite:///tmp/a.db");
        config.pool_size = 0;
        config.max_overflow = 0;
        assert_eq!(config.max_connections(), 1);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let retry = RetryConfig {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
        };
        assert_eq!(retry.backoff_ms(0), 100);
        assert_eq!(retry.backoff_ms(1), 200);
        assert_eq!(retry.backoff_ms(2), 400);
        assert_eq!(retry.backoff_ms(10), 1_000);
        // No overflow at absurd attempt counts
        assert_eq!(retry.backoff_ms(100), 1_000);
    }
}
