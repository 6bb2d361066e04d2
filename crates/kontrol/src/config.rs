//! Registry configuration.
//!
//! Fixed at startup and handed to [`Kontrol::new`](crate::Kontrol::new).
//! Every field has a default; use the builder-style setters to override:
//!
//! ```rust
//! use std::time::Duration;
//! use kontrol::KontrolConfig;
//!
//! let config = KontrolConfig::new()
//!     .heartbeat_interval(Duration::from_secs(10))
//!     .heartbeat_grace(Duration::from_secs(5));
//! assert!(config.validate().is_ok());
//! ```
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default seconds between kite heartbeats.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Shortest heartbeat interval a kite can be told to honor.
pub const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Default extra time allowed past a missed heartbeat before the lease is lost.
pub const DEFAULT_HEARTBEAT_GRACE: Duration = Duration::from_secs(20);

/// Default interval between refresher writes.
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(60);

/// Default storage TTL for a registration record.
pub const DEFAULT_RECORD_TTL: Duration = Duration::from_secs(90);

/// Default lifetime of discovery tokens (48h).
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(48 * 60 * 60);

/// Default backdating of token issue time to absorb clock skew.
pub const DEFAULT_TOKEN_LEEWAY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KontrolConfig {
    /// How often kites must send a heartbeat.
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,
    /// Slack added to the heartbeat interval before a lease is lost.
    #[serde(with = "humantime_serde")]
    pub heartbeat_grace: Duration,
    /// How often a live registration is re-written to storage.
    #[serde(with = "humantime_serde")]
    pub update_interval: Duration,
    /// TTL the storage backend applies to each record write.
    #[serde(with = "humantime_serde")]
    pub record_ttl: Duration,
    /// Lifetime of tokens minted by discovery.
    #[serde(with = "humantime_serde")]
    pub token_ttl: Duration,
    /// Issued-at backdating.
    #[serde(with = "humantime_serde")]
    pub token_leeway: Duration,
    /// Username of the registry itself; the `iss` of every token.
    pub issuer: String,
}

impl Default for KontrolConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl KontrolConfig {
    pub fn new() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_grace: DEFAULT_HEARTBEAT_GRACE,
            update_interval: DEFAULT_UPDATE_INTERVAL,
            record_ttl: DEFAULT_RECORD_TTL,
            token_ttl: DEFAULT_TOKEN_TTL,
            token_leeway: DEFAULT_TOKEN_LEEWAY,
            issuer: "kontrol".to_string(),
        }
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn heartbeat_grace(mut self, grace: Duration) -> Self {
        self.heartbeat_grace = grace;
        self
    }

    pub fn update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval;
        self
    }

    pub fn record_ttl(mut self, ttl: Duration) -> Self {
        self.record_ttl = ttl;
        self
    }

    pub fn token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    pub fn token_leeway(mut self, leeway: Duration) -> Self {
        self.token_leeway = leeway;
        self
    }

    pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    /// Time a lease survives without a heartbeat.
    pub fn lease_duration(&self) -> Duration {
        self.heartbeat_interval + self.heartbeat_grace
    }

    /// Check the cross-component timing invariants.
    ///
    /// The record TTL must outlive both the lease window and the gap between
    /// two refresher writes, or a live kite drops out of storage.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("heartbeat_interval", self.heartbeat_interval),
            ("update_interval", self.update_interval),
            ("record_ttl", self.record_ttl),
            ("token_ttl", self.token_ttl),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration { field });
            }
        }

        // Kites are told the interval in whole seconds.
        if self.heartbeat_interval < MIN_HEARTBEAT_INTERVAL {
            return Err(ConfigError::HeartbeatIntervalTooShort {
                interval: self.heartbeat_interval,
            });
        }

        let window = self.lease_duration();
        if self.record_ttl <= window {
            return Err(ConfigError::TtlShorterThanHeartbeatWindow {
                ttl: self.record_ttl,
                window,
            });
        }
        if self.record_ttl <= self.update_interval {
            return Err(ConfigError::TtlShorterThanUpdateInterval {
                ttl: self.record_ttl,
                update: self.update_interval,
            });
        }
        if self.issuer.trim().is_empty() {
            return Err(ConfigError::EmptyIssuer);
        }
        Ok(())
    }
}
