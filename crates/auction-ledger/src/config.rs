//! Ledger configuration.
//!
//! Loaded from environment variables with defaults suitable for local
//! development.

use auction_events::{EventBusConfig, DEFAULT_CHANNEL, DEFAULT_SUBSCRIBER_CAPACITY};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default minimum gap between consecutive bids, in cents.
pub const DEFAULT_MIN_INCREMENT_CENTS: u64 = 100;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid configuration value.
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue {
        /// Configuration key.
        key: String,
        /// Error message.
        message: String,
    },
}

/// Auction ledger configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Redis connection URL.
    pub redis_url: String,

    /// Minimum amount a bid must exceed the current top bid by.
    pub min_increment_cents: u64,

    /// Pub/sub channel auction updates are published on.
    pub updates_channel: String,

    /// Events buffered per subscriber before its delivery task waits.
    pub subscriber_capacity: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            min_increment_cents: DEFAULT_MIN_INCREMENT_CENTS,
            updates_channel: DEFAULT_CHANNEL.to_string(),
            subscriber_capacity: DEFAULT_SUBSCRIBER_CAPACITY,
        }
    }
}

impl LedgerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `AUCTION_REDIS_URL`: Redis URL (default: redis://127.0.0.1:6379)
    /// - `AUCTION_MIN_INCREMENT_CENTS`: minimum bid increment (default: 100)
    /// - `AUCTION_UPDATES_CHANNEL`: pub/sub channel (default: auction-updates)
    /// - `AUCTION_SUBSCRIBER_CAPACITY`: per-subscriber queue size (default: 256)
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            redis_url: std::env::var("AUCTION_REDIS_URL").unwrap_or(default.redis_url),
            min_increment_cents: std::env::var("AUCTION_MIN_INCREMENT_CENTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default.min_increment_cents),
            updates_channel: std::env::var("AUCTION_UPDATES_CHANNEL")
                .unwrap_or(default.updates_channel),
            subscriber_capacity: std::env::var("AUCTION_SUBSCRIBER_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default.subscriber_capacity),
        }
    }

    /// Check that the configuration is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.updates_channel.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "AUCTION_UPDATES_CHANNEL".to_string(),
                message: "channel name must not be empty".to_string(),
            });
        }
        if self.subscriber_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "AUCTION_SUBSCRIBER_CAPACITY".to_string(),
                message: "capacity must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Event bus settings matching this ledger.
    pub fn event_bus_config(&self) -> EventBusConfig {
        EventBusConfig {
            channel: self.updates_channel.clone(),
            subscriber_capacity: self.subscriber_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LedgerConfig::default();
        assert_eq!(config.min_increment_cents, 100);
        assert_eq!(config.updates_channel, "auction-updates");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unusable_values() {
        let mut config = LedgerConfig::default();
        config.subscriber_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = LedgerConfig::default();
        config.updates_channel = "  ".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key, .. }) if key == "AUCTION_UPDATES_CHANNEL"
        ));
    }

    #[test]
    fn test_event_bus_config_follows_ledger() {
        let config = LedgerConfig {
            updates_channel: "test-updates".to_string(),
            subscriber_capacity: 8,
            ..LedgerConfig::default()
        };
        let bus = config.event_bus_config();
        assert_eq!(bus.channel, "test-updates");
        assert_eq!(bus.subscriber_capacity, 8);
    }
}
