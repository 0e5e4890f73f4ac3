//! Node configuration
//!
//! Resolved once at startup and passed by reference into every round.
//! Durations are stored as milliseconds when serialized.

use crate::codec::MAX_MESSAGE_LEN;
use crate::types::{DEFAULT_BASE_STATION_NAME, DEFAULT_EPOCH_LENGTH};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Largest datagram payload the radio transport carries
pub const MAX_DATAGRAM_PAYLOAD: usize = 1460;

/// Well-known UDP port for station reports and head uplinks
pub const DEFAULT_REPORT_PORT: u16 = 4210;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("epoch length must be at least 1")]
    ZeroEpoch,

    #[error("aggregate capacity {records} records exceeds datagram limit of {limit} bytes")]
    AggregateTooLarge { records: usize, limit: usize },

    #[error("access point must accept at least one client")]
    NoClients,

    #[error("{0} must be non-zero")]
    ZeroDuration(&'static str),

    #[error("failed to read config {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Complete node configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Verbose diagnostics
    pub debug: bool,

    /// Force the round store back to `(0, true)` before loading
    pub reset_rounds: bool,

    /// Rounds per epoch (R); election probability is `1/R`
    pub epoch_length: u16,

    /// Reserved name of the base-station network
    pub base_station_name: String,

    /// Shared secret for head access points and the base station
    pub network_secret: String,

    /// UDP port for reports and uplink broadcasts
    pub report_port: u16,

    /// Channel used when advertising as cluster head
    pub ap_channel: u8,

    /// Maximum stations attached to a head's access point
    pub ap_max_clients: u8,

    /// Bound on a single network join
    #[serde(with = "duration_ms")]
    pub join_timeout: Duration,

    /// How long a head listens for station reports
    #[serde(with = "duration_ms")]
    pub collection_window: Duration,

    /// Longest single wait inside the collection window before yielding
    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,

    /// Wake-to-wake period of a node
    #[serde(with = "duration_ms")]
    pub sleep_interval: Duration,

    /// Maximum records a head buffers per round
    pub aggregate_capacity: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            debug: false,
            reset_rounds: false,
            epoch_length: DEFAULT_EPOCH_LENGTH,
            base_station_name: DEFAULT_BASE_STATION_NAME.to_string(),
            network_secret: "leach-cluster".to_string(),
            report_port: DEFAULT_REPORT_PORT,
            ap_channel: 1,
            ap_max_clients: 8,
            join_timeout: Duration::from_secs(10),
            collection_window: Duration::from_secs(15),
            poll_interval: Duration::from_millis(100),
            sleep_interval: Duration::from_secs(60),
            aggregate_capacity: 64,
        }
    }
}

impl NodeConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        let config: NodeConfig = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that would otherwise break a round
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.epoch_length == 0 {
            return Err(ConfigError::ZeroEpoch);
        }
        let too_large = self
            .aggregate_capacity
            .checked_mul(MAX_MESSAGE_LEN)
            .map_or(true, |bytes| bytes > MAX_DATAGRAM_PAYLOAD);
        if too_large {
            return Err(ConfigError::AggregateTooLarge {
                records: self.aggregate_capacity,
                limit: MAX_DATAGRAM_PAYLOAD,
            });
        }
        if self.ap_max_clients == 0 {
            return Err(ConfigError::NoClients);
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("poll_interval"));
        }
        if self.collection_window.is_zero() {
            return Err(ConfigError::ZeroDuration("collection_window"));
        }
        Ok(())
    }

    /// Election probability P = 1/R
    pub fn election_probability(&self) -> f64 {
        1.0 / f64::from(self.epoch_length)
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_reset_rounds(mut self, reset: bool) -> Self {
        self.reset_rounds = reset;
        self
    }

    pub fn with_epoch_length(mut self, rounds: u16) -> Self {
        self.epoch_length = rounds;
        self
    }

    pub fn with_base_station(mut self, name: impl Into<String>) -> Self {
        self.base_station_name = name.into();
        self
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.network_secret = secret.into();
        self
    }

    pub fn with_report_port(mut self, port: u16) -> Self {
        self.report_port = port;
        self
    }

    pub fn with_collection_window(mut self, window: Duration) -> Self {
        self.collection_window = window;
        self
    }

    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    pub fn with_sleep_interval(mut self, interval: Duration) -> Self {
        self.sleep_interval = interval;
        self
    }

    pub fn with_aggregate_capacity(mut self, records: usize) -> Self {
        self.aggregate_capacity = records;
        self
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_is_valid() {
        let config = NodeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.epoch_length, 7);
        assert!((config.election_probability() - 1.0 / 7.0).abs() < 1e-12);
    }

    #[test]
    fn test_config_builder() {
        let config = NodeConfig::default()
            .with_debug(true)
            .with_reset_rounds(true)
            .with_epoch_length(5)
            .with_base_station("SINK")
            .with_secret("hunter22")
            .with_report_port(5000);

        assert!(config.debug);
        assert!(config.reset_rounds);
        assert_eq!(config.epoch_length, 5);
        assert_eq!(config.base_station_name, "SINK");
        assert_eq!(config.network_secret, "hunter22");
        assert_eq!(config.report_port, 5000);
    }

    #[test]
    fn test_validate_rejects_oversized_aggregate() {
        let config = NodeConfig::default().with_aggregate_capacity(200);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::AggregateTooLarge { records: 200, .. })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_timings() {
        let config = NodeConfig {
            poll_interval: Duration::ZERO,
            ..NodeConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroDuration("poll_interval"))
        ));

        let config = NodeConfig::default().with_collection_window(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroDuration("collection_window"))
        ));
    }

    #[test]
    fn test_huge_aggregate_capacity_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let mut file = tempfile::NamedTempFile::new()?;
        write!(file, r#"{{"aggregate_capacity": {}}}"#, usize::MAX / 2)?;

        assert!(matches!(
            NodeConfig::from_json_file(file.path()),
            Err(ConfigError::AggregateTooLarge { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_validate_rejects_zero_epoch() {
        let config = NodeConfig::default().with_epoch_length(0);
        assert!(matches!(config.validate(), Err(ConfigError::ZeroEpoch)));
    }

    #[test]
    fn test_json_file_partial_fields() -> Result<(), Box<dyn std::error::Error>> {
        let mut file = tempfile::NamedTempFile::new()?;
        write!(file, r#"{{"epoch_length": 10, "collection_window": 2500}}"#)?;

        let config = NodeConfig::from_json_file(file.path())?;
        assert_eq!(config.epoch_length, 10);
        assert_eq!(config.collection_window, Duration::from_millis(2500));
        assert_eq!(config.report_port, DEFAULT_REPORT_PORT);
        Ok(())
    }
}
