//! Node configuration.
//!
//! Every field has a default, so an empty TOML document is a valid config.
//! Durations are written as `"500ms"`, `"2s"`, `"5m"` or `"1h"`.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{OverlayError, Result};

/// Default pause between discovery rounds.
pub const DEFAULT_DISCOVERY_INTERVAL: Duration = Duration::from_secs(1);

/// Default bound on every outbound RPC.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Default pause before re-dialing a failed peer connection.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(1);

/// Default lifetime of a connection with no RPC traffic.
pub const DEFAULT_IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(3600);

/// Default capacity of the local delivery channel.
pub const DEFAULT_DELIVERY_BUFFER: usize = 1024;

/// Default number of inbound requests queued for the server.
pub const DEFAULT_INBOUND_QUEUE: usize = 256;

/// Tunables for a [`Node`](crate::Node).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Pause between discovery rounds.
    #[serde(with = "duration_str")]
    pub discovery_interval: Duration,
    /// Bound on every outbound RPC, dialing included.
    #[serde(with = "duration_str")]
    pub request_timeout: Duration,
    /// Pause before re-dialing peers in `TransientFailure`.
    #[serde(with = "duration_str")]
    pub reconnect_interval: Duration,
    /// How long an idle connection is kept open.
    #[serde(with = "duration_str")]
    pub idle_connection_timeout: Duration,
    /// Bound on remembered message identities. `None` never forgets.
    pub dedup_capacity: Option<usize>,
    /// Capacity of the local delivery channel.
    pub delivery_buffer: usize,
    /// Inbound requests queued for the server. A full queue delays new
    /// requests instead of dropping them.
    pub inbound_queue: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            discovery_interval: DEFAULT_DISCOVERY_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            idle_connection_timeout: DEFAULT_IDLE_CONNECTION_TIMEOUT,
            dedup_capacity: None,
            delivery_buffer: DEFAULT_DELIVERY_BUFFER,
            inbound_queue: DEFAULT_INBOUND_QUEUE,
        }
    }
}

impl NodeConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: NodeConfig =
            toml::from_str(input).map_err(|e| OverlayError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Reject values the node cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.discovery_interval.is_zero() {
            return Err(OverlayError::Config("discovery_interval must be non-zero".into()));
        }
        if self.request_timeout.is_zero() {
            return Err(OverlayError::Config("request_timeout must be non-zero".into()));
        }
        if self.reconnect_interval.is_zero() {
            return Err(OverlayError::Config("reconnect_interval must be non-zero".into()));
        }
        if self.dedup_capacity == Some(0) {
            return Err(OverlayError::Config("dedup_capacity must be at least 1".into()));
        }
        if self.delivery_buffer == 0 {
            return Err(OverlayError::Config("delivery_buffer must be at least 1".into()));
        }
        if self.inbound_queue == 0 {
            return Err(OverlayError::Config("inbound_queue must be at least 1".into()));
        }
        Ok(())
    }
}

/// Parse a duration like `"250ms"`, `"30s"`, `"5m"`, `"1h"` or a bare
/// number of seconds.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let input = input.trim();
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (digits, unit) = input.split_at(split);

    let value: u64 = digits
        .parse()
        .map_err(|_| OverlayError::Config(format!("Invalid duration '{}'", input)))?;

    match unit.trim() {
        "ms" => Ok(Duration::from_millis(value)),
        "" | "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value.saturating_mul(60))),
        "h" => Ok(Duration::from_secs(value.saturating_mul(3600))),
        other => Err(OverlayError::Config(format!(
            "Invalid duration unit '{}' in '{}'. Use ms, s, m or h.",
            other, input
        ))),
    }
}

/// Render a duration in the largest unit that represents it exactly.
pub fn format_duration(duration: Duration) -> String {
    if duration.subsec_nanos() != 0 || duration.as_secs() == 0 {
        return format!("{}ms", duration.as_millis());
    }
    let secs = duration.as_secs();
    if secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

mod duration_str {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        super::parse_duration(&raw).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("7").unwrap(), Duration::from_secs(7));
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("10d").is_err());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(1500)), "1500ms");
        assert_eq!(format_duration(Duration::from_secs(90)), "90s");
        assert_eq!(format_duration(Duration::from_secs(120)), "2m");
        assert_eq!(format_duration(Duration::from_secs(7200)), "2h");
    }

    #[test]
    fn test_empty_document_is_default() {
        let config = NodeConfig::from_toml_str("").unwrap();
        assert_eq!(config, NodeConfig::default());
        assert!(config.dedup_capacity.is_none());
    }

    #[test]
    fn test_toml_overrides() {
        let config = NodeConfig::from_toml_str(
            r#"
            discovery_interval = "200ms"
            request_timeout = "2s"
            dedup_capacity = 4096
            "#,
        )
        .unwrap();

        assert_eq!(config.discovery_interval, Duration::from_millis(200));
        assert_eq!(config.request_timeout, Duration::from_secs(2));
        assert_eq!(config.dedup_capacity, Some(4096));
        assert_eq!(config.reconnect_interval, DEFAULT_RECONNECT_INTERVAL);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(NodeConfig::from_toml_str("request_timeout = \"0s\"").is_err());
        assert!(NodeConfig::from_toml_str("dedup_capacity = 0").is_err());
        assert!(NodeConfig::from_toml_str("discovery_interval = \"soon\"").is_err());
        assert!(NodeConfig::from_toml_str("inbound_queue = 0").is_err());
    }

    #[test]
    fn test_inbound_queue_is_configurable() {
        assert_eq!(NodeConfig::default().inbound_queue, DEFAULT_INBOUND_QUEUE);
        let config = NodeConfig::from_toml_str("inbound_queue = 8").unwrap();
        assert_eq!(config.inbound_queue, 8);
    }

    #[test]
    fn test_toml_roundtrip_keeps_durations_readable() {
        let rendered = toml::to_string(&NodeConfig::default()).unwrap();
        assert!(rendered.contains("discovery_interval = \"1s\""));
        assert!(rendered.contains("idle_connection_timeout = \"1h\""));
    }
}
