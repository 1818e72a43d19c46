//! Public, transport-agnostic message bus configuration.
//!
//! This type intentionally contains no transport-specific concepts
//! (e.g. MQTT client options). Transport layers are responsible for
//! interpreting this config into concrete connection settings.

use std::collections::HashMap;

/// One side of a transport endpoint: address, port, and protocol.
///
/// A host info is "empty" when it carries no usable connection endpoint.
/// Transports treat an empty side as "not configured" — for example a
/// subscribe-only client leaves `publish_host` empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    /// Host name or address (e.g. `"localhost"`).
    pub host: String,

    /// Port; 0 means unset.
    pub port: u16,

    /// Connection scheme (defaults to `"tcp"`).
    pub protocol: String,
}

impl HostInfo {
    /// Create a host info with the default `tcp` protocol.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            protocol: "tcp".to_string(),
        }
    }

    /// Override the connection protocol.
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    /// True when no usable connection endpoint is carried.
    pub fn is_empty(&self) -> bool {
        self.host.is_empty() || self.port == 0
    }

    /// Endpoint URL in `protocol://host:port` form.
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }
}

impl Default for HostInfo {
    fn default() -> Self {
        // ---
        Self {
            host: String::new(),
            port: 0,
            protocol: "tcp".to_string(),
        }
    }
}

/// Message bus connection configuration.
///
/// `client_type` selects the transport implementation; matching is
/// case-insensitive (see the built-in identifiers re-exported at the
/// crate root). At least one of the two hosts must be non-empty for the
/// factory to accept the configuration.
#[derive(Debug, Clone, Default)]
pub struct MessageBusConfig {
    /// Transport implementation identifier (e.g. `"mqtt"`).
    pub client_type: String,

    /// Endpoint this client publishes through.
    pub publish_host: HostInfo,

    /// Endpoint this client subscribes through.
    pub subscribe_host: HostInfo,

    /// Transport-specific options, passed through unmodified by the
    /// factory (e.g. `"ClientId"`, `"Username"`, `"KeepAlive"`).
    pub optional: HashMap<String, String>,
}

impl MessageBusConfig {
    /// Create a configuration for the given client type.
    pub fn new(client_type: impl Into<String>) -> Self {
        Self {
            client_type: client_type.into(),
            ..Self::default()
        }
    }

    /// Set the publish endpoint.
    pub fn with_publish_host(mut self, host: HostInfo) -> Self {
        self.publish_host = host;
        self
    }

    /// Set the subscribe endpoint.
    pub fn with_subscribe_host(mut self, host: HostInfo) -> Self {
        self.subscribe_host = host;
        self
    }

    /// Add a transport-specific option.
    pub fn with_optional(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.optional.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_default_host_is_empty() {
        // ---
        let host = HostInfo::default();
        assert!(host.is_empty());
        assert_eq!(host.protocol, "tcp");
    }

    #[test]
    fn test_host_with_address_and_port_is_usable() {
        // ---
        let host = HostInfo::new("localhost", 1883);
        assert!(!host.is_empty());
        assert_eq!(host.url(), "tcp://localhost:1883");
    }

    #[test]
    fn test_host_without_port_is_empty() {
        // ---
        assert!(HostInfo::new("localhost", 0).is_empty());
        assert!(HostInfo::new("", 1883).is_empty());
    }

    #[test]
    fn test_protocol_override_shows_in_url() {
        // ---
        let host = HostInfo::new("broker", 6379).with_protocol("redis");
        assert_eq!(host.url(), "redis://broker:6379");
    }

    #[test]
    fn test_fluent_config_construction() {
        // ---
        let config = MessageBusConfig::new("mqtt")
            .with_publish_host(HostInfo::new("localhost", 1883))
            .with_optional("ClientId", "unit-test");

        assert_eq!(config.client_type, "mqtt");
        assert!(!config.publish_host.is_empty());
        assert!(config.subscribe_host.is_empty());
        assert_eq!(
            config.optional.get("ClientId").map(String::as_str),
            Some("unit-test")
        );
    }
}
