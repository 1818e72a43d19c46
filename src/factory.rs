//! Message client factory.
//!
//! Selects and instantiates a concrete [`MessageClient`] implementation
//! from a [`MessageBusConfig`]: the configuration is validated, the
//! requested type is normalized to lower case, and resolution checks the
//! built-in transports before consulting the process-wide registry of
//! custom builders.
//!
//! Built-in identifiers are reserved: a custom builder registered under
//! `"zero"`, `"mqtt"`, or `"redisstreams"` is never invoked, because
//! built-ins are matched ahead of the registry.
//!
//! The factory itself never logs and never retries — every failure is
//! returned to the caller as a value, and constructor failures are
//! propagated unchanged.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

#[allow(unused_imports)]
use crate::{transport, Error, MessageBusConfig, MessageClientPtr, Result};

/// ZeroMQ messaging implementation
pub const ZERO_MQ: &str = "zero";

/// MQTT messaging implementation
pub const MQTT: &str = "mqtt";

/// Redis Streams messaging implementation
pub const REDIS_STREAMS: &str = "redisstreams";

/// Constructor contract every transport satisfies, built-in or custom:
/// a configuration in, a client or a construction failure out.
///
/// Builders do construction-time work only; anything that touches the
/// network belongs behind [`MessageClient::connect`](crate::MessageClient::connect).
pub type ClientBuilder = dyn Fn(&MessageBusConfig) -> Result<MessageClientPtr> + Send + Sync;

/// Process-global registry of custom client builders, keyed by
/// lower-cased type identifier.
static CUSTOM_TYPES: OnceLock<RwLock<HashMap<String, Arc<ClientBuilder>>>> = OnceLock::new();

fn custom_types() -> &'static RwLock<HashMap<String, Arc<ClientBuilder>>> {
    CUSTOM_TYPES.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Register a custom message bus client type for use by
/// [`new_message_client`].
///
/// `client_type` is normalized to lower case, so registration and
/// dispatch share a single canonical key space. Registering the same
/// identifier twice replaces the previous builder — last writer wins.
///
/// Registration cannot fail and is visible to every subsequent dispatch
/// in the process. A dispatch racing a registration for the same
/// identifier may resolve either way; register before any dependent
/// dispatch when deterministic resolution is required.
pub fn register_custom_type<F>(client_type: &str, builder: F)
where
    F: Fn(&MessageBusConfig) -> Result<MessageClientPtr> + Send + Sync + 'static,
{
    let lower_type = client_type.to_lowercase();

    // A poisoned lock only means another registration panicked mid-call;
    // the map itself is still structurally valid.
    let mut types = custom_types()
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    types.insert(lower_type, Arc::new(builder));
}

/// Look up a registered builder by its normalized key.
///
/// The builder is cloned out so the read guard is released before the
/// builder runs — a slow constructor cannot block registrations.
fn lookup_custom_type(lower_type: &str) -> Option<Arc<ClientBuilder>> {
    let types = custom_types()
        .read()
        .unwrap_or_else(PoisonError::into_inner);
    types.get(lower_type).cloned()
}

/// Factory function instantiating a message client for the type named in
/// the configuration.
///
/// Resolution order: built-in transports first (`"zero"`, `"mqtt"`,
/// `"redisstreams"`, case-insensitive), then the custom-type registry,
/// else [`Error::UnknownType`] carrying the original type string.
///
/// # Errors
///
/// - [`Error::HostInfoNotSet`] when both `publish_host` and
///   `subscribe_host` are empty; checked before any resolution.
/// - [`Error::UnknownType`] when the type matches nothing.
/// - [`Error::Disabled`] when a built-in's cargo feature is compiled out.
/// - Whatever the selected constructor returns, unchanged.
pub fn new_message_client(config: &MessageBusConfig) -> Result<MessageClientPtr> {
    // ---
    if config.publish_host.is_empty() && config.subscribe_host.is_empty() {
        return Err(Error::HostInfoNotSet);
    }

    match config.client_type.to_lowercase().as_str() {
        #[cfg(feature = "transport_zmq")]
        ZERO_MQ => transport::create_zmq_client(config),
        #[cfg(not(feature = "transport_zmq"))]
        ZERO_MQ => Err(Error::Disabled(ZERO_MQ)),

        #[cfg(feature = "transport_mqtt")]
        MQTT => transport::create_mqtt_client(config),
        #[cfg(not(feature = "transport_mqtt"))]
        MQTT => Err(Error::Disabled(MQTT)),

        #[cfg(feature = "transport_redis")]
        REDIS_STREAMS => transport::create_redis_streams_client(config),
        #[cfg(not(feature = "transport_redis"))]
        REDIS_STREAMS => Err(Error::Disabled(REDIS_STREAMS)),

        lower_type => match lookup_custom_type(lower_type) {
            Some(builder) => builder(config),
            None => Err(Error::UnknownType(config.client_type.clone())),
        },
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_builtin_identifiers_are_canonical() {
        // ---
        for name in [ZERO_MQ, MQTT, REDIS_STREAMS] {
            assert_eq!(name, name.to_lowercase());
        }
    }

    #[test]
    fn test_registration_normalizes_keys() {
        // ---
        register_custom_type("Factory-Inline-Test", |_| {
            Err(Error::Transport("unused".into()))
        });

        assert!(lookup_custom_type("factory-inline-test").is_some());

        // Lookup is by normalized key only.
        assert!(lookup_custom_type("Factory-Inline-Test").is_none());
    }
}
