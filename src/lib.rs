//! Pluggable message bus clients behind a uniform factory.
//!
//! This library provides a transport-agnostic [`MessageClient`]
//! abstraction together with a factory ([`new_message_client`]) that
//! selects a concrete implementation from a [`MessageBusConfig`]. Three
//! transports are built in — ZeroMQ pub/sub sockets (`"zero"`), MQTT
//! brokers (`"mqtt"`), and Redis Streams (`"redisstreams"`) — and
//! additional implementations can be plugged in at runtime with
//! [`register_custom_type`].
//!
//! ```no_run
//! use msgbus::{HostInfo, MessageBusConfig, Topic, MQTT};
//!
//! # async fn example() -> msgbus::Result<()> {
//! let config = MessageBusConfig::new(MQTT)
//!     .with_publish_host(HostInfo::new("localhost", 1883));
//!
//! let client = msgbus::new_message_client(&config)?;
//! client.connect().await?;
//!
//! let mut events = client.subscribe(Topic::from("events/#")).await?;
//! # Ok(())
//! # }
//! ```

// Import all sub modules once...
mod config;
mod domain;
mod error;
mod factory;
mod transport;

mod macros;

#[allow(unused_imports)]
pub(crate) use macros::{log_debug, log_error, log_info, log_warn};

// Re-export main types
pub use config::{HostInfo, MessageBusConfig};
pub use error::{Error, Result};

pub use factory::{
    //
    new_message_client,
    register_custom_type,
    ClientBuilder,
    MQTT,
    REDIS_STREAMS,
    ZERO_MQ,
};

#[cfg(feature = "transport_mqtt")]
pub use transport::create_mqtt_client;

#[cfg(feature = "transport_redis")]
pub use transport::create_redis_streams_client;

#[cfg(feature = "transport_zmq")]
pub use transport::create_zmq_client;

// --- public re-exports
pub use domain::{
    //
    MessageClient,
    MessageClientPtr,
    MessageEnvelope,
    SubscriptionHandle,
    Topic,
};
