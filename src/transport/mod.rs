//! Transport client implementations.
//!
//! This module provides concrete implementations of the domain-level
//! `MessageClient` trait. All transports are hidden behind feature flags
//! and exposed only through constructor functions.
//!
//! Factory and domain code must not depend on transport-specific types.

#[cfg(feature = "transport_mqtt")]
mod mqtt;

#[cfg(feature = "transport_redis")]
mod redis;

#[cfg(feature = "transport_zmq")]
mod zmq;

#[cfg(feature = "transport_mqtt")]
pub use mqtt::create_client as create_mqtt_client;

#[cfg(feature = "transport_redis")]
pub use redis::create_client as create_redis_streams_client;

#[cfg(feature = "transport_zmq")]
pub use zmq::create_client as create_zmq_client;
