//! Broker-based MQTT transport.
//!
//! Provides the `"mqtt"` built-in: a `MessageClient` backed by an MQTT
//! broker connection via `rumqttc`.
//!
//! - Actor-owned event loop; lazy broker connection
//! - Envelopes travel as JSON payloads on plain MQTT topics
//! - Automatic resubscribe after reconnect

mod client;

pub use client::create_client;
