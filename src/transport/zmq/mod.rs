//! ZeroMQ pub/sub socket transport.
//!
//! Provides the `"zero"` built-in: a brokerless `MessageClient` whose
//! publish side binds a PUB socket and whose subscribe side connects a
//! SUB socket.

mod client;

pub use client::create_client;
