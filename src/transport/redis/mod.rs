//! Redis Streams transport.
//!
//! Provides the `"redisstreams"` built-in: a `MessageClient` that
//! appends envelopes to Redis streams and tails them with blocking
//! reads.

mod streams;

pub use streams::create_client;
