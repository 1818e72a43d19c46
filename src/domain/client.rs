// src/domain/client.rs

//! Message client domain abstractions.
//!
//! This module defines the domain-level client interface implemented by
//! every transport. It intentionally avoids any reference to concrete
//! protocols, brokers, or client libraries.
//!
//! The client layer is responsible only for delivering opaque envelopes
//! between publishers and subscribers. Higher-level semantics such as
//! request correlation, retries, or timeouts belong to callers.
//!
//! Concrete implementations live under `src/transport/`.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use uuid::Uuid;

/// A message bus topic.
///
/// A `Topic` represents a destination to which envelopes may be
/// published. Its interpretation is transport-specific (MQTT topic,
/// ZeroMQ subscription prefix, Redis stream key), but it is treated as
/// an opaque identifier at the domain level.
///
/// Topics are immutable, cheap to clone, and safe to share across
/// threads. The domain layer makes no assumptions about topic syntax,
/// hierarchy, or wildcard behavior.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Topic(pub Arc<str>);

impl Topic {
    /// Borrow the topic as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<T> From<T> for Topic
where
    T: Into<Arc<str>>,
{
    fn from(value: T) -> Self {
        // ---
        Topic(value.into())
    }
}

/// An opaque message envelope.
///
/// A `MessageEnvelope` is the unit of transport between publishers and
/// subscribers. It carries a payload along with optional metadata used
/// by higher-level layers (such as cross-service correlation).
///
/// Transports do not interpret the payload or metadata fields; they are
/// responsible only for delivery.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Opaque payload bytes.
    ///
    /// The interpretation of this payload is defined by the applications
    /// on both ends of the bus.
    pub payload: Bytes,

    /// Identifier correlating this message across services.
    pub correlation_id: Option<Arc<str>>,

    /// Optional content type metadata (e.g., "application/json").
    ///
    /// This field is informational and not enforced by any transport.
    pub content_type: Option<Arc<str>>,
}

impl MessageEnvelope {
    // ---
    /// Create an envelope with a freshly generated correlation id.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        // ---
        Self {
            payload: payload.into(),
            correlation_id: Some(Uuid::new_v4().to_string().into()),
            content_type: None,
        }
    }

    /// Replace the correlation id.
    pub fn with_correlation_id(mut self, id: impl Into<Arc<str>>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Set the content type.
    pub fn with_content_type(mut self, content_type: impl Into<Arc<str>>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Handle returned from a successful subscription.
///
/// The subscription remains active until either:
/// - The handle is dropped (receiver channel closes and the transport
///   evicts the inbox on the next delivery)
/// - The client disconnects
pub struct SubscriptionHandle {
    // ---
    /// Receiver channel for envelopes delivered to this subscription.
    pub inbox: mpsc::Receiver<MessageEnvelope>,
}

/// Message bus client abstraction.
///
/// A `MessageClient` provides best-effort delivery of message envelopes
/// between publishers and subscribers over one concrete transport. It
/// defines the minimal contract the factory hands back to callers
/// without committing to any specific protocol or broker.
///
/// Implementations must ensure that:
/// - Construction performs no network IO; `connect()` owns connection
///   establishment.
/// - Once `subscribe()` returns successfully, envelopes published *after*
///   that point and matching the topic are deliverable.
/// - `publish()` is non-blocking with respect to subscribers.
///
/// # Notes
///
/// This trait uses `async_trait`; the expanded documentation may show
/// explicit lifetimes and a boxed `Future`. This is an implementation
/// detail — consumers should treat methods as normal `async fn`s.
#[async_trait::async_trait]
pub trait MessageClient: Send + Sync {
    // ---
    /// Establish the transport connection.
    ///
    /// Calling `connect` on an already-connected client is a no-op.
    async fn connect(&self) -> Result<()>;

    /// Publish an envelope to the given topic.
    async fn publish(&self, env: MessageEnvelope, topic: &Topic) -> Result<()>;

    /// Register a subscription and return a handle for receiving
    /// envelopes published to `topic`.
    async fn subscribe(&self, topic: Topic) -> Result<SubscriptionHandle>;

    /// Close the connection and release transport resources.
    async fn disconnect(&self) -> Result<()>;
}

/// Shared client pointer.
///
/// This is an `Arc<dyn MessageClient>`, which means:
/// - `.clone()` is cheap (only increments a reference count)
/// - Multiple clones share the same underlying connection
/// - Used to erase concrete transport types behind a stable domain interface.
pub type MessageClientPtr = Arc<dyn MessageClient>;
