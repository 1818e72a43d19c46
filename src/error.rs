use thiserror::Error;

/// Errors surfaced by the client factory and the transport clients.
#[derive(Error, Debug)]
pub enum Error {
    /// Neither the publish nor the subscribe endpoint is configured.
    #[error("unable to create message client: host info not set")]
    HostInfoNotSet,

    /// The requested client type matches no built-in transport and no
    /// registered custom builder. Carries the original, non-normalized
    /// type string.
    #[error("unknown message type '{0}' requested")]
    UnknownType(String),

    /// A built-in transport whose cargo feature is compiled out.
    #[error("message type '{0}' is not compiled into this build")]
    Disabled(&'static str),

    /// Operation requires a connected client.
    #[error("client is not connected to the message bus")]
    Disconnected,

    /// Transport-level construction or IO failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Wire envelope encode or decode failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for message bus operations.
pub type Result<T> = std::result::Result<T, Error>;
