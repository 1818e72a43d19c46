//! Redis Streams client implementation using `redis`.
//!
//! This module implements the `MessageClient` trait over Redis streams:
//! each topic is a stream key, `publish` appends an entry with `XADD`,
//! and each subscription tails the stream with blocking `XREAD` reads.
//!
//! ## Connection model
//!
//! A blocking read would stall every command multiplexed onto the same
//! connection, so connections are split by role:
//!
//! - one shared multiplexed connection for `XADD` publishes,
//! - one dedicated connection per subscription, owned by a background
//!   **reader task** that loops on `XREAD BLOCK`.
//!
//! ## Subscription lifecycle
//!
//! Readers start at `$` — only entries appended after the subscription
//! are delivered; there is no replay of stream history. A reader stops
//! when the client disconnects (watch-channel shutdown signal) or when
//! its inbox handle is dropped. Read errors are retried after a delay
//! rather than tearing the subscription down.
//!
//! ## Message delivery semantics
//!
//! Unlike the socket transports there is no shared fan-out map: every
//! subscription tails the stream independently through its own reader,
//! so multiple subscribers to one topic each receive every entry.

use std::sync::Arc;
use std::time::Duration;

use redis::aio::MultiplexedConnection;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;

use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;

use crate::{
    //
    log_debug,
    log_error,
    log_info,
    Error,
    HostInfo,
    MessageBusConfig,
    MessageClient,
    MessageClientPtr,
    MessageEnvelope,
    Result,
    SubscriptionHandle,
    Topic,
};

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Field under which the JSON envelope is stored in each stream entry.
const ENVELOPE_FIELD: &str = "envelope";

/// How long a reader blocks in XREAD before re-checking for shutdown.
const READ_BLOCK_MILLIS: usize = 1000;

const READ_BATCH: usize = 16;

type TaskList = RwLock<Vec<JoinHandle<()>>>;

/// Redis-Streams-backed implementation of [`MessageClient`].
pub struct RedisStreamsClient {
    // ---
    client: redis::Client,
    conn: RwLock<Option<MultiplexedConnection>>,
    readers: TaskList,
    quit_tx: watch::Sender<bool>,
}

/// Tails one stream and forwards decoded envelopes to its inbox.
struct StreamReader {
    // ---
    topic: String,
    conn: MultiplexedConnection,
    inbox: mpsc::Sender<MessageEnvelope>,
    quit: watch::Receiver<bool>,
}

impl StreamReader {
    // ---

    async fn run(mut self) {
        // ---

        // Only entries appended after the subscription are delivered.
        let mut last_id = String::from("$");

        loop {
            let options = StreamReadOptions::default()
                .block(READ_BLOCK_MILLIS)
                .count(READ_BATCH);

            tokio::select! {
                changed = self.quit.changed() => {
                    if changed.is_err() || *self.quit.borrow() {
                        break;
                    }
                }

                reply = Self::read(&mut self.conn, &self.topic, &last_id, &options) => {
                    match reply {
                        Ok(reply) => {
                            if !self.deliver(reply, &mut last_id).await {
                                // Inbox handle dropped
                                break;
                            }
                        }
                        Err(_err) => {
                            log_error!("xread on '{}' failed: {_err}", self.topic);
                            tokio::time::sleep(RECONNECT_DELAY).await;
                        }
                    }
                }
            }
        }

        log_debug!("stream reader for '{}' stopped", self.topic);
    }

    async fn read(
        conn: &mut MultiplexedConnection,
        topic: &str,
        last_id: &str,
        options: &StreamReadOptions,
    ) -> redis::RedisResult<StreamReadReply> {
        // ---
        conn.xread_options(&[topic], &[last_id], options).await
    }

    /// Forwards every decoded entry to the inbox, advancing `last_id`.
    ///
    /// Returns false once the inbox handle is dropped so the reader can
    /// stop.
    async fn deliver(&self, reply: StreamReadReply, last_id: &mut String) -> bool {
        // ---

        for stream in reply.keys {
            for entry in stream.ids {
                *last_id = entry.id.clone();

                let Some(value) = entry.map.get(ENVELOPE_FIELD) else {
                    log_debug!(
                        "stream '{}' entry {} has no envelope field",
                        self.topic,
                        entry.id
                    );
                    continue;
                };

                let Ok(raw) = redis::from_redis_value::<Vec<u8>>(value) else {
                    log_debug!("stream '{}' entry {} is not bytes", self.topic, entry.id);
                    continue;
                };

                match serde_json::from_slice::<MessageEnvelope>(&raw) {
                    Ok(env) => {
                        if self.inbox.send(env).await.is_err() {
                            return false;
                        }
                    }
                    Err(_err) => {
                        log_debug!("invalid envelope on stream '{}': {_err}", self.topic);
                    }
                }
            }
        }

        true
    }
} // StreamReader

#[async_trait::async_trait]
impl MessageClient for RedisStreamsClient {
    // ---

    async fn connect(&self) -> Result<()> {
        // ---

        let mut conn = self.conn.write().await;
        if conn.is_some() {
            // Already connected
            return Ok(());
        }

        let connection = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|err| Error::Transport(format!("redis connect failed: {err}")))?;

        // Reset the shutdown signal so readers started after a
        // reconnect observe a live client.
        self.quit_tx.send_replace(false);

        *conn = Some(connection);
        log_info!("connected to redis");
        Ok(())
    }

    async fn publish(&self, env: MessageEnvelope, topic: &Topic) -> Result<()> {
        // ---

        let Some(conn) = self.conn.read().await.clone() else {
            return Err(Error::Disconnected);
        };
        let mut conn = conn;

        let payload = serde_json::to_vec(&env)?;

        let _id: String = conn
            .xadd(topic.as_str(), "*", &[(ENVELOPE_FIELD, payload)])
            .await
            .map_err(|err| {
                Error::Transport(format!("xadd to '{}' failed: {err}", topic.as_str()))
            })?;

        Ok(())
    }

    async fn subscribe(&self, topic: Topic) -> Result<SubscriptionHandle> {
        // ---

        if self.conn.read().await.is_none() {
            return Err(Error::Disconnected);
        }

        // Dedicated connection: the reader blocks in XREAD and must not
        // stall the shared publish connection.
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|err| Error::Transport(format!("redis connect failed: {err}")))?;

        let (inbox_tx, inbox_rx) = mpsc::channel(16);

        let reader = StreamReader {
            topic: topic.as_str().to_string(),
            conn,
            inbox: inbox_tx,
            quit: self.quit_tx.subscribe(),
        };

        let handle = tokio::spawn(reader.run());
        self.readers.write().await.push(handle);

        Ok(SubscriptionHandle { inbox: inbox_rx })
    }

    async fn disconnect(&self) -> Result<()> {
        // ---

        let mut conn = self.conn.write().await;
        if conn.take().is_none() {
            // Never connected, nothing to release
            return Ok(());
        }

        // Wake blocked readers and wait for them to finish.
        let _ = self.quit_tx.send(true);

        let mut readers = self.readers.write().await;
        while let Some(handle) = readers.pop() {
            let _ = handle.await;
        }

        Ok(())
    }
}

/// Create a Redis Streams client from the given configuration.
///
/// Construction validates the endpoint URL via `redis::Client::open`;
/// it performs no network IO. Connections are opened by
/// [`MessageClient::connect`].
///
/// # Errors
///
/// Returns an error if neither host carries a usable endpoint or the
/// endpoint does not parse as a redis URL.
pub fn create_client(config: &MessageBusConfig) -> Result<MessageClientPtr> {
    // ---

    let host = stream_host(config)?;
    let url = format!("redis://{}:{}", host.host, host.port);

    let client = redis::Client::open(url.as_str())
        .map_err(|err| Error::Transport(format!("invalid redis endpoint {url}: {err}")))?;

    let (quit_tx, _) = watch::channel(false);

    Ok(Arc::new(RedisStreamsClient {
        client,
        conn: RwLock::new(None),
        readers: RwLock::new(Vec::new()),
        quit_tx,
    }))
}

/// The stream server address: streams flow through a single server, so
/// either configured host names it.
fn stream_host(config: &MessageBusConfig) -> Result<&HostInfo> {
    // ---

    if !config.publish_host.is_empty() {
        Ok(&config.publish_host)
    } else if !config.subscribe_host.is_empty() {
        Ok(&config.subscribe_host)
    } else {
        Err(Error::HostInfoNotSet)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::HostInfo;

    #[test]
    fn test_construction_needs_no_running_server() {
        // ---
        let config =
            MessageBusConfig::new("redisstreams").with_publish_host(HostInfo::new("localhost", 6379));

        assert!(create_client(&config).is_ok());
    }

    #[test]
    fn test_malformed_host_fails_construction() {
        // ---
        let config = MessageBusConfig::new("redisstreams")
            .with_publish_host(HostInfo::new("bad host", 6379));

        assert!(create_client(&config).is_err());
    }

    #[test]
    fn test_stream_host_falls_back_to_subscribe_side() {
        // ---
        let config = MessageBusConfig::new("redisstreams")
            .with_subscribe_host(HostInfo::new("stream-server", 6379));

        let host = stream_host(&config).unwrap();
        assert_eq!(host.host, "stream-server");
    }
}
