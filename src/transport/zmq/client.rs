//! ZeroMQ client implementation using the pure-Rust `zeromq` crate.
//!
//! This module implements the `MessageClient` trait over a pair of
//! pub/sub sockets. It follows the same **actor-based concurrency
//! model** as the MQTT transport:
//!
//! - A single background **actor task** owns both sockets.
//! - The actor is responsible for:
//!   - publishing outbound envelopes via the PUB socket,
//!   - registering subscription prefixes on the SUB socket,
//!   - polling the SUB socket for incoming messages,
//!   - dropping both sockets on shutdown.
//! - All socket interaction is serialized through this actor; no other
//!   task ever touches a socket directly.
//!
//! ## Socket roles
//!
//! ZeroMQ is brokerless, so the two configured hosts play different
//! roles: the PUB socket **binds** at `publish_host` (peers connect to
//! us to receive), and the SUB socket **connects** to `subscribe_host`
//! (we attach to a remote publisher). Either side may be absent —
//! publishing without a publish endpoint (or subscribing without a
//! subscribe endpoint) is a transport error.
//!
//! ## Wire format
//!
//! Envelopes travel as two-frame messages: the topic, then the
//! JSON-encoded envelope. Subscription filtering is ZeroMQ prefix
//! matching on the topic frame, applied by the socket itself.
//!
//! ## Message delivery semantics
//!
//! Incoming messages are demultiplexed by topic frame and fanned out to
//! all local subscribers registered for that topic, matching the MQTT
//! transport contract: best-effort, non-durable, no replay. Dead or
//! full inboxes are evicted during delivery.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, RwLock};

use zeromq::{
    //
    PubSocket,
    Socket,
    SocketRecv,
    SocketSend,
    SubSocket,
    ZmqMessage,
};

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

// Schemes the zeromq crate can dial.
const SUPPORTED_SCHEMES: &[&str] = &["tcp", "ipc", "inproc"];

type SubscriberMap = Arc<RwLock<HashMap<String, Vec<mpsc::Sender<MessageEnvelope>>>>>;

//
// Actor commands
//

enum Cmd {
    //
    Publish {
        topic: String,
        payload: Vec<u8>,
        resp: oneshot::Sender<Result<()>>,
    },
    Subscribe {
        topic: String,
        resp: oneshot::Sender<Result<()>>,
    },
    Close {
        resp: oneshot::Sender<Result<()>>,
    },
}

enum ActorStep {
    //
    Continue,
    Stop,
}

impl Cmd {
    // ---

    /// Dispatches an actor command to the correct handler on the actor
    async fn handle(self, actor: &mut ZmqActor) -> ActorStep {
        // ---

        match self {
            Cmd::Publish {
                topic,
                payload,
                resp,
            } => {
                let result = actor.handle_publish(topic, payload).await;
                let _ = resp.send(result);
                ActorStep::Continue
            }
            Cmd::Subscribe { topic, resp } => {
                let result = actor.handle_subscribe(topic).await;
                let _ = resp.send(result);
                ActorStep::Continue
            }
            Cmd::Close { resp } => {
                // Sockets close when the actor drops them.
                let _ = resp.send(Ok(()));
                ActorStep::Stop
            }
        }
    }
}

/// ZeroMQ-backed implementation of [`MessageClient`].
pub struct ZmqClient {
    // ---
    publish_endpoint: Option<String>,
    subscribe_endpoint: Option<String>,
    cmd_tx: RwLock<Option<mpsc::Sender<Cmd>>>,
    subscribers: SubscriberMap,
}

impl ZmqClient {
    // ---

    async fn command_sender(&self) -> Result<mpsc::Sender<Cmd>> {
        // ---
        self.cmd_tx.read().await.clone().ok_or(Error::Disconnected)
    }
}

struct ZmqActor {
    // ---
    pub_socket: Option<PubSocket>,
    sub_socket: Option<SubSocket>,
    cmd_rx: mpsc::Receiver<Cmd>,
    subscribers: SubscriberMap,
}

impl ZmqActor {
    // ---

    async fn run(mut self) {
        // ---

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if matches!(cmd.handle(&mut self).await, ActorStep::Stop) {
                                break;
                            }
                        }
                        None => break,
                    }
                }

                incoming = Self::next_message(&mut self.sub_socket) => {
                    match incoming {
                        Ok(message) => self.handle_incoming(message).await,
                        Err(_err) => {
                            log_error!("zmq receive failed: {_err}");
                        }
                    }
                }
            }
        }
    }

    /// Next message from the SUB socket.
    ///
    /// Pends forever when no subscribe endpoint is configured, so the
    /// select loop only serves commands.
    async fn next_message(
        socket: &mut Option<SubSocket>,
    ) -> std::result::Result<ZmqMessage, zeromq::ZmqError> {
        // ---

        match socket {
            Some(socket) => socket.recv().await,
            None => std::future::pending().await,
        }
    }

    /// Publishes an envelope as a two-frame message: topic, then JSON.
    async fn handle_publish(&mut self, topic: String, payload: Vec<u8>) -> Result<()> {
        // ---

        let Some(socket) = self.pub_socket.as_mut() else {
            return Err(Error::Transport(
                "publish endpoint not configured".to_string(),
            ));
        };

        let mut message = ZmqMessage::from(topic);
        message.push_back(payload.into());

        socket
            .send(message)
            .await
            .map_err(|err| Error::Transport(format!("zmq publish failed: {err}")))
    }

    /// Registers a prefix subscription on the SUB socket.
    async fn handle_subscribe(&mut self, topic: String) -> Result<()> {
        // ---

        let Some(socket) = self.sub_socket.as_mut() else {
            return Err(Error::Transport(
                "subscribe endpoint not configured".to_string(),
            ));
        };

        socket
            .subscribe(&topic)
            .await
            .map_err(|err| Error::Transport(format!("zmq subscribe to '{topic}' failed: {err}")))
    }

    /// Fans an incoming two-frame message out to local subscribers.
    ///
    /// Prefix filtering already happened at the socket; local routing is
    /// by exact topic-frame match. Dead or full inboxes are evicted.
    async fn handle_incoming(&self, message: ZmqMessage) {
        // ---

        let frames = message.into_vec();
        if frames.len() != 2 {
            log_debug!("dropping zmq message with {} frames", frames.len());
            return;
        }

        let topic = String::from_utf8_lossy(&frames[0]).into_owned();

        let env = match serde_json::from_slice::<MessageEnvelope>(&frames[1]) {
            Ok(env) => env,
            Err(_err) => {
                log_debug!("invalid envelope on topic {topic}: {_err}");
                return;
            }
        };

        let senders = {
            let map = self.subscribers.read().await;
            map.get(&topic).cloned()
        };

        let Some(senders) = senders else {
            // No subscribers for this topic
            return;
        };

        let original_len = senders.len();
        let mut survivors = Vec::with_capacity(original_len);

        for tx in senders {
            if tx.try_send(env.clone()).is_ok() {
                survivors.push(tx);
            }
        }

        if survivors.len() != original_len {
            let mut map = self.subscribers.write().await;
            map.insert(topic, survivors);
        }
    }
} // ZmqActor

#[async_trait::async_trait]
impl MessageClient for ZmqClient {
    // ---

    async fn connect(&self) -> Result<()> {
        // ---

        let mut cmd_tx = self.cmd_tx.write().await;
        if cmd_tx.is_some() {
            // Already connected
            return Ok(());
        }

        let mut pub_socket = None;
        if let Some(endpoint) = &self.publish_endpoint {
            let mut socket = PubSocket::new();
            socket.bind(endpoint).await.map_err(|err| {
                Error::Transport(format!("failed to bind publish socket at {endpoint}: {err}"))
            })?;
            log_info!("bound publish socket at {endpoint}");
            pub_socket = Some(socket);
        }

        let mut sub_socket = None;
        if let Some(endpoint) = &self.subscribe_endpoint {
            let mut socket = SubSocket::new();
            socket.connect(endpoint).await.map_err(|err| {
                Error::Transport(format!(
                    "failed to connect subscribe socket to {endpoint}: {err}"
                ))
            })?;
            log_info!("connected subscribe socket to {endpoint}");
            sub_socket = Some(socket);
        }

        let (tx, rx) = mpsc::channel(64);

        let actor = ZmqActor {
            pub_socket,
            sub_socket,
            cmd_rx: rx,
            subscribers: Arc::clone(&self.subscribers),
        };

        tokio::spawn(actor.run());

        *cmd_tx = Some(tx);
        Ok(())
    }

    async fn publish(&self, env: MessageEnvelope, topic: &Topic) -> Result<()> {
        // ---

        let cmd_tx = self.command_sender().await?;
        let payload = serde_json::to_vec(&env)?;

        let (resp_tx, resp_rx) = oneshot::channel();

        cmd_tx
            .send(Cmd::Publish {
                topic: topic.as_str().to_string(),
                payload,
                resp: resp_tx,
            })
            .await
            .map_err(|_| Error::Disconnected)?;

        resp_rx.await.map_err(|_| Error::Disconnected)?
    }

    async fn subscribe(&self, topic: Topic) -> Result<SubscriptionHandle> {
        // ---

        let cmd_tx = self.command_sender().await?;
        let topic = topic.as_str().to_string();

        let (inbox_tx, inbox_rx) = mpsc::channel(16);
        {
            let mut map = self.subscribers.write().await;
            map.entry(topic.clone()).or_default().push(inbox_tx);
        }

        let (resp_tx, resp_rx) = oneshot::channel();

        cmd_tx
            .send(Cmd::Subscribe {
                topic,
                resp: resp_tx,
            })
            .await
            .map_err(|_| Error::Disconnected)?;

        resp_rx.await.map_err(|_| Error::Disconnected)??;

        Ok(SubscriptionHandle { inbox: inbox_rx })
    }

    async fn disconnect(&self) -> Result<()> {
        // ---

        let mut cmd_tx = self.cmd_tx.write().await;
        let Some(tx) = cmd_tx.take() else {
            // Never connected, nothing to release
            return Ok(());
        };

        let (resp_tx, resp_rx) = oneshot::channel();
        let _ = tx.send(Cmd::Close { resp: resp_tx }).await;
        let _ = resp_rx.await;

        Ok(())
    }
}

/// Create a ZeroMQ pub/sub client from the given configuration.
///
/// Construction validates endpoint schemes and records the endpoints;
/// sockets are created, bound, and connected by
/// [`MessageClient::connect`].
///
/// # Errors
///
/// Returns an error if a configured host uses a scheme the zeromq crate
/// cannot dial (supported: `tcp`, `ipc`, `inproc`).
pub fn create_client(config: &MessageBusConfig) -> Result<MessageClientPtr> {
    // ---

    let publish_endpoint = endpoint(&config.publish_host)?;
    let subscribe_endpoint = endpoint(&config.subscribe_host)?;

    Ok(Arc::new(ZmqClient {
        publish_endpoint,
        subscribe_endpoint,
        cmd_tx: RwLock::new(None),
        subscribers: Arc::new(RwLock::new(HashMap::new())),
    }))
}

fn endpoint(host: &HostInfo) -> Result<Option<String>> {
    // ---

    if host.is_empty() {
        return Ok(None);
    }

    if !SUPPORTED_SCHEMES.contains(&host.protocol.as_str()) {
        return Err(Error::Transport(format!(
            "unsupported zmq scheme '{}'",
            host.protocol
        )));
    }

    Ok(Some(host.url()))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::HostInfo;

    #[test]
    fn test_construction_records_both_endpoints() {
        // ---
        let config = MessageBusConfig::new("zero")
            .with_publish_host(HostInfo::new("127.0.0.1", 5563))
            .with_subscribe_host(HostInfo::new("127.0.0.1", 5564));

        assert!(create_client(&config).is_ok());
    }

    #[test]
    fn test_subscribe_only_construction_is_valid() {
        // ---
        let config =
            MessageBusConfig::new("zero").with_subscribe_host(HostInfo::new("127.0.0.1", 5564));

        assert!(create_client(&config).is_ok());
    }

    #[test]
    fn test_unsupported_scheme_fails_construction() {
        // ---
        let config = MessageBusConfig::new("zero")
            .with_publish_host(HostInfo::new("127.0.0.1", 5563).with_protocol("http"));

        assert!(create_client(&config).is_err());
    }
}
