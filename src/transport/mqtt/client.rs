//! MQTT client implementation using `rumqttc`.
//!
//! This module implements the `MessageClient` trait on top of an MQTT
//! broker connection. It follows an **actor-based concurrency model**:
//!
//! - A single background **actor task** owns the MQTT `EventLoop`.
//! - The actor is responsible for:
//!   - publishing outbound envelopes via `AsyncClient`,
//!   - registering broker subscriptions,
//!   - polling the `EventLoop` for incoming publishes,
//!   - clean shutdown of the connection.
//! - All interaction with the MQTT client is serialized through this
//!   actor; no other task ever touches the event loop directly.
//!
//! ## Connection behavior
//!
//! Construction only interprets the configuration into `MqttOptions`;
//! `connect()` spawns the actor, and the broker connection itself is
//! lazy — it happens when the EventLoop first polls. ConnAck
//! success/failure is logged at info/error level respectively.
//!
//! ## Message delivery semantics
//!
//! Incoming MQTT publishes are **demultiplexed by topic** and **fanned
//! out** to all local subscribers registered for that topic:
//!
//! - Fanout delivers envelopes to *all* subscribers.
//! - Delivery is best-effort and non-durable.
//! - There is no replay, persistence, or retained-message support.
//!
//! Each call to `subscribe()` registers a new local inbox channel.
//! Multiple subscribers for the same topic are supported. Broker
//! subscription acknowledgement is asynchronous: `subscribe()` succeeds
//! once the request is handed to the event loop, and a rejected
//! subscription surfaces in the actor's log.
//!
//! ## Configuration
//!
//! The broker address comes from `publish_host` (falling back to
//! `subscribe_host` — MQTT uses one broker connection for both
//! directions). Recognized `optional` keys: `ClientId`, `Username`,
//! `Password`, `KeepAlive` (seconds), `Qos` (0/1/2). Invalid values are
//! construction-time failures.
//!
//! This module intentionally avoids exposing MQTT-specific concepts
//! (retain flags, session state) outside the transport boundary.

use rumqttc::{
    //
    AsyncClient,
    ConnectReturnCode,
    Event,
    EventLoop,
    MqttOptions,
    Packet,
    Publish,
    QoS,
};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, RwLock};

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

// Optional-property keys understood by this transport.
const OPT_CLIENT_ID: &str = "ClientId";
const OPT_USERNAME: &str = "Username";
const OPT_PASSWORD: &str = "Password";
const OPT_KEEP_ALIVE: &str = "KeepAlive";
const OPT_QOS: &str = "Qos";

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
    async fn handle(self, actor: &mut MqttActor) -> ActorStep {
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
                actor.handle_close().await;
                let _ = resp.send(Ok(()));
                ActorStep::Stop
            }
        }
    }
}

/// MQTT-backed implementation of [`MessageClient`].
///
/// Represents a single broker connection providing best-effort,
/// non-durable envelope delivery. The connection is established by
/// `connect()` and lazy on the first event-loop poll after that.
pub struct MqttClient {
    // ---
    client_id: String,
    options: MqttOptions,
    qos: QoS,
    cmd_tx: RwLock<Option<mpsc::Sender<Cmd>>>,
    subscribers: SubscriberMap,
}

impl MqttClient {
    // ---

    async fn command_sender(&self) -> Result<mpsc::Sender<Cmd>> {
        // ---
        self.cmd_tx.read().await.clone().ok_or(Error::Disconnected)
    }
}

struct MqttActor {
    // ---
    client_id: String, // for logging only
    client: AsyncClient,
    event_loop: EventLoop,
    qos: QoS,
    cmd_rx: mpsc::Receiver<Cmd>,
    subscribers: SubscriberMap,
    reconnect: bool,
}

impl MqttActor {
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

                event = self.event_loop.poll() => {
                    match event {
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            let client_id = self.client_id.clone();
                            let subscribers = Arc::clone(&self.subscribers);
                            Self::handle_incoming(client_id, subscribers, publish).await;
                        }
                        Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                            self.handle_connack(connack).await;
                        }
                        Ok(_event) => {
                            // Other events (PingResp, PubAck, etc.) - ignore
                            log_debug!("{}: received mqtt event (ignored): {:?}",
                                       self.client_id, _event);
                        }
                        Err(err) => {
                            log_error!("{}: mqtt connection error: {err}", self.client_id);
                            self.reconnect = true;
                            tokio::time::sleep(RECONNECT_DELAY).await;
                        }
                    }
                }
            }
        }
    }

    /// Publishes a serialized envelope to the broker at the configured QoS.
    async fn handle_publish(&mut self, topic: String, payload: Vec<u8>) -> Result<()> {
        // ---

        self.client
            .publish(&topic, self.qos, false, payload)
            .await
            .map_err(|err| Error::Transport(format!("publish to '{topic}' failed: {err}")))
    }

    /// Registers a broker subscription.
    ///
    /// The request is handed to the event loop and acknowledged by the
    /// broker asynchronously; a rejected subscription surfaces in the
    /// event-loop log rather than here.
    async fn handle_subscribe(&mut self, topic: String) -> Result<()> {
        // ---

        self.client
            .subscribe(&topic, self.qos)
            .await
            .map_err(|err| Error::Transport(format!("subscribe to '{topic}' failed: {err}")))
    }

    /// Processes connection acknowledgment from the broker.
    ///
    /// Logs the result, and after a reconnect re-registers every topic
    /// with local subscribers so deliveries resume.
    async fn handle_connack(&mut self, connack: rumqttc::ConnAck) {
        // ---

        if connack.code != ConnectReturnCode::Success {
            log_error!(
                "{}: broker refused connection: {:?}",
                self.client_id,
                connack.code
            );
            return;
        }

        log_info!("{}: connected to broker", self.client_id);

        if self.reconnect {
            self.reconnect = false;

            let topics: Vec<String> = {
                let map = self.subscribers.read().await;
                map.keys().cloned().collect()
            };

            for topic in topics {
                if let Err(err) = self.client.subscribe(&topic, self.qos).await {
                    log_error!("{}: resubscribe failed for {topic}: {err}", self.client_id);
                } else {
                    log_info!("{}: resubscribed to {topic}", self.client_id);
                }
            }
        }
    }

    /// Disconnects from the MQTT broker.
    async fn handle_close(&mut self) {
        // ---

        log_debug!("{}: disconnecting mqtt client", self.client_id);

        if let Err(_err) = self.client.disconnect().await {
            log_debug!("{}: mqtt disconnect failed: {_err}", self.client_id);
        }
    }

    /// Processes incoming MQTT publishes and fans them out to local
    /// subscribers.
    ///
    /// Deserializes the envelope, looks up subscribers for the topic, and
    /// delivers to all live inboxes. Dead or full inboxes are evicted
    /// during delivery.
    async fn handle_incoming(_client_id: String, subscribers: SubscriberMap, publish: Publish) {
        // ---

        let topic = publish.topic.clone();

        let env = match serde_json::from_slice::<MessageEnvelope>(&publish.payload) {
            Ok(env) => env,
            Err(_err) => {
                log_debug!("{_client_id}: invalid envelope on topic {topic}: {_err}");
                return;
            }
        };

        let senders = {
            let map = subscribers.read().await;
            map.get(&topic).cloned()
        };

        let Some(senders) = senders else {
            // No subscribers for this topic
            return;
        };

        let original_len = senders.len();
        let mut survivors = Vec::with_capacity(original_len);

        for tx in senders {
            match tx.try_send(env.clone()) {
                Ok(()) => survivors.push(tx),
                Err(_) => {
                    // Channel is full or receiver was dropped; evict.
                }
            }
        }

        if survivors.len() != original_len {
            let mut map = subscribers.write().await;
            map.insert(topic, survivors);
        }
    }
} // MqttActor

#[async_trait::async_trait]
impl MessageClient for MqttClient {
    // ---

    async fn connect(&self) -> Result<()> {
        // ---

        let mut cmd_tx = self.cmd_tx.write().await;
        if cmd_tx.is_some() {
            // Already connected
            return Ok(());
        }

        let (client, event_loop) = AsyncClient::new(self.options.clone(), 16);
        let (tx, rx) = mpsc::channel(64);

        let actor = MqttActor {
            client_id: self.client_id.clone(),
            client,
            event_loop,
            qos: self.qos,
            cmd_rx: rx,
            subscribers: Arc::clone(&self.subscribers),
            reconnect: false,
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

/// Create a broker-based MQTT client from the given configuration.
///
/// Construction interprets the configuration into `MqttOptions` and
/// validates the optional properties; it performs no network IO.
///
/// # Errors
///
/// Returns an error if:
/// - Neither host carries a usable endpoint
/// - `KeepAlive` is not an integer number of seconds
/// - `Qos` is not one of `0`, `1`, `2`
pub fn create_client(config: &MessageBusConfig) -> Result<MessageClientPtr> {
    // ---

    let broker = broker_host(config)?;

    let client_id = config
        .optional
        .get(OPT_CLIENT_ID)
        .cloned()
        .unwrap_or_else(|| format!("msgbus-{}", uuid::Uuid::new_v4()));

    let mut options = MqttOptions::new(&client_id, &broker.host, broker.port);

    if let (Some(username), Some(password)) = (
        config.optional.get(OPT_USERNAME),
        config.optional.get(OPT_PASSWORD),
    ) {
        options.set_credentials(username, password);
    }

    if let Some(keep_alive) = config.optional.get(OPT_KEEP_ALIVE) {
        let secs: u64 = keep_alive
            .parse()
            .map_err(|_| Error::Transport(format!("invalid KeepAlive value '{keep_alive}'")))?;
        options.set_keep_alive(Duration::from_secs(secs));
    }

    let qos = match config.optional.get(OPT_QOS) {
        Some(qos) => parse_qos(qos)?,
        None => QoS::AtMostOnce,
    };

    Ok(Arc::new(MqttClient {
        client_id,
        options,
        qos,
        cmd_tx: RwLock::new(None),
        subscribers: Arc::new(RwLock::new(HashMap::new())),
    }))
}

/// The broker address: MQTT uses one broker connection for both
/// directions, so either configured host names it.
fn broker_host(config: &MessageBusConfig) -> Result<&HostInfo> {
    // ---

    if !config.publish_host.is_empty() {
        Ok(&config.publish_host)
    } else if !config.subscribe_host.is_empty() {
        Ok(&config.subscribe_host)
    } else {
        Err(Error::HostInfoNotSet)
    }
}

fn parse_qos(value: &str) -> Result<QoS> {
    // ---
    match value {
        "0" => Ok(QoS::AtMostOnce),
        "1" => Ok(QoS::AtLeastOnce),
        "2" => Ok(QoS::ExactlyOnce),
        other => Err(Error::Transport(format!("invalid Qos value '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::HostInfo;

    #[test]
    fn test_parse_qos_levels() {
        // ---
        assert_eq!(parse_qos("0").unwrap(), QoS::AtMostOnce);
        assert_eq!(parse_qos("1").unwrap(), QoS::AtLeastOnce);
        assert_eq!(parse_qos("2").unwrap(), QoS::ExactlyOnce);
        assert!(parse_qos("3").is_err());
        assert!(parse_qos("once").is_err());
    }

    #[test]
    fn test_broker_host_falls_back_to_subscribe_side() {
        // ---
        let config =
            MessageBusConfig::new("mqtt").with_subscribe_host(HostInfo::new("broker", 1883));

        let host = broker_host(&config).unwrap();
        assert_eq!(host.host, "broker");
    }

    #[test]
    fn test_invalid_keep_alive_fails_construction() {
        // ---
        let config = MessageBusConfig::new("mqtt")
            .with_publish_host(HostInfo::new("localhost", 1883))
            .with_optional("KeepAlive", "soon");

        assert!(create_client(&config).is_err());
    }

    #[test]
    fn test_construction_needs_no_running_broker() {
        // ---
        let config = MessageBusConfig::new("mqtt")
            .with_publish_host(HostInfo::new("localhost", 1883))
            .with_optional("ClientId", "unit-test")
            .with_optional("Qos", "1");

        assert!(create_client(&config).is_ok());
    }
}
