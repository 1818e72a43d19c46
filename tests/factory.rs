// tests/factory.rs

//! Factory dispatch and registry behavior.
//!
//! The builder registry is process-global and these tests run in
//! parallel, so every test registers under its own unique type name.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tokio::time::{timeout, Duration};

use msgbus::{
    //
    new_message_client,
    register_custom_type,
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

fn host(port: u16) -> HostInfo {
    HostInfo::new("localhost", port)
}

/// Dispatch, discarding the client so the result is inspectable.
fn dispatch(config: &MessageBusConfig) -> std::result::Result<(), Error> {
    new_message_client(config).map(|_| ())
}

/// Minimal in-process client used by custom-builder tests.
///
/// Routes envelopes between its own subscribers by exact topic match,
/// simulating a bus within the test process.
struct LoopbackClient {
    // ---
    subscriptions: RwLock<HashMap<String, Vec<mpsc::Sender<MessageEnvelope>>>>,
}

impl LoopbackClient {
    fn create() -> MessageClientPtr {
        // ---
        Arc::new(Self {
            subscriptions: RwLock::new(HashMap::new()),
        })
    }
}

#[async_trait::async_trait]
impl MessageClient for LoopbackClient {
    // ---

    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn publish(&self, env: MessageEnvelope, topic: &Topic) -> Result<()> {
        // ---
        let subs = self.subscriptions.read().await;

        if let Some(senders) = subs.get(topic.as_str()) {
            for sender in senders {
                let _ = sender.send(env.clone()).await;
            }
        }

        Ok(())
    }

    async fn subscribe(&self, topic: Topic) -> Result<SubscriptionHandle> {
        // ---
        let (tx, rx) = mpsc::channel(16);

        let mut subs = self.subscriptions.write().await;
        subs.entry(topic.as_str().to_string()).or_default().push(tx);

        Ok(SubscriptionHandle { inbox: rx })
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
}

#[test]
fn rejects_config_with_no_hosts() {
    // ---
    // The host check runs before type resolution, so even unknown and
    // built-in types fail the same way.
    for client_type in ["", "mqtt", "zero", "redisstreams", "nats"] {
        let config = MessageBusConfig::new(client_type);

        let err = dispatch(&config).unwrap_err();
        assert!(
            matches!(err, Error::HostInfoNotSet),
            "type {client_type:?} gave: {err}"
        );
    }
}

#[test]
fn builtin_resolution_is_case_insensitive() {
    // ---
    for client_type in ["mqtt", "MQTT", "Mqtt"] {
        let config = MessageBusConfig::new(client_type).with_publish_host(host(1883));

        assert!(
            dispatch(&config).is_ok(),
            "dispatch failed for {client_type:?}"
        );
    }
}

#[test]
fn broker_client_from_publish_host_only() {
    // ---
    // Construction succeeds without a reachable broker; connecting is a
    // separate step.
    let config = MessageBusConfig::new("mqtt").with_publish_host(host(1883));

    assert!(dispatch(&config).is_ok());
}

#[test]
fn all_builtin_types_construct() {
    // ---
    for (client_type, port) in [("zero", 5563), ("mqtt", 1883), ("redisstreams", 6379)] {
        let config = MessageBusConfig::new(client_type).with_publish_host(host(port));

        assert!(
            dispatch(&config).is_ok(),
            "dispatch failed for {client_type:?}"
        );
    }
}

#[test]
fn unknown_type_error_names_original_value() {
    // ---
    let config = MessageBusConfig::new("amqp").with_publish_host(host(5672));

    match dispatch(&config).unwrap_err() {
        Error::UnknownType(name) => assert_eq!(name, "amqp"),
        other => panic!("expected unknown-type error, got: {other}"),
    }
}

#[test]
fn unknown_type_error_preserves_casing() {
    // ---
    let config = MessageBusConfig::new("AmQp").with_publish_host(host(5672));

    match dispatch(&config).unwrap_err() {
        Error::UnknownType(name) => assert_eq!(name, "AmQp"),
        other => panic!("expected unknown-type error, got: {other}"),
    }
}

#[test]
fn whitespace_type_falls_through_to_unknown() {
    // ---
    for client_type in ["", "   "] {
        let config = MessageBusConfig::new(client_type).with_publish_host(host(4000));

        match dispatch(&config).unwrap_err() {
            Error::UnknownType(name) => assert_eq!(name, client_type),
            other => panic!("expected unknown-type error, got: {other}"),
        }
    }
}

#[test]
fn registered_builder_receives_the_config() {
    // ---
    static CALLS: AtomicUsize = AtomicUsize::new(0);

    register_custom_type("Loopback-Config", |config| {
        assert_eq!(
            config.optional.get("Marker").map(String::as_str),
            Some("expected")
        );
        CALLS.fetch_add(1, Ordering::SeqCst);
        Ok(LoopbackClient::create())
    });

    // Mixed-case dispatch resolves to the normalized registration.
    let config = MessageBusConfig::new("LOOPBACK-config")
        .with_subscribe_host(host(4010))
        .with_optional("Marker", "expected");

    assert!(dispatch(&config).is_ok());
    assert_eq!(CALLS.load(Ordering::SeqCst), 1);
}

#[test]
fn reregistration_replaces_the_previous_builder() {
    // ---
    static FIRST: AtomicUsize = AtomicUsize::new(0);
    static SECOND: AtomicUsize = AtomicUsize::new(0);

    register_custom_type("Kafka", |_| {
        FIRST.fetch_add(1, Ordering::SeqCst);
        Ok(LoopbackClient::create())
    });
    register_custom_type("kafka", |_| {
        SECOND.fetch_add(1, Ordering::SeqCst);
        Ok(LoopbackClient::create())
    });

    let config = MessageBusConfig::new("KAFKA").with_publish_host(host(9092));
    assert!(dispatch(&config).is_ok());

    // Both names normalize to one key; the second registration won.
    assert_eq!(FIRST.load(Ordering::SeqCst), 0);
    assert_eq!(SECOND.load(Ordering::SeqCst), 1);
}

#[test]
fn builtin_identifiers_shadow_custom_registrations() {
    // ---
    static CALLS: AtomicUsize = AtomicUsize::new(0);

    register_custom_type("MQTT", |_| {
        CALLS.fetch_add(1, Ordering::SeqCst);
        Ok(LoopbackClient::create())
    });

    let config = MessageBusConfig::new("mqtt").with_publish_host(host(1883));
    assert!(dispatch(&config).is_ok());

    // The reserved identifier resolved to the built-in constructor.
    assert_eq!(CALLS.load(Ordering::SeqCst), 0);
}

#[test]
fn builder_failures_propagate_unchanged() {
    // ---
    register_custom_type("failing-bus", |_| {
        Err(Error::Transport("intentional".to_string()))
    });

    let config = MessageBusConfig::new("failing-bus").with_publish_host(host(4020));

    match dispatch(&config).unwrap_err() {
        Error::Transport(msg) => assert_eq!(msg, "intentional"),
        other => panic!("expected transport error, got: {other}"),
    }
}

#[test]
fn concurrent_registrations_are_all_visible() {
    // ---
    let handles: Vec<_> = (0..8)
        .map(|i| {
            std::thread::spawn(move || {
                let name = format!("racing-bus-{i}");
                register_custom_type(&name, |_| Ok(LoopbackClient::create()));
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("registration thread panicked");
    }

    for i in 0..8 {
        let config = MessageBusConfig::new(format!("racing-bus-{i}")).with_publish_host(host(4100));
        assert!(dispatch(&config).is_ok(), "lost registration {i}");
    }
}

#[tokio::test]
async fn dispatched_client_round_trips_messages() {
    // ---
    // Arrange
    // ---
    register_custom_type("loopback-rt", |_| Ok(LoopbackClient::create()));

    let config = MessageBusConfig::new("loopback-rt").with_subscribe_host(host(4030));

    let client = new_message_client(&config).expect("dispatch failed");
    client.connect().await.expect("connect failed");

    let topic = Topic::from("events.device42");

    let mut sub = client
        .subscribe(topic.clone())
        .await
        .expect("subscribe failed");

    let env = MessageEnvelope::new(bytes::Bytes::from_static(b"{\"reading\":7}"))
        .with_content_type("application/json");

    // ---
    // Act
    // ---
    client
        .publish(env.clone(), &topic)
        .await
        .expect("publish failed");

    // ---
    // Assert
    // ---
    let received = timeout(Duration::from_millis(100), sub.inbox.recv())
        .await
        .expect("timed out waiting for message")
        .expect("subscription channel closed unexpectedly");

    assert_eq!(received.payload, env.payload);
    assert_eq!(received.correlation_id, env.correlation_id);
}
