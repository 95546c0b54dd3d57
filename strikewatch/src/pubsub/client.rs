//! Reconnecting pub/sub client.
//!
//! # Architecture
//!
//! ```text
//!  subscribe()/publish()             supervisor task
//!        │                     ┌──────────────────────────────┐
//!        ▼                     │ open ─► establish ─► session │
//!  ┌───────────┐  snapshot     │   ▲        │           │     │
//!  │ registry  │◄──────────────┤   │  resubscribe   dispatch  │
//!  └───────────┘               │   └── backoff ◄── lost ◄─┘  │
//!        │                     └──────────────────────────────┘
//!        ▼                                   │
//!  ┌────────────────────┐                    │
//!  │ writer (mutex)     │◄───────────────────┘
//!  └────────────────────┘
//! ```
//!
//! The registry is the source of truth for subscriptions. The network is
//! told about a filter only when it is new or requested at a higher QoS,
//! and after every reconnect each distinct filter is re-subscribed once at
//! the highest QoS any subscriber asked for.
//!
//! All callbacks run on the supervisor task, so deliveries are serialized
//! and never overlap. Callbacks must not block for long.
//!
//! Dropping the last [`PubSubClient`] clone stops the supervisor, the same
//! as [`PubSubClient::disconnect`] without waiting for it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};

use super::error::PubSubError;
use super::message::{ConnectionState, Encoding, InboundMessage, Payload, QoS, RawMessage};
use super::topic::{matches, validate_filter};
use super::transport::{SessionEvent, SessionReader, SessionWriter, Transport};

/// Maximum delay between reconnect attempts.
pub const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Callback invoked for each delivered message.
pub type MessageCallback = Arc<dyn Fn(InboundMessage) + Send + Sync>;

/// Client behavior settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Interval between keep-alive pings. The session is considered lost
    /// after one and a half intervals without inbound traffic. Zero
    /// disables keep-alive.
    pub keep_alive: Duration,
    /// Upper bound on reconnect backoff.
    pub max_backoff: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            keep_alive: Duration::from_secs(60),
            max_backoff: MAX_BACKOFF,
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

struct Subscription {
    id: u64,
    topic: String,
    qos: QoS,
    encoding: Option<Encoding>,
    callback: MessageCallback,
}

struct DispatchTarget {
    topic: String,
    encoding: Option<Encoding>,
    callback: MessageCallback,
}

#[derive(Default)]
struct Registry {
    subscriptions: Vec<Subscription>,
    next_id: u64,
}

impl Registry {
    fn max_qos(&self, topic: &str) -> Option<QoS> {
        self.subscriptions
            .iter()
            .filter(|s| s.topic == topic)
            .map(|s| s.qos)
            .max()
    }

    fn insert(
        &mut self,
        topic: &str,
        qos: QoS,
        encoding: Option<Encoding>,
        callback: MessageCallback,
    ) -> u64 {
        self.next_id += 1;
        self.subscriptions.push(Subscription {
            id: self.next_id,
            topic: topic.to_string(),
            qos,
            encoding,
            callback,
        });
        self.next_id
    }

    /// Removes a subscription; returns true if its topic has no others left.
    fn remove(&mut self, id: u64, topic: &str) -> bool {
        self.subscriptions.retain(|s| s.id != id);
        !self.subscriptions.iter().any(|s| s.topic == topic)
    }

    /// Distinct filters with the highest QoS requested for each.
    fn grouped(&self) -> BTreeMap<String, QoS> {
        let mut grouped = BTreeMap::new();
        for s in &self.subscriptions {
            let entry = grouped.entry(s.topic.clone()).or_insert(s.qos);
            *entry = (*entry).max(s.qos);
        }
        grouped
    }

    fn matching(&self, topic: &str) -> Vec<DispatchTarget> {
        self.subscriptions
            .iter()
            .filter(|s| matches(&s.topic, topic))
            .map(|s| DispatchTarget {
                topic: s.topic.clone(),
                encoding: s.encoding,
                callback: Arc::clone(&s.callback),
            })
            .collect()
    }

    fn len(&self) -> usize {
        self.subscriptions.len()
    }
}

// =============================================================================
// Shared state
// =============================================================================

enum SessionEnd {
    Shutdown,
    Lost(PubSubError),
}

struct Shared<T: Transport> {
    transport: T,
    options: ClientOptions,
    /// The single connection handle; `Some` only while a session is up.
    writer: tokio::sync::Mutex<Option<T::Writer>>,
    registry: parking_lot::Mutex<Registry>,
    connected: AtomicBool,
    started: AtomicBool,
    state: watch::Sender<ConnectionState>,
    shutdown: CancellationToken,
    supervisor: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl<T: Transport> Shared<T> {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "Connection state changed");
        }
    }

    /// Install a fresh session and replay the registry onto it.
    async fn establish(&self, writer: T::Writer) -> Result<(), PubSubError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.insert(writer);

        let topics = self.registry.lock().grouped();
        for (topic, qos) in &topics {
            tracing::debug!(topic = %topic, qos = qos.as_u8(), "Subscribing");
            if let Err(e) = writer.subscribe(topic, *qos).await {
                guard.take();
                return Err(e);
            }
        }

        self.connected.store(true, Ordering::Release);
        self.set_state(ConnectionState::Connected);
        tracing::info!(
            broker = %self.transport.describe(),
            subscriptions = topics.len(),
            "Connected to broker"
        );
        Ok(())
    }

    /// Drop the session, cleanly if we are shutting down.
    async fn teardown(&self, graceful: bool) {
        self.connected.store(false, Ordering::Release);
        let writer = self.writer.lock().await.take();
        if graceful {
            if let Some(mut writer) = writer {
                if let Err(e) = writer.disconnect().await {
                    tracing::debug!(error = %e, "Disconnect did not complete cleanly");
                }
            }
        } else {
            self.set_state(ConnectionState::Disconnected);
        }
    }

    async fn run_session(&self, mut reader: T::Reader) -> SessionEnd {
        let keep_alive = self.options.keep_alive;
        let pinging = !keep_alive.is_zero();
        // tokio intervals need a non-zero period even when the branch is disabled
        let period = keep_alive.max(Duration::from_millis(1));
        let mut ping = tokio::time::interval_at(Instant::now() + period, period);
        let mut last_inbound = Instant::now();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return SessionEnd::Shutdown,

                _ = ping.tick(), if pinging => {
                    if last_inbound.elapsed() > keep_alive + keep_alive / 2 {
                        return SessionEnd::Lost(PubSubError::Connection(
                            "keep-alive timed out".to_string(),
                        ));
                    }
                    let mut guard = self.writer.lock().await;
                    if let Some(writer) = guard.as_mut() {
                        if let Err(e) = writer.ping().await {
                            return SessionEnd::Lost(e);
                        }
                    }
                }

                event = reader.next_event() => match event {
                    Ok(Some(SessionEvent::Message(message))) => {
                        last_inbound = Instant::now();
                        self.dispatch(&message);
                        if let Some(packet_id) = message.packet_id {
                            let mut guard = self.writer.lock().await;
                            if let Some(writer) = guard.as_mut() {
                                if let Err(e) = writer.acknowledge(packet_id).await {
                                    return SessionEnd::Lost(e);
                                }
                            }
                        }
                    }
                    Ok(Some(SessionEvent::Pong)) => last_inbound = Instant::now(),
                    Ok(Some(SessionEvent::SubscribeRejected { packet_id })) => {
                        last_inbound = Instant::now();
                        tracing::warn!(packet_id, "Broker rejected subscription");
                    }
                    Ok(None) => {
                        return SessionEnd::Lost(PubSubError::Connection(
                            "connection closed by broker".to_string(),
                        ));
                    }
                    Err(e) => return SessionEnd::Lost(e),
                },
            }
        }
    }

    /// Deliver a message to every matching subscription, in registration order.
    fn dispatch(&self, message: &RawMessage) {
        tracing::trace!(
            topic = %message.topic,
            bytes = message.payload.len(),
            retained = message.retain,
            "Received message"
        );

        let targets = self.registry.lock().matching(&message.topic);
        let timestamp = Utc::now();

        for target in targets {
            let payload = match target.encoding {
                Some(encoding) => match encoding.decode(&message.topic, &message.payload) {
                    Ok(text) => Payload::Text(text),
                    Err(e) => {
                        tracing::warn!(subscription = %target.topic, error = %e, "Dropping message");
                        continue;
                    }
                },
                None => Payload::Bytes(message.payload.clone()),
            };

            (target.callback)(InboundMessage {
                topic: message.topic.clone(),
                payload,
                qos: message.qos,
                retain: message.retain,
                subscribed_topic: target.topic,
                timestamp,
            });
        }
    }
}

/// Owns the session lifecycle: connect, serve, back off, reconnect.
async fn supervise<T: Transport>(
    shared: Arc<Shared<T>>,
    mut pending: Option<(T::Writer, T::Reader)>,
) {
    let mut consecutive_errors: u32 = if pending.is_some() { 0 } else { 1 };

    loop {
        let (writer, reader) = match pending.take() {
            Some(session) => session,
            None => {
                let backoff = calculate_backoff(consecutive_errors, shared.options.max_backoff);
                tracing::debug!(
                    backoff_secs = backoff.as_secs(),
                    consecutive_errors,
                    "Waiting before reconnect"
                );
                tokio::select! {
                    _ = shared.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }

                shared.set_state(ConnectionState::Connecting);
                let opened = tokio::select! {
                    _ = shared.shutdown.cancelled() => break,
                    opened = shared.transport.open() => opened,
                };
                match opened {
                    Ok(session) => session,
                    Err(e) => {
                        consecutive_errors = consecutive_errors.saturating_add(1);
                        tracing::warn!(error = %e, consecutive_errors, "Reconnect failed");
                        shared.set_state(ConnectionState::Disconnected);
                        continue;
                    }
                }
            }
        };

        if let Err(e) = shared.establish(writer).await {
            consecutive_errors = consecutive_errors.saturating_add(1);
            tracing::warn!(error = %e, "Failed to restore subscriptions");
            shared.set_state(ConnectionState::Disconnected);
            continue;
        }
        consecutive_errors = 0;

        match shared.run_session(reader).await {
            SessionEnd::Shutdown => {
                shared.teardown(true).await;
                break;
            }
            SessionEnd::Lost(e) => {
                tracing::warn!(error = %e, "Disconnected from broker");
                shared.teardown(false).await;
            }
        }
    }

    tracing::debug!("Connection supervisor stopped");
}

/// Calculate exponential backoff: 2^n seconds, capped at `max`.
fn calculate_backoff(consecutive_errors: u32, max: Duration) -> Duration {
    let secs = 2u64.saturating_pow(consecutive_errors.min(20));
    Duration::from_secs(secs).min(max)
}

// =============================================================================
// Public API
// =============================================================================

/// A reconnecting publish/subscribe client.
///
/// Cheap to clone; clones share one connection and one registry.
pub struct PubSubClient<T: Transport> {
    shared: Arc<Shared<T>>,
    /// Cancels the supervisor once the last clone is dropped.
    _owner: Arc<DropGuard>,
}

impl<T: Transport> Clone for PubSubClient<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            _owner: Arc::clone(&self._owner),
        }
    }
}

impl<T: Transport> PubSubClient<T> {
    /// Create a client. Nothing happens on the network until [`connect`](Self::connect).
    pub fn new(transport: T, options: ClientOptions) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let shutdown = CancellationToken::new();
        Self {
            _owner: Arc::new(shutdown.clone().drop_guard()),
            shared: Arc::new(Shared {
                transport,
                options,
                writer: tokio::sync::Mutex::new(None),
                registry: parking_lot::Mutex::new(Registry::default()),
                connected: AtomicBool::new(false),
                started: AtomicBool::new(false),
                state,
                shutdown,
                supervisor: parking_lot::Mutex::new(None),
            }),
        }
    }

    /// Start the connection.
    ///
    /// Returns the outcome of the first attempt. Either way the client keeps
    /// retrying in the background until [`disconnect`](Self::disconnect).
    /// Calling it again while running is a no-op.
    pub async fn connect(&self) -> Result<(), PubSubError> {
        if self.shared.shutdown.is_cancelled() {
            return Err(PubSubError::Closed);
        }
        if self.shared.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.shared.set_state(ConnectionState::Connecting);
        tracing::info!(broker = %self.shared.transport.describe(), "Connecting to broker");

        let (initial, result) = match self.shared.transport.open().await {
            Ok(session) => (Some(session), Ok(())),
            Err(e) => {
                tracing::warn!(error = %e, "Initial connection failed, will retry");
                self.shared.set_state(ConnectionState::Disconnected);
                (None, Err(e))
            }
        };

        let handle = tokio::spawn(supervise(Arc::clone(&self.shared), initial));
        *self.shared.supervisor.lock() = Some(handle);
        result
    }

    /// Stop reconnecting and close the session. Idempotent.
    pub async fn disconnect(&self) {
        self.shared.shutdown.cancel();
        let handle = self.shared.supervisor.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Connection supervisor ended abnormally");
            }
        }
        self.shared.connected.store(false, Ordering::Release);
        self.shared.set_state(ConnectionState::Closed);
    }

    /// Register a callback for a topic filter.
    ///
    /// The broker is only told about the filter when it is new or asked for
    /// at a higher QoS than before, and only while connected. Otherwise the
    /// subscription is replayed on the next (re)connect.
    pub async fn subscribe<F>(
        &self,
        topic: &str,
        qos: QoS,
        encoding: Option<Encoding>,
        callback: F,
    ) -> Result<SubscriptionHandle<T>, PubSubError>
    where
        F: Fn(InboundMessage) + Send + Sync + 'static,
    {
        validate_filter(topic)?;
        if self.shared.shutdown.is_cancelled() {
            return Err(PubSubError::Closed);
        }

        let (id, needs_network) = {
            let mut registry = self.shared.registry.lock();
            let needs_network = registry.max_qos(topic).map_or(true, |max| qos > max);
            let id = registry.insert(topic, qos, encoding, Arc::new(callback));
            (id, needs_network)
        };

        if needs_network {
            let mut guard = self.shared.writer.lock().await;
            if let Some(writer) = guard.as_mut() {
                tracing::debug!(topic = %topic, qos = qos.as_u8(), "Subscribing");
                if let Err(e) = writer.subscribe(topic, qos).await {
                    drop(guard);
                    self.shared.registry.lock().remove(id, topic);
                    return Err(e);
                }
            }
        }

        Ok(SubscriptionHandle {
            id,
            topic: topic.to_string(),
            shared: Arc::clone(&self.shared),
        })
    }

    /// Publish a message. Fails with [`PubSubError::NotConnected`] when no
    /// session is open.
    pub async fn publish(
        &self,
        topic: &str,
        payload: impl Into<Bytes>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), PubSubError> {
        if topic.is_empty() || topic.contains(|c: char| c == '+' || c == '#') {
            return Err(PubSubError::InvalidTopic {
                topic: topic.to_string(),
                reason: "publish topic must be non-empty and free of wildcards",
            });
        }

        let mut guard = self.shared.writer.lock().await;
        let writer = guard.as_mut().ok_or(PubSubError::NotConnected)?;
        tracing::debug!(topic = %topic, "Publishing message");
        writer.publish(topic, payload.into(), qos, retain).await
    }

    /// True while a session is established.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Watch connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Number of registered subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.shared.registry.lock().len()
    }
}

/// Removes a subscription when consumed.
pub struct SubscriptionHandle<T: Transport> {
    id: u64,
    topic: String,
    shared: Arc<Shared<T>>,
}

impl<T: Transport> SubscriptionHandle<T> {
    /// The subscribed filter.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Remove this subscription. The broker is told only when it was the
    /// last subscriber on its filter and a session is open.
    pub async fn unsubscribe(self) -> Result<(), PubSubError> {
        let last = self.shared.registry.lock().remove(self.id, &self.topic);
        if !last {
            return Ok(());
        }

        let mut guard = self.shared.writer.lock().await;
        if let Some(writer) = guard.as_mut() {
            tracing::debug!(topic = %self.topic, "Unsubscribing");
            writer.unsubscribe(&self.topic).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::memory::{BrokerOp, MemoryBroker};
    use parking_lot::Mutex;

    fn client(broker: &MemoryBroker) -> PubSubClient<crate::pubsub::memory::MemoryTransport> {
        PubSubClient::new(broker.transport(), ClientOptions::default())
    }

    fn collector() -> (Arc<Mutex<Vec<InboundMessage>>>, impl Fn(InboundMessage) + Send + Sync) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        (received, move |msg: InboundMessage| sink.lock().push(msg))
    }

    /// Let the supervisor task run until it is idle.
    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    async fn wait_for_state(client: &PubSubClient<crate::pubsub::memory::MemoryTransport>, state: ConnectionState) {
        let mut rx = client.watch_state();
        tokio::time::timeout(Duration::from_secs(3600), rx.wait_for(|s| *s == state))
            .await
            .expect("state not reached")
            .unwrap();
    }

    #[test]
    fn test_calculate_backoff() {
        assert_eq!(calculate_backoff(0, MAX_BACKOFF), Duration::from_secs(1));
        assert_eq!(calculate_backoff(1, MAX_BACKOFF), Duration::from_secs(2));
        assert_eq!(calculate_backoff(3, MAX_BACKOFF), Duration::from_secs(8));
        assert_eq!(calculate_backoff(10, MAX_BACKOFF), MAX_BACKOFF);
        assert_eq!(calculate_backoff(u32::MAX, MAX_BACKOFF), MAX_BACKOFF);
    }

    #[test]
    fn test_registry_groups_by_max_qos() {
        let mut registry = Registry::default();
        let noop: MessageCallback = Arc::new(|_| {});
        registry.insert("a", QoS::AtMostOnce, None, Arc::clone(&noop));
        registry.insert("a", QoS::AtLeastOnce, None, Arc::clone(&noop));
        registry.insert("b", QoS::AtMostOnce, None, noop);

        let grouped = registry.grouped();
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped["a"], QoS::AtLeastOnce);
        assert_eq!(grouped["b"], QoS::AtMostOnce);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_and_deliver() {
        let broker = MemoryBroker::new();
        let client = client(&broker);
        let (received, sink) = collector();

        client.connect().await.unwrap();
        wait_for_state(&client, ConnectionState::Connected).await;
        assert!(client.is_connected());

        let _handle = client
            .subscribe("a/#", QoS::AtMostOnce, Some(Encoding::Utf8), sink)
            .await
            .unwrap();
        broker.publish("a/b", "hello");
        settle().await;

        let received = received.lock();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].topic, "a/b");
        assert_eq!(received[0].subscribed_topic, "a/#");
        assert_eq!(received[0].payload.as_text(), Some("hello"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_before_connect_is_replayed() {
        let broker = MemoryBroker::new();
        let client = client(&broker);
        let (received, sink) = collector();

        let _handle = client.subscribe("t", QoS::AtMostOnce, None, sink).await.unwrap();
        assert!(broker.subscribe_calls().is_empty());

        client.connect().await.unwrap();
        wait_for_state(&client, ConnectionState::Connected).await;
        assert_eq!(broker.subscribe_calls(), vec![("t".to_string(), QoS::AtMostOnce)]);

        broker.publish("t", "x");
        settle().await;
        assert_eq!(received.lock().len(), 1);
        assert_eq!(received.lock()[0].payload.as_bytes(), b"x");
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_filter_only_subscribes_when_qos_rises() {
        let broker = MemoryBroker::new();
        let client = client(&broker);
        client.connect().await.unwrap();
        wait_for_state(&client, ConnectionState::Connected).await;

        let _a = client.subscribe("t", QoS::AtLeastOnce, None, |_| {}).await.unwrap();
        let _b = client.subscribe("t", QoS::AtMostOnce, None, |_| {}).await.unwrap();
        let _c = client.subscribe("t", QoS::AtLeastOnce, None, |_| {}).await.unwrap();

        assert_eq!(broker.subscribe_calls(), vec![("t".to_string(), QoS::AtLeastOnce)]);
        assert_eq!(client.subscription_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_last_subscriber_only() {
        let broker = MemoryBroker::new();
        let client = client(&broker);
        client.connect().await.unwrap();
        wait_for_state(&client, ConnectionState::Connected).await;

        let first = client.subscribe("t", QoS::AtMostOnce, None, |_| {}).await.unwrap();
        let second = client.subscribe("t", QoS::AtMostOnce, None, |_| {}).await.unwrap();

        first.unsubscribe().await.unwrap();
        assert!(!broker
            .operations()
            .iter()
            .any(|op| matches!(op, BrokerOp::Unsubscribe { .. })));

        second.unsubscribe().await.unwrap();
        assert!(broker
            .operations()
            .iter()
            .any(|op| matches!(op, BrokerOp::Unsubscribe { topic, .. } if topic == "t")));
        assert_eq!(client.subscription_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubscribes_once_per_filter_after_reconnect() {
        let broker = MemoryBroker::new();
        let client = client(&broker);

        let _a = client.subscribe("x", QoS::AtMostOnce, None, |_| {}).await.unwrap();
        let _b = client.subscribe("x", QoS::AtLeastOnce, None, |_| {}).await.unwrap();
        let _c = client.subscribe("y", QoS::AtMostOnce, None, |_| {}).await.unwrap();

        client.connect().await.unwrap();
        wait_for_state(&client, ConnectionState::Connected).await;
        broker.clear_operations();

        broker.drop_sessions();
        wait_for_state(&client, ConnectionState::Disconnected).await;
        assert!(!client.is_connected());
        wait_for_state(&client, ConnectionState::Connected).await;

        let mut calls = broker.subscribe_calls();
        calls.sort();
        assert_eq!(
            calls,
            vec![
                ("x".to_string(), QoS::AtLeastOnce),
                ("y".to_string(), QoS::AtMostOnce),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_failure_is_reported_then_retried() {
        let broker = MemoryBroker::new();
        broker.refuse_connections(2);
        let client = client(&broker);

        assert!(matches!(client.connect().await, Err(PubSubError::Connection(_))));
        wait_for_state(&client, ConnectionState::Connected).await;
        assert_eq!(broker.session_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_requires_session() {
        let broker = MemoryBroker::new();
        let client = client(&broker);
        assert!(matches!(
            client.publish("t", "x", QoS::AtMostOnce, false).await,
            Err(PubSubError::NotConnected)
        ));
        assert!(matches!(
            client.publish("t/#", "x", QoS::AtMostOnce, false).await,
            Err(PubSubError::InvalidTopic { .. })
        ));

        client.connect().await.unwrap();
        wait_for_state(&client, ConnectionState::Connected).await;
        client.publish("t", "x", QoS::AtMostOnce, false).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_qos1_messages_are_acknowledged() {
        let broker = MemoryBroker::new();
        let client = client(&broker);
        let _h = client.subscribe("t", QoS::AtLeastOnce, None, |_| {}).await.unwrap();
        client.connect().await.unwrap();
        wait_for_state(&client, ConnectionState::Connected).await;

        broker.publish("t", "x");
        settle().await;
        assert!(broker
            .operations()
            .iter()
            .any(|op| matches!(op, BrokerOp::Acknowledge { packet_id: 1, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_undecodable_payload_is_skipped() {
        let broker = MemoryBroker::new();
        let client = client(&broker);
        let (text, text_sink) = collector();
        let (raw, raw_sink) = collector();
        let _a = client
            .subscribe("t", QoS::AtMostOnce, Some(Encoding::Utf8), text_sink)
            .await
            .unwrap();
        let _b = client.subscribe("t", QoS::AtMostOnce, None, raw_sink).await.unwrap();
        client.connect().await.unwrap();
        wait_for_state(&client, ConnectionState::Connected).await;

        broker.publish("t", Bytes::from_static(&[0xff, 0xfe]));
        settle().await;

        assert!(text.lock().is_empty());
        assert_eq!(raw.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_filter_rejected() {
        let broker = MemoryBroker::new();
        let client = client(&broker);
        assert!(matches!(
            client.subscribe("a/#/b", QoS::AtMostOnce, None, |_| {}).await,
            Err(PubSubError::InvalidTopic { .. })
        ));
        assert_eq!(client.subscription_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_is_idempotent_and_terminal() {
        let broker = MemoryBroker::new();
        let client = client(&broker);
        client.connect().await.unwrap();
        wait_for_state(&client, ConnectionState::Connected).await;

        client.disconnect().await;
        client.disconnect().await;

        assert_eq!(client.state(), ConnectionState::Closed);
        assert!(!client.is_connected());
        assert_eq!(broker.session_count(), 0);
        assert!(broker
            .operations()
            .iter()
            .any(|op| matches!(op, BrokerOp::Disconnect { .. })));
        assert!(matches!(client.connect().await, Err(PubSubError::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_last_clone_closes_session() {
        let broker = MemoryBroker::new();
        let client = client(&broker);
        client.connect().await.unwrap();
        wait_for_state(&client, ConnectionState::Connected).await;

        let clone = client.clone();
        let mut states = client.watch_state();
        drop(client);
        settle().await;
        assert_eq!(broker.session_count(), 1);

        drop(clone);
        tokio::time::timeout(Duration::from_secs(60), async {
            while broker.session_count() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("session still open");
        assert!(broker
            .operations()
            .iter()
            .any(|op| matches!(op, BrokerOp::Disconnect { .. })));

        // No reconnect attempts follow
        tokio::time::sleep(Duration::from_secs(900)).await;
        assert_eq!(broker.session_count(), 0);
        assert_ne!(*states.borrow_and_update(), ConnectionState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_keep_alive_disables_pings() {
        let broker = MemoryBroker::new();
        let client = PubSubClient::new(
            broker.transport(),
            ClientOptions {
                keep_alive: Duration::ZERO,
                ..ClientOptions::default()
            },
        );
        client.connect().await.unwrap();
        wait_for_state(&client, ConnectionState::Connected).await;

        tokio::time::sleep(Duration::from_secs(600)).await;

        assert!(client.is_connected());
        assert!(!broker
            .operations()
            .iter()
            .any(|op| matches!(op, BrokerOp::Ping { .. })));
        client.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_pings_keep_session() {
        let broker = MemoryBroker::new();
        let client = client(&broker);
        client.connect().await.unwrap();
        wait_for_state(&client, ConnectionState::Connected).await;

        tokio::time::sleep(Duration::from_secs(600)).await;

        assert!(client.is_connected());
        assert!(broker
            .operations()
            .iter()
            .any(|op| matches!(op, BrokerOp::Ping { .. })));
    }
}
