//! In-process broker for tests and offline runs.
//!
//! [`MemoryBroker`] routes messages between sessions opened through its
//! [`MemoryTransport`], applying the same topic matching as a real broker.
//! It records the most recent client operations so tests can assert on what
//! went over the "wire", and it can drop sessions or refuse connections on
//! demand to exercise reconnect behavior.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::error::PubSubError;
use super::message::{QoS, RawMessage};
use super::topic;
use super::transport::{SessionEvent, SessionReader, SessionWriter, Transport};

/// Number of operations kept; older ones are discarded first.
pub const MAX_RECORDED_OPERATIONS: usize = 10_000;

/// A client operation observed by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerOp {
    Connect { session: u64 },
    Subscribe { session: u64, topic: String, qos: QoS },
    Unsubscribe { session: u64, topic: String },
    Publish { session: u64, topic: String, payload: Bytes },
    Acknowledge { session: u64, packet_id: u16 },
    Ping { session: u64 },
    Disconnect { session: u64 },
}

struct Session {
    id: u64,
    filters: Vec<(String, QoS)>,
    sender: mpsc::UnboundedSender<SessionEvent>,
}

#[derive(Default)]
struct BrokerState {
    sessions: Vec<Session>,
    next_session: u64,
    next_packet_id: u16,
    refuse_remaining: usize,
    operations: VecDeque<BrokerOp>,
}

impl BrokerState {
    fn record(&mut self, op: BrokerOp) {
        if self.operations.len() == MAX_RECORDED_OPERATIONS {
            self.operations.pop_front();
        }
        self.operations.push_back(op);
    }

    fn route(&mut self, topic: &str, payload: &Bytes, retain: bool) -> usize {
        let mut delivered = 0;
        for session_index in 0..self.sessions.len() {
            let granted = self.sessions[session_index]
                .filters
                .iter()
                .filter(|(filter, _)| topic::matches(filter, topic))
                .map(|(_, qos)| *qos)
                .max();
            let Some(qos) = granted else {
                continue;
            };

            let packet_id = match qos {
                QoS::AtMostOnce => None,
                QoS::AtLeastOnce => {
                    self.next_packet_id = self.next_packet_id.wrapping_add(1).max(1);
                    Some(self.next_packet_id)
                }
            };
            let message = RawMessage {
                topic: topic.to_string(),
                payload: payload.clone(),
                qos,
                retain,
                packet_id,
            };
            if self.sessions[session_index]
                .sender
                .send(SessionEvent::Message(message))
                .is_ok()
            {
                delivered += 1;
            }
        }
        delivered
    }

    fn session_mut(&mut self, id: u64) -> Result<&mut Session, PubSubError> {
        self.sessions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| PubSubError::Connection("session dropped by broker".to_string()))
    }
}

/// In-process message broker.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport that opens sessions on this broker.
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            broker: self.clone(),
        }
    }

    /// Publish a message from outside any session.
    ///
    /// Returns the number of sessions it was delivered to.
    pub fn publish(&self, topic: &str, payload: impl Into<Bytes>) -> usize {
        self.state.lock().route(topic, &payload.into(), false)
    }

    /// Publish a message flagged as retained.
    pub fn publish_retained(&self, topic: &str, payload: impl Into<Bytes>) -> usize {
        self.state.lock().route(topic, &payload.into(), true)
    }

    /// Drop every open session, as if the network went away.
    pub fn drop_sessions(&self) {
        self.state.lock().sessions.clear();
    }

    /// Refuse the next `count` connection attempts.
    pub fn refuse_connections(&self, count: usize) {
        self.state.lock().refuse_remaining = count;
    }

    /// Number of open sessions.
    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Filters currently subscribed across all sessions.
    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        self.state
            .lock()
            .sessions
            .iter()
            .flat_map(|s| s.filters.iter().cloned())
            .collect()
    }

    /// Operations recorded so far.
    pub fn operations(&self) -> Vec<BrokerOp> {
        self.state.lock().operations.iter().cloned().collect()
    }

    /// Forget recorded operations.
    pub fn clear_operations(&self) {
        self.state.lock().operations.clear();
    }

    /// Subscribe operations recorded so far, as `(topic, qos)`.
    pub fn subscribe_calls(&self) -> Vec<(String, QoS)> {
        self.state
            .lock()
            .operations
            .iter()
            .filter_map(|op| match op {
                BrokerOp::Subscribe { topic, qos, .. } => Some((topic.clone(), *qos)),
                _ => None,
            })
            .collect()
    }
}

/// [`Transport`] backed by a [`MemoryBroker`].
#[derive(Clone)]
pub struct MemoryTransport {
    broker: MemoryBroker,
}

impl Transport for MemoryTransport {
    type Writer = MemoryWriter;
    type Reader = MemoryReader;

    async fn open(&self) -> Result<(MemoryWriter, MemoryReader), PubSubError> {
        let mut state = self.broker.state.lock();
        if state.refuse_remaining > 0 {
            state.refuse_remaining -= 1;
            return Err(PubSubError::Connection(
                "broker refused connection: server unavailable".to_string(),
            ));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        state.next_session += 1;
        let id = state.next_session;
        state.sessions.push(Session {
            id,
            filters: Vec::new(),
            sender,
        });
        state.record(BrokerOp::Connect { session: id });

        Ok((
            MemoryWriter {
                broker: self.broker.clone(),
                session: id,
            },
            MemoryReader { receiver },
        ))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Outbound half of an in-process session.
pub struct MemoryWriter {
    broker: MemoryBroker,
    session: u64,
}

impl SessionWriter for MemoryWriter {
    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), PubSubError> {
        let mut state = self.broker.state.lock();
        let session = state.session_mut(self.session)?;
        match session.filters.iter_mut().find(|(f, _)| f == topic) {
            Some(existing) => existing.1 = qos,
            None => session.filters.push((topic.to_string(), qos)),
        }
        state.record(BrokerOp::Subscribe {
            session: self.session,
            topic: topic.to_string(),
            qos,
        });
        Ok(())
    }

    async fn unsubscribe(&mut self, topic: &str) -> Result<(), PubSubError> {
        let mut state = self.broker.state.lock();
        state.session_mut(self.session)?.filters.retain(|(f, _)| f != topic);
        state.record(BrokerOp::Unsubscribe {
            session: self.session,
            topic: topic.to_string(),
        });
        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        _qos: QoS,
        retain: bool,
    ) -> Result<(), PubSubError> {
        let mut state = self.broker.state.lock();
        state.session_mut(self.session)?;
        state.record(BrokerOp::Publish {
            session: self.session,
            topic: topic.to_string(),
            payload: payload.clone(),
        });
        state.route(topic, &payload, retain);
        Ok(())
    }

    async fn acknowledge(&mut self, packet_id: u16) -> Result<(), PubSubError> {
        let mut state = self.broker.state.lock();
        state.session_mut(self.session)?;
        state.record(BrokerOp::Acknowledge {
            session: self.session,
            packet_id,
        });
        Ok(())
    }

    async fn ping(&mut self) -> Result<(), PubSubError> {
        let mut state = self.broker.state.lock();
        let session = state.session_mut(self.session)?;
        let _ = session.sender.send(SessionEvent::Pong);
        state.record(BrokerOp::Ping {
            session: self.session,
        });
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), PubSubError> {
        let mut state = self.broker.state.lock();
        let session = self.session;
        state.sessions.retain(|s| s.id != session);
        state.record(BrokerOp::Disconnect { session });
        Ok(())
    }
}

/// Inbound half of an in-process session.
pub struct MemoryReader {
    receiver: mpsc::UnboundedReceiver<SessionEvent>,
}

impl SessionReader for MemoryReader {
    async fn next_event(&mut self) -> Result<Option<SessionEvent>, PubSubError> {
        Ok(self.receiver.recv().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_routes_by_filter() {
        let broker = MemoryBroker::new();
        let transport = broker.transport();
        let (mut writer, mut reader) = transport.open().await.unwrap();

        writer.subscribe("a/+/c", QoS::AtMostOnce).await.unwrap();
        assert_eq!(broker.publish("a/b/c", "hit"), 1);
        assert_eq!(broker.publish("a/b/d", "miss"), 0);

        match reader.next_event().await.unwrap() {
            Some(SessionEvent::Message(msg)) => {
                assert_eq!(msg.topic, "a/b/c");
                assert_eq!(msg.payload, Bytes::from_static(b"hit"));
                assert_eq!(msg.packet_id, None);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_qos1_deliveries_carry_packet_ids() {
        let broker = MemoryBroker::new();
        let (mut writer, mut reader) = broker.transport().open().await.unwrap();
        writer.subscribe("t", QoS::AtLeastOnce).await.unwrap();
        broker.publish("t", "x");

        match reader.next_event().await.unwrap() {
            Some(SessionEvent::Message(msg)) => {
                assert_eq!(msg.qos, QoS::AtLeastOnce);
                assert_eq!(msg.packet_id, Some(1));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_drop_sessions_ends_reader() {
        let broker = MemoryBroker::new();
        let (mut writer, mut reader) = broker.transport().open().await.unwrap();
        broker.drop_sessions();

        assert_eq!(reader.next_event().await.unwrap(), None);
        assert!(matches!(
            writer.subscribe("t", QoS::AtMostOnce).await,
            Err(PubSubError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn test_refuse_connections() {
        let broker = MemoryBroker::new();
        broker.refuse_connections(1);
        let transport = broker.transport();

        assert!(transport.open().await.is_err());
        assert!(transport.open().await.is_ok());
        assert_eq!(broker.session_count(), 1);
    }

    #[tokio::test]
    async fn test_operation_log_is_bounded() {
        let broker = MemoryBroker::new();
        let (mut writer, _reader) = broker.transport().open().await.unwrap();
        for _ in 0..MAX_RECORDED_OPERATIONS {
            writer.ping().await.unwrap();
        }

        let operations = broker.operations();
        assert_eq!(operations.len(), MAX_RECORDED_OPERATIONS);
        // The connect was the oldest entry and has been discarded
        assert!(operations.iter().all(|op| matches!(op, BrokerOp::Ping { .. })));
    }

    #[tokio::test]
    async fn test_ping_answers_pong() {
        let broker = MemoryBroker::new();
        let (mut writer, mut reader) = broker.transport().open().await.unwrap();
        writer.ping().await.unwrap();
        assert_eq!(reader.next_event().await.unwrap(), Some(SessionEvent::Pong));
    }
}
