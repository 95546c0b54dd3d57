//! Strike coordinator.
//!
//! Owns a [`PubSubClient`], subscribes to the strike topics of every
//! geohash cell covering the region and turns raw messages into
//! [`StrikeEvent`]s for registered listeners.
//!
//! # Architecture
//!
//! ```text
//!  PubSubClient callbacks ──┐
//!  connection state watch ──┼──► command channel ──► worker task
//!  register_*() calls ──────┘                          │
//!                                                      ▼
//!                                              StrikeProcessor
//!                                     (parse → locate → filter → fan-out)
//!                                                      ▲
//!                                       tick interval ─┘
//! ```
//!
//! Everything that touches listeners runs on the single worker task, so
//! listeners never run concurrently and see messages in arrival order.
//! Reconnection is handled entirely by the client; subscriptions are
//! restored on every new session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::geohash::{coverage, GeohashCover, GeohashError};
use crate::pubsub::topic::validate_filter;
use crate::pubsub::{
    ClientOptions, ConnectionState, InboundMessage, PubSubClient, PubSubError, QoS,
    SubscriptionHandle, Transport,
};

use super::event::{parse_strike, strike_topic, Region, StrikeEvent, StrikeTime};
use super::listener::{
    ConnectionListener, MessageReceiver, StatListener, StrikeListener, TickCallback,
    VersionListener,
};
use super::stats::{parse_broker_stat, SYS_PREFIX, SYS_TOPIC};
use super::version::{VersionAnnouncement, VersionTracker};

/// Default strike topic namespace.
pub const DEFAULT_STRIKE_NAMESPACE: &str = "blitzortung/1.1";

/// Default topic carrying hello / version announcements.
pub const DEFAULT_HELLO_TOPIC: &str = "component/hello";

/// Default idle threshold before the coordinator reports inactivity.
pub const DEFAULT_IDLE_RESET: Duration = Duration::from_secs(120 * 60);

/// Default housekeeping tick interval.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(60);

/// Coordinator settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    pub region: Region,
    pub strike_namespace: String,
    pub hello_topic: String,
    /// Subscribe to broker `$SYS` statistics.
    pub server_stats: bool,
    /// Inactivity threshold; zero disables inactivity.
    pub idle_reset: Duration,
    pub tick_interval: Duration,
}

impl CoordinatorConfig {
    /// Defaults for everything but the region.
    pub fn new(region: Region) -> Self {
        Self {
            region,
            strike_namespace: DEFAULT_STRIKE_NAMESPACE.to_string(),
            hello_topic: DEFAULT_HELLO_TOPIC.to_string(),
            server_stats: false,
            idle_reset: DEFAULT_IDLE_RESET,
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }
}

/// Settings a coordinator cannot be built from.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Invalid region: {0}")]
    Region(#[from] GeohashError),

    #[error(transparent)]
    Topic(#[from] PubSubError),

    #[error("Tick interval must be non-zero")]
    ZeroTickInterval,
}

// =============================================================================
// Activity
// =============================================================================

/// Counters shared between the worker and readers of the coordinator.
#[derive(Debug, Default)]
struct Activity {
    /// Receipt time of the last accepted strike, nanoseconds; 0 = never.
    last_strike: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    malformed: AtomicU64,
}

impl Activity {
    fn last_strike(&self) -> Option<StrikeTime> {
        match self.last_strike.load(Ordering::Acquire) {
            0 => None,
            nanos => Some(StrikeTime::from_nanos(nanos)),
        }
    }

    fn is_inactive(&self, idle_reset: Duration, now: StrikeTime) -> bool {
        if idle_reset.is_zero() {
            return false;
        }
        let last = self.last_strike().unwrap_or(StrikeTime::EPOCH);
        now.since(last) >= idle_reset
    }
}

// =============================================================================
// Processor
// =============================================================================

/// Synchronous core of the coordinator: parsing, filtering and fan-out.
pub struct StrikeProcessor {
    region: Region,
    strike_prefix: String,
    strike_listeners: Vec<Box<dyn StrikeListener>>,
    tick_callbacks: Vec<TickCallback>,
    message_receivers: Vec<MessageReceiver>,
    version_listeners: Vec<VersionListener>,
    connection_listeners: Vec<ConnectionListener>,
    stat_listeners: Vec<StatListener>,
    versions: VersionTracker,
    activity: Arc<Activity>,
    last_state: ConnectionState,
}

impl StrikeProcessor {
    /// Create a processor for `region`, accepting strikes under `strike_namespace`.
    pub fn new(region: Region, strike_namespace: &str, versions: VersionTracker) -> Self {
        Self::with_activity(region, strike_namespace, versions, Arc::default())
    }

    fn with_activity(
        region: Region,
        strike_namespace: &str,
        versions: VersionTracker,
        activity: Arc<Activity>,
    ) -> Self {
        Self {
            region,
            strike_prefix: format!("{}/", strike_namespace.trim_end_matches('/')),
            strike_listeners: Vec::new(),
            tick_callbacks: Vec::new(),
            message_receivers: Vec::new(),
            version_listeners: Vec::new(),
            connection_listeners: Vec::new(),
            stat_listeners: Vec::new(),
            versions,
            activity,
            last_state: ConnectionState::Disconnected,
        }
    }

    pub fn register_listener(&mut self, listener: Box<dyn StrikeListener>) {
        self.strike_listeners.push(listener);
    }

    pub fn register_tick_callback(&mut self, callback: TickCallback) {
        self.tick_callbacks.push(callback);
    }

    pub fn register_message_receiver(&mut self, receiver: MessageReceiver) {
        self.message_receivers.push(receiver);
    }

    pub fn register_version_listener(&mut self, listener: VersionListener) {
        self.version_listeners.push(listener);
    }

    pub fn register_connection_listener(&mut self, listener: ConnectionListener) {
        self.connection_listeners.push(listener);
    }

    pub fn register_stat_listener(&mut self, listener: StatListener) {
        self.stat_listeners.push(listener);
    }

    /// Handle a message from a strike or statistics subscription.
    pub fn on_message(&mut self, message: &InboundMessage) {
        for receiver in &mut self.message_receivers {
            receiver(message);
        }

        if message.topic.starts_with(&self.strike_prefix) {
            let received_at = StrikeTime::from_system_time(message.timestamp.into());
            self.on_strike_message(message.payload.as_bytes(), received_at);
        } else if message.topic.starts_with(SYS_PREFIX) {
            if let Some(stat) = parse_broker_stat(&message.topic, message.payload.as_bytes()) {
                tracing::trace!(key = %stat.key, value = %stat.value, "Broker statistic");
                for listener in &mut self.stat_listeners {
                    listener(&stat);
                }
            }
        }
    }

    /// Parse, locate and filter a strike payload; forward it if accepted.
    ///
    /// `received_at` becomes the last-activity time when the strike is accepted.
    pub fn on_strike_message(
        &mut self,
        payload: &[u8],
        received_at: StrikeTime,
    ) -> Option<StrikeEvent> {
        let strike = match parse_strike(&self.region, payload) {
            Ok(strike) => strike,
            Err(e) => {
                self.activity.malformed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(error = %e, "Dropping malformed strike");
                return None;
            }
        };

        if !self.region.contains_distance(strike.distance_km) {
            self.activity.rejected.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(distance_km = strike.distance_km, "Strike outside region");
            return None;
        }

        self.activity.accepted.fetch_add(1, Ordering::Relaxed);
        self.activity
            .last_strike
            .store(received_at.as_nanos().max(1), Ordering::Release);

        tracing::debug!(
            lat = strike.latitude,
            lon = strike.longitude,
            distance_km = strike.distance_km,
            azimuth = strike.azimuth_degrees,
            "Strike accepted"
        );

        for listener in &mut self.strike_listeners {
            listener.on_strike(&strike);
        }
        Some(strike)
    }

    /// Handle a hello message.
    pub fn on_hello(&mut self, payload: &[u8]) -> Option<VersionAnnouncement> {
        let announcement = self.versions.on_hello(payload)?;
        for listener in &mut self.version_listeners {
            listener(&announcement);
        }
        Some(announcement)
    }

    /// Periodic housekeeping.
    pub fn on_tick(&mut self, now: SystemTime) {
        for listener in &mut self.strike_listeners {
            listener.on_tick(now);
        }
        for callback in &mut self.tick_callbacks {
            callback(now);
        }
    }

    /// Forward a connection state change; repeats are suppressed.
    pub fn on_connection(&mut self, state: ConnectionState) {
        if state == self.last_state {
            return;
        }
        self.last_state = state;
        for listener in &mut self.connection_listeners {
            listener(state);
        }
    }
}

// =============================================================================
// Worker
// =============================================================================

enum Registration {
    Strike(Box<dyn StrikeListener>),
    Tick(TickCallback),
    Message(MessageReceiver),
    Version(VersionListener),
    Connection(ConnectionListener),
    Stat(StatListener),
}

enum Command {
    Message(InboundMessage),
    Hello(InboundMessage),
    Register(Registration),
}

/// Wraps a subscription's messages into worker commands.
type Wrap = fn(InboundMessage) -> Command;

impl StrikeProcessor {
    fn handle(&mut self, command: Command) {
        match command {
            Command::Message(message) => self.on_message(&message),
            Command::Hello(message) => {
                self.on_hello(message.payload.as_bytes());
            }
            Command::Register(registration) => match registration {
                Registration::Strike(l) => self.register_listener(l),
                Registration::Tick(c) => self.register_tick_callback(c),
                Registration::Message(r) => self.register_message_receiver(r),
                Registration::Version(l) => self.register_version_listener(l),
                Registration::Connection(l) => self.register_connection_listener(l),
                Registration::Stat(l) => self.register_stat_listener(l),
            },
        }
    }
}

async fn run_worker(
    mut processor: StrikeProcessor,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut states: watch::Receiver<ConnectionState>,
    tick_interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker =
        tokio::time::interval_at(tokio::time::Instant::now() + tick_interval, tick_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut watching_states = true;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,

            command = commands.recv() => match command {
                Some(command) => processor.handle(command),
                None => break,
            },

            changed = states.changed(), if watching_states => {
                if changed.is_err() {
                    watching_states = false;
                    continue;
                }
                let state = *states.borrow_and_update();
                processor.on_connection(state);
            }

            _ = ticker.tick() => processor.on_tick(SystemTime::now()),
        }
    }

    tracing::debug!("Strike coordinator worker stopped");
}

// =============================================================================
// Coordinator
// =============================================================================

/// Point-in-time view of the coordinator, for diagnostics dumps.
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorDiagnostics {
    pub region: Region,
    pub precision: u8,
    pub cells: Vec<String>,
    pub topics: Vec<String>,
    pub connection: String,
    pub connected: bool,
    pub inactive: bool,
    pub last_strike: Option<DateTime<Utc>>,
    pub accepted: u64,
    pub rejected: u64,
    pub malformed: u64,
    pub subscriptions: usize,
}

/// Subscribes to the strikes around a region and fans them out.
pub struct StrikeCoordinator<T: Transport> {
    config: CoordinatorConfig,
    client: PubSubClient<T>,
    cover: GeohashCover,
    topics: Vec<String>,
    commands: mpsc::UnboundedSender<Command>,
    pending: parking_lot::Mutex<Option<(StrikeProcessor, mpsc::UnboundedReceiver<Command>)>>,
    activity: Arc<Activity>,
    subscriptions: parking_lot::Mutex<Vec<SubscriptionHandle<T>>>,
    worker: parking_lot::Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl<T: Transport> StrikeCoordinator<T> {
    /// Create a coordinator.
    ///
    /// Fails if the region center is not a valid coordinate, a strike or
    /// hello topic is not a valid filter, or the tick interval is zero.
    pub fn new(
        config: CoordinatorConfig,
        transport: T,
        options: ClientOptions,
    ) -> Result<Self, CoordinatorError> {
        if config.tick_interval.is_zero() {
            return Err(CoordinatorError::ZeroTickInterval);
        }

        let region = config.region;
        let cover = coverage(region.latitude, region.longitude, region.radius_km)?;
        let topics = cover
            .iter()
            .map(|cell| strike_topic(&config.strike_namespace, cell))
            .collect::<Vec<_>>();
        for topic in topics.iter().chain(std::iter::once(&config.hello_topic)) {
            validate_filter(topic)?;
        }

        tracing::info!(
            region = %region,
            precision = cover.precision,
            cells = ?cover.cells,
            "Computed geohash cover"
        );

        let activity = Arc::new(Activity::default());
        let processor = StrikeProcessor::with_activity(
            region,
            &config.strike_namespace,
            VersionTracker::default(),
            Arc::clone(&activity),
        );
        let (commands, receiver) = mpsc::unbounded_channel();

        Ok(Self {
            client: PubSubClient::new(transport, options),
            config,
            cover,
            topics,
            commands,
            pending: parking_lot::Mutex::new(Some((processor, receiver))),
            activity,
            subscriptions: parking_lot::Mutex::new(Vec::new()),
            worker: parking_lot::Mutex::new(None),
            shutdown: CancellationToken::new(),
        })
    }

    /// Subscribe, start the worker and connect to the broker.
    ///
    /// A failed first connection is returned but not fatal: the client
    /// keeps retrying in the background. If subscribing fails nothing is
    /// started and a later call tries again. Once started, calling it again
    /// is a no-op.
    pub async fn connect(&self) -> Result<(), PubSubError> {
        let Some((processor, receiver)) = self.pending.lock().take() else {
            return Ok(());
        };

        if let Err(e) = self.subscribe_all().await {
            *self.pending.lock() = Some((processor, receiver));
            return Err(e);
        }

        let worker = tokio::spawn(run_worker(
            processor,
            receiver,
            self.client.watch_state(),
            self.config.tick_interval,
            self.shutdown.clone(),
        ));
        *self.worker.lock() = Some(worker);

        self.client.connect().await
    }

    /// Register every forwarding subscription, or none of them.
    async fn subscribe_all(&self) -> Result<(), PubSubError> {
        let mut wanted: Vec<(&str, Wrap)> = self
            .topics
            .iter()
            .map(|topic| (topic.as_str(), Command::Message as Wrap))
            .collect();
        if self.config.server_stats {
            wanted.push((SYS_TOPIC, Command::Message as Wrap));
        }
        wanted.push((self.config.hello_topic.as_str(), Command::Hello as Wrap));

        let mut handles = Vec::with_capacity(wanted.len());
        for (topic, wrap) in wanted {
            match self.forward(topic, wrap).await {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    for handle in handles {
                        if let Err(e) = handle.unsubscribe().await {
                            tracing::debug!(error = %e, "Rollback unsubscribe failed");
                        }
                    }
                    return Err(e);
                }
            }
        }

        self.subscriptions.lock().extend(handles);
        Ok(())
    }

    /// Subscribe a topic whose messages are forwarded to the worker.
    async fn forward(
        &self,
        topic: &str,
        wrap: Wrap,
    ) -> Result<SubscriptionHandle<T>, PubSubError> {
        let commands = self.commands.clone();
        self.client
            .subscribe(topic, QoS::AtMostOnce, None, move |message| {
                let _ = commands.send(wrap(message));
            })
            .await
    }

    /// Close the connection and stop the worker. Idempotent.
    pub async fn disconnect(&self) {
        self.client.disconnect().await;
        self.subscriptions.lock().clear();
        self.shutdown.cancel();

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "Strike coordinator worker ended abnormally");
            }
        }
    }

    fn register(&self, registration: Registration) {
        if self.commands.send(Command::Register(registration)).is_err() {
            tracing::debug!("Coordinator stopped, registration ignored");
        }
    }

    /// Register a listener for accepted strikes and ticks.
    pub fn register_listener(&self, listener: impl StrikeListener + 'static) {
        self.register(Registration::Strike(Box::new(listener)));
    }

    /// Register a callback run on every tick.
    pub fn register_tick_callback(&self, callback: impl FnMut(SystemTime) + Send + 'static) {
        self.register(Registration::Tick(Box::new(callback)));
    }

    /// Register a receiver for raw strike and statistics messages.
    pub fn register_message_receiver(
        &self,
        receiver: impl FnMut(&InboundMessage) + Send + 'static,
    ) {
        self.register(Registration::Message(Box::new(receiver)));
    }

    /// Register a listener for newer software versions.
    pub fn register_version_listener(
        &self,
        listener: impl FnMut(&VersionAnnouncement) + Send + 'static,
    ) {
        self.register(Registration::Version(Box::new(listener)));
    }

    /// Register a listener for connection state changes.
    pub fn register_connection_listener(
        &self,
        listener: impl FnMut(ConnectionState) + Send + 'static,
    ) {
        self.register(Registration::Connection(Box::new(listener)));
    }

    /// Register a listener for broker statistics.
    pub fn register_stat_listener(
        &self,
        listener: impl FnMut(&super::stats::BrokerStat) + Send + 'static,
    ) {
        self.register(Registration::Stat(Box::new(listener)));
    }

    /// True while the broker session is up.
    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    /// True if no strike has been accepted within the idle threshold.
    pub fn is_inactive(&self) -> bool {
        self.is_inactive_at(StrikeTime::now())
    }

    /// [`is_inactive`](Self::is_inactive) evaluated at `now`.
    pub fn is_inactive_at(&self, now: StrikeTime) -> bool {
        self.activity.is_inactive(self.config.idle_reset, now)
    }

    /// Receipt time of the last accepted strike.
    pub fn last_strike_time(&self) -> Option<StrikeTime> {
        self.activity.last_strike()
    }

    pub fn region(&self) -> &Region {
        &self.config.region
    }

    pub fn cover(&self) -> &GeohashCover {
        &self.cover
    }

    /// Strike subscription filters, one per cover cell.
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    pub fn client(&self) -> &PubSubClient<T> {
        &self.client
    }

    /// Snapshot for diagnostics.
    pub fn diagnostics(&self) -> CoordinatorDiagnostics {
        CoordinatorDiagnostics {
            region: self.config.region,
            precision: self.cover.precision,
            cells: self.cover.iter().map(str::to_string).collect(),
            topics: self.topics.clone(),
            connection: self.client.state().to_string(),
            connected: self.client.is_connected(),
            inactive: self.is_inactive(),
            last_strike: self.activity.last_strike().and_then(StrikeTime::to_datetime),
            accepted: self.activity.accepted.load(Ordering::Relaxed),
            rejected: self.activity.rejected.load(Ordering::Relaxed),
            malformed: self.activity.malformed.load(Ordering::Relaxed),
            subscriptions: self.client.subscription_count(),
        }
    }
}

impl<T: Transport> Drop for StrikeCoordinator<T> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::{MemoryBroker, MemoryTransport, Payload};
    use crate::strike::stats::BrokerStat;
    use crate::strike::version::Version;
    use parking_lot::Mutex;

    fn processor(radius_km: f64) -> StrikeProcessor {
        StrikeProcessor::new(
            Region::new(0.0, 0.0, radius_km),
            DEFAULT_STRIKE_NAMESPACE,
            VersionTracker::new("1.0".parse::<Version>().unwrap()),
        )
    }

    fn strike_payload(lat: f64, lon: f64) -> Vec<u8> {
        format!(r#"{{"time": 1700000000000000000, "lat": {lat}, "lon": {lon}}}"#).into_bytes()
    }

    fn message(topic: &str, payload: &[u8]) -> InboundMessage {
        InboundMessage {
            topic: topic.to_string(),
            payload: Payload::Bytes(bytes::Bytes::copy_from_slice(payload)),
            qos: QoS::AtMostOnce,
            retain: false,
            subscribed_topic: "#".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_accepts_strike_inside_radius() {
        let mut p = processor(50.0);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        p.register_listener(Box::new(move |s: &StrikeEvent| sink.lock().push(s.clone())));

        let strike = p
            .on_strike_message(&strike_payload(0.1, 0.0), StrikeTime::from_secs(10))
            .unwrap();
        assert_eq!(strike.distance_km, 11.1);
        assert_eq!(strike.azimuth_degrees, 0.0);
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(p.activity.last_strike(), Some(StrikeTime::from_secs(10)));
    }

    #[test]
    fn test_rejects_strike_outside_radius() {
        let mut p = processor(10.0);
        let calls = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&calls);
        p.register_listener(Box::new(move |_: &StrikeEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(p
            .on_strike_message(&strike_payload(1.0, 0.0), StrikeTime::from_secs(1))
            .is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(p.activity.rejected.load(Ordering::Relaxed), 1);
        assert_eq!(p.activity.last_strike(), None);
    }

    #[test]
    fn test_malformed_strike_dropped() {
        let mut p = processor(50.0);
        assert!(p.on_strike_message(b"{}", StrikeTime::from_secs(1)).is_none());
        assert_eq!(p.activity.malformed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_listeners_run_in_registration_order() {
        let mut p = processor(50.0);
        let order = Arc::new(Mutex::new(Vec::new()));
        for id in 0..3 {
            let order = Arc::clone(&order);
            p.register_listener(Box::new(move |_: &StrikeEvent| order.lock().push(id)));
        }
        p.on_strike_message(&strike_payload(0.1, 0.0), StrikeTime::from_secs(1));
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_on_message_routes_by_topic() {
        let mut p = processor(50.0);
        let raw = Arc::new(AtomicU64::new(0));
        let stats = Arc::new(Mutex::new(Vec::new()));
        let strikes = Arc::new(AtomicU64::new(0));
        {
            let raw = Arc::clone(&raw);
            p.register_message_receiver(Box::new(move |_: &InboundMessage| {
                raw.fetch_add(1, Ordering::SeqCst);
            }));
            let stats = Arc::clone(&stats);
            p.register_stat_listener(Box::new(move |s: &BrokerStat| stats.lock().push(s.key.clone())));
            let strikes = Arc::clone(&strikes);
            p.register_listener(Box::new(move |_: &StrikeEvent| {
                strikes.fetch_add(1, Ordering::SeqCst);
            }));
        }

        p.on_message(&message("blitzortung/1.1/s/0/0/0", &strike_payload(0.1, 0.0)));
        p.on_message(&message("$SYS/broker/clients/connected", b"7"));
        p.on_message(&message("$SYS/broker/clients/total", b"9"));

        assert_eq!(raw.load(Ordering::SeqCst), 3);
        assert_eq!(strikes.load(Ordering::SeqCst), 1);
        assert_eq!(*stats.lock(), vec!["clients_connected".to_string()]);
    }

    #[test]
    fn test_hello_notifies_version_listeners_once() {
        let mut p = processor(50.0);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        p.register_version_listener(Box::new(move |a: &VersionAnnouncement| sink.lock().push(a.version.to_string())));

        p.on_hello(br#"{"latest_version": "1.2.0"}"#);
        p.on_hello(br#"{"latest_version": "1.2.0"}"#);
        p.on_hello(br#"{"latest_version": "bad"}"#);

        assert_eq!(*seen.lock(), vec!["1.2.0".to_string()]);
    }

    #[test]
    fn test_tick_reaches_listeners_and_callbacks() {
        struct Ticking(Arc<AtomicU64>);
        impl StrikeListener for Ticking {
            fn on_strike(&mut self, _strike: &StrikeEvent) {}
            fn on_tick(&mut self, _now: SystemTime) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let mut p = processor(50.0);
        let ticks = Arc::new(AtomicU64::new(0));
        p.register_listener(Box::new(Ticking(Arc::clone(&ticks))));
        let cb = Arc::clone(&ticks);
        p.register_tick_callback(Box::new(move |_: SystemTime| {
            cb.fetch_add(10, Ordering::SeqCst);
        }));

        p.on_tick(SystemTime::now());
        assert_eq!(ticks.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn test_connection_listener_suppresses_repeats() {
        let mut p = processor(50.0);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        p.register_connection_listener(Box::new(move |s: ConnectionState| sink.lock().push(s)));

        p.on_connection(ConnectionState::Connecting);
        p.on_connection(ConnectionState::Connected);
        p.on_connection(ConnectionState::Connected);
        p.on_connection(ConnectionState::Disconnected);

        assert_eq!(
            *seen.lock(),
            vec![
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Disconnected
            ]
        );
    }

    #[test]
    fn test_inactivity() {
        let activity = Activity::default();
        let idle = Duration::from_secs(120 * 60);
        let now = StrikeTime::from_secs(1_000_000);

        // Never seen a strike
        assert!(activity.is_inactive(idle, now));
        assert!(!activity.is_inactive(Duration::ZERO, now));

        activity
            .last_strike
            .store(StrikeTime::from_secs(1_000_000 - 60).as_nanos(), Ordering::Release);
        assert!(!activity.is_inactive(idle, now));
        assert!(activity.is_inactive(idle, StrikeTime::from_secs(1_000_000 - 60 + 7200)));
    }

    fn coordinator(
        broker: &MemoryBroker,
        config: CoordinatorConfig,
    ) -> Result<StrikeCoordinator<MemoryTransport>, CoordinatorError> {
        StrikeCoordinator::new(config, broker.transport(), ClientOptions::default())
    }

    #[test]
    fn test_new_rejects_invalid_topics() {
        let broker = MemoryBroker::new();

        let mut config = CoordinatorConfig::new(Region::new(0.0, 0.0, 50.0));
        config.hello_topic = "bad/#/x".to_string();
        assert!(matches!(
            coordinator(&broker, config),
            Err(CoordinatorError::Topic(PubSubError::InvalidTopic { .. }))
        ));

        let mut config = CoordinatorConfig::new(Region::new(0.0, 0.0, 50.0));
        config.strike_namespace = "blitz/+x".to_string();
        assert!(matches!(
            coordinator(&broker, config),
            Err(CoordinatorError::Topic(PubSubError::InvalidTopic { .. }))
        ));
    }

    #[test]
    fn test_new_rejects_zero_tick_interval() {
        let broker = MemoryBroker::new();
        let mut config = CoordinatorConfig::new(Region::new(0.0, 0.0, 50.0));
        config.tick_interval = Duration::ZERO;
        assert!(matches!(
            coordinator(&broker, config),
            Err(CoordinatorError::ZeroTickInterval)
        ));
    }

    #[test]
    fn test_new_rejects_invalid_region() {
        let broker = MemoryBroker::new();
        let config = CoordinatorConfig::new(Region::new(95.0, 0.0, 50.0));
        assert!(matches!(
            coordinator(&broker, config),
            Err(CoordinatorError::Region(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_connect_is_not_reported_as_started() {
        let broker = MemoryBroker::new();
        let coordinator =
            coordinator(&broker, CoordinatorConfig::new(Region::new(0.0, 0.0, 50.0))).unwrap();
        coordinator.client().disconnect().await;

        assert!(matches!(coordinator.connect().await, Err(PubSubError::Closed)));
        assert!(matches!(coordinator.connect().await, Err(PubSubError::Closed)));
        assert_eq!(coordinator.client().subscription_count(), 0);
        assert_eq!(broker.session_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_coordinator_closes_session() {
        let broker = MemoryBroker::new();
        let coordinator =
            coordinator(&broker, CoordinatorConfig::new(Region::new(0.0, 0.0, 50.0))).unwrap();
        coordinator.connect().await.unwrap();
        let mut states = coordinator.client().watch_state();
        tokio::time::timeout(
            Duration::from_secs(60),
            states.wait_for(|s| *s == ConnectionState::Connected),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(broker.session_count(), 1);

        drop(coordinator);
        tokio::time::timeout(Duration::from_secs(60), async {
            while broker.session_count() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("session still open");
    }
}
