//! Nearby strike markers.
//!
//! [`NearbyStrikeTracker`] keeps the most recent strikes in an
//! [`EventWindow`] and reports marker lifecycle changes on a channel:
//! every accepted strike produces [`MarkerEvent::Added`], and every record
//! the window evicts (for capacity on insert, for age on tick) produces
//! [`MarkerEvent::Removed`].

use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;

use crate::strike::{StrikeEvent, StrikeListener, StrikeTime};

use super::{EventWindow, WindowedRecord};

/// Default number of markers kept.
pub const DEFAULT_MAX_TRACKED: usize = 100;

/// Default marker lifetime.
pub const DEFAULT_TIME_WINDOW: Duration = Duration::from_secs(120 * 60);

/// Tracker limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Maximum markers alive at once.
    pub max_tracked: usize,
    /// How long a marker lives after its strike.
    pub time_window: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_tracked: DEFAULT_MAX_TRACKED,
            time_window: DEFAULT_TIME_WINDOW,
        }
    }
}

/// Marker lifecycle notification.
#[derive(Debug, Clone, PartialEq)]
pub enum MarkerEvent {
    Added(WindowedRecord),
    Removed(WindowedRecord),
}

impl MarkerEvent {
    pub fn record(&self) -> &WindowedRecord {
        match self {
            MarkerEvent::Added(r) | MarkerEvent::Removed(r) => r,
        }
    }
}

/// Strike listener maintaining a window of nearby strikes.
pub struct NearbyStrikeTracker {
    window: EventWindow<WindowedRecord>,
    time_window: Duration,
    events: mpsc::UnboundedSender<MarkerEvent>,
}

impl NearbyStrikeTracker {
    /// Create a tracker reporting to `events`.
    pub fn new(config: TrackerConfig, events: mpsc::UnboundedSender<MarkerEvent>) -> Self {
        Self {
            window: EventWindow::new(config.max_tracked),
            time_window: config.time_window,
            events,
        }
    }

    /// Create a tracker along with the receiving end of its events.
    pub fn channel(config: TrackerConfig) -> (Self, mpsc::UnboundedReceiver<MarkerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(config, tx), rx)
    }

    /// Number of markers currently alive.
    pub fn tracked(&self) -> usize {
        self.window.len()
    }

    fn emit(&self, event: MarkerEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("Marker receiver dropped");
        }
    }

    fn remove_all(&self, evicted: Vec<WindowedRecord>) {
        if !evicted.is_empty() {
            tracing::debug!(count = evicted.len(), "Removing strike markers");
        }
        for record in evicted {
            self.emit(MarkerEvent::Removed(record));
        }
    }
}

impl StrikeListener for NearbyStrikeTracker {
    fn on_strike(&mut self, strike: &StrikeEvent) {
        let record = WindowedRecord::new(strike.clone());
        let evicted = self.window.insert(record.clone());
        self.emit(MarkerEvent::Added(record));
        self.remove_all(evicted);
        tracing::debug!(tracked = self.window.len(), "Tracked strikes");
    }

    fn on_tick(&mut self, now: SystemTime) {
        let cutoff = StrikeTime::from_system_time(now) - self.time_window;
        let evicted = self.window.evict_older_than(cutoff);
        self.remove_all(evicted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    fn strike(secs: u64) -> StrikeEvent {
        StrikeEvent {
            latitude: 1.0,
            longitude: secs as f64 / 1000.0,
            time: StrikeTime::from_secs(secs),
            distance_km: 5.0,
            azimuth_degrees: 45.0,
            status: None,
            region: None,
            delay: None,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<MarkerEvent>) -> Vec<MarkerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_add_then_capacity_removal() {
        let (mut tracker, mut rx) = NearbyStrikeTracker::channel(TrackerConfig {
            max_tracked: 2,
            time_window: Duration::from_secs(60),
        });

        tracker.on_strike(&strike(1));
        tracker.on_strike(&strike(2));
        assert_eq!(drain(&mut rx).len(), 2);

        tracker.on_strike(&strike(3));
        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], MarkerEvent::Added(r) if r.event.time == StrikeTime::from_secs(3)));
        assert!(matches!(&events[1], MarkerEvent::Removed(r) if r.event.time == StrikeTime::from_secs(1)));
        assert_eq!(tracker.tracked(), 2);
    }

    #[test]
    fn test_tick_removes_expired() {
        let (mut tracker, mut rx) = NearbyStrikeTracker::channel(TrackerConfig {
            max_tracked: 10,
            time_window: Duration::from_secs(60),
        });
        tracker.on_strike(&strike(0));
        tracker.on_strike(&strike(30));
        drain(&mut rx);

        tracker.on_tick(UNIX_EPOCH + Duration::from_secs(61));
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], MarkerEvent::Removed(r) if r.event.time == StrikeTime::EPOCH));
        assert_eq!(tracker.tracked(), 1);

        tracker.on_tick(UNIX_EPOCH + Duration::from_secs(61));
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_removed_ids_match_added() {
        let (mut tracker, mut rx) = NearbyStrikeTracker::channel(TrackerConfig {
            max_tracked: 1,
            time_window: Duration::from_secs(60),
        });
        tracker.on_strike(&strike(1));
        tracker.on_strike(&strike(2));

        let events = drain(&mut rx);
        assert_eq!(events[0].record().id, events[2].record().id);
    }

    #[test]
    fn test_dropped_receiver_is_harmless() {
        let (mut tracker, rx) = NearbyStrikeTracker::channel(TrackerConfig::default());
        drop(rx);
        tracker.on_strike(&strike(1));
        assert_eq!(tracker.tracked(), 1);
    }
}
