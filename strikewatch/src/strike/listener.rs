//! Consumer interfaces for coordinator events.
//!
//! All listeners run on the coordinator's worker task, one at a time, in
//! registration order.

use std::time::SystemTime;

use crate::pubsub::{ConnectionState, InboundMessage};

use super::event::StrikeEvent;
use super::stats::BrokerStat;
use super::version::VersionAnnouncement;

/// Receives accepted strikes and periodic ticks.
///
/// Closures taking `&StrikeEvent` implement this directly.
pub trait StrikeListener: Send {
    /// Called for each strike inside the region.
    fn on_strike(&mut self, strike: &StrikeEvent);

    /// Called on every coordinator tick, with or without new strikes.
    fn on_tick(&mut self, _now: SystemTime) {}
}

impl<F> StrikeListener for F
where
    F: FnMut(&StrikeEvent) + Send,
{
    fn on_strike(&mut self, strike: &StrikeEvent) {
        self(strike)
    }
}

/// Periodic housekeeping callback.
pub type TickCallback = Box<dyn FnMut(SystemTime) + Send>;

/// Sees every message on the strike and statistics subscriptions before parsing.
pub type MessageReceiver = Box<dyn FnMut(&InboundMessage) + Send>;

/// Notified of newer software versions.
pub type VersionListener = Box<dyn FnMut(&VersionAnnouncement) + Send>;

/// Notified of connection state changes.
pub type ConnectionListener = Box<dyn FnMut(ConnectionState) + Send>;

/// Notified of broker statistics.
pub type StatListener = Box<dyn FnMut(&BrokerStat) + Send>;
