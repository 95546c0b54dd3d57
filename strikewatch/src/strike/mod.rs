//! Lightning strike ingestion.
//!
//! - [`StrikeEvent`], [`Region`] - strike payloads and relative geometry
//! - [`StrikeCoordinator`] - subscription management and listener fan-out
//! - [`VersionTracker`] - newer-release announcements from the feed
//! - [`parse_broker_stat`] - broker `$SYS` statistics

mod coordinator;
mod event;
mod listener;
mod stats;
mod version;

pub use coordinator::{
    CoordinatorConfig, CoordinatorDiagnostics, CoordinatorError, StrikeCoordinator, StrikeProcessor,
    DEFAULT_HELLO_TOPIC, DEFAULT_IDLE_RESET, DEFAULT_STRIKE_NAMESPACE, DEFAULT_TICK_INTERVAL,
};
pub use event::{parse_strike, strike_topic, ParseError, Region, StrikeEvent, StrikeTime, EARTH_RADIUS_KM};
pub use listener::{
    ConnectionListener, MessageReceiver, StatListener, StrikeListener, TickCallback,
    VersionListener,
};
pub use stats::{is_retained_stat, parse_broker_stat, BrokerStat, StatValue, SYS_PREFIX, SYS_TOPIC};
pub use version::{Version, VersionAnnouncement, VersionParseError, VersionTracker};
