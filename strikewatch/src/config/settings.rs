//! Configuration structs and their defaults.

use std::time::Duration;

use crate::pubsub::{BrokerConfig, ClientOptions, DEFAULT_CONNECT_TIMEOUT};
use crate::strike::{CoordinatorConfig, Region, DEFAULT_HELLO_TOPIC, DEFAULT_STRIKE_NAMESPACE};
use crate::window::TrackerConfig;

/// Default region radius in kilometres.
pub const DEFAULT_RADIUS_KM: f64 = 100.0;

/// Default broker host.
pub const DEFAULT_BROKER_HOST: &str = "blitzortung.ha.sed.pl";

/// Default broker port.
pub const DEFAULT_BROKER_PORT: u16 = 1883;

/// Default keep-alive in seconds.
pub const DEFAULT_KEEPALIVE_SECS: u64 = 60;

/// Default idle reset threshold in minutes.
pub const DEFAULT_IDLE_RESET_MINUTES: u64 = 120;

/// Default number of tracked nearby strikes.
pub const DEFAULT_MAX_TRACKED: usize = 100;

/// Default nearby strike lifetime in minutes.
pub const DEFAULT_TIME_WINDOW_MINUTES: u64 = 120;

/// Default tick interval in seconds.
pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 60;

/// `[region]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionSettings {
    pub latitude: f64,
    pub longitude: f64,
    pub radius_km: f64,
}

impl Default for RegionSettings {
    fn default() -> Self {
        Self {
            latitude: 0.0,
            longitude: 0.0,
            radius_km: DEFAULT_RADIUS_KM,
        }
    }
}

/// `[broker]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub keepalive_secs: u64,
    /// Generated per run when not set.
    pub client_id: Option<String>,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_BROKER_HOST.to_string(),
            port: DEFAULT_BROKER_PORT,
            keepalive_secs: DEFAULT_KEEPALIVE_SECS,
            client_id: None,
        }
    }
}

/// `[feed]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSettings {
    pub strike_namespace: String,
    pub hello_topic: String,
    pub server_stats: bool,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            strike_namespace: DEFAULT_STRIKE_NAMESPACE.to_string(),
            hello_topic: DEFAULT_HELLO_TOPIC.to_string(),
            server_stats: false,
        }
    }
}

/// `[tracking]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingSettings {
    /// Zero disables inactivity.
    pub idle_reset_minutes: u64,
    /// Zero disables the nearby strike tracker.
    pub max_tracked: usize,
    pub time_window_minutes: u64,
    pub tick_interval_secs: u64,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            idle_reset_minutes: DEFAULT_IDLE_RESET_MINUTES,
            max_tracked: DEFAULT_MAX_TRACKED,
            time_window_minutes: DEFAULT_TIME_WINDOW_MINUTES,
            tick_interval_secs: DEFAULT_TICK_INTERVAL_SECS,
        }
    }
}

/// Complete configuration file contents.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConfigFile {
    pub region: RegionSettings,
    pub broker: BrokerSettings,
    pub feed: FeedSettings,
    pub tracking: TrackingSettings,
}

impl ConfigFile {
    pub fn region(&self) -> Region {
        Region::new(
            self.region.latitude,
            self.region.longitude,
            self.region.radius_km,
        )
    }

    /// Broker settings, generating a client id when none is configured.
    pub fn broker_config(&self) -> BrokerConfig {
        let client_id = self
            .broker
            .client_id
            .clone()
            .unwrap_or_else(generated_client_id);
        BrokerConfig {
            host: self.broker.host.clone(),
            port: self.broker.port,
            keep_alive: Duration::from_secs(self.broker.keepalive_secs),
            client_id,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            keep_alive: Duration::from_secs(self.broker.keepalive_secs),
            ..ClientOptions::default()
        }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            region: self.region(),
            strike_namespace: self.feed.strike_namespace.clone(),
            hello_topic: self.feed.hello_topic.clone(),
            server_stats: self.feed.server_stats,
            idle_reset: minutes(self.tracking.idle_reset_minutes),
            tick_interval: Duration::from_secs(self.tracking.tick_interval_secs),
        }
    }

    /// Tracker limits, or `None` when tracking is disabled.
    pub fn tracker_config(&self) -> Option<TrackerConfig> {
        (self.tracking.max_tracked > 0).then(|| TrackerConfig {
            max_tracked: self.tracking.max_tracked,
            time_window: minutes(self.tracking.time_window_minutes),
        })
    }
}

fn minutes(m: u64) -> Duration {
    Duration::from_secs(m.saturating_mul(60))
}

/// `strikewatch-<pid>-<nanos>`, unique enough for one broker.
fn generated_client_id() -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    format!("strikewatch-{}-{:08x}", std::process::id(), nanos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minute_settings_convert_to_durations() {
        let config = ConfigFile::default();
        assert_eq!(
            config.coordinator_config().idle_reset,
            Duration::from_secs(DEFAULT_IDLE_RESET_MINUTES * 60)
        );
    }

    #[test]
    fn test_huge_minute_settings_saturate() {
        let mut config = ConfigFile::default();
        config.tracking.idle_reset_minutes = u64::MAX / 10;
        config.tracking.time_window_minutes = u64::MAX;

        assert_eq!(config.coordinator_config().idle_reset, Duration::from_secs(u64::MAX));
        let tracker = config.tracker_config().unwrap();
        assert_eq!(tracker.time_window, Duration::from_secs(u64::MAX));
    }
}
