//! Strike events and their geometry relative to a region.
//!
//! Strike payloads arrive as JSON:
//!
//! ```json
//! {"time": 1718000000123456789, "lat": 52.1, "lon": 21.3, "status": 0, "region": 1, "delay": 2.4}
//! ```
//!
//! `time`, `lat` and `lon` are required; the rest are carried through when
//! present. Distance and azimuth from the region center use an
//! equirectangular approximation, which is accurate enough at the few
//! hundred kilometre scale a region covers.

use std::fmt;
use std::ops::Sub;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Mean Earth radius used for distances.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Errors parsing a strike payload.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Invalid strike JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Field '{field}' is out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },
}

// =============================================================================
// Time
// =============================================================================

/// Strike occurrence time, in nanoseconds since the Unix epoch.
///
/// Windows and cutoffs only accept this type, so second- and
/// nanosecond-based timestamps cannot be mixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StrikeTime(u64);

impl StrikeTime {
    /// The epoch itself; also used for "never".
    pub const EPOCH: StrikeTime = StrikeTime(0);

    pub fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    pub fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(NANOS_PER_SEC))
    }

    /// Converts a wall-clock time; times before the epoch clamp to it.
    pub fn from_system_time(time: SystemTime) -> Self {
        let nanos = time
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos().min(u64::MAX as u128) as u64)
            .unwrap_or(0);
        Self(nanos)
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    pub fn as_nanos(self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / NANOS_PER_SEC as f64
    }

    /// Time elapsed since `earlier`, zero if `earlier` is later.
    pub fn since(self, earlier: StrikeTime) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }

    /// UTC timestamp, if representable.
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        let secs = (self.0 / NANOS_PER_SEC) as i64;
        let nanos = (self.0 % NANOS_PER_SEC) as u32;
        DateTime::from_timestamp(secs, nanos)
    }
}

impl Sub<Duration> for StrikeTime {
    type Output = StrikeTime;

    /// Saturates at the epoch.
    fn sub(self, rhs: Duration) -> StrikeTime {
        let nanos = rhs.as_nanos().min(u64::MAX as u128) as u64;
        StrikeTime(self.0.saturating_sub(nanos))
    }
}

impl From<SystemTime> for StrikeTime {
    fn from(time: SystemTime) -> Self {
        Self::from_system_time(time)
    }
}

impl fmt::Display for StrikeTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.3fZ")),
            None => write!(f, "{}ns", self.0),
        }
    }
}

// =============================================================================
// Region
// =============================================================================

/// Circular region of interest around an observer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub latitude: f64,
    pub longitude: f64,
    pub radius_km: f64,
}

impl Region {
    pub fn new(latitude: f64, longitude: f64, radius_km: f64) -> Self {
        Self {
            latitude,
            longitude,
            radius_km,
        }
    }

    /// Distance (km, one decimal) and azimuth (whole degrees, −180..=180,
    /// 0 = north, 90 = east) of a point as seen from the center.
    pub fn locate(&self, latitude: f64, longitude: f64) -> (f64, f64) {
        let dy = (latitude - self.latitude).to_radians();
        let dx = (longitude - self.longitude).to_radians() * self.latitude.to_radians().cos();

        let distance_km = round_to(dx.hypot(dy) * EARTH_RADIUS_KM, 1);
        let azimuth_degrees = dx.atan2(dy).to_degrees().round();
        (distance_km, azimuth_degrees)
    }

    /// True if a strike at `distance_km` lies inside the region.
    pub fn contains_distance(&self, distance_km: f64) -> bool {
        distance_km < self.radius_km
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({:.4}, {:.4}) r={}km",
            self.latitude, self.longitude, self.radius_km
        )
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

// =============================================================================
// Strike
// =============================================================================

/// A strike accepted inside a region.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrikeEvent {
    pub latitude: f64,
    pub longitude: f64,
    pub time: StrikeTime,
    pub distance_km: f64,
    pub azimuth_degrees: f64,
    /// Detection status reported by the feed.
    pub status: Option<i64>,
    /// Feed region identifier.
    pub region: Option<i64>,
    /// Reported processing delay in seconds.
    pub delay: Option<f64>,
}

#[derive(Deserialize)]
struct RawStrike {
    lat: f64,
    lon: f64,
    time: u64,
    #[serde(default)]
    status: Option<Value>,
    #[serde(default)]
    region: Option<Value>,
    #[serde(default)]
    delay: Option<Value>,
}

/// Parse a strike payload and locate it relative to `region`.
///
/// The radius filter is not applied here.
pub fn parse_strike(region: &Region, payload: &[u8]) -> Result<StrikeEvent, ParseError> {
    let raw: RawStrike = serde_json::from_slice(payload)?;

    if !(-90.0..=90.0).contains(&raw.lat) {
        return Err(ParseError::OutOfRange {
            field: "lat",
            value: raw.lat,
        });
    }
    if !(-180.0..=180.0).contains(&raw.lon) {
        return Err(ParseError::OutOfRange {
            field: "lon",
            value: raw.lon,
        });
    }

    let (distance_km, azimuth_degrees) = region.locate(raw.lat, raw.lon);

    Ok(StrikeEvent {
        latitude: raw.lat,
        longitude: raw.lon,
        time: StrikeTime::from_nanos(raw.time),
        distance_km,
        azimuth_degrees,
        status: raw.status.as_ref().and_then(Value::as_i64),
        region: raw.region.as_ref().and_then(Value::as_i64),
        delay: raw.delay.as_ref().and_then(Value::as_f64),
    })
}

/// Subscription filter for strikes inside a geohash cell:
/// `<namespace>/<c>/<e>/<l>/<l>/#`.
pub fn strike_topic(namespace: &str, cell: &str) -> String {
    let mut topic = String::with_capacity(namespace.len() + cell.len() * 2 + 2);
    topic.push_str(namespace.trim_end_matches('/'));
    for c in cell.chars() {
        topic.push('/');
        topic.push(c);
    }
    topic.push_str("/#");
    topic
}
