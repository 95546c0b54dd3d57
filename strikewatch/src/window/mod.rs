//! Time-ordered, bounded buffer of recent strikes.
//!
//! # Ordering
//!
//! ```text
//!   oldest                                newest
//!  ┌──────┬──────┬──────┬──────┬──────┬──────┐
//!  │ t=1  │ t=2  │ t=2  │ t=5  │ t=7  │ t=9  │ ◄── append (t > max seen)
//!  └──────┴──────┴──────┴──────┴──────┴──────┘
//!     ▲                    ▲
//!     │                    └── binary-search insert (late arrival)
//!     └── capacity / age eviction drains from the front
//! ```
//!
//! Strikes arrive mostly in time order, so the common case is an append.
//! Late arrivals are placed after any records with the same time, which
//! keeps ties in insertion order. Records leave the window only through
//! capacity or age eviction, and every eviction hands the removed records
//! back to the caller.

mod tracker;

pub use tracker::{
    MarkerEvent, NearbyStrikeTracker, TrackerConfig, DEFAULT_MAX_TRACKED, DEFAULT_TIME_WINDOW,
};

use std::collections::VecDeque;
use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::strike::{StrikeEvent, StrikeTime};

/// Anything with an occurrence time.
pub trait Timestamped {
    fn time(&self) -> StrikeTime;
}

impl Timestamped for StrikeEvent {
    fn time(&self) -> StrikeTime {
        self.time
    }
}

/// Bounded, time-sorted buffer.
#[derive(Debug, Clone)]
pub struct EventWindow<R> {
    records: VecDeque<R>,
    max_records: usize,
    max_seen: Option<StrikeTime>,
}

impl<R: Timestamped> EventWindow<R> {
    /// Create a window holding at most `max_records` records.
    pub fn new(max_records: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(max_records.min(1024)),
            max_records,
            max_seen: None,
        }
    }

    /// Insert a record, returning the oldest records evicted to stay
    /// within capacity (possibly including the one just inserted).
    pub fn insert(&mut self, record: R) -> Vec<R> {
        let time = record.time();
        if self.max_seen.map_or(true, |max| time > max) {
            self.max_seen = Some(time);
            self.records.push_back(record);
        } else {
            let index = self.records.partition_point(|r| r.time() <= time);
            self.records.insert(index, record);
        }

        let excess = self.records.len().saturating_sub(self.max_records);
        self.records.drain(..excess).collect()
    }

    /// Remove and return every record with time at or before `cutoff`.
    pub fn evict_older_than(&mut self, cutoff: StrikeTime) -> Vec<R> {
        match self.records.front() {
            Some(first) if first.time() <= cutoff => {}
            _ => return Vec::new(),
        }
        let index = self.records.partition_point(|r| r.time() <= cutoff);
        self.records.drain(..index).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Maximum number of records held.
    pub fn max_records(&self) -> usize {
        self.max_records
    }

    /// Records from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &R> {
        self.records.iter()
    }

    pub fn oldest(&self) -> Option<&R> {
        self.records.front()
    }

    pub fn newest(&self) -> Option<&R> {
        self.records.back()
    }
}

/// Stable identifier of a strike, derived from its position and time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct StrikeId(String);

impl StrikeId {
    /// Identifier for a strike at (`latitude`, `longitude`) occurring at `time`.
    pub fn derive(latitude: f64, longitude: f64, time: StrikeTime) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(latitude.to_bits().to_le_bytes());
        hasher.update(longitude.to_bits().to_le_bytes());
        hasher.update(time.as_nanos().to_le_bytes());
        let digest = hasher.finalize();

        let hex = digest[..16].iter().map(|b| format!("{b:02x}")).collect();
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StrikeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A strike held in a window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowedRecord {
    pub id: StrikeId,
    pub event: StrikeEvent,
}

impl WindowedRecord {
    pub fn new(event: StrikeEvent) -> Self {
        Self {
            id: StrikeId::derive(event.latitude, event.longitude, event.time),
            event,
        }
    }
}

impl Timestamped for WindowedRecord {
    fn time(&self) -> StrikeTime {
        self.event.time
    }
}
