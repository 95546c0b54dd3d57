//! Strikewatch - nearby lightning strikes from a live pub/sub feed.
//!
//! The library subscribes to the geohash tiles covering a circular region of
//! interest, filters incoming strikes to that region, annotates them with
//! distance and bearing from the centre, and keeps a bounded, time-ordered
//! window of recent strikes for display.
//!
//! - [`geohash`] - region to tile cover
//! - [`pubsub`] - reconnecting MQTT client with topic fan-out
//! - [`strike`] - strike parsing, filtering and listener fan-out
//! - [`window`] - bounded time-ordered strike buffer and marker tracking
//! - [`config`] / [`logging`] - user configuration and tracing setup

pub mod config;
pub mod geohash;
pub mod logging;
pub mod pubsub;
pub mod strike;
pub mod window;
