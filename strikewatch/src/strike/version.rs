//! Software version announcements.
//!
//! The feed periodically publishes a hello message that may advertise a
//! newer release:
//!
//! ```json
//! {"latest_version": "1.4.2", "latest_version_title": "...", "latest_version_message": "..."}
//! ```
//!
//! Versions are dotted integer tuples compared component-wise, so `1.10`
//! is newer than `1.9` and `1.2.0` is newer than `1.2`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_TITLE: &str = "Blitzortung";
const PROJECT_URL: &str = "https://github.com/strikewatch/strikewatch";

/// Errors parsing a version string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionParseError {
    #[error("Version string is empty")]
    Empty,

    #[error("Invalid component '{component}' in version '{version}'")]
    InvalidComponent { version: String, component: String },
}

/// A dotted numeric version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub struct Version(Vec<u32>);

impl Version {
    /// Version of this library.
    pub fn current() -> Self {
        env!("CARGO_PKG_VERSION").parse().unwrap_or_default()
    }

    pub fn components(&self) -> &[u32] {
        &self.0
    }
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(VersionParseError::Empty);
        }
        s.split('.')
            .map(|part| {
                part.parse::<u32>()
                    .map_err(|_| VersionParseError::InvalidComponent {
                        version: s.to_string(),
                        component: part.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Version)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(u32::to_string).collect();
        f.write_str(&parts.join("."))
    }
}

/// A newer release advertised by the feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionAnnouncement {
    pub version: Version,
    pub title: String,
    pub message: String,
}

#[derive(Deserialize)]
struct HelloPayload {
    latest_version: Option<String>,
    latest_version_message: Option<String>,
    latest_version_title: Option<String>,
}

/// Decides which hello messages deserve a notification.
///
/// Each strictly newer version is announced once; repeats and older
/// versions are ignored.
#[derive(Debug, Clone)]
pub struct VersionTracker {
    current: Version,
    announced: Option<Version>,
}

impl VersionTracker {
    /// Track announcements against `current`.
    pub fn new(current: Version) -> Self {
        Self {
            current,
            announced: None,
        }
    }

    /// Handle a hello payload, returning an announcement if it is news.
    pub fn on_hello(&mut self, payload: &[u8]) -> Option<VersionAnnouncement> {
        let hello: HelloPayload = match serde_json::from_slice(payload) {
            Ok(hello) => hello,
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring malformed hello message");
                return None;
            }
        };

        let latest_str = hello.latest_version.filter(|v| !v.is_empty())?;
        let latest: Version = match latest_str.parse() {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring unparseable version announcement");
                return None;
            }
        };

        let newest_known = self.announced.as_ref().unwrap_or(&self.current);
        if latest <= *newest_known {
            return None;
        }

        tracing::info!(version = %latest_str, "New version is available");
        self.announced = Some(latest.clone());

        Some(VersionAnnouncement {
            message: hello.latest_version_message.unwrap_or_else(|| {
                format!("New version {latest_str} is available. [Check it out]({PROJECT_URL})")
            }),
            title: hello
                .latest_version_title
                .unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            version: latest,
        })
    }
}

impl Default for VersionTracker {
    fn default() -> Self {
        Self::new(Version::current())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    #[test]
    fn test_numeric_comparison() {
        assert!(v("1.10") > v("1.9"));
        assert!(v("2.0") > v("1.99.99"));
        assert!(v("1.2.0") > v("1.2"));
        assert_eq!(v("01.2"), v("1.2"));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<Version>(), Err(VersionParseError::Empty));
        assert!(matches!(
            "1.x".parse::<Version>(),
            Err(VersionParseError::InvalidComponent { component, .. }) if component == "x"
        ));
        assert!("1..2".parse::<Version>().is_err());
        assert!("1.2-beta".parse::<Version>().is_err());
    }

    #[test]
    fn test_display_round_trip() {
        assert_eq!(v("1.4.2").to_string(), "1.4.2");
    }

    #[test]
    fn test_current_version_parses() {
        assert!(!Version::current().components().is_empty());
    }

    #[test]
    fn test_announces_newer_once() {
        let mut tracker = VersionTracker::new(v("1.0.0"));

        let announcement = tracker
            .on_hello(br#"{"latest_version": "1.1.0"}"#)
            .expect("newer version announced");
        assert_eq!(announcement.version, v("1.1.0"));
        assert_eq!(announcement.title, "Blitzortung");
        assert!(announcement.message.starts_with("New version 1.1.0 is available."));

        assert!(tracker.on_hello(br#"{"latest_version": "1.1.0"}"#).is_none());
        assert!(tracker.on_hello(br#"{"latest_version": "1.0.5"}"#).is_none());
        assert!(tracker.on_hello(br#"{"latest_version": "1.2"}"#).is_some());
    }

    #[test]
    fn test_custom_title_and_message() {
        let mut tracker = VersionTracker::new(v("1.0"));
        let a = tracker
            .on_hello(br#"{"latest_version": "2.0", "latest_version_title": "T", "latest_version_message": "M"}"#)
            .unwrap();
        assert_eq!(a.title, "T");
        assert_eq!(a.message, "M");
    }

    #[test]
    fn test_ignores_same_older_and_malformed() {
        let mut tracker = VersionTracker::new(v("1.0"));
        assert!(tracker.on_hello(br#"{"latest_version": "1.0"}"#).is_none());
        assert!(tracker.on_hello(br#"{"latest_version": "0.9"}"#).is_none());
        assert!(tracker.on_hello(br#"{"latest_version": "one"}"#).is_none());
        assert!(tracker.on_hello(br#"{"something": "else"}"#).is_none());
        assert!(tracker.on_hello(b"garbage").is_none());
    }
}
