//! INI parsing logic for converting `Ini` → `ConfigFile`.
//!
//! This is the single place where INI key names are mapped to struct fields.

use std::str::FromStr;

use ini::Ini;

use crate::pubsub::topic::validate_filter;

use super::file::ConfigFileError;
use super::settings::ConfigFile;

/// Upper bound for minute-valued settings (one leap year).
pub(super) const MAX_MINUTES: u64 = 366 * 24 * 60;

/// Parse an `Ini` object into a `ConfigFile`.
///
/// Starts from `ConfigFile::default()` and overlays any values found in the INI.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [region] section
    if let Some(section) = ini.section(Some("region")) {
        if let Some(v) = section.get("latitude") {
            config.region.latitude = parse_in_range("region", "latitude", v, -90.0, 90.0)?;
        }
        if let Some(v) = section.get("longitude") {
            config.region.longitude = parse_in_range("region", "longitude", v, -180.0, 180.0)?;
        }
        if let Some(v) = section.get("radius_km") {
            config.region.radius_km =
                parse_in_range("region", "radius_km", v, 0.0, f64::INFINITY)?;
        }
    }

    // [broker] section
    if let Some(section) = ini.section(Some("broker")) {
        if let Some(v) = section.get("host") {
            let v = v.trim();
            if v.is_empty() {
                return Err(ConfigFileError::InvalidValue {
                    section: "broker".to_string(),
                    key: "host".to_string(),
                    value: v.to_string(),
                    reason: "must not be empty".to_string(),
                });
            }
            config.broker.host = v.to_string();
        }
        if let Some(v) = section.get("port") {
            config.broker.port = parse_value("broker", "port", v, "must be a port number")?;
        }
        if let Some(v) = section.get("keepalive_secs") {
            let secs: u64 = parse_value(
                "broker",
                "keepalive_secs",
                v,
                "must be a positive integer (seconds)",
            )?;
            if secs == 0 || secs > u64::from(u16::MAX) {
                return Err(ConfigFileError::InvalidValue {
                    section: "broker".to_string(),
                    key: "keepalive_secs".to_string(),
                    value: v.to_string(),
                    reason: "must be between 1 and 65535".to_string(),
                });
            }
            config.broker.keepalive_secs = secs;
        }
        if let Some(v) = section.get("client_id") {
            let v = v.trim();
            if !v.is_empty() {
                config.broker.client_id = Some(v.to_string());
            }
        }
    }

    // [feed] section
    if let Some(section) = ini.section(Some("feed")) {
        if let Some(v) = section.get("strike_namespace") {
            let v = v.trim().trim_end_matches('/');
            if !v.is_empty() {
                if v.contains(['+', '#', '\0']) {
                    return Err(ConfigFileError::InvalidValue {
                        section: "feed".to_string(),
                        key: "strike_namespace".to_string(),
                        value: v.to_string(),
                        reason: "must not contain wildcards".to_string(),
                    });
                }
                config.feed.strike_namespace = v.to_string();
            }
        }
        if let Some(v) = section.get("hello_topic") {
            let v = v.trim();
            if !v.is_empty() {
                validate_filter(v).map_err(|e| ConfigFileError::InvalidValue {
                    section: "feed".to_string(),
                    key: "hello_topic".to_string(),
                    value: v.to_string(),
                    reason: e.to_string(),
                })?;
                config.feed.hello_topic = v.to_string();
            }
        }
        if let Some(v) = section.get("server_stats") {
            config.feed.server_stats = parse_bool(v);
        }
    }

    // [tracking] section
    if let Some(section) = ini.section(Some("tracking")) {
        if let Some(v) = section.get("idle_reset_minutes") {
            config.tracking.idle_reset_minutes = parse_minutes(
                "idle_reset_minutes",
                v,
                "must be a non-negative integer (minutes, 0 disables)",
            )?;
        }
        if let Some(v) = section.get("max_tracked") {
            config.tracking.max_tracked = parse_value(
                "tracking",
                "max_tracked",
                v,
                "must be a non-negative integer (0 disables)",
            )?;
        }
        if let Some(v) = section.get("time_window_minutes") {
            config.tracking.time_window_minutes =
                parse_minutes("time_window_minutes", v, "must be a non-negative integer (minutes)")?;
        }
        if let Some(v) = section.get("tick_interval_secs") {
            let secs: u64 = parse_value(
                "tracking",
                "tick_interval_secs",
                v,
                "must be a positive integer (seconds)",
            )?;
            if secs == 0 {
                return Err(ConfigFileError::InvalidValue {
                    section: "tracking".to_string(),
                    key: "tick_interval_secs".to_string(),
                    value: v.to_string(),
                    reason: "must be a positive integer (seconds)".to_string(),
                });
            }
            config.tracking.tick_interval_secs = secs;
        }
    }

    Ok(config)
}

fn parse_value<T: FromStr>(
    section: &str,
    key: &str,
    value: &str,
    reason: &str,
) -> Result<T, ConfigFileError> {
    value.trim().parse().map_err(|_| ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    })
}

fn parse_in_range(
    section: &str,
    key: &str,
    value: &str,
    min: f64,
    max: f64,
) -> Result<f64, ConfigFileError> {
    let reason = if max.is_finite() {
        format!("must be a number between {min} and {max}")
    } else {
        format!("must be a number of at least {min}")
    };
    let parsed: f64 = parse_value(section, key, value, &reason)?;
    if !(min..=max).contains(&parsed) {
        return Err(ConfigFileError::InvalidValue {
            section: section.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            reason,
        });
    }
    Ok(parsed)
}

fn parse_minutes(key: &str, value: &str, reason: &str) -> Result<u64, ConfigFileError> {
    let minutes: u64 = parse_value("tracking", key, value, reason)?;
    if minutes > MAX_MINUTES {
        return Err(ConfigFileError::InvalidValue {
            section: "tracking".to_string(),
            key: key.to_string(),
            value: value.to_string(),
            reason: format!("must be at most {MAX_MINUTES} minutes"),
        });
    }
    Ok(minutes)
}

pub(super) fn parse_bool(value: &str) -> bool {
    let v = value.trim().to_lowercase();
    v == "true" || v == "1" || v == "yes" || v == "on"
}
