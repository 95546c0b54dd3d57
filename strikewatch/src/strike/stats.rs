//! Broker self-statistics published under `$SYS/broker/`.
//!
//! Brokers publish dozens of metrics; only the interesting ones are kept:
//! the `load/.../1min` averages and `clients/connected` from their
//! respective families, plus every other top-level metric.

use std::fmt;

use serde::Serialize;

/// Filter covering every broker statistic.
pub const SYS_TOPIC: &str = "$SYS/broker/#";

/// Prefix stripped from statistic topics.
pub const SYS_PREFIX: &str = "$SYS/broker/";

/// Typed statistic value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StatValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for StatValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatValue::Integer(v) => write!(f, "{v}"),
            StatValue::Float(v) => write!(f, "{v}"),
            StatValue::Text(v) => f.write_str(v),
        }
    }
}

/// One broker statistic.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BrokerStat {
    /// Topic below `$SYS/broker/`, e.g. `load/messages/received/1min`.
    pub topic: String,
    /// Topic with `/` replaced by `_`, e.g. `clients_connected`.
    pub key: String,
    pub value: StatValue,
}

/// Returns true if a statistic topic (without prefix) is worth keeping.
pub fn is_retained_stat(topic: &str) -> bool {
    if topic.starts_with("load") && !topic.ends_with("/1min") {
        return false;
    }
    if topic.starts_with("clients") && topic != "clients/connected" {
        return false;
    }
    true
}

/// Parse a `$SYS/broker/...` message.
///
/// Returns `None` for other topics, filtered metrics and non-UTF-8 payloads.
pub fn parse_broker_stat(topic: &str, payload: &[u8]) -> Option<BrokerStat> {
    let suffix = topic.strip_prefix(SYS_PREFIX)?;
    if suffix.is_empty() || !is_retained_stat(suffix) {
        return None;
    }
    let text = std::str::from_utf8(payload).ok()?.trim();
    let key = suffix.replace('/', "_");

    let value = if key.starts_with("load") {
        text.parse::<f64>()
            .map(StatValue::Float)
            .unwrap_or_else(|_| StatValue::Text(text.to_string()))
    } else if key == "version" {
        StatValue::Text(text.to_string())
    } else {
        let number = if key == "uptime" {
            text.split(' ').next().unwrap_or_default()
        } else {
            text
        };
        number
            .parse::<i64>()
            .map(StatValue::Integer)
            .unwrap_or_else(|_| StatValue::Text(number.to_string()))
    };

    Some(BrokerStat {
        topic: suffix.to_string(),
        key,
        value,
    })
}
