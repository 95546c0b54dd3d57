//! Topic filter validation and wildcard matching.
//!
//! Follows MQTT 3.1.1 semantics:
//! - `+` matches exactly one level and must occupy a whole level
//! - `#` matches any number of levels (including zero) and must be last
//! - Topics starting with `$` are not matched by filters starting with a
//!   wildcard (broker-internal topics such as `$SYS/...`)

use super::error::PubSubError;

const SINGLE_LEVEL: &str = "+";
const MULTI_LEVEL: &str = "#";

/// Validates a subscription filter.
pub fn validate_filter(filter: &str) -> Result<(), PubSubError> {
    let invalid = |reason| PubSubError::InvalidTopic {
        topic: filter.to_string(),
        reason,
    };

    if filter.is_empty() {
        return Err(invalid("topic must not be empty"));
    }
    if filter.contains('\0') {
        return Err(invalid("topic must not contain NUL"));
    }

    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len() - 1;
    for (i, level) in levels.iter().enumerate() {
        if level.contains('#') && (*level != MULTI_LEVEL || i != last) {
            return Err(invalid("'#' must be the whole last level"));
        }
        if level.contains('+') && *level != SINGLE_LEVEL {
            return Err(invalid("'+' must occupy a whole level"));
        }
    }

    Ok(())
}

/// Returns true if `topic` is matched by the subscription `filter`.
///
/// The filter is assumed to be valid (see [`validate_filter`]).
pub fn matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some(MULTI_LEVEL), _) => return true,
            (Some(SINGLE_LEVEL), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
