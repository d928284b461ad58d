//! MQTT topic and topic-filter helpers.
//!
//! Topics are slash-delimited routing keys (`home/kitchen/temperature`).
//! Filters may contain the single-level wildcard `+` and a trailing
//! multi-level wildcard `#`.

use crate::error::{Error, Result};

/// Level separator.
pub const SEPARATOR: char = '/';

/// Single-level wildcard.
pub const SINGLE_LEVEL_WILDCARD: &str = "+";

/// Multi-level wildcard.
pub const MULTI_LEVEL_WILDCARD: &str = "#";

/// First level of broker-internal status topics.
pub const SYS_PREFIX: &str = "$SYS";

/// Filter matching every broker status topic.
///
/// # Example
/// ```
/// use mqtt_exporter_common::topic::sys_wildcard;
///
/// assert_eq!(sys_wildcard(), "$SYS/#");
/// ```
pub fn sys_wildcard() -> String {
    format!("{}/{}", SYS_PREFIX, MULTI_LEVEL_WILDCARD)
}

/// Split a topic into its levels.
///
/// # Example
/// ```
/// use mqtt_exporter_common::topic::split_topic;
///
/// assert_eq!(split_topic("home/kitchen/temp"), vec!["home", "kitchen", "temp"]);
/// assert_eq!(split_topic("a//b"), vec!["a", "", "b"]);
/// ```
pub fn split_topic(topic: &str) -> Vec<&str> {
    topic.split(SEPARATOR).collect()
}

/// Strip the `$SYS/` level from a broker status topic.
///
/// Returns `None` for topics outside the status tree.
pub fn strip_sys_prefix(topic: &str) -> Option<&str> {
    topic
        .strip_prefix(SYS_PREFIX)
        .and_then(|rest| rest.strip_prefix(SEPARATOR))
}

/// Check that a subscription filter is well formed.
pub fn validate_filter(filter: &str) -> Result<()> {
    let invalid = |reason: &str| Error::InvalidFilter {
        filter: filter.to_string(),
        reason: reason.to_string(),
    };

    if filter.is_empty() {
        return Err(invalid("filter is empty"));
    }

    let levels = split_topic(filter);
    let last = levels.len() - 1;

    for (i, level) in levels.iter().enumerate() {
        if level.contains('#') {
            if *level != MULTI_LEVEL_WILDCARD {
                return Err(invalid("'#' must occupy a whole level"));
            }
            if i != last {
                return Err(invalid("'#' is only allowed as the last level"));
            }
        }
        if level.contains('+') && *level != SINGLE_LEVEL_WILDCARD {
            return Err(invalid("'+' must occupy a whole level"));
        }
    }

    Ok(())
}

/// Whether a filter ends with the multi-level wildcard.
pub fn has_multi_level_wildcard(filter: &str) -> bool {
    filter == MULTI_LEVEL_WILDCARD || filter.ends_with("/#")
}

/// Number of levels a filter spells out (excluding a trailing `#`).
pub fn fixed_level_count(filter: &str) -> usize {
    let levels = split_topic(filter).len();
    if has_multi_level_wildcard(filter) {
        levels - 1
    } else {
        levels
    }
}

/// Check whether a concrete topic matches a subscription filter.
///
/// Filters starting with a wildcard never match topics starting with `$`,
/// so a plain `#` subscription does not see broker status topics.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$')
        && (filter.starts_with('+') || filter.starts_with('#'))
    {
        return false;
    }

    let mut filter_levels = filter.split(SEPARATOR);
    let mut topic_levels = topic.split(SEPARATOR);

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some(MULTI_LEVEL_WILDCARD), _) => return true,
            (Some(SINGLE_LEVEL_WILDCARD), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
