//! Mapping from MQTT topics and payloads to Prometheus names and values.

use std::borrow::Cow;
use std::fmt;

use mqtt_exporter_common::topic::{SEPARATOR, strip_sys_prefix};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How a label value is obtained for each message.
///
/// Configured as a string: `"$N"` (a dollar sign followed only by digits)
/// selects topic level `N` (0-based), anything else is used verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LabelTemplate {
    /// A fixed value.
    Literal(String),
    /// The topic level at this index.
    Segment(usize),
}

/// A positional label that points past the end of the topic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("label references topic level {index} but '{topic}' has {levels} levels")]
pub struct LabelError {
    pub index: usize,
    pub levels: usize,
    pub topic: String,
}

impl LabelTemplate {
    /// Parse a template string.
    ///
    /// # Example
    /// ```
    /// use mqtt_prometheus_exporter::mapping::LabelTemplate;
    ///
    /// assert_eq!(LabelTemplate::parse("$2"), LabelTemplate::Segment(2));
    /// assert_eq!(LabelTemplate::parse("$x"), LabelTemplate::Literal("$x".into()));
    /// ```
    pub fn parse(text: &str) -> Self {
        text.strip_prefix('$')
            .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|digits| digits.parse().ok())
            .map(LabelTemplate::Segment)
            .unwrap_or_else(|| LabelTemplate::Literal(text.to_string()))
    }

    /// Resolve the label value for a topic split into levels.
    pub fn resolve<'a>(&'a self, levels: &[&'a str]) -> Result<&'a str, LabelError> {
        match self {
            LabelTemplate::Literal(value) => Ok(value.as_str()),
            LabelTemplate::Segment(index) => {
                levels.get(*index).copied().ok_or_else(|| LabelError {
                    index: *index,
                    levels: levels.len(),
                    topic: levels.join("/"),
                })
            }
        }
    }
}

impl From<String> for LabelTemplate {
    fn from(text: String) -> Self {
        LabelTemplate::parse(&text)
    }
}

impl From<&str> for LabelTemplate {
    fn from(text: &str) -> Self {
        LabelTemplate::parse(text)
    }
}

impl From<LabelTemplate> for String {
    fn from(template: LabelTemplate) -> Self {
        template.to_string()
    }
}

impl fmt::Display for LabelTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelTemplate::Literal(value) => f.write_str(value),
            LabelTemplate::Segment(index) => write!(f, "${}", index),
        }
    }
}

/// A payload that is not a decimal number.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("payload is not a number: {0:?}")]
pub struct PayloadError(pub String);

/// Parse a message payload as a floating point number.
///
/// Surrounding whitespace is ignored.
pub fn parse_payload(payload: &[u8]) -> Result<f64, PayloadError> {
    let text = String::from_utf8_lossy(payload);
    text.trim()
        .parse::<f64>()
        .map_err(|_| PayloadError(truncate(&text, 64)))
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Derive the metric name for a broker status topic.
///
/// `$SYS/broker/clients/connected` with namespace `mqtt` becomes
/// `mqtt_broker_clients_connected`. Spaces are dropped, level separators
/// become underscores and any other character Prometheus rejects is
/// replaced by an underscore.
pub fn status_metric_name(namespace: &str, topic: &str) -> String {
    let path = strip_sys_prefix(topic).unwrap_or(topic);

    let mut name = String::with_capacity(namespace.len() + 1 + path.len());
    name.push_str(namespace);
    name.push('_');

    for c in path.chars() {
        match c {
            ' ' => {}
            SEPARATOR => name.push('_'),
            c if c.is_ascii_alphanumeric() || c == '_' || c == ':' => name.push(c),
            _ => name.push('_'),
        }
    }

    name
}

/// Escape a label value for the text exposition.
///
/// Backslash, double quote and line feed are the only characters that
/// need escaping inside a quoted label value.
pub fn escape_label_value(value: &str) -> Cow<'_, str> {
    if !value.contains(['\\', '"', '\n']) {
        return Cow::Borrowed(value);
    }

    let mut escaped = String::with_capacity(value.len() + 4);
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    Cow::Owned(escaped)
}

/// Check a metric name against `[a-zA-Z_:][a-zA-Z0-9_:]*`.
pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' || first == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// Check a label name against `[a-zA-Z_][a-zA-Z0-9_]*`.
///
/// Names starting with `__` are reserved for internal use.
pub fn is_valid_label_name(name: &str) -> bool {
    if name.starts_with("__") {
        return false;
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use mqtt_exporter_common::split_topic;

    #[test]
    fn test_escape_label_value() {
        assert!(matches!(escape_label_value("kitchen"), Cow::Borrowed("kitchen")));
        assert_eq!(escape_label_value(r#"a"b\c"#), r#"a\"b\\c"#);
        assert_eq!(escape_label_value("line\nbreak"), r"line\nbreak");
    }

    #[test]
    fn test_parse_template() {
        assert_eq!(LabelTemplate::parse("$0"), LabelTemplate::Segment(0));
        assert_eq!(LabelTemplate::parse("$12"), LabelTemplate::Segment(12));
        assert_eq!(
            LabelTemplate::parse("kitchen"),
            LabelTemplate::Literal("kitchen".into())
        );
        assert_eq!(LabelTemplate::parse("$"), LabelTemplate::Literal("$".into()));
        assert_eq!(
            LabelTemplate::parse("$-1"),
            LabelTemplate::Literal("$-1".into())
        );
        assert_eq!(
            LabelTemplate::parse("$1a"),
            LabelTemplate::Literal("$1a".into())
        );
        assert_eq!(
            LabelTemplate::parse("price$1"),
            LabelTemplate::Literal("price$1".into())
        );
    }

    #[test]
    fn test_resolve_segment() {
        let levels = split_topic("home/kitchen/temperature");

        for (index, expected) in levels.iter().enumerate() {
            let template = LabelTemplate::Segment(index);
            assert_eq!(template.resolve(&levels).unwrap(), *expected);
        }
    }

    #[test]
    fn test_resolve_literal_ignores_topic() {
        let template = LabelTemplate::parse("fixed");

        for topic in ["a", "a/b/c", "", "$SYS/broker"] {
            let levels = split_topic(topic);
            assert_eq!(template.resolve(&levels).unwrap(), "fixed");
        }
    }

    #[test]
    fn test_resolve_out_of_range() {
        let levels = split_topic("foo/bar");
        let err = LabelTemplate::Segment(2).resolve(&levels).unwrap_err();

        assert_eq!(err.index, 2);
        assert_eq!(err.levels, 2);
        assert_eq!(err.topic, "foo/bar");
    }

    #[test]
    fn test_template_serde() {
        let template: LabelTemplate =
            mqtt_exporter_common::parse_config(r#""$3""#).unwrap();
        assert_eq!(template, LabelTemplate::Segment(3));
        assert_eq!(template.to_string(), "$3");
    }

    #[test]
    fn test_parse_payload() {
        assert_eq!(parse_payload(b"3.5").unwrap(), 3.5);
        assert_eq!(parse_payload(b"-12").unwrap(), -12.0);
        assert_eq!(parse_payload(b" 42\n").unwrap(), 42.0);
        assert_eq!(parse_payload(b"1e3").unwrap(), 1000.0);
        assert!(parse_payload(b"not-a-number").is_err());
        assert!(parse_payload(b"").is_err());
        assert!(parse_payload(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn test_payload_error_is_truncated() {
        let long = "x".repeat(500);
        let err = parse_payload(long.as_bytes()).unwrap_err();
        assert!(err.0.len() < 100);
        assert!(err.0.ends_with("..."));
    }

    #[test]
    fn test_status_metric_name() {
        assert_eq!(
            status_metric_name("mqtt", "$SYS/broker/clients/connected"),
            "mqtt_broker_clients_connected"
        );
        assert_eq!(
            status_metric_name("mqtt", "$SYS/broker/load/messages/received/1min"),
            "mqtt_broker_load_messages_received_1min"
        );
        assert_eq!(
            status_metric_name("mqtt", "$SYS/broker/heap/current size"),
            "mqtt_broker_heap_currentsize"
        );
        assert_eq!(
            status_metric_name("mqtt", "$SYS/broker/bytes-sent.total"),
            "mqtt_broker_bytes_sent_total"
        );
    }

    #[test]
    fn test_valid_metric_names() {
        assert!(is_valid_metric_name("room_temperature"));
        assert!(is_valid_metric_name("ns:metric_1"));
        assert!(is_valid_metric_name("_private"));

        assert!(!is_valid_metric_name(""));
        assert!(!is_valid_metric_name("1metric"));
        assert!(!is_valid_metric_name("metric-name"));
        assert!(!is_valid_metric_name("metric name"));
    }

    #[test]
    fn test_valid_label_names() {
        assert!(is_valid_label_name("room"));
        assert!(is_valid_label_name("clientID"));
        assert!(is_valid_label_name("_x1"));

        assert!(!is_valid_label_name(""));
        assert!(!is_valid_label_name("__reserved"));
        assert!(!is_valid_label_name("device-id"));
        assert!(!is_valid_label_name("ns:label"));
        assert!(!is_valid_label_name("9lives"));
    }
}
