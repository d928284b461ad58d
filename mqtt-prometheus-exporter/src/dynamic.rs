//! Gauges created on first sight of a broker status topic.
//!
//! Every `$SYS/...` topic gets its own gauge family, named after the topic
//! and labelled with the broker address and this exporter's client id.
//! Families are never removed.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::config::BrokerStatusConfig;
use crate::mapping::{parse_payload, status_metric_name};
use crate::registry::{ExporterStats, GaugeFamily, MetricsRegistry};
use crate::router::MessageHandler;

/// Label carrying the broker address.
pub const URL_LABEL: &str = "url";

/// Label carrying the exporter's client id.
pub const CLIENT_ID_LABEL: &str = "clientID";

/// What happened to a status message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Observation {
    /// Topic is on the ignore list.
    Ignored,
    /// Gauge family created and set.
    Created(f64),
    /// Existing gauge family set.
    Updated(f64),
    /// Not exported (name collision or limit reached).
    Dropped,
}

/// Lazily populated map from derived metric name to gauge family.
pub struct DynamicGaugeRegistry {
    registry: Arc<MetricsRegistry>,
    stats: ExporterStats,
    namespace: String,
    ignore: Vec<glob::Pattern>,
    max_metrics: usize,
    /// Label values, constant for the life of the process.
    url: String,
    client_id: String,
    /// `None` marks a name that could not be registered.
    gauges: Mutex<HashMap<String, Option<GaugeFamily>>>,
}

impl DynamicGaugeRegistry {
    /// Create an empty registry.
    pub fn new(
        config: &BrokerStatusConfig,
        registry: Arc<MetricsRegistry>,
        stats: ExporterStats,
        url: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        let ignore = config
            .ignore
            .iter()
            .filter_map(|p| glob::Pattern::new(p).ok())
            .collect();

        Self {
            registry,
            stats,
            namespace: config.namespace.clone(),
            ignore,
            max_metrics: config.max_metrics,
            url: url.into(),
            client_id: client_id.into(),
            gauges: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a topic is on the ignore list.
    pub fn is_ignored(&self, topic: &str) -> bool {
        self.ignore.iter().any(|p| p.matches(topic))
    }

    /// Number of gauge families created.
    pub fn len(&self) -> usize {
        self.gauges.lock().values().filter(|g| g.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names of the gauge families created so far, sorted.
    pub fn metric_names(&self) -> Vec<String> {
        let gauges = self.gauges.lock();
        let mut names: Vec<String> = gauges
            .iter()
            .filter(|(_, g)| g.is_some())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Apply one status message.
    pub fn observe(&self, topic: &str, payload: &[u8]) -> Observation {
        if self.is_ignored(topic) {
            trace!(topic = %topic, "Ignoring status topic");
            return Observation::Ignored;
        }

        let name = status_metric_name(&self.namespace, topic);

        let value = match parse_payload(payload) {
            Ok(value) => value,
            Err(e) => {
                debug!(
                    metric = %name,
                    topic = %topic,
                    error = %e,
                    "Recording zero for unparseable payload"
                );
                self.stats.record_parse_error(&name);
                0.0
            }
        };

        let labels = [self.url.as_str(), self.client_id.as_str()];

        // Lookup, registration and insert happen under one lock.
        let mut gauges = self.gauges.lock();

        if let Some(entry) = gauges.get(&name) {
            return match entry {
                Some(family) => {
                    family.set(&labels, value);
                    Observation::Updated(value)
                }
                None => {
                    self.stats.record_dynamic_dropped();
                    Observation::Dropped
                }
            };
        }

        // Remembered collisions do not count against the limit.
        let created = gauges.values().filter(|g| g.is_some()).count();
        if created >= self.max_metrics {
            warn!(
                max_metrics = self.max_metrics,
                topic = %topic,
                "Status metric limit reached, dropping new topic"
            );
            self.stats.record_dynamic_dropped();
            return Observation::Dropped;
        }

        let help = format!("Broker status from {}", topic);
        let label_names = vec![URL_LABEL.to_string(), CLIENT_ID_LABEL.to_string()];

        match self.registry.gauge_family(&name, &help, label_names) {
            Ok(family) => {
                family.set(&labels, value);
                gauges.insert(name.clone(), Some(family));
                self.stats.set_dynamic_metrics(created + 1);
                info!(metric = %name, topic = %topic, "Created status gauge");

                Observation::Created(value)
            }
            Err(e) => {
                warn!(metric = %name, topic = %topic, error = %e, "Cannot export status topic");
                gauges.insert(name, None);
                self.stats.record_dynamic_dropped();
                Observation::Dropped
            }
        }
    }
}

impl MessageHandler for DynamicGaugeRegistry {
    fn handle(&self, topic: &str, payload: &[u8]) {
        self.stats.record_message();
        trace!(
            topic = %topic,
            payload = %String::from_utf8_lossy(payload),
            "Received status message"
        );
        self.observe(topic, payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SELF_METRICS_PREFIX;

    const URL: &str = "tcp://localhost:1883";
    const CLIENT_ID: &str = "exporter-test";

    fn make_registry(config: BrokerStatusConfig) -> (Arc<MetricsRegistry>, DynamicGaugeRegistry) {
        let registry = Arc::new(MetricsRegistry::new());
        let stats = ExporterStats::register(&registry, SELF_METRICS_PREFIX).unwrap();
        let dynamic = DynamicGaugeRegistry::new(&config, registry.clone(), stats, URL, CLIENT_ID);
        (registry, dynamic)
    }

    #[test]
    fn test_creates_gauge_on_first_sight() {
        let (registry, dynamic) = make_registry(BrokerStatusConfig::default());

        let result = dynamic.observe("$SYS/broker/clients/connected", b"7");
        assert_eq!(result, Observation::Created(7.0));
        assert_eq!(dynamic.metric_names(), vec!["mqtt_broker_clients_connected"]);

        let output = registry.render();
        assert!(
            output.contains(
                "mqtt_broker_clients_connected{url=\"tcp://localhost:1883\",clientID=\"exporter-test\"} 7.0"
            ),
            "{}",
            output
        );
        assert!(output.contains("mqtt_exporter_dynamic_metrics 1"));
    }

    #[test]
    fn test_updates_existing_gauge() {
        let (registry, dynamic) = make_registry(BrokerStatusConfig::default());

        dynamic.observe("$SYS/broker/clients/connected", b"7");
        let result = dynamic.observe("$SYS/broker/clients/connected", b"9");

        assert_eq!(result, Observation::Updated(9.0));
        assert_eq!(dynamic.len(), 1);

        let output = registry.render();
        let lines: Vec<&str> = output
            .lines()
            .filter(|l| l.starts_with("mqtt_broker_clients_connected{"))
            .collect();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with(" 9.0"));
    }

    #[test]
    fn test_ignored_topic_never_creates_gauge() {
        let (registry, dynamic) = make_registry(BrokerStatusConfig::default());

        for payload in [&b"mosquitto version 2.0.18"[..], b"42"] {
            assert_eq!(
                dynamic.observe("$SYS/broker/version", payload),
                Observation::Ignored
            );
        }

        assert!(dynamic.is_empty());
        assert!(!registry.contains("mqtt_broker_version"));
        assert!(!registry.render().contains("mqtt_broker_version"));
    }

    #[test]
    fn test_ignore_globs() {
        let config = BrokerStatusConfig {
            ignore: vec!["$SYS/broker/load/*".to_string()],
            ..Default::default()
        };
        let (_registry, dynamic) = make_registry(config);

        assert!(dynamic.is_ignored("$SYS/broker/load/bytes/received/1min"));
        assert!(!dynamic.is_ignored("$SYS/broker/clients/total"));
    }

    #[test]
    fn test_unparseable_payload_records_zero() {
        let (_registry, dynamic) = make_registry(BrokerStatusConfig::default());

        let result = dynamic.observe("$SYS/broker/clients/maximum", b"n/a");
        assert_eq!(result, Observation::Created(0.0));
    }

    #[test]
    fn test_name_collision_is_dropped_once() {
        let (registry, dynamic) = make_registry(BrokerStatusConfig::default());
        registry
            .gauge_family("mqtt_broker_clients_total", "taken", vec![])
            .unwrap();

        assert_eq!(
            dynamic.observe("$SYS/broker/clients/total", b"3"),
            Observation::Dropped
        );
        assert_eq!(
            dynamic.observe("$SYS/broker/clients/total", b"4"),
            Observation::Dropped
        );
        assert!(dynamic.is_empty());
    }

    #[test]
    fn test_max_metrics_limit() {
        let config = BrokerStatusConfig {
            max_metrics: 2,
            ..Default::default()
        };
        let (_registry, dynamic) = make_registry(config);

        for i in 0..5 {
            dynamic.observe(&format!("$SYS/broker/custom/{}", i), b"1");
        }

        assert_eq!(dynamic.len(), 2);
        // Existing gauges still update.
        assert_eq!(
            dynamic.observe("$SYS/broker/custom/0", b"2"),
            Observation::Updated(2.0)
        );
    }

    #[test]
    fn test_collisions_do_not_use_up_limit() {
        let config = BrokerStatusConfig {
            max_metrics: 2,
            ..Default::default()
        };
        let (registry, dynamic) = make_registry(config);
        registry
            .gauge_family("mqtt_broker_clients_total", "taken", vec![])
            .unwrap();

        assert_eq!(
            dynamic.observe("$SYS/broker/clients/total", b"3"),
            Observation::Dropped
        );
        assert_eq!(
            dynamic.observe("$SYS/broker/clients/active", b"1"),
            Observation::Created(1.0)
        );
        assert_eq!(
            dynamic.observe("$SYS/broker/clients/expired", b"0"),
            Observation::Created(0.0)
        );
        assert_eq!(
            dynamic.observe("$SYS/broker/clients/disconnected", b"2"),
            Observation::Dropped
        );
        assert_eq!(dynamic.len(), 2);
        assert!(registry.render().contains("mqtt_exporter_dynamic_metrics 2"));
    }

    #[test]
    fn test_concurrent_first_sight_registers_once() {
        let (registry, dynamic) = make_registry(BrokerStatusConfig::default());
        let dynamic = Arc::new(dynamic);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let dynamic = dynamic.clone();
                std::thread::spawn(move || {
                    for j in 0..50 {
                        let topic = format!("$SYS/broker/messages/{}", j % 5);
                        let result = dynamic.observe(&topic, format!("{}", i).as_bytes());
                        assert_ne!(result, Observation::Dropped);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(dynamic.len(), 5);
        let output = registry.render();
        for j in 0..5 {
            let type_line = format!("# TYPE mqtt_broker_messages_{} gauge", j);
            assert_eq!(output.matches(&type_line).count(), 1);
        }
    }
}
