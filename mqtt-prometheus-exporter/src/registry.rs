//! Metrics registry shared by the static and dynamic gauge registries.
//!
//! Wraps a [`prometheus_client::registry::Registry`] and remembers every
//! name handed out, so a name can only ever be registered once per
//! process. The registry is created by the composition root and passed
//! around as a [`SharedRegistry`]; tests build their own.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use parking_lot::Mutex;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::{Metric, Registry};
use tracing::debug;

use crate::error::{ExporterError, Result};
use crate::mapping::escape_label_value;

/// Label set of a single series: `(name, value)` pairs in the family's
/// label name order.
pub type LabelSet = Vec<(String, String)>;

/// A floating point gauge.
pub type FloatGauge = Gauge<f64, AtomicU64>;

/// Default prefix for the exporter's own metrics.
pub const SELF_METRICS_PREFIX: &str = "mqtt_exporter";

struct Inner {
    registry: Registry,
    names: HashSet<String>,
}

/// Process-wide registry of exposed metrics.
pub struct MetricsRegistry {
    inner: Mutex<Inner>,
}

/// Create a shareable registry handle.
pub type SharedRegistry = Arc<MetricsRegistry>;

impl MetricsRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                registry: Registry::default(),
                names: HashSet::new(),
            }),
        }
    }

    /// Whether a metric name is already taken.
    pub fn contains(&self, name: &str) -> bool {
        self.inner.lock().names.contains(name)
    }

    /// Number of registered metrics.
    pub fn len(&self) -> usize {
        self.inner.lock().names.len()
    }

    /// Whether nothing is registered yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Create and register a gauge family with fixed label names.
    pub fn gauge_family(
        &self,
        name: &str,
        help: &str,
        label_names: Vec<String>,
    ) -> Result<GaugeFamily> {
        let family = Family::<LabelSet, FloatGauge>::default();
        self.register(name, name, help, family.clone())?;

        debug!(metric = %name, labels = ?label_names, "Registered gauge family");

        Ok(GaugeFamily {
            name: name.to_string(),
            label_names,
            family,
        })
    }

    /// Register any metric under `name`, exposed as `exposed`.
    fn register(
        &self,
        name: &str,
        exposed: &str,
        help: &str,
        metric: impl Metric,
    ) -> Result<()> {
        let mut inner = self.inner.lock();

        if inner.names.contains(name) || inner.names.contains(exposed) {
            return Err(ExporterError::DuplicateMetric(exposed.to_string()));
        }

        inner.names.insert(name.to_string());
        inner.names.insert(exposed.to_string());
        inner.registry.register(name, help, metric);
        Ok(())
    }

    /// Register a counter; exposed with a `_total` suffix.
    fn counter<M: Metric>(&self, name: &str, help: &str, metric: M) -> Result<()> {
        self.register(name, &format!("{}_total", name), help, metric)
    }

    /// Render all metrics in OpenMetrics text format.
    pub fn render(&self) -> String {
        let inner = self.inner.lock();
        let mut output = String::with_capacity(inner.names.len() * 128);
        // Writing into a String cannot fail.
        let _ = encode(&mut output, &inner.registry);
        output
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A named gauge with one series per distinct label-value combination.
///
/// Label names are fixed at creation.
#[derive(Debug, Clone)]
pub struct GaugeFamily {
    name: String,
    label_names: Vec<String>,
    family: Family<LabelSet, FloatGauge>,
}

impl GaugeFamily {
    /// Metric name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Label names, in the order values are expected.
    pub fn label_names(&self) -> &[String] {
        &self.label_names
    }

    /// Set the series for `label_values` (one per label name, same order).
    ///
    /// Values are escaped here since the encoder writes them verbatim.
    pub fn set(&self, label_values: &[&str], value: f64) {
        debug_assert_eq!(label_values.len(), self.label_names.len());
        self.family.get_or_create(&self.label_set(label_values)).set(value);
    }

    fn label_set(&self, label_values: &[&str]) -> LabelSet {
        self.label_names
            .iter()
            .zip(label_values)
            .map(|(name, value)| (name.clone(), escape_label_value(value).into_owned()))
            .collect()
    }

    /// Current value of a series, creating it at zero if absent.
    #[cfg(test)]
    pub(crate) fn series_value(&self, label_values: &[&str]) -> f64 {
        self.family.get_or_create(&self.label_set(label_values)).get()
    }
}

/// Counters describing the exporter's own behaviour.
#[derive(Debug, Clone)]
pub struct ExporterStats {
    messages_received: Counter,
    payload_parse_errors: Family<LabelSet, Counter>,
    label_errors: Family<LabelSet, Counter>,
    dynamic_metrics: Gauge,
    dynamic_dropped: Counter,
}

impl ExporterStats {
    /// Create the counters and register them under `prefix`.
    pub fn register(registry: &MetricsRegistry, prefix: &str) -> Result<Self> {
        let stats = Self {
            messages_received: Counter::default(),
            payload_parse_errors: Family::default(),
            label_errors: Family::default(),
            dynamic_metrics: Gauge::default(),
            dynamic_dropped: Counter::default(),
        };

        registry.counter(
            &format!("{}_messages_received", prefix),
            "Messages delivered to a gauge handler",
            stats.messages_received.clone(),
        )?;
        registry.counter(
            &format!("{}_payload_parse_errors", prefix),
            "Payloads that were not numbers and were recorded as zero",
            stats.payload_parse_errors.clone(),
        )?;
        registry.counter(
            &format!("{}_label_errors", prefix),
            "Updates skipped because a positional label was outside the topic",
            stats.label_errors.clone(),
        )?;
        let dynamic_name = format!("{}_dynamic_metrics", prefix);
        registry.register(
            &dynamic_name,
            &dynamic_name,
            "Broker status gauges created so far",
            stats.dynamic_metrics.clone(),
        )?;
        registry.counter(
            &format!("{}_dynamic_dropped", prefix),
            "Broker status messages not exported (name clash or limit reached)",
            stats.dynamic_dropped.clone(),
        )?;

        Ok(stats)
    }

    pub fn record_message(&self) {
        self.messages_received.inc();
    }

    pub fn record_parse_error(&self, metric: &str) {
        self.payload_parse_errors
            .get_or_create(&vec![("metric".to_string(), metric.to_string())])
            .inc();
    }

    pub fn record_label_error(&self, metric: &str) {
        self.label_errors
            .get_or_create(&vec![("metric".to_string(), metric.to_string())])
            .inc();
    }

    pub fn set_dynamic_metrics(&self, count: usize) {
        self.dynamic_metrics.set(count as i64);
    }

    pub fn record_dynamic_dropped(&self) {
        self.dynamic_dropped.inc();
    }

    /// Total messages delivered to handlers.
    pub fn messages_received(&self) -> u64 {
        self.messages_received.get()
    }

    /// Messages that could not be exported as a status gauge.
    pub fn dynamic_dropped(&self) -> u64 {
        self.dynamic_dropped.get()
    }
}
