//! Gauges configured up front, one per [`MetricDefinition`].

use std::sync::Arc;

use mqtt_exporter_common::split_topic;
use tracing::{debug, info, trace, warn};

use crate::config::MetricDefinition;
use crate::error::Result;
use crate::liveness::LivenessMonitor;
use crate::mapping::{LabelError, LabelTemplate, parse_payload};
use crate::registry::{ExporterStats, GaugeFamily, MetricsRegistry};
use crate::router::{MessageHandler, MessageRouter};

/// A configured gauge bound to one topic filter.
pub struct StaticGauge {
    definition: MetricDefinition,
    /// Templates in the same order as the family's label names.
    templates: Vec<LabelTemplate>,
    family: GaugeFamily,
    stats: ExporterStats,
    liveness: Option<Arc<LivenessMonitor>>,
}

impl StaticGauge {
    /// The definition this gauge was built from.
    pub fn definition(&self) -> &MetricDefinition {
        &self.definition
    }

    /// The underlying gauge family.
    pub fn family(&self) -> &GaugeFamily {
        &self.family
    }

    /// Apply one message: resolve labels, parse the payload and set the
    /// series. Unparseable payloads are recorded as zero.
    ///
    /// Returns the value that was set.
    pub fn observe(&self, topic: &str, payload: &[u8]) -> std::result::Result<f64, LabelError> {
        let levels = split_topic(topic);
        let label_values = self
            .templates
            .iter()
            .map(|template| template.resolve(&levels))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let value = match parse_payload(payload) {
            Ok(value) => value,
            Err(e) => {
                debug!(
                    metric = %self.definition.metric_name,
                    topic = %topic,
                    error = %e,
                    "Recording zero for unparseable payload"
                );
                self.stats.record_parse_error(&self.definition.metric_name);
                0.0
            }
        };

        self.family.set(&label_values, value);

        if let Some(liveness) = &self.liveness {
            liveness.touch();
        }

        Ok(value)
    }
}

impl MessageHandler for StaticGauge {
    fn handle(&self, topic: &str, payload: &[u8]) {
        self.stats.record_message();
        trace!(
            topic = %topic,
            payload = %String::from_utf8_lossy(payload),
            "Received message"
        );

        if let Err(e) = self.observe(topic, payload) {
            warn!(
                metric = %self.definition.metric_name,
                error = %e,
                "Skipping update"
            );
            self.stats.record_label_error(&self.definition.metric_name);
        }
    }
}

/// Owns every configured gauge.
pub struct StaticGaugeRegistry {
    registry: Arc<MetricsRegistry>,
    stats: ExporterStats,
    liveness: Option<Arc<LivenessMonitor>>,
    gauges: Vec<Arc<StaticGauge>>,
}

impl StaticGaugeRegistry {
    /// Create an empty registry. Accepted updates touch `liveness`.
    pub fn new(
        registry: Arc<MetricsRegistry>,
        stats: ExporterStats,
        liveness: Option<Arc<LivenessMonitor>>,
    ) -> Self {
        Self {
            registry,
            stats,
            liveness,
            gauges: Vec::new(),
        }
    }

    /// Register the gauge family for `definition` and bind it to its topic
    /// filter.
    pub fn subscribe(
        &mut self,
        definition: MetricDefinition,
        router: &mut MessageRouter,
    ) -> Result<Arc<StaticGauge>> {
        router.check_route(&definition.topic)?;

        let label_names = definition.label_names();
        let templates = definition.labels.values().cloned().collect();

        let family = self.registry.gauge_family(
            &definition.metric_name,
            &definition.help,
            label_names,
        )?;

        let gauge = Arc::new(StaticGauge {
            definition,
            templates,
            family,
            stats: self.stats.clone(),
            liveness: self.liveness.clone(),
        });

        router.add_route(gauge.definition.topic.clone(), gauge.clone())?;

        info!(
            metric = %gauge.definition.metric_name,
            topic = %gauge.definition.topic,
            "Gauge bound to topic"
        );

        self.gauges.push(gauge.clone());
        Ok(gauge)
    }

    /// Configured gauges, in subscription order.
    pub fn gauges(&self) -> &[Arc<StaticGauge>] {
        &self.gauges
    }

    pub fn len(&self) -> usize {
        self.gauges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gauges.is_empty()
    }
}
