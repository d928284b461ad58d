//! Configuration for the Prometheus exporter.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use thiserror::Error;

use mqtt_exporter_common::config::{LoggingConfig, MqttConfig, load_config, parse_config};
use mqtt_exporter_common::topic::{
    SYS_PREFIX, fixed_level_count, has_multi_level_wildcard, validate_filter,
};

use crate::mapping::{LabelTemplate, is_valid_label_name, is_valid_metric_name};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] mqtt_exporter_common::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// MQTT connection settings.
    #[serde(default)]
    pub mqtt: MqttConfig,

    /// Prometheus exporter settings.
    #[serde(default)]
    pub prometheus: PrometheusConfig,

    /// Topic-to-gauge mappings, in subscription order.
    #[serde(default)]
    pub gauges: Vec<MetricDefinition>,

    /// Broker `$SYS` status exposure.
    #[serde(default)]
    pub broker_status: BrokerStatusConfig,

    /// Uptime heartbeat published back onto the bus.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Staleness watchdog.
    #[serde(default)]
    pub liveness: LivenessConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Prometheus HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// Address to listen on (default: "0.0.0.0:9641").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_listen() -> String {
    "0.0.0.0:9641".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
        }
    }
}

/// One configured gauge: which topic feeds it and how its labels are built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricDefinition {
    /// Prometheus metric name, unique across the process.
    pub metric_name: String,

    /// MQTT topic filter the gauge is fed from (wildcards allowed).
    pub topic: String,

    /// HELP text.
    #[serde(default)]
    pub help: String,

    /// Label name to template (`"$N"` for topic level N, else literal).
    #[serde(default)]
    pub labels: BTreeMap<String, LabelTemplate>,
}

impl MetricDefinition {
    /// Create a definition without labels.
    pub fn new(
        metric_name: impl Into<String>,
        topic: impl Into<String>,
        help: impl Into<String>,
    ) -> Self {
        Self {
            metric_name: metric_name.into(),
            topic: topic.into(),
            help: help.into(),
            labels: BTreeMap::new(),
        }
    }

    /// Add a label template.
    pub fn with_label(
        mut self,
        name: impl Into<String>,
        template: impl Into<LabelTemplate>,
    ) -> Self {
        self.labels.insert(name.into(), template.into());
        self
    }

    /// Label names in exposition order.
    pub fn label_names(&self) -> Vec<String> {
        self.labels.keys().cloned().collect()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_metric_name(&self.metric_name) {
            return Err(ConfigError::Validation(format!(
                "Invalid metric name: '{}'",
                self.metric_name
            )));
        }

        validate_filter(&self.topic).map_err(|e| {
            ConfigError::Validation(format!("Gauge '{}': {}", self.metric_name, e))
        })?;

        let open_ended = has_multi_level_wildcard(&self.topic);
        let levels = fixed_level_count(&self.topic);

        for (name, template) in &self.labels {
            if !is_valid_label_name(name) {
                return Err(ConfigError::Validation(format!(
                    "Gauge '{}': invalid label name '{}'",
                    self.metric_name, name
                )));
            }

            if let LabelTemplate::Segment(index) = template
                && !open_ended
                && *index >= levels
            {
                return Err(ConfigError::Validation(format!(
                    "Gauge '{}': label '{}' uses topic level {} but '{}' has only {} levels",
                    self.metric_name, name, index, self.topic, levels
                )));
            }
        }

        Ok(())
    }
}

/// Exposure of the broker's `$SYS` status tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerStatusConfig {
    /// Subscribe to `$SYS/#` and create gauges on the fly.
    #[serde(default)]
    pub enabled: bool,

    /// Metric name prefix for status gauges (default: "mqtt").
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Glob patterns for status topics that never carry numbers.
    #[serde(default = "default_ignore")]
    pub ignore: Vec<String>,

    /// Maximum number of status gauges (memory protection).
    #[serde(default = "default_max_metrics")]
    pub max_metrics: usize,
}

fn default_namespace() -> String {
    "mqtt".to_string()
}

fn default_ignore() -> Vec<String> {
    ["version", "timestamp", "uptime"]
        .iter()
        .map(|leaf| format!("{}/broker/{}", SYS_PREFIX, leaf))
        .collect()
}

fn default_max_metrics() -> usize {
    1000
}

impl Default for BrokerStatusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            namespace: default_namespace(),
            ignore: default_ignore(),
            max_metrics: default_max_metrics(),
        }
    }
}

/// Uptime heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Publish the heartbeat.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Topic the current Unix time is published to.
    #[serde(default = "default_heartbeat_topic")]
    pub topic: String,

    /// Seconds between heartbeats (default: 60).
    #[serde(default = "default_heartbeat_interval")]
    pub interval_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_heartbeat_topic() -> String {
    "mqtt-prometheus-exporter/state/up".to_string()
}

fn default_heartbeat_interval() -> u64 {
    60
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            topic: default_heartbeat_topic(),
            interval_secs: default_heartbeat_interval(),
        }
    }
}

/// Staleness watchdog configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessConfig {
    /// Terminate the process when configured gauges stop receiving data.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum silence before terminating (default: 300).
    #[serde(default = "default_stale_timeout")]
    pub stale_timeout_secs: u64,

    /// How often the watchdog looks at the clock (default: 10).
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
}

fn default_stale_timeout() -> u64 {
    300 // 5 minutes
}

fn default_check_interval() -> u64 {
    10
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stale_timeout_secs: default_stale_timeout(),
            check_interval_secs: default_check_interval(),
        }
    }
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: ExporterConfig = load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = parse_config(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.mqtt
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        // Validate listen address format
        if self
            .prometheus
            .listen
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            return Err(ConfigError::Validation(format!(
                "Invalid listen address: {}",
                self.prometheus.listen
            )));
        }

        // Validate path starts with /
        if !self.prometheus.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        let mut names = HashSet::new();
        let mut topics = HashSet::new();
        for gauge in &self.gauges {
            gauge.validate()?;

            if !names.insert(gauge.metric_name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate metric name: '{}'",
                    gauge.metric_name
                )));
            }
            if !topics.insert(gauge.topic.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Topic '{}' is mapped by more than one gauge",
                    gauge.topic
                )));
            }
        }

        if self.broker_status.enabled {
            if !is_valid_metric_name(&self.broker_status.namespace) {
                return Err(ConfigError::Validation(format!(
                    "Invalid broker_status namespace: '{}'",
                    self.broker_status.namespace
                )));
            }
            if self.broker_status.max_metrics == 0 {
                return Err(ConfigError::Validation(
                    "broker_status.max_metrics must be > 0".to_string(),
                ));
            }
        }
        for pattern in &self.broker_status.ignore {
            glob::Pattern::new(pattern).map_err(|e| {
                ConfigError::Validation(format!("Invalid ignore pattern '{}': {}", pattern, e))
            })?;
        }

        if self.heartbeat.enabled {
            if self.heartbeat.interval_secs == 0 {
                return Err(ConfigError::Validation(
                    "heartbeat.interval_secs must be > 0".to_string(),
                ));
            }
            if self.heartbeat.topic.is_empty() || self.heartbeat.topic.contains(['+', '#']) {
                return Err(ConfigError::Validation(format!(
                    "Invalid heartbeat topic: '{}'",
                    self.heartbeat.topic
                )));
            }
        }

        if self.liveness.stale_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "stale_timeout_secs must be > 0".to_string(),
            ));
        }
        if self.liveness.check_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "check_interval_secs must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}
