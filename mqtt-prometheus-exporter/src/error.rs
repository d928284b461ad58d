//! Error types for the exporter.

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;

/// Result type alias using [`ExporterError`].
pub type Result<T> = std::result::Result<T, ExporterError>;

/// Errors that stop the exporter.
#[derive(Debug, Error)]
pub enum ExporterError {
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A metric name was registered twice.
    #[error("Metric '{0}' is already registered")]
    DuplicateMetric(String),

    /// A topic filter was routed twice.
    #[error("Topic filter '{0}' is already routed")]
    DuplicateRoute(String),

    /// The broker refused a subscription.
    #[error("Broker refused subscription to '{filter}'")]
    Subscription { filter: String },

    /// No static gauge was updated within the staleness window.
    #[error("No data received for {elapsed:?} (threshold {threshold:?})")]
    Stale {
        elapsed: Duration,
        threshold: Duration,
    },

    /// Bus-side failure (connection, client request queue, filters).
    #[error(transparent)]
    Bus(#[from] mqtt_exporter_common::Error),
}
