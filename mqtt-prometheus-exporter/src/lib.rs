//! Prometheus metrics exporter for MQTT.
//!
//! This crate subscribes to numeric MQTT topics, turns every message into a
//! labelled gauge update and exposes the result via an HTTP `/metrics`
//! endpoint. Optionally the broker's `$SYS` status tree is exposed too, one
//! gauge per status topic, created on first sight.
//!
//! # Architecture
//!
//! ```text
//!                                    ┌──────────────────┐
//!                               ┌───>│  Static gauges   │──┐
//! ┌─────────────┐   ┌────────┐  │    │ (configured)     │  │   ┌─────────────┐
//! │ MQTT broker │──>│ Router │──┤    └──────────────────┘  ├──>│  Registry   │──> /metrics
//! │             │   └────────┘  │    ┌──────────────────┐  │   └─────────────┘
//! │             │               └───>│ Dynamic gauges   │──┘
//! │             │                    │ ($SYS/#)         │
//! │             │<── heartbeat       └──────────────────┘
//! └─────────────┘                  liveness monitor <── static updates
//! ```
//!
//! # Usage
//!
//! ```bash
//! mqtt-prometheus-exporter --config config.json5
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod bus;
pub mod config;
pub mod dynamic;
pub mod error;
pub mod exporter;
pub mod gauge;
pub mod heartbeat;
pub mod http;
pub mod liveness;
pub mod mapping;
pub mod registry;
pub mod router;
pub mod subscriber;

pub use bus::{Bus, MqttBus};
pub use config::{ExporterConfig, MetricDefinition};
pub use dynamic::DynamicGaugeRegistry;
pub use error::{ExporterError, Result};
pub use exporter::Exporter;
pub use gauge::{StaticGauge, StaticGaugeRegistry};
pub use heartbeat::HeartbeatPublisher;
pub use http::HttpServer;
pub use liveness::LivenessMonitor;
pub use registry::{ExporterStats, MetricsRegistry, SharedRegistry};
pub use router::{MessageHandler, MessageRouter};
pub use subscriber::BusSubscriber;
