//! Composition root: builds the registry, gauges and routes from config.

use std::sync::Arc;
use std::time::Duration;

use mqtt_exporter_common::sys_wildcard;
use tracing::info;

use crate::config::ExporterConfig;
use crate::dynamic::DynamicGaugeRegistry;
use crate::error::Result;
use crate::gauge::StaticGaugeRegistry;
use crate::liveness::LivenessMonitor;
use crate::registry::{ExporterStats, MetricsRegistry, SELF_METRICS_PREFIX, SharedRegistry};
use crate::router::MessageRouter;

/// Everything the exporter needs apart from the bus connection.
pub struct Exporter {
    registry: SharedRegistry,
    stats: ExporterStats,
    router: Arc<MessageRouter>,
    gauges: StaticGaugeRegistry,
    dynamic: Option<Arc<DynamicGaugeRegistry>>,
    liveness: Option<Arc<LivenessMonitor>>,
}

impl Exporter {
    /// Validate `config` and register every configured gauge.
    ///
    /// Fails on the first invalid or duplicate definition; nothing is
    /// exposed in that case.
    pub fn new(config: &ExporterConfig) -> Result<Self> {
        config.validate()?;

        let registry: SharedRegistry = Arc::new(MetricsRegistry::new());
        let stats = ExporterStats::register(&registry, SELF_METRICS_PREFIX)?;

        let liveness = (config.liveness.enabled && !config.gauges.is_empty()).then(|| {
            Arc::new(LivenessMonitor::new(
                Duration::from_secs(config.liveness.stale_timeout_secs),
                Duration::from_secs(config.liveness.check_interval_secs),
            ))
        });

        let mut router = MessageRouter::new();
        let mut gauges = StaticGaugeRegistry::new(registry.clone(), stats.clone(), liveness.clone());

        for definition in &config.gauges {
            gauges.subscribe(definition.clone(), &mut router)?;
        }

        let dynamic = if config.broker_status.enabled {
            let dynamic = Arc::new(DynamicGaugeRegistry::new(
                &config.broker_status,
                registry.clone(),
                stats.clone(),
                config.mqtt.broker_url(),
                config.mqtt.client_id.clone(),
            ));
            router.add_route(sys_wildcard(), dynamic.clone())?;
            info!(namespace = %config.broker_status.namespace, "Broker status exposure enabled");
            Some(dynamic)
        } else {
            None
        };

        info!(
            gauges = gauges.len(),
            routes = router.len(),
            liveness = liveness.is_some(),
            "Exporter configured"
        );

        Ok(Self {
            registry,
            stats,
            router: Arc::new(router),
            gauges,
            dynamic,
            liveness,
        })
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn stats(&self) -> &ExporterStats {
        &self.stats
    }

    /// Routing table; its filters are the subscriptions to make.
    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    pub fn gauges(&self) -> &StaticGaugeRegistry {
        &self.gauges
    }

    /// Broker status registry, when enabled.
    pub fn dynamic(&self) -> Option<&Arc<DynamicGaugeRegistry>> {
        self.dynamic.as_ref()
    }

    /// Staleness monitor, present only when enabled and gauges exist.
    pub fn liveness(&self) -> Option<&Arc<LivenessMonitor>> {
        self.liveness.as_ref()
    }
}
