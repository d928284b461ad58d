//! Routing of incoming messages to the handlers bound to topic filters.

use std::sync::Arc;

use mqtt_exporter_common::topic::{topic_matches, validate_filter};
use tracing::trace;

use crate::error::{ExporterError, Result};

/// Something that consumes messages from the bus.
pub trait MessageHandler: Send + Sync {
    /// Handle one message. Must not block.
    fn handle(&self, topic: &str, payload: &[u8]);
}

struct Route {
    filter: String,
    handler: Arc<dyn MessageHandler>,
}

/// Topic filter to handler table.
///
/// The set of filters is also the set of subscriptions the bus needs.
#[derive(Default)]
pub struct MessageRouter {
    routes: Vec<Route>,
}

impl MessageRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a handler to a topic filter.
    pub fn add_route(
        &mut self,
        filter: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<()> {
        let filter = filter.into();
        self.check_route(&filter)?;
        self.routes.push(Route { filter, handler });
        Ok(())
    }

    /// Whether [`add_route`](Self::add_route) would accept `filter`.
    pub fn check_route(&self, filter: &str) -> Result<()> {
        validate_filter(filter)?;

        if self.routes.iter().any(|r| r.filter == filter) {
            return Err(ExporterError::DuplicateRoute(filter.to_string()));
        }

        Ok(())
    }

    /// Filters in registration order.
    pub fn filters(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(|r| r.filter.as_str())
    }

    /// Number of routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no route is registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Deliver a message to every handler whose filter matches the topic.
    ///
    /// Returns the number of handlers invoked.
    pub fn dispatch(&self, topic: &str, payload: &[u8]) -> usize {
        let mut delivered = 0;

        for route in &self.routes {
            if topic_matches(&route.filter, topic) {
                route.handler.handle(topic, payload);
                delivered += 1;
            }
        }

        if delivered == 0 {
            trace!(topic = %topic, "No route for topic");
        }

        delivered
    }
}
