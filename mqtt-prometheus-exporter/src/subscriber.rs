//! Bus subscriber: drives the MQTT event loop and feeds the router.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use mqtt_exporter_common::Error as BusError;
use mqtt_exporter_common::config::MqttConfig;
use rumqttc::{Event, EventLoop, Outgoing, Packet, SubscribeReasonCode};
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

use crate::bus::Bus;
use crate::error::{ExporterError, Result};
use crate::router::MessageRouter;

/// Upper bound for flushing UNSUBSCRIBE/DISCONNECT at shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Filters to subscribe, the ones not queued yet and the ones still
/// waiting for a SUBACK.
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    filters: Vec<String>,
    unrequested: VecDeque<String>,
    pending: VecDeque<String>,
}

impl SubscriptionSet {
    pub fn new(filters: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            filters: filters.into_iter().map(Into::into).collect(),
            unrequested: VecDeque::new(),
            pending: VecDeque::new(),
        }
    }

    pub fn filters(&self) -> &[String] {
        &self.filters
    }

    /// Number of subscriptions not acknowledged yet.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Number of subscriptions the client could not queue yet.
    pub fn unrequested(&self) -> usize {
        self.unrequested.len()
    }

    /// Request every filter, forgetting earlier requests.
    ///
    /// Returns the number of filters left for [`request_unrequested`](Self::request_unrequested).
    pub fn request_all<B: Bus + ?Sized>(&mut self, bus: &B) -> usize {
        self.pending.clear();
        self.unrequested = self.filters.iter().cloned().collect();
        self.request_unrequested(bus)
    }

    /// Queue the filters not requested yet, in order, stopping at the
    /// first one the client refuses (its request queue is full while the
    /// connection is down). Returns how many are left.
    pub fn request_unrequested<B: Bus + ?Sized>(&mut self, bus: &B) -> usize {
        while let Some(filter) = self.unrequested.front() {
            if let Err(e) = bus.subscribe(filter) {
                warn!(
                    filter = %filter,
                    error = %e,
                    remaining = self.unrequested.len(),
                    "Subscription not queued, will retry"
                );
                break;
            }

            debug!(filter = %filter, "Subscription requested");
            if let Some(filter) = self.unrequested.pop_front() {
                self.pending.push_back(filter);
            }
        }

        self.unrequested.len()
    }

    /// Match SUBACK return codes against requests, oldest first.
    ///
    /// A refused subscription is fatal.
    pub fn acknowledge(&mut self, return_codes: &[SubscribeReasonCode]) -> Result<()> {
        for code in return_codes {
            let Some(filter) = self.pending.pop_front() else {
                warn!(?code, "SUBACK without a pending subscription");
                continue;
            };

            match code {
                SubscribeReasonCode::Success(qos) => {
                    info!(filter = %filter, ?qos, "Subscribed");
                }
                SubscribeReasonCode::Failure => {
                    return Err(ExporterError::Subscription { filter });
                }
            }
        }

        Ok(())
    }
}

/// Subscribes the router's filters and dispatches incoming messages.
pub struct BusSubscriber<B: Bus> {
    router: Arc<MessageRouter>,
    bus: B,
    subscriptions: SubscriptionSet,
    auto_reconnect: bool,
    reconnect_delay: Duration,
}

impl<B: Bus> BusSubscriber<B> {
    /// Create a subscriber for every filter in `router`.
    pub fn new(router: Arc<MessageRouter>, bus: B, config: &MqttConfig) -> Self {
        let subscriptions = SubscriptionSet::new(router.filters());

        Self {
            router,
            bus,
            subscriptions,
            auto_reconnect: config.auto_reconnect,
            reconnect_delay: Duration::from_secs(config.reconnect_delay_secs),
        }
    }

    /// Poll the event loop until shutdown or a fatal error.
    ///
    /// The connection handshake must already be complete.
    pub async fn run(
        mut self,
        mut eventloop: EventLoop,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        self.subscriptions.request_all(&self.bus);

        info!(
            filters = self.subscriptions.filters().len(),
            "Subscriber started, waiting for messages..."
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Shutdown signal received, stopping subscriber");
                        break;
                    }
                }

                event = eventloop.poll() => {
                    match event {
                        Ok(event) => self.handle_event(event)?,
                        Err(e) if self.auto_reconnect => {
                            warn!(
                                error = %e,
                                retry_in_secs = self.reconnect_delay.as_secs(),
                                "MQTT connection error"
                            );
                            tokio::select! {
                                _ = tokio::time::sleep(self.reconnect_delay) => {}
                                _ = shutdown.changed() => {}
                            }
                            if *shutdown.borrow() {
                                info!("Shutdown signal received, stopping subscriber");
                                break;
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "MQTT connection lost, reconnect disabled");
                            return Err(BusError::from(e).into());
                        }
                    }
                }
            }
        }

        self.close(&mut eventloop).await;
        Ok(())
    }

    /// React to one event loop event.
    pub fn handle_event(&mut self, event: Event) -> Result<()> {
        // Every event means the loop is draining the request queue.
        if self.subscriptions.unrequested() > 0 {
            self.subscriptions.request_unrequested(&self.bus);
        }

        match event {
            Event::Incoming(Packet::Publish(publish)) => {
                self.router.dispatch(&publish.topic, &publish.payload);
            }
            Event::Incoming(Packet::ConnAck(ack)) => {
                if ack.session_present {
                    info!("Reconnected, broker kept the session");
                } else {
                    info!("Reconnected, subscribing again");
                    self.subscriptions.request_all(&self.bus);
                }
            }
            Event::Incoming(Packet::SubAck(ack)) => {
                self.subscriptions.acknowledge(&ack.return_codes)?;
            }
            event => {
                trace!(?event, "MQTT event");
            }
        }

        Ok(())
    }

    async fn close(&self, eventloop: &mut EventLoop) {
        for filter in self.subscriptions.filters() {
            if let Err(e) = self.bus.unsubscribe(filter) {
                debug!(filter = %filter, error = %e, "Unsubscribe not queued");
            }
        }

        if let Err(e) = self.bus.disconnect() {
            debug!(error = %e, "Disconnect not queued");
            return;
        }

        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;

        if drained.is_err() {
            debug!("Timed out flushing disconnect");
        }
        info!("Subscriber stopped");
    }
}
