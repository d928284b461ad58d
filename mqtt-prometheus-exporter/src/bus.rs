//! Outbound side of the bus: the requests the exporter sends to the broker.

use std::sync::Arc;

use mqtt_exporter_common::Error as BusError;
use rumqttc::{AsyncClient, QoS};

use crate::error::Result;

/// Requests the exporter sends to the broker.
///
/// Calls queue the request and return immediately; the event loop driven
/// by the subscriber performs the actual I/O.
pub trait Bus: Send + Sync {
    fn subscribe(&self, filter: &str) -> Result<()>;

    fn unsubscribe(&self, filter: &str) -> Result<()>;

    /// Publish a non-retained message.
    fn publish(&self, topic: &str, payload: String) -> Result<()>;

    fn disconnect(&self) -> Result<()>;
}

/// [`Bus`] backed by a rumqttc client, using one QoS for everything.
#[derive(Clone)]
pub struct MqttBus {
    client: AsyncClient,
    qos: QoS,
}

impl MqttBus {
    pub fn new(client: AsyncClient, qos: QoS) -> Self {
        Self { client, qos }
    }

    pub fn qos(&self) -> QoS {
        self.qos
    }
}

impl Bus for MqttBus {
    fn subscribe(&self, filter: &str) -> Result<()> {
        self.client
            .try_subscribe(filter, self.qos)
            .map_err(BusError::from)?;
        Ok(())
    }

    fn unsubscribe(&self, filter: &str) -> Result<()> {
        self.client
            .try_unsubscribe(filter)
            .map_err(BusError::from)?;
        Ok(())
    }

    fn publish(&self, topic: &str, payload: String) -> Result<()> {
        self.client
            .try_publish(topic, self.qos, false, payload)
            .map_err(BusError::from)?;
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        self.client.try_disconnect().map_err(BusError::from)?;
        Ok(())
    }
}

impl<B: Bus + ?Sized> Bus for Arc<B> {
    fn subscribe(&self, filter: &str) -> Result<()> {
        (**self).subscribe(filter)
    }

    fn unsubscribe(&self, filter: &str) -> Result<()> {
        (**self).unsubscribe(filter)
    }

    fn publish(&self, topic: &str, payload: String) -> Result<()> {
        (**self).publish(topic, payload)
    }

    fn disconnect(&self) -> Result<()> {
        (**self).disconnect()
    }
}
