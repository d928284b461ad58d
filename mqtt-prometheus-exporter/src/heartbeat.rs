//! Uptime heartbeat published back onto the bus.

use std::time::Duration;

use mqtt_exporter_common::current_timestamp_secs;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::bus::Bus;
use crate::config::HeartbeatConfig;
use crate::error::Result;

/// Publishes the current Unix time to a fixed topic on an interval.
pub struct HeartbeatPublisher<B: Bus> {
    bus: B,
    topic: String,
    interval: Duration,
}

impl<B: Bus> HeartbeatPublisher<B> {
    pub fn new(bus: B, config: &HeartbeatConfig) -> Self {
        Self {
            bus,
            topic: config.topic.clone(),
            interval: Duration::from_secs(config.interval_secs),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish one heartbeat; returns the timestamp sent.
    pub fn beat(&self) -> Result<u64> {
        let now = current_timestamp_secs();
        self.bus.publish(&self.topic, now.to_string())?;
        debug!(topic = %self.topic, timestamp = now, "Heartbeat published");
        Ok(now)
    }

    /// Beat immediately, then every interval, until shutdown.
    ///
    /// Failed publications are logged and retried on the next tick.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            topic = %self.topic,
            interval_secs = self.interval.as_secs(),
            "Heartbeat started"
        );

        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.beat() {
                        warn!(topic = %self.topic, error = %e, "Heartbeat not published");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        debug!("Heartbeat stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::bus::testing::RecordingBus;

    fn config(interval_secs: u64) -> HeartbeatConfig {
        HeartbeatConfig {
            enabled: true,
            topic: "exporter/state/up".to_string(),
            interval_secs,
        }
    }

    #[test]
    fn test_beat_publishes_unix_seconds() {
        let bus = Arc::new(RecordingBus::default());
        let heartbeat = HeartbeatPublisher::new(bus.clone(), &config(60));

        let before = current_timestamp_secs();
        let sent = heartbeat.beat().unwrap();

        let published = bus.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "exporter/state/up");
        assert_eq!(published[0].1.parse::<u64>().unwrap(), sent);
        assert!(sent >= before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_beats_on_interval() {
        let bus = Arc::new(RecordingBus::default());
        let heartbeat = HeartbeatPublisher::new(bus.clone(), &config(60));
        let (tx, rx) = watch::channel(false);

        let task = tokio::spawn(heartbeat.run(rx));

        // First beat at start, then at 60s and 120s.
        tokio::time::sleep(Duration::from_secs(150)).await;
        tx.send(true).unwrap();
        task.await.unwrap();

        assert_eq!(bus.published().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_publish_does_not_stop_heartbeat() {
        let bus = Arc::new(RecordingBus::default());
        *bus.fail_publish.lock() = true;
        let heartbeat = HeartbeatPublisher::new(bus.clone(), &config(10));
        let (tx, rx) = watch::channel(false);

        let task = tokio::spawn(heartbeat.run(rx));

        tokio::time::sleep(Duration::from_secs(15)).await;
        *bus.fail_publish.lock() = false;
        tokio::time::sleep(Duration::from_secs(10)).await;
        tx.send(true).unwrap();
        task.await.unwrap();

        // Beats at 0 and 10 failed; the one at 20 went out.
        assert_eq!(bus.published().len(), 1);
    }
}
