//! Staleness watchdog for the configured gauges.
//!
//! Every accepted gauge update calls [`LivenessMonitor::touch`]. A
//! background task runs [`LivenessMonitor::watch`], which checks the
//! clock on a fixed interval and fails once nothing arrived for longer
//! than the threshold. The check does not depend on message arrival, so
//! total silence is detected too.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{ExporterError, Result};

/// Time of the last accepted value, shared by all static gauges.
#[derive(Debug)]
pub struct LivenessMonitor {
    started: Instant,
    /// Milliseconds since `started` at the last update.
    last_update_ms: AtomicU64,
    threshold: Duration,
    check_interval: Duration,
}

impl LivenessMonitor {
    /// Create a monitor; the clock starts now.
    pub fn new(threshold: Duration, check_interval: Duration) -> Self {
        Self {
            started: Instant::now(),
            last_update_ms: AtomicU64::new(0),
            threshold,
            check_interval,
        }
    }

    /// Record that a value was accepted.
    pub fn touch(&self) {
        let offset = self.started.elapsed().as_millis() as u64;
        self.last_update_ms.fetch_max(offset, Ordering::Relaxed);
    }

    /// Time since the last accepted value (or since creation).
    pub fn elapsed(&self) -> Duration {
        let last = self.started + Duration::from_millis(self.last_update_ms.load(Ordering::Relaxed));
        Instant::now().saturating_duration_since(last)
    }

    /// Whether the silence exceeds the threshold.
    pub fn is_stale(&self) -> bool {
        self.elapsed() > self.threshold
    }

    /// Staleness threshold.
    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Check the clock until the data goes stale or shutdown is signalled.
    ///
    /// Returns `Ok(())` on shutdown and [`ExporterError::Stale`] otherwise.
    pub async fn watch(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            threshold_secs = self.threshold.as_secs(),
            "Liveness monitor started"
        );

        let mut interval = tokio::time::interval(self.check_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let elapsed = self.elapsed();
                    if elapsed > self.threshold {
                        return Err(ExporterError::Stale {
                            elapsed,
                            threshold: self.threshold,
                        });
                    }
                    debug!(elapsed_ms = elapsed.as_millis() as u64, "Liveness check passed");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const THRESHOLD: Duration = Duration::from_secs(10);
    const CHECK: Duration = Duration::from_secs(1);

    #[tokio::test(start_paused = true)]
    async fn test_silence_trips_monitor() {
        let monitor = LivenessMonitor::new(THRESHOLD, CHECK);
        let (_tx, rx) = watch::channel(false);
        let start = Instant::now();

        let result = monitor.watch(rx).await;

        match result {
            Err(ExporterError::Stale { elapsed, threshold }) => {
                assert!(elapsed > THRESHOLD);
                assert_eq!(threshold, THRESHOLD);
            }
            other => panic!("expected stale error, got {:?}", other),
        }
        let waited = start.elapsed();
        assert!(waited > THRESHOLD);
        assert!(waited <= THRESHOLD + CHECK * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_regular_updates_keep_monitor_alive() {
        let monitor = Arc::new(LivenessMonitor::new(THRESHOLD, CHECK));
        let (_tx, rx) = watch::channel(false);

        let feeder = {
            let monitor = monitor.clone();
            async move {
                // Ten times the threshold, one update every 4 seconds.
                for _ in 0..25 {
                    tokio::time::sleep(Duration::from_secs(4)).await;
                    monitor.touch();
                }
            }
        };

        tokio::select! {
            result = monitor.watch(rx) => panic!("monitor fired: {:?}", result),
            _ = feeder => {}
        }
        assert!(!monitor.is_stale());
    }

    #[tokio::test(start_paused = true)]
    async fn test_trips_after_traffic_stops() {
        let monitor = LivenessMonitor::new(THRESHOLD, CHECK);
        let (_tx, rx) = watch::channel(false);

        tokio::time::sleep(Duration::from_secs(8)).await;
        monitor.touch();
        assert!(monitor.elapsed() < Duration::from_secs(1));

        let resumed = Instant::now();
        let result = monitor.watch(rx).await;

        assert!(matches!(result, Err(ExporterError::Stale { .. })));
        assert!(resumed.elapsed() > THRESHOLD);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_watch() {
        let monitor = Arc::new(LivenessMonitor::new(THRESHOLD, CHECK));
        let (tx, rx) = watch::channel(false);

        let task = tokio::spawn({
            let monitor = monitor.clone();
            async move { monitor.watch(rx).await }
        });

        tokio::time::sleep(Duration::from_secs(2)).await;
        tx.send(true).unwrap();

        assert!(task.await.unwrap().is_ok());
    }
}
