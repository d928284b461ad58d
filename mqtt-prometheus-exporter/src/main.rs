//! Prometheus exporter for MQTT topics.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use mqtt_exporter_common::{connect, init_tracing};
use mqtt_prometheus_exporter::{
    BusSubscriber, Exporter, ExporterConfig, HeartbeatPublisher, HttpServer, MqttBus,
};

/// Prometheus exporter for MQTT topics.
#[derive(Parser, Debug)]
#[command(name = "mqtt-prometheus-exporter")]
#[command(about = "Export numeric MQTT topics as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<String>,

    /// HTTP listen address (overrides config).
    #[arg(long)]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error; overrides config).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        ExporterConfig::load_from_file(config_path)?
    } else {
        ExporterConfig::default()
    };

    if let Some(listen) = args.listen {
        config.prometheus.listen = listen;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    init_tracing(&config.logging)?;

    info!("Starting MQTT Prometheus Exporter");

    let exporter = Exporter::new(&config)?;

    let listen_addr: SocketAddr = config
        .prometheus
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;

    // Bind before connecting so a taken port fails startup.
    let http_server = HttpServer::new(
        exporter.registry().clone(),
        exporter.stats().clone(),
        listen_addr,
        config.prometheus.path.clone(),
    );
    let listener = http_server.bind().await?;

    // Room for one SUBSCRIBE per route plus shutdown traffic.
    let capacity = exporter.router().len() * 2 + 10;
    let (client, eventloop) = connect(&config.mqtt, capacity).await?;
    let bus = MqttBus::new(client, config.mqtt.qos()?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start subscriber
    let subscriber = BusSubscriber::new(exporter.router().clone(), bus.clone(), &config.mqtt);
    let mut subscriber_task = tokio::spawn(subscriber.run(eventloop, shutdown_rx.clone()));

    // Start HTTP server
    let mut http_task = tokio::spawn(http_server.serve(listener, shutdown_rx.clone()));

    // Start heartbeat
    let heartbeat_task = config.heartbeat.enabled.then(|| {
        let heartbeat = HeartbeatPublisher::new(bus.clone(), &config.heartbeat);
        tokio::spawn(heartbeat.run(shutdown_rx.clone()))
    });

    // Start liveness watchdog; staleness ends the process immediately.
    let liveness_task = exporter.liveness().cloned().map(|monitor| {
        let liveness_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = monitor.watch(liveness_shutdown).await {
                error!(error = %e, "Liveness check failed, terminating");
                std::process::exit(1);
            }
        })
    });

    // Wait for a shutdown signal, the subscriber giving up or the HTTP server dying
    let mut subscriber_done = false;
    let mut http_done = false;
    let outcome: anyhow::Result<()> = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            Ok(())
        }
        _ = terminate_signal() => {
            info!("Received SIGTERM, shutting down...");
            Ok(())
        }
        result = &mut subscriber_task => {
            subscriber_done = true;
            match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => {
                    error!(error = %e, "Subscriber failed");
                    Err(e.into())
                }
                Err(e) => Err(anyhow::anyhow!("Subscriber task panicked: {}", e)),
            }
        }
        result = &mut http_task => {
            http_done = true;
            let err = match result {
                Ok(Ok(())) => anyhow::anyhow!("HTTP server stopped unexpectedly"),
                Ok(Err(e)) => e,
                Err(e) => anyhow::anyhow!("HTTP server task panicked: {}", e),
            };
            error!(error = %err, "HTTP server failed");
            Err(err)
        }
    };

    // Signal shutdown
    let _ = shutdown_tx.send(true);

    // Wait for tasks to complete
    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        if !subscriber_done {
            let _ = subscriber_task.await;
        }
        if !http_done {
            let _ = http_task.await;
        }
        if let Some(task) = heartbeat_task {
            let _ = task.await;
        }
        if let Some(task) = liveness_task {
            let _ = task.await;
        }
    })
    .await;

    let stats = exporter.stats();
    info!(
        messages_received = stats.messages_received(),
        dynamic_metrics = exporter.dynamic().map(|d| d.len()).unwrap_or(0),
        dynamic_dropped = stats.dynamic_dropped(),
        "Final statistics"
    );

    if outcome.is_ok() {
        info!("Exporter stopped");
    }
    outcome
}

/// Resolve on SIGTERM; never on platforms without it.
async fn terminate_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        std::future::pending::<()>().await;
    }
}
