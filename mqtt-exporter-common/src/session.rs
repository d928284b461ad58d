use std::time::Duration;

use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet};

use crate::config::MqttConfig;
use crate::error::{Error, Result};

/// Build client options from the connection configuration.
pub fn mqtt_options(config: &MqttConfig) -> MqttOptions {
    let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    options.set_clean_session(config.clean_session);

    if let Some(username) = &config.username {
        options.set_credentials(username, config.password.as_deref().unwrap_or_default());
    }

    options
}

/// Connect to the MQTT broker and wait for the handshake to complete.
///
/// The returned event loop must be polled continuously; nothing is
/// subscribed yet.
pub async fn connect(
    config: &MqttConfig,
    request_capacity: usize,
) -> Result<(AsyncClient, EventLoop)> {
    config.validate()?;

    tracing::info!(
        broker = %config.broker_url(),
        client_id = %config.client_id,
        "Connecting to MQTT broker"
    );

    let (client, mut eventloop) =
        AsyncClient::new(mqtt_options(config), request_capacity.max(10));

    let timeout = Duration::from_secs(config.connect_timeout_secs);
    let session_present = tokio::time::timeout(timeout, wait_for_connack(&mut eventloop))
        .await
        .map_err(|_| {
            Error::Connection(format!(
                "No CONNACK from {} within {}s",
                config.broker_url(),
                config.connect_timeout_secs
            ))
        })??;

    tracing::info!(
        broker = %config.broker_url(),
        session_present,
        "Connected to MQTT broker"
    );

    Ok((client, eventloop))
}

/// Poll the event loop until the broker acknowledges the connection.
async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<bool> {
    loop {
        match eventloop.poll().await? {
            Event::Incoming(Packet::ConnAck(ack)) => {
                if ack.code != ConnectReturnCode::Success {
                    return Err(Error::Connection(format!(
                        "Broker refused connection: {:?}",
                        ack.code
                    )));
                }
                return Ok(ack.session_present);
            }
            event => {
                tracing::trace!(?event, "Event before CONNACK");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mqtt_options_from_config() {
        let config = MqttConfig {
            host: "broker.local".to_string(),
            port: 1884,
            client_id: "exporter-test".to_string(),
            keep_alive_secs: 15,
            ..Default::default()
        };

        let options = mqtt_options(&config);
        assert_eq!(options.client_id(), "exporter-test");
        assert_eq!(
            options.broker_address(),
            ("broker.local".to_string(), 1884)
        );
        assert_eq!(options.keep_alive(), Duration::from_secs(15));
        assert!(options.clean_session());
    }

    #[test]
    fn test_mqtt_options_with_credentials() {
        let config = MqttConfig {
            username: Some("exporter".to_string()),
            password: Some("secret".to_string()),
            ..Default::default()
        };

        let options = mqtt_options(&config);
        assert_eq!(
            options.credentials(),
            Some(("exporter".to_string(), "secret".to_string()))
        );
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_config() {
        let config = MqttConfig {
            qos: 7,
            ..Default::default()
        };
        assert!(connect(&config, 10).await.is_err());
    }
}
