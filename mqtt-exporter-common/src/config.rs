use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// MQTT broker connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker host name or address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Broker TCP port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Client identifier presented to the broker.
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Keep-alive interval in seconds (must be >= 5).
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    /// Maximum time to wait for the broker's CONNACK at startup.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Start a clean session on every connect.
    #[serde(default = "default_true")]
    pub clean_session: bool,

    /// Keep polling (and therefore reconnecting) after connection errors.
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,

    /// Delay between reconnection attempts.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,

    /// QoS used for subscriptions and publications (0, 1 or 2).
    #[serde(default)]
    pub qos: u8,

    /// Optional user name.
    #[serde(default)]
    pub username: Option<String>,

    /// Optional password (only used together with `username`).
    #[serde(default)]
    pub password: Option<String>,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "mqtt-prometheus-exporter".to_string()
}

fn default_keep_alive() -> u64 {
    10
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_reconnect_delay() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            client_id: default_client_id(),
            keep_alive_secs: default_keep_alive(),
            connect_timeout_secs: default_connect_timeout(),
            clean_session: true,
            auto_reconnect: true,
            reconnect_delay_secs: default_reconnect_delay(),
            qos: 0,
            username: None,
            password: None,
        }
    }
}

impl MqttConfig {
    /// Broker address in URL form, e.g. `tcp://localhost:1883`.
    pub fn broker_url(&self) -> String {
        format!("tcp://{}:{}", self.host, self.port)
    }

    /// The configured QoS as an MQTT QoS level.
    pub fn qos(&self) -> Result<rumqttc::QoS> {
        match self.qos {
            0 => Ok(rumqttc::QoS::AtMostOnce),
            1 => Ok(rumqttc::QoS::AtLeastOnce),
            2 => Ok(rumqttc::QoS::ExactlyOnce),
            other => Err(Error::Config(format!(
                "Invalid MQTT QoS {}: expected 0, 1 or 2",
                other
            ))),
        }
    }

    /// Validate connection settings.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::Config("mqtt.host must not be empty".to_string()));
        }
        if self.client_id.is_empty() {
            return Err(Error::Config(
                "mqtt.client_id must not be empty".to_string(),
            ));
        }
        if self.keep_alive_secs < 5 {
            return Err(Error::Config(
                "mqtt.keep_alive_secs must be >= 5".to_string(),
            ));
        }
        if self.connect_timeout_secs == 0 {
            return Err(Error::Config(
                "mqtt.connect_timeout_secs must be > 0".to_string(),
            ));
        }
        self.qos()?;
        Ok(())
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// Structured JSON format.
    Json,
}

/// Common logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Load a configuration file in JSON5 format.
pub fn load_config<T: for<'de> Deserialize<'de>>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    json5::from_str(&content).map_err(|e| {
        Error::Config(format!(
            "Failed to parse config file '{}': {}",
            path.display(),
            e
        ))
    })
}

/// Load a configuration from a JSON5 string.
pub fn parse_config<T: for<'de> Deserialize<'de>>(content: &str) -> Result<T> {
    json5::from_str(content).map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_mqtt_config() {
        let json5 = r#"
        {
            host: "broker.local",
            port: 8883,
            client_id: "exporter-01",
            auto_reconnect: false,
            qos: 1,
        }
        "#;

        let config: MqttConfig = parse_config(json5).unwrap();

        assert_eq!(config.host, "broker.local");
        assert_eq!(config.port, 8883);
        assert_eq!(config.client_id, "exporter-01");
        assert!(!config.auto_reconnect);
        assert_eq!(config.qos().unwrap(), rumqttc::QoS::AtLeastOnce);
        assert_eq!(config.broker_url(), "tcp://broker.local:8883");
    }

    #[test]
    fn test_default_mqtt_config() {
        let config: MqttConfig = parse_config("{}").unwrap();

        assert_eq!(config, MqttConfig::default());
        assert_eq!(config.broker_url(), "tcp://localhost:1883");
        assert_eq!(config.keep_alive_secs, 10);
        assert!(config.auto_reconnect);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_qos() {
        let config = MqttConfig {
            qos: 3,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_short_keep_alive() {
        let config = MqttConfig {
            keep_alive_secs: 1,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("keep_alive_secs"));
    }

    #[test]
    fn test_json_logging_format() {
        let json5 = r#"{ level: "debug", format: "json" }"#;
        let config: LoggingConfig = parse_config(json5).unwrap();

        assert_eq!(config.level, "debug");
        assert_eq!(config.format, LogFormat::Json);
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{{ host: 'filehost', port: 1884 }}").unwrap();

        let config: MqttConfig = load_config(file.path()).unwrap();
        assert_eq!(config.host, "filehost");
        assert_eq!(config.port, 1884);
    }

    #[test]
    fn test_load_config_missing_file() {
        let result: Result<MqttConfig> = load_config("/nonexistent/exporter.json5");
        let err = result.unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
