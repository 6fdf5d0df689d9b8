//! Configuration for mqttbeat
//!
//! Loaded from a TOML file with an `[mqtt]` table describing the broker and
//! the topics to subscribe, and an optional `[output]` table selecting where
//! events are written.

use crate::protocol::{TopicSpecError, TopicSubscription};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BeatConfig {
    pub mqtt: MqttSection,
    #[serde(default)]
    pub output: OutputSection,
}

/// Broker connection and subscription settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// Broker URL, e.g. `mqtt://localhost:1883` or `mqtts://broker:8883`
    pub broker_url: String,
    #[serde(default)]
    pub broker_username: String,
    #[serde(default)]
    pub broker_password: String,
    /// Environment variable read when `broker_password` is empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,
    /// Topics as `topic?qos` entries
    #[serde(default)]
    pub topics_subscribe: Vec<String>,
    /// Client identifier; generated per connection when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// Fixed delay between reconnection attempts
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
    /// Give up after this many consecutive failed attempts (unbounded when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_reconnect_attempts: Option<u32>,
    /// Time allowed for in-flight traffic to drain on disconnect
    #[serde(default = "default_disconnect_grace")]
    pub disconnect_grace_ms: u64,
    /// Capacity of the channel between the broker session and the ingestion loop
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_keep_alive() -> u64 {
    60
}

fn default_reconnect_delay() -> u64 {
    5
}

fn default_disconnect_grace() -> u64 {
    250
}

fn default_channel_capacity() -> usize {
    100
}

impl MqttSection {
    /// Minimal section for `broker_url` with all defaults applied
    pub fn new(broker_url: impl Into<String>, topics_subscribe: Vec<String>) -> Self {
        Self {
            broker_url: broker_url.into(),
            broker_username: String::new(),
            broker_password: String::new(),
            password_env: None,
            topics_subscribe,
            client_id: None,
            keep_alive_secs: default_keep_alive(),
            reconnect_delay_secs: default_reconnect_delay(),
            max_reconnect_attempts: None,
            disconnect_grace_ms: default_disconnect_grace(),
            channel_capacity: default_channel_capacity(),
        }
    }

    /// Username and password, only when both are non-empty
    pub fn credentials(&self) -> Option<(&str, &str)> {
        if self.broker_username.is_empty() || self.broker_password.is_empty() {
            None
        } else {
            Some((&self.broker_username, &self.broker_password))
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_millis(self.disconnect_grace_ms)
    }

    /// Parse the configured topic specs
    pub fn subscriptions(&self) -> Result<TopicSubscription, TopicSpecError> {
        TopicSubscription::parse(self.topics_subscribe.as_slice())
    }
}

/// Sink output settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OutputSection {
    /// File to append events to; stdout when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid topic configuration: {0}")]
    InvalidTopics(#[from] TopicSpecError),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl BeatConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: BeatConfig = toml::from_str(content)?;
        config.resolve_env_vars();
        config.validate()?;
        Ok(config)
    }

    /// Check everything startup depends on before touching the network
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_broker_url(&self.mqtt.broker_url)?;
        self.mqtt.subscriptions()?;

        if self.mqtt.channel_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "channel_capacity must be greater than 0".to_string(),
            ));
        }
        if self.mqtt.max_reconnect_attempts == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "max_reconnect_attempts must be greater than 0 or omitted for unlimited"
                    .to_string(),
            ));
        }
        Ok(())
    }

    fn resolve_env_vars(&mut self) {
        if !self.mqtt.broker_password.is_empty() {
            return;
        }
        if let Some(password) = self
            .mqtt
            .password_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok())
        {
            self.mqtt.broker_password = password;
        }
    }
}

/// Broker URLs must carry a known scheme and a host
fn validate_broker_url(broker_url: &str) -> Result<(), ConfigError> {
    let url =
        Url::parse(broker_url).map_err(|_| ConfigError::InvalidBrokerUrl(broker_url.to_string()))?;

    match url.scheme() {
        "mqtt" | "tcp" | "mqtts" | "ssl" | "tls" => {}
        _ => return Err(ConfigError::InvalidBrokerUrl(broker_url.to_string())),
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(ConfigError::InvalidBrokerUrl(broker_url.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config() {
        let toml_content = r#"
[mqtt]
broker_url = "mqtt://localhost:1883"
broker_username = "beat"
broker_password = "secret"
topics_subscribe = ["sensors/#?1", "alerts?2"]
client_id = "mqttbeat-test"
keep_alive_secs = 30
reconnect_delay_secs = 2
max_reconnect_attempts = 10
disconnect_grace_ms = 500
channel_capacity = 16

[output]
path = "/var/log/mqttbeat/events.ndjson"
"#;

        let config = BeatConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.mqtt.broker_url, "mqtt://localhost:1883");
        assert_eq!(config.mqtt.credentials(), Some(("beat", "secret")));
        assert_eq!(config.mqtt.topics_subscribe.len(), 2);
        assert_eq!(config.mqtt.client_id.as_deref(), Some("mqttbeat-test"));
        assert_eq!(config.mqtt.reconnect_delay(), Duration::from_secs(2));
        assert_eq!(config.mqtt.max_reconnect_attempts, Some(10));
        assert_eq!(config.mqtt.disconnect_grace(), Duration::from_millis(500));
        assert_eq!(config.mqtt.channel_capacity, 16);
        assert_eq!(
            config.output.path,
            Some(PathBuf::from("/var/log/mqttbeat/events.ndjson"))
        );
    }

    #[test]
    fn test_minimal_config_defaults() {
        let toml_content = r##"
[mqtt]
broker_url = "tcp://localhost:1883"
topics_subscribe = ["#?0"]
"##;

        let config = BeatConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.mqtt.credentials(), None);
        assert_eq!(config.mqtt.keep_alive_secs, 60);
        assert_eq!(config.mqtt.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(config.mqtt.max_reconnect_attempts, None);
        assert_eq!(config.mqtt.disconnect_grace(), Duration::from_millis(250));
        assert_eq!(config.mqtt.channel_capacity, 100);
        assert_eq!(config.output, OutputSection::default());
    }

    #[test]
    fn test_credentials_require_both_fields() {
        let mut section = MqttSection::new("mqtt://localhost:1883", vec![]);
        assert_eq!(section.credentials(), None);

        section.broker_username = "user".to_string();
        assert_eq!(section.credentials(), None);

        section.broker_username.clear();
        section.broker_password = "pass".to_string();
        assert_eq!(section.credentials(), None);

        section.broker_username = "user".to_string();
        assert_eq!(section.credentials(), Some(("user", "pass")));
    }

    #[test]
    fn test_malformed_topic_is_rejected() {
        let toml_content = r#"
[mqtt]
broker_url = "mqtt://localhost:1883"
topics_subscribe = ["good?1", "bad"]
"#;

        let result = BeatConfig::from_toml_str(toml_content);
        assert!(matches!(
            result,
            Err(ConfigError::InvalidTopics(TopicSpecError::MissingSeparator(_)))
        ));
    }

    #[test]
    fn test_invalid_broker_urls() {
        for url in ["invalid-url", "http://localhost:1883", "mqtt://"] {
            let result = validate_broker_url(url);
            assert!(
                matches!(result, Err(ConfigError::InvalidBrokerUrl(_))),
                "expected {url} to be rejected"
            );
        }
        assert!(validate_broker_url("mqtts://broker.example.com").is_ok());
        assert!(validate_broker_url("ssl://10.0.0.1:8883").is_ok());
    }

    #[test]
    fn test_missing_mqtt_section() {
        let result = BeatConfig::from_toml_str("[output]\n");
        assert!(matches!(result, Err(ConfigError::TomlParse(_))));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let toml_content = r#"
[mqtt]
broker_url = "mqtt://localhost:1883"
channel_capacity = 0
"#;
        assert!(matches!(
            BeatConfig::from_toml_str(toml_content),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_password_from_environment() {
        std::env::set_var("MQTTBEAT_TEST_PASSWORD_FROM_ENV", "from-env");
        let toml_content = r#"
[mqtt]
broker_url = "mqtt://localhost:1883"
broker_username = "beat"
password_env = "MQTTBEAT_TEST_PASSWORD_FROM_ENV"
"#;

        let config = BeatConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.mqtt.credentials(), Some(("beat", "from-env")));
        std::env::remove_var("MQTTBEAT_TEST_PASSWORD_FROM_ENV");
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let config = BeatConfig {
            mqtt: MqttSection::new("mqtt://localhost:1883", vec!["a/b?1".to_string()]),
            output: OutputSection::default(),
        };
        let rendered = toml::to_string_pretty(&config).unwrap();
        assert_eq!(BeatConfig::from_toml_str(&rendered).unwrap(), config);
    }
}
