//! Configuration loading and validation

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;
use uuid::Uuid;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// MQTT broker host
    #[serde(default = "default_host")]
    pub host: String,
    /// MQTT broker port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Keep-alive interval in seconds
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// Client id; a random one is generated when absent
    #[serde(default)]
    pub client_id: Option<String>,
    /// Give up after this many consecutive connect failures before the
    /// first successful connect (0 retries forever)
    #[serde(default)]
    pub max_connect_attempts: u32,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            keep_alive_secs: default_keep_alive(),
            client_id: None,
            max_connect_attempts: 0,
        }
    }
}

impl BrokerConfig {
    /// Configured client id, or a freshly generated one
    pub fn effective_client_id(&self) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| format!("dropsync-{}", Uuid::new_v4()))
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_keep_alive() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Topic namespace prefix
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Whether query responses on the state topic are retained
    #[serde(default = "default_true")]
    pub retain_query_response: bool,
    /// Echo decode/parse failures on the error topic
    #[serde(default)]
    pub publish_errors: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            retain_query_response: true,
            publish_errors: false,
        }
    }
}

fn default_namespace() -> String {
    "microdrop".to_string()
}

fn default_true() -> bool {
    true
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.broker.host, "localhost");
        assert_eq!(config.broker.port, 1883);
        assert_eq!(config.broker.max_connect_attempts, 0);
        assert_eq!(config.sync.namespace, "microdrop");
        assert!(config.sync.retain_query_response);
        assert!(!config.sync.publish_errors);
    }

    #[test]
    fn test_partial_override() {
        let config: Config = toml::from_str(
            r#"
            [broker]
            host = "broker.lab"
            max_connect_attempts = 5

            [sync]
            namespace = "lab/rig2"
            publish_errors = true
            "#,
        )
        .unwrap();
        assert_eq!(config.broker.host, "broker.lab");
        assert_eq!(config.broker.port, 1883);
        assert_eq!(config.broker.max_connect_attempts, 5);
        assert_eq!(config.sync.namespace, "lab/rig2");
        assert!(config.sync.publish_errors);
    }

    #[test]
    fn test_effective_client_id() {
        let mut broker = BrokerConfig::default();
        assert!(broker.effective_client_id().starts_with("dropsync-"));
        broker.client_id = Some("rig2-sync".to_string());
        assert_eq!(broker.effective_client_id(), "rig2-sync");
    }
}
