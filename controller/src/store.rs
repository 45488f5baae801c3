use std::{io::ErrorKind, path::PathBuf};

use anyhow::Context;
use tracing::info;

use thermostat_common::RuntimeConfig;

/// Files under `THERMOSTAT_DATA_DIR` (default `./.thermostat`).
#[derive(Debug, Clone)]
pub struct AppStore {
    config_path: PathBuf,
    history_path: PathBuf,
}

impl AppStore {
    pub fn new() -> Self {
        let data_dir = std::env::var("THERMOSTAT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.thermostat"));
        Self::in_dir(data_dir)
    }

    pub fn in_dir(data_dir: PathBuf) -> Self {
        Self {
            config_path: data_dir.join("config.json"),
            history_path: data_dir.join("history.jsonl"),
        }
    }

    pub fn history_path(&self) -> &PathBuf {
        &self.history_path
    }

    /// Missing file means defaults; a file that does not parse is an error.
    pub async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        match tokio::fs::read(&self.config_path).await {
            Ok(raw) => serde_json::from_slice::<RuntimeConfig>(&raw)
                .with_context(|| format!("invalid config at {}", self.config_path.display())),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(path = %self.config_path.display(), "no config file, using defaults");
                Ok(RuntimeConfig::default())
            }
            Err(err) => Err(err)
                .with_context(|| format!("failed to read {}", self.config_path.display())),
        }
    }
}

/// Environment overrides for deployment-specific settings.
pub fn apply_env_overrides(runtime: &mut RuntimeConfig) {
    if let Ok(host) = std::env::var("MQTT_HOST") {
        runtime.network.mqtt_host = host;
    }
    if let Some(port) = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
    {
        runtime.network.mqtt_port = port;
    }
    if let Ok(user) = std::env::var("MQTT_USER") {
        runtime.network.mqtt_user = user;
    }
    if let Ok(pass) = std::env::var("MQTT_PASS") {
        runtime.network.mqtt_pass = pass;
    }
    if let Some(port) = std::env::var("CONTROLLER_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
    {
        runtime.network.http_port = port;
    }
    if let Ok(url) = std::env::var("PRICE_FEED_URL") {
        runtime.price_feed.url = Some(url).filter(|url| !url.trim().is_empty());
    }
}
