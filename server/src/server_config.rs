use config::{Config, ConfigError, Environment};
use lazy_static::lazy_static;
use serde::Deserialize;
use std::{env, path::Path, result::Result, time::Duration};

use crate::{
    monitor::PollerSettings, notify::broadcast::BroadcastSettings, notify::alert::AlertSettings,
};

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    pub poll_interval_secs: u64,
    pub confirmation_window_secs: u64,
    pub probe_timeout_secs: u64,
    pub inter_device_delay_ms: u64,
}

impl MonitorConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn confirmation_window(&self) -> Duration {
        Duration::from_secs(self.confirmation_window_secs)
    }

    pub fn poller_settings(&self) -> PollerSettings {
        PollerSettings {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            inter_device_delay: Duration::from_millis(self.inter_device_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastConfig {
    pub send_timeout_ms: u64,
    pub channel_capacity: usize,
}

impl BroadcastConfig {
    pub fn settings(&self) -> BroadcastSettings {
        BroadcastSettings {
            send_timeout: Duration::from_millis(self.send_timeout_ms),
            channel_capacity: self.channel_capacity.max(1),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertsConfig {
    pub webhook_urls: Vec<String>,
    pub timezone: String,
    pub request_timeout_secs: u64,
}

impl AlertsConfig {
    pub fn settings(&self) -> AlertSettings {
        let timezone = self.timezone.parse::<chrono_tz::Tz>().unwrap_or_else(|e| {
            tracing::warn!("Invalid alerts.timezone {:?} ({}), using UTC", self.timezone, e);
            chrono_tz::UTC
        });

        AlertSettings {
            webhook_urls: self.webhook_urls.clone(),
            timezone,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Device entry used to seed the in-memory registry when no database is configured.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceSeed {
    pub id: i32,
    pub name: String,
    pub address: String,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub monitor: MonitorConfig,
    pub broadcast: BroadcastConfig,
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub devices: Vec<DeviceSeed>,
}

impl ServerConfig {
    /// Builds the config from built-in defaults, then `config.toml` (if present),
    /// then `APP__SECTION__KEY` environment variables.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .set_default("monitor.poll_interval_secs", 60)?
            .set_default("monitor.confirmation_window_secs", 60)?
            .set_default("monitor.probe_timeout_secs", 3)?
            .set_default("monitor.inter_device_delay_ms", 1000)?
            .set_default("broadcast.send_timeout_ms", 2000)?
            .set_default("broadcast.channel_capacity", 16)?
            .set_default("alerts.webhook_urls", Vec::<String>::new())?
            .set_default("alerts.timezone", "UTC")?
            .set_default("alerts.request_timeout_secs", 10)?
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("alerts.webhook_urls"),
            )
            .build()?
            .try_deserialize()
    }
}

impl std::fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Server Config:\nMonitor: {:?}\n\nBroadcast: {:?}\n\nAlerts: {} webhook(s), timezone {}\n\nSeed devices:\n{}",
            self.monitor,
            self.broadcast,
            self.alerts.webhook_urls.len(),
            self.alerts.timezone,
            self.devices
                .iter()
                .map(|d| format!("{} -> {}:{}", d.name, d.address, d.port))
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }
}

pub fn config_root() -> String {
    env::var("APP_DIR").unwrap_or_else(|_| {
        let dir =
            env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR or APP_DIR is required");
        let dir = Path::new(&dir).parent().unwrap().display().to_string();
        format!("{}/config", dir)
    })
}

lazy_static! {
    pub static ref cfg: ServerConfig = {
        let root = config_root();
        let path = format!("{root}/config.toml");
        ServerConfig::load(&path).expect("config.toml is invalid")
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_config_file() {
        let config = ServerConfig::load("/nonexistent/config.toml").unwrap();

        assert_eq!(config.monitor.poll_interval_secs, 60);
        assert_eq!(config.monitor.confirmation_window_secs, 60);
        assert_eq!(config.monitor.probe_timeout_secs, 3);
        assert_eq!(config.monitor.inter_device_delay_ms, 1000);
        assert!(config.alerts.webhook_urls.is_empty());
        assert!(config.devices.is_empty());
    }

    #[test]
    fn test_invalid_timezone_falls_back_to_utc() {
        let alerts = AlertsConfig {
            webhook_urls: vec![],
            timezone: "Mars/Olympus_Mons".to_string(),
            request_timeout_secs: 10,
        };

        assert_eq!(alerts.settings().timezone, chrono_tz::UTC);
    }

    #[test]
    fn test_poller_settings_conversion() {
        let monitor = MonitorConfig {
            poll_interval_secs: 30,
            confirmation_window_secs: 60,
            probe_timeout_secs: 3,
            inter_device_delay_ms: 250,
        };

        let settings = monitor.poller_settings();
        assert_eq!(settings.poll_interval, Duration::from_secs(30));
        assert_eq!(settings.inter_device_delay, Duration::from_millis(250));
    }
}
