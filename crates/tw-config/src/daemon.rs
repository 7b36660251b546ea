use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::bandwidth::BandwidthConfig;
use crate::disk::DiskSmartConfig;
use crate::notify::{ChannelConfig, DispatchConfig};
use crate::paths::ConfigPaths;

/// Config written by `trafficwatchd init` when none exists yet.
pub const DEFAULT_CONFIG_TOML: &str = r#"# trafficwatchd configuration

# Name shown in notifications; defaults to the OS hostname.
# hostname = "my-vps"

[bandwidth]
# Interfaces whose received + transmitted bytes are counted.
interfaces = ["eth0"]
# Monthly quota: a number of GB, or a string such as "500GB" or "1TB".
quota = "1000GB"
# Alert percentages, strictly increasing. 100 (quota exhausted) is implicit.
thresholds = [80, 95]
poll_interval_seconds = 60
# Shut the host down once the quota is exhausted.
auto_shutdown = true
# Relative paths resolve against this file's directory.
state_file = "usage.db"

[dispatch]
max_attempts = 3
initial_backoff_ms = 500
max_backoff_ms = 5000
channel_timeout_seconds = 20
shutdown_notice_timeout_seconds = 10

[disk_smart]
# Daily SMART check through `smartctl -a -j`; alerts use the channels below.
enabled = false
# devices = ["sda", "nvme0n1"]
check_interval_seconds = 86400
# alarm_temperature = 70
# alarm_percentage_used = 90
# alarm_power_on_hours = 43800

# [[channels]]
# kind = "wecom"
# webhook_key = "your-webhook-key"

# [[channels]]
# kind = "dingtalk"
# access_token = "your-access-token"
# secret = "SEC..."

# [[channels]]
# kind = "email"
# smtp_server = "smtp.example.com"
# smtp_port = 587
# username = "watchdog@example.com"
# password = "app-password"
# from_addr = "watchdog@example.com"
# to_addrs = ["ops@example.com"]
# subject = "Watchdog Alert"
"#;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub bandwidth: BandwidthConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub disk_smart: DiskSmartConfig,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
    #[serde(skip)]
    paths: Option<ConfigPaths>,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            hostname: None,
            bandwidth: BandwidthConfig::default(),
            dispatch: DispatchConfig::default(),
            disk_smart: DiskSmartConfig::default(),
            channels: Vec::new(),
            paths: None,
        }
    }
}

impl WatchdogConfig {
    /// Returns the `ConfigPaths` for this config, or the default paths.
    pub fn paths(&self) -> ConfigPaths {
        match &self.paths {
            Some(p) => p.clone(),
            None => ConfigPaths::new(),
        }
    }

    /// Set a custom `ConfigPaths` (useful for testing).
    pub fn set_paths(&mut self, paths: ConfigPaths) {
        self.paths = Some(paths);
    }

    /// Load config from the default location.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&ConfigPaths::new())
    }

    /// Load config from a specific `ConfigPaths`. A missing file is an error:
    /// the daemon never starts half-configured.
    pub fn load_from(paths: &ConfigPaths) -> anyhow::Result<Self> {
        let config_file = paths.config_path();
        let content = std::fs::read_to_string(config_file).map_err(|e| {
            anyhow::anyhow!("Cannot read config {}: {}", config_file.display(), e)
        })?;
        let mut config = Self::from_toml(&content)
            .map_err(|e| anyhow::anyhow!("Invalid config {}: {}", config_file.display(), e))?;
        config.paths = Some(paths.clone());
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: WatchdogConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate config values. Called automatically by `load` / `load_from`.
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(name) = &self.hostname {
            if name.trim().is_empty() {
                anyhow::bail!("hostname must not be empty when set");
            }
        }
        self.bandwidth.validate()?;
        self.dispatch.validate()?;
        self.disk_smart.validate()?;
        for channel in self.enabled_channels() {
            channel.validate()?;
        }
        Ok(())
    }

    pub fn enabled_channels(&self) -> impl Iterator<Item = &ChannelConfig> {
        self.channels.iter().filter(|c| c.enabled())
    }

    /// Host name shown in notifications.
    pub fn host_name(&self) -> String {
        if let Some(name) = &self.hostname {
            return name.clone();
        }
        hostname::get()
            .ok()
            .map(|h| h.to_string_lossy().to_string())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "unknown-host".to_string())
    }

    /// Absolute location of the accounting database.
    pub fn state_path(&self) -> PathBuf {
        self.paths().resolve(&self.bandwidth.state_file)
    }
}
