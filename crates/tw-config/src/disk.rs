use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_check_interval_seconds() -> u64 {
    86_400
}

fn default_smartctl() -> String {
    "smartctl".to_string()
}

fn default_command_timeout_seconds() -> u64 {
    15
}

fn default_percentage_used() -> u64 {
    90
}

fn default_temperature() -> i64 {
    70
}

fn default_power_on_hours() -> u64 {
    43_800
}

/// `[disk_smart]`: periodic SMART health check via `smartctl -a -j`.
/// Alarm limits are exclusive: a value strictly above the limit is an issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskSmartConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Device names under `/dev` (e.g. `sda`, `nvme0n1`) or absolute paths.
    #[serde(default)]
    pub devices: Vec<String>,
    #[serde(default = "default_check_interval_seconds")]
    pub check_interval_seconds: u64,
    #[serde(default = "default_smartctl")]
    pub smartctl: String,
    #[serde(default = "default_command_timeout_seconds")]
    pub command_timeout_seconds: u64,
    /// Report a device whose self-assessment is missing, not only failed.
    #[serde(default)]
    pub require_assessment: bool,
    #[serde(default)]
    pub alarm_media_errors: u64,
    #[serde(default = "default_percentage_used")]
    pub alarm_percentage_used: u64,
    #[serde(default)]
    pub alarm_reallocated_sectors: u64,
    #[serde(default)]
    pub alarm_pending_sectors: u64,
    #[serde(default)]
    pub alarm_uncorrectable_sectors: u64,
    #[serde(default = "default_temperature")]
    pub alarm_temperature: i64,
    #[serde(default = "default_power_on_hours")]
    pub alarm_power_on_hours: u64,
}

impl Default for DiskSmartConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            devices: Vec::new(),
            check_interval_seconds: default_check_interval_seconds(),
            smartctl: default_smartctl(),
            command_timeout_seconds: default_command_timeout_seconds(),
            require_assessment: false,
            alarm_media_errors: 0,
            alarm_percentage_used: default_percentage_used(),
            alarm_reallocated_sectors: 0,
            alarm_pending_sectors: 0,
            alarm_uncorrectable_sectors: 0,
            alarm_temperature: default_temperature(),
            alarm_power_on_hours: default_power_on_hours(),
        }
    }
}

impl DiskSmartConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_seconds)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_seconds)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.devices.is_empty() {
            anyhow::bail!("disk_smart.devices must not be empty when enabled");
        }
        if self.devices.iter().any(|d| d.trim().is_empty()) {
            anyhow::bail!("disk_smart.devices must not contain empty names");
        }
        if self.check_interval_seconds == 0 {
            anyhow::bail!("disk_smart.check_interval_seconds must be greater than 0");
        }
        if self.command_timeout_seconds == 0 {
            anyhow::bail!("disk_smart.command_timeout_seconds must be greater than 0");
        }
        if self.smartctl.trim().is_empty() {
            anyhow::bail!("disk_smart.smartctl must not be empty");
        }
        Ok(())
    }
}
