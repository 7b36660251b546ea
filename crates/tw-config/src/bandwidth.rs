use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tw_quota::units::{GIB, MIB, TIB};
use tw_quota::Thresholds;

/// Monthly quota as written in the config: a bare number of GB or a string
/// with a unit such as `"500GB"` or `"1.5T"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QuotaSize {
    Gigabytes(f64),
    Text(String),
}

impl QuotaSize {
    pub fn to_bytes(&self) -> anyhow::Result<u64> {
        match self {
            QuotaSize::Gigabytes(gb) => scale(*gb, GIB),
            QuotaSize::Text(text) => parse_quota(text),
        }
    }
}

fn scale(value: f64, unit: u64) -> anyhow::Result<u64> {
    if !value.is_finite() || value <= 0.0 {
        anyhow::bail!("bandwidth.quota must be a positive size, got {}", value);
    }
    let bytes = value * unit as f64;
    if bytes >= u64::MAX as f64 {
        anyhow::bail!("bandwidth.quota is too large");
    }
    if bytes < 1.0 {
        anyhow::bail!("bandwidth.quota must be at least one byte, got {}", value);
    }
    Ok(bytes as u64)
}

/// Parses sizes like `"1000"`, `"500GB"`, `"1.5 TB"`, `"800m"`. Binary units;
/// a missing unit means GB.
pub fn parse_quota(text: &str) -> anyhow::Result<u64> {
    let lowered = text.trim().to_ascii_lowercase();
    let split = lowered
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(lowered.len());
    let (number, unit) = lowered.split_at(split);
    let number: f64 = number
        .parse()
        .map_err(|_| anyhow::anyhow!("Cannot parse bandwidth quota: {:?}", text))?;
    let unit = match unit.trim() {
        "" | "g" | "gb" | "gib" => GIB,
        "t" | "tb" | "tib" => TIB,
        "m" | "mb" | "mib" => MIB,
        "b" => 1,
        other => anyhow::bail!("Unknown unit {:?} in bandwidth quota {:?}", other, text),
    };
    scale(number, unit)
}

fn default_interfaces() -> Vec<String> {
    vec!["eth0".to_string()]
}

fn default_quota() -> QuotaSize {
    QuotaSize::Gigabytes(1000.0)
}

fn default_thresholds() -> Vec<u8> {
    vec![95]
}

fn default_poll_interval_seconds() -> u64 {
    60
}

fn default_auto_shutdown() -> bool {
    true
}

fn default_state_file() -> PathBuf {
    PathBuf::from("usage.db")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BandwidthConfig {
    #[serde(default = "default_interfaces")]
    pub interfaces: Vec<String>,
    #[serde(default = "default_quota")]
    pub quota: QuotaSize,
    #[serde(default = "default_thresholds")]
    pub thresholds: Vec<u8>,
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,
    #[serde(default = "default_auto_shutdown")]
    pub auto_shutdown: bool,
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
}

impl Default for BandwidthConfig {
    fn default() -> Self {
        Self {
            interfaces: default_interfaces(),
            quota: default_quota(),
            thresholds: default_thresholds(),
            poll_interval_seconds: default_poll_interval_seconds(),
            auto_shutdown: default_auto_shutdown(),
            state_file: default_state_file(),
        }
    }
}

impl BandwidthConfig {
    pub fn quota_bytes(&self) -> anyhow::Result<u64> {
        self.quota.to_bytes()
    }

    pub fn thresholds(&self) -> anyhow::Result<Thresholds> {
        Thresholds::new(self.thresholds.clone())
            .map_err(|e| anyhow::anyhow!("bandwidth.thresholds: {}", e))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.interfaces.is_empty() {
            anyhow::bail!("bandwidth.interfaces must not be empty");
        }
        if self.interfaces.iter().any(|i| i.trim().is_empty()) {
            anyhow::bail!("bandwidth.interfaces must not contain empty names");
        }
        self.quota_bytes()?;
        self.thresholds()?;
        if self.poll_interval_seconds == 0 {
            anyhow::bail!("bandwidth.poll_interval_seconds must be greater than 0");
        }
        if self.state_file.as_os_str().is_empty() {
            anyhow::bail!("bandwidth.state_file must not be empty");
        }
        Ok(())
    }
}
