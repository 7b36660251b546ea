//! Periodic SMART health check. Unhealthy or unreadable devices are
//! reported in one aggregated alert through the configured channels.

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use tw_config::{DiskSmartConfig, WatchdogConfig};
use tw_host::smart::device_path;
use tw_host::{SmartReport, SmartSource};
use tw_notify::{AlertMessage, DispatchResult, Dispatcher};

const SEPARATOR: &str = "------------------------------------";

/// Findings for one device. No issues means healthy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceHealth {
    Assessed {
        device: String,
        protocol: String,
        model: String,
        serial: String,
        issues: Vec<String>,
    },
    Unreadable {
        device: String,
        error: String,
    },
}

impl DeviceHealth {
    pub fn device(&self) -> &str {
        match self {
            DeviceHealth::Assessed { device, .. } | DeviceHealth::Unreadable { device, .. } => device,
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, DeviceHealth::Assessed { issues, .. } if issues.is_empty())
    }

    /// Plain-text section of the aggregated alert.
    pub fn report(&self) -> String {
        match self {
            DeviceHealth::Unreadable { device, error } => format!(
                "[!] Device: {}\nStatus: FAILED to fetch SMART data ({})",
                device_path(device),
                error
            ),
            DeviceHealth::Assessed {
                device,
                protocol,
                model,
                serial,
                issues,
            } => {
                let mut lines = vec![
                    format!("ALERT Device: {} ({})", device_path(device), protocol),
                    format!("Model: {}", model),
                    format!("S/N: {}", serial),
                    "Issues:".to_string(),
                ];
                lines.extend(issues.iter().map(|i| format!("  - {}", i)));
                lines.join("\n")
            }
        }
    }
}

/// Checks one device's SMART data against the configured limits.
pub fn assess(device: &str, report: &SmartReport, limits: &DiskSmartConfig) -> DeviceHealth {
    let mut issues = Vec::new();

    match report.assessment_passed() {
        Some(false) => issues.push("SMART Health Assessment: FAILED".to_string()),
        None if limits.require_assessment => {
            issues.push("SMART Health Assessment: FAILED (not reported)".to_string())
        }
        _ => {}
    }

    if report.is_nvme() {
        let log = report.nvme_smart_health_information_log.clone().unwrap_or_default();
        if log.media_errors > limits.alarm_media_errors {
            issues.push(format!(
                "Media Errors: {} (Limit: {})",
                log.media_errors, limits.alarm_media_errors
            ));
        }
        if log.percentage_used > limits.alarm_percentage_used {
            issues.push(format!(
                "Percentage Used: {}% (Limit: {}%)",
                log.percentage_used, limits.alarm_percentage_used
            ));
        }
    } else {
        let sectors = [
            (5, "Reallocated Sectors", limits.alarm_reallocated_sectors),
            (197, "Pending Sectors", limits.alarm_pending_sectors),
            (198, "Uncorrectable Sectors", limits.alarm_uncorrectable_sectors),
        ];
        for (id, label, limit) in sectors {
            let count = report.ata_raw(id).unwrap_or(0);
            if count > limit {
                issues.push(format!("{}: {} (Limit: {})", label, count, limit));
            }
        }
    }

    let temperature = report.temperature_celsius();
    if temperature > limits.alarm_temperature {
        issues.push(format!(
            "Temperature high: {}C (Limit: {}C)",
            temperature, limits.alarm_temperature
        ));
    }
    let hours = report.power_on_hours();
    if hours > limits.alarm_power_on_hours {
        issues.push(format!(
            "Power-on hours: {} hrs (Limit: {} hrs)",
            hours, limits.alarm_power_on_hours
        ));
    }

    DeviceHealth::Assessed {
        device: device.to_string(),
        protocol: report.protocol(),
        model: report.model_name.clone().unwrap_or_else(|| "Unknown".to_string()),
        serial: report.serial_number.clone().unwrap_or_else(|| "Unknown".to_string()),
        issues,
    }
}

/// Aggregated alert for every device that needs attention.
pub fn disk_alert(host: &str, now: DateTime<Utc>, findings: &[DeviceHealth]) -> AlertMessage {
    let sections: Vec<String> = findings.iter().map(DeviceHealth::report).collect();
    let body = format!(
        "Host: {}\nTime: {}\n{}\n\n{}",
        host,
        now.format("%Y-%m-%d %H:%M:%S UTC"),
        SEPARATOR,
        sections.join(&format!("\n\n{}\n\n", SEPARATOR))
    );
    AlertMessage::new("【Watchdog Host Disk Health Alert】", body)
}

/// What one check pass found and sent.
#[derive(Debug, Clone)]
pub struct DiskCheck {
    pub devices: Vec<DeviceHealth>,
    pub deliveries: Vec<DispatchResult>,
}

impl DiskCheck {
    pub fn unhealthy(&self) -> impl Iterator<Item = &DeviceHealth> {
        self.devices.iter().filter(|d| !d.is_healthy())
    }
}

pub struct DiskMonitor<S> {
    limits: DiskSmartConfig,
    source: S,
    dispatcher: Dispatcher,
    host_name: String,
}

impl<S: SmartSource> DiskMonitor<S> {
    pub fn new(config: &WatchdogConfig, source: S) -> anyhow::Result<Self> {
        Ok(Self {
            limits: config.disk_smart.clone(),
            source,
            dispatcher: Dispatcher::from_config(config)?,
            host_name: config.host_name(),
        })
    }

    /// Reads and assesses every configured device, in config order.
    pub async fn assess_all(&self) -> Vec<DeviceHealth> {
        let mut devices = Vec::with_capacity(self.limits.devices.len());
        for device in &self.limits.devices {
            let health = match self.source.read_smart(device).await {
                Ok(report) => assess(device, &report, &self.limits),
                Err(e) => {
                    warn!(device = %device, error = %e, "Reading SMART data failed");
                    DeviceHealth::Unreadable {
                        device: device.clone(),
                        error: e.to_string(),
                    }
                }
            };
            if health.is_healthy() {
                info!(device = %device, "Disk is healthy");
            }
            devices.push(health);
        }
        devices
    }

    /// One pass: assess, then send a single alert if anything needs attention.
    pub async fn check_at(&self, now: DateTime<Utc>) -> DiskCheck {
        let devices = self.assess_all().await;
        let findings: Vec<DeviceHealth> =
            devices.iter().filter(|d| !d.is_healthy()).cloned().collect();
        if findings.is_empty() {
            return DiskCheck {
                devices,
                deliveries: Vec::new(),
            };
        }

        warn!(devices = findings.len(), "Disk health issues found");
        let deliveries = self
            .dispatcher
            .dispatch(&disk_alert(&self.host_name, now, &findings))
            .await;
        for r in deliveries.iter().filter(|r| !r.delivered()) {
            warn!(channel = %r.channel, error = ?r.error(), "Disk alert not delivered");
        }
        DiskCheck { devices, deliveries }
    }

    /// Checks once immediately and then every `check_interval_seconds`
    /// until `stop` flips to true or its sender is dropped.
    pub async fn run(&self, mut stop: watch::Receiver<bool>) {
        info!(
            devices = ?self.limits.devices,
            interval_seconds = self.limits.check_interval_seconds,
            "Disk health monitor started"
        );
        let mut interval = tokio::time::interval(self.limits.check_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    self.check_at(Utc::now()).await;
                }
            }
        }
        info!("Disk health monitor stopped");
    }
}
