use crate::SmartError;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;

/// The parts of `smartctl --json` output used by the disk health check.
/// Every field is optional; smartctl omits whole sections per protocol.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SmartReport {
    pub device: SmartDevice,
    pub model_name: Option<String>,
    pub serial_number: Option<String>,
    pub smart_status: Option<SmartStatus>,
    pub temperature: Option<SmartTemperature>,
    pub nvme_smart_health_information_log: Option<NvmeHealthLog>,
    pub ata_smart_attributes: Option<AtaAttributes>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SmartDevice {
    pub protocol: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SmartStatus {
    pub passed: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SmartTemperature {
    pub current: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NvmeHealthLog {
    pub media_errors: u64,
    pub percentage_used: u64,
    pub temperature: i64,
    pub power_on_hours: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AtaAttributes {
    pub table: Vec<AtaAttribute>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AtaAttribute {
    pub id: u32,
    pub raw: AtaRaw,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AtaRaw {
    pub value: u64,
}

impl SmartReport {
    pub fn from_json(bytes: &[u8]) -> Result<Self, SmartError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Upper-cased transport protocol, e.g. `NVME` or `ATA`.
    pub fn protocol(&self) -> String {
        self.device.protocol.to_uppercase()
    }

    pub fn is_nvme(&self) -> bool {
        self.protocol() == "NVME"
    }

    /// Raw value of an ATA attribute by id.
    pub fn ata_raw(&self, id: u32) -> Option<u64> {
        self.ata_smart_attributes
            .as_ref()?
            .table
            .iter()
            .find(|a| a.id == id)
            .map(|a| a.raw.value)
    }

    /// `smart_status.passed`, if the device reported one.
    pub fn assessment_passed(&self) -> Option<bool> {
        self.smart_status.as_ref().and_then(|s| s.passed)
    }

    /// Current temperature in Celsius, 0 when unknown.
    pub fn temperature_celsius(&self) -> i64 {
        if self.is_nvme() {
            return self
                .nvme_smart_health_information_log
                .as_ref()
                .map_or(0, |log| log.temperature);
        }
        if let Some(current) = self.temperature.as_ref().and_then(|t| t.current) {
            return current;
        }
        // Attribute 194 packs min/max into the upper bytes.
        self.ata_raw(194).map_or(0, |raw| (raw & 0xff) as i64)
    }

    /// Power-on hours, 0 when unknown.
    pub fn power_on_hours(&self) -> u64 {
        if self.is_nvme() {
            return self
                .nvme_smart_health_information_log
                .as_ref()
                .map_or(0, |log| log.power_on_hours);
        }
        self.ata_raw(9).unwrap_or(0)
    }
}

/// Reads SMART data for one device.
pub trait SmartSource: Send + Sync {
    fn read_smart(
        &self,
        device: &str,
    ) -> impl Future<Output = Result<SmartReport, SmartError>> + Send;
}

/// Runs `smartctl -a -j <device>` with a time limit.
#[derive(Debug, Clone)]
pub struct Smartctl {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl Smartctl {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self::with_command(program, ["-a", "-j"], timeout)
    }

    /// The device path is appended after `args`.
    pub fn with_command<I, S>(program: impl Into<String>, args: I, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            timeout,
        }
    }
}

/// `sda` becomes `/dev/sda`; absolute paths are kept.
pub fn device_path(device: &str) -> String {
    if device.starts_with('/') {
        device.to_string()
    } else {
        format!("/dev/{}", device)
    }
}

impl SmartSource for Smartctl {
    async fn read_smart(&self, device: &str) -> Result<SmartReport, SmartError> {
        let path = device_path(device);
        tracing::debug!(command = %self.program, device = %path, "Reading SMART data");
        let mut command = tokio::process::Command::new(&self.program);
        command.args(&self.args).arg(&path).kill_on_drop(true);
        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| SmartError::Timeout(self.timeout.as_secs()))??;

        // smartctl sets status bits for many non-fatal conditions; only an
        // empty report counts as a failed read.
        if output.stdout.iter().all(u8::is_ascii_whitespace) {
            return Err(SmartError::NoOutput {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        SmartReport::from_json(&output.stdout)
    }
}
