use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const WECOM_ENDPOINT: &str = "https://qyapi.weixin.qq.com/cgi-bin/webhook/send";
pub const DINGTALK_ENDPOINT: &str = "https://oapi.dingtalk.com/robot/send";

fn default_enabled() -> bool {
    true
}

fn default_wecom_endpoint() -> String {
    WECOM_ENDPOINT.to_string()
}

fn default_dingtalk_endpoint() -> String {
    DINGTALK_ENDPOINT.to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_subject() -> String {
    "Watchdog Alert".to_string()
}

fn default_starttls() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeComConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub name: Option<String>,
    /// Template; `{message}` is replaced by the alert text.
    #[serde(default)]
    pub message: Option<String>,
    pub webhook_key: String,
    #[serde(default = "default_wecom_endpoint")]
    pub endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DingTalkConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    pub access_token: String,
    /// Signing secret; requests are signed when present.
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default = "default_dingtalk_endpoint")]
    pub endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    pub smtp_server: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    pub from_addr: String,
    pub to_addrs: Vec<String>,
    #[serde(default = "default_subject")]
    pub subject: String,
    #[serde(default = "default_starttls")]
    pub starttls: bool,
}

/// One `[[channels]]` entry, discriminated by `kind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ChannelConfig {
    Wecom(WeComConfig),
    Dingtalk(DingTalkConfig),
    Email(EmailConfig),
}

impl ChannelConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            ChannelConfig::Wecom(_) => "wecom",
            ChannelConfig::Dingtalk(_) => "dingtalk",
            ChannelConfig::Email(_) => "email",
        }
    }

    pub fn enabled(&self) -> bool {
        match self {
            ChannelConfig::Wecom(c) => c.enabled,
            ChannelConfig::Dingtalk(c) => c.enabled,
            ChannelConfig::Email(c) => c.enabled,
        }
    }

    /// Display name used in logs and the delivery log; defaults to the kind.
    pub fn name(&self) -> &str {
        let name = match self {
            ChannelConfig::Wecom(c) => c.name.as_deref(),
            ChannelConfig::Dingtalk(c) => c.name.as_deref(),
            ChannelConfig::Email(c) => c.name.as_deref(),
        };
        name.unwrap_or_else(|| self.kind())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let name = self.name();
        match self {
            ChannelConfig::Wecom(c) => {
                if c.webhook_key.trim().is_empty() {
                    anyhow::bail!("channel {}: webhook_key must not be empty", name);
                }
                if c.endpoint.is_empty() {
                    anyhow::bail!("channel {}: endpoint must not be empty", name);
                }
            }
            ChannelConfig::Dingtalk(c) => {
                if c.access_token.trim().is_empty() {
                    anyhow::bail!("channel {}: access_token must not be empty", name);
                }
                if c.endpoint.is_empty() {
                    anyhow::bail!("channel {}: endpoint must not be empty", name);
                }
            }
            ChannelConfig::Email(c) => {
                if c.smtp_server.trim().is_empty() {
                    anyhow::bail!("channel {}: smtp_server must not be empty", name);
                }
                if c.from_addr.trim().is_empty() {
                    anyhow::bail!("channel {}: from_addr must not be empty", name);
                }
                if c.to_addrs.is_empty() {
                    anyhow::bail!("channel {}: to_addrs must not be empty", name);
                }
                if c.username.is_some() != c.password.is_some() {
                    anyhow::bail!(
                        "channel {}: username and password must be set together",
                        name
                    );
                }
            }
        }
        Ok(())
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

fn default_channel_timeout_seconds() -> u64 {
    20
}

fn default_shutdown_notice_timeout_seconds() -> u64 {
    10
}

/// Retry and timeout bounds for notification delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_channel_timeout_seconds")]
    pub channel_timeout_seconds: u64,
    #[serde(default = "default_shutdown_notice_timeout_seconds")]
    pub shutdown_notice_timeout_seconds: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            channel_timeout_seconds: default_channel_timeout_seconds(),
            shutdown_notice_timeout_seconds: default_shutdown_notice_timeout_seconds(),
        }
    }
}

impl DispatchConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn channel_timeout(&self) -> Duration {
        Duration::from_secs(self.channel_timeout_seconds)
    }

    pub fn shutdown_notice_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_notice_timeout_seconds)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_attempts == 0 {
            anyhow::bail!("dispatch.max_attempts must be at least 1");
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            anyhow::bail!("dispatch.max_backoff_ms must not be below initial_backoff_ms");
        }
        if self.channel_timeout_seconds == 0 {
            anyhow::bail!("dispatch.channel_timeout_seconds must be greater than 0");
        }
        if self.shutdown_notice_timeout_seconds == 0 {
            anyhow::bail!("dispatch.shutdown_notice_timeout_seconds must be greater than 0");
        }
        Ok(())
    }
}
