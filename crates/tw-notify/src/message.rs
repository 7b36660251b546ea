use tw_quota::units::format_gib;
use tw_quota::{usage_percent, CycleId, QuotaEvent};

/// Figures shared by every alert of one tick.
#[derive(Debug, Clone)]
pub struct AlertContext {
    pub host: String,
    pub cycle: CycleId,
    pub used_bytes: u64,
    pub quota_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertMessage {
    pub title: String,
    pub body: String,
}

impl AlertMessage {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
        }
    }

    /// Message for a threshold event. `shutting_down` only affects the
    /// exhaustion wording.
    pub fn for_event(ctx: &AlertContext, event: &QuotaEvent, shutting_down: bool) -> Self {
        let percent = usage_percent(ctx.used_bytes, ctx.quota_bytes);
        let mut lines = vec![
            format!("Host: {}", ctx.host),
            format!("Cycle: {}", ctx.cycle),
            format!("Monthly usage: {}", format_gib(ctx.used_bytes)),
            format!("Percentage: {:.1}%", percent),
        ];

        if event.is_exhaustion() {
            lines.push(format!("Exceeded quota: {}", format_gib(ctx.quota_bytes)));
            lines.push(if shutting_down {
                "System shutting down now!".to_string()
            } else {
                "The host stays online.".to_string()
            });
            Self::new("【Watchdog Host Traffic Exceeded】", lines.join("\n"))
        } else {
            lines.push(format!("Quota: {}", format_gib(ctx.quota_bytes)));
            lines.push(format!(
                "Warning: {}% alert threshold reached!",
                event.threshold()
            ));
            Self::new("【Watchdog Host Traffic Alert】", lines.join("\n"))
        }
    }

    pub fn test(host: &str, note: &str) -> Self {
        Self::new(
            "【Watchdog Host Test】",
            format!("Host: {}\n{}", host, note),
        )
    }

    pub fn text(&self) -> String {
        format!("{}\n{}", self.title, self.body)
    }

    /// Applies a channel template; `{message}` is replaced by the full text.
    pub fn render(&self, template: Option<&str>) -> String {
        match template {
            Some(template) => template.replace("{message}", &self.text()),
            None => self.text(),
        }
    }
}
