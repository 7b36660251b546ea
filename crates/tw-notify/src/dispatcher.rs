//! Fans one alert out to every enabled channel.
//!
//! Channels are attempted concurrently. Each gets its own retry budget and
//! a hard deadline, so a dead endpoint cannot hold up the others or the
//! caller for longer than the deadline.

use crate::channel::Channel;
use crate::message::AlertMessage;
use crate::retry::RetryPolicy;
use crate::NotifyError;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{info, warn};
use tw_config::WatchdogConfig;
use tw_quota::{CycleId, DeliveryRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Failed(String),
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub channel: String,
    pub attempts: u32,
    pub outcome: DeliveryOutcome,
}

impl DispatchResult {
    pub fn delivered(&self) -> bool {
        self.outcome == DeliveryOutcome::Delivered
    }

    pub fn error(&self) -> Option<String> {
        match &self.outcome {
            DeliveryOutcome::Delivered => None,
            DeliveryOutcome::Failed(e) => Some(e.clone()),
            DeliveryOutcome::TimedOut => Some("timed out".to_string()),
        }
    }

    pub fn to_record(&self, cycle: CycleId, threshold: u8, now: DateTime<Utc>) -> DeliveryRecord {
        DeliveryRecord {
            cycle_id: cycle,
            threshold,
            channel: self.channel.clone(),
            delivered: self.delivered(),
            attempts: self.attempts,
            error: self.error(),
            recorded_at: now,
        }
    }
}

#[derive(Debug)]
pub struct Dispatcher {
    channels: Vec<Channel>,
    policy: RetryPolicy,
    channel_timeout: Duration,
}

impl Dispatcher {
    pub fn new(channels: Vec<Channel>, policy: RetryPolicy, channel_timeout: Duration) -> Self {
        Self {
            channels,
            policy,
            channel_timeout,
        }
    }

    /// Builds every enabled channel. A channel that cannot be constructed
    /// (e.g. a malformed email address) fails the whole build.
    pub fn from_config(config: &WatchdogConfig) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder()
            .timeout(config.dispatch.channel_timeout())
            .build()?;
        let channels = config
            .enabled_channels()
            .map(|c| Channel::from_config(c, &http))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(
            channels,
            RetryPolicy::from_config(&config.dispatch),
            config.dispatch.channel_timeout(),
        ))
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn channel_timeout(&self) -> Duration {
        self.channel_timeout
    }

    pub async fn dispatch(&self, message: &AlertMessage) -> Vec<DispatchResult> {
        self.dispatch_within(message, self.channel_timeout).await
    }

    /// Like [`dispatch`](Self::dispatch) with the per-channel deadline
    /// lowered to `deadline` when that is shorter.
    pub async fn dispatch_within(
        &self,
        message: &AlertMessage,
        deadline: Duration,
    ) -> Vec<DispatchResult> {
        if self.channels.is_empty() {
            warn!("No notification channels enabled, alert not sent");
            return Vec::new();
        }

        let deadline = deadline.min(self.channel_timeout);
        let results = join_all(
            self.channels
                .iter()
                .map(|channel| self.deliver(channel, message, deadline)),
        )
        .await;

        let delivered = results.iter().filter(|r| r.delivered()).count();
        if delivered > 0 {
            info!(
                delivered,
                total = results.len(),
                "Alert sent ({}/{} channels)",
                delivered,
                results.len()
            );
        } else {
            warn!(total = results.len(), "Alert failed on every channel");
        }
        results
    }

    async fn deliver(
        &self,
        channel: &Channel,
        message: &AlertMessage,
        deadline: Duration,
    ) -> DispatchResult {
        let attempts = AtomicU32::new(0);
        let send = self
            .policy
            .run(channel.name(), &attempts, || channel.send(message));

        let outcome = match tokio::time::timeout(deadline, send).await {
            Ok(Ok(())) => DeliveryOutcome::Delivered,
            Ok(Err(err)) => {
                warn!(channel = channel.name(), error = %err, "Channel delivery failed");
                DeliveryOutcome::Failed(err.to_string())
            }
            Err(_) => {
                warn!(
                    channel = channel.name(),
                    timeout_secs = deadline.as_secs_f64(),
                    "Channel delivery timed out"
                );
                DeliveryOutcome::TimedOut
            }
        };

        DispatchResult {
            channel: channel.name().to_string(),
            attempts: attempts.load(Ordering::SeqCst),
            outcome,
        }
    }
}
