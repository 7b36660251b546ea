use serde::Serialize;
use std::collections::BTreeSet;

/// Percentage at which the quota counts as exhausted.
pub const EXHAUSTION_THRESHOLD: u8 = 100;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ThresholdError {
    #[error("threshold {0} is out of range (expected 1..=100)")]
    OutOfRange(u8),
    #[error("thresholds must be strictly increasing ({prev} is followed by {next})")]
    NotIncreasing { prev: u8, next: u8 },
}

/// Validated alert thresholds, in percent of quota.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thresholds(Vec<u8>);

impl Thresholds {
    pub fn new(values: Vec<u8>) -> Result<Self, ThresholdError> {
        if let Some(&bad) = values.iter().find(|&&t| t == 0 || t > 100) {
            return Err(ThresholdError::OutOfRange(bad));
        }
        if let Some(pair) = values.windows(2).find(|w| w[0] >= w[1]) {
            return Err(ThresholdError::NotIncreasing {
                prev: pair[0],
                next: pair[1],
            });
        }
        Ok(Self(values))
    }

    pub fn configured(&self) -> &[u8] {
        &self.0
    }

    /// Configured thresholds plus the implicit exhaustion threshold, ascending.
    pub fn effective(&self) -> Vec<u8> {
        let mut all = self.0.clone();
        if all.last() != Some(&EXHAUSTION_THRESHOLD) {
            all.push(EXHAUSTION_THRESHOLD);
        }
        all
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuotaEvent {
    ThresholdCrossed { threshold: u8 },
}

impl QuotaEvent {
    pub fn threshold(&self) -> u8 {
        match self {
            QuotaEvent::ThresholdCrossed { threshold } => *threshold,
        }
    }

    pub fn is_exhaustion(&self) -> bool {
        self.threshold() == EXHAUSTION_THRESHOLD
    }
}

fn crossed(accumulated_bytes: u64, quota_bytes: u64, threshold: u8) -> bool {
    u128::from(accumulated_bytes) * 100 >= u128::from(threshold) * u128::from(quota_bytes)
}

/// Emits one event per newly crossed threshold, lowest first, and records it
/// in `notified`.
pub fn evaluate(
    accumulated_bytes: u64,
    quota_bytes: u64,
    thresholds: &Thresholds,
    notified: &mut BTreeSet<u8>,
) -> Vec<QuotaEvent> {
    thresholds
        .effective()
        .into_iter()
        .filter(|&t| crossed(accumulated_bytes, quota_bytes, t))
        .filter(|&t| notified.insert(t))
        .map(|threshold| QuotaEvent::ThresholdCrossed { threshold })
        .collect()
}

pub fn usage_percent(accumulated_bytes: u64, quota_bytes: u64) -> f64 {
    if quota_bytes == 0 {
        return 0.0;
    }
    accumulated_bytes as f64 / quota_bytes as f64 * 100.0
}
