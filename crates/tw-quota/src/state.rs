use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Identifies one billing cycle: a calendar month in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CycleId {
    pub year: i32,
    pub month: u32,
}

impl CycleId {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        if (1..=12).contains(&month) {
            Some(Self { year, month })
        } else {
            None
        }
    }

    pub fn containing(now: DateTime<Utc>) -> Self {
        Self {
            year: now.year(),
            month: now.month(),
        }
    }

    pub fn next(self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }
}

impl fmt::Display for CycleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid cycle id: {0}")]
pub struct ParseCycleIdError(String);

impl FromStr for CycleId {
    type Err = ParseCycleIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, month) = s
            .split_once('-')
            .ok_or_else(|| ParseCycleIdError(s.to_string()))?;
        let year: i32 = year.parse().map_err(|_| ParseCycleIdError(s.to_string()))?;
        let month: u32 = month
            .parse()
            .map_err(|_| ParseCycleIdError(s.to_string()))?;
        CycleId::new(year, month).ok_or_else(|| ParseCycleIdError(s.to_string()))
    }
}

/// Cycle-to-date accounting, owned by the scheduler and persisted after every tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountingState {
    pub cycle_id: CycleId,
    /// Raw counter value at the start of the current accounting segment.
    pub baseline_raw: u64,
    pub last_raw: u64,
    /// Usage from segments closed by counter discontinuities this cycle.
    pub carried_bytes: u64,
    pub accumulated_bytes: u64,
    pub notified_thresholds: BTreeSet<u8>,
    /// Cycle for which host shutdown was already requested.
    pub shutdown_requested: Option<CycleId>,
    pub last_sample_time: Option<DateTime<Utc>>,
}

impl AccountingState {
    /// State for the very first observation: the sample becomes the baseline.
    pub fn first_run(raw: u64, now: DateTime<Utc>) -> Self {
        Self {
            cycle_id: CycleId::containing(now),
            baseline_raw: raw,
            last_raw: raw,
            carried_bytes: 0,
            accumulated_bytes: 0,
            notified_thresholds: BTreeSet::new(),
            shutdown_requested: None,
            last_sample_time: Some(now),
        }
    }

    pub fn is_notified(&self, threshold: u8) -> bool {
        self.notified_thresholds.contains(&threshold)
    }

    pub fn quota_exhausted(&self) -> bool {
        self.is_notified(crate::evaluator::EXHAUSTION_THRESHOLD)
    }

    pub fn shutdown_requested_this_cycle(&self) -> bool {
        self.shutdown_requested == Some(self.cycle_id)
    }
}
