//! Offline status report read straight from the accounting store.

use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;
use tw_quota::units::format_gib;
use tw_quota::{usage_percent, AccountingStore, CycleSummary, DeliveryRecord, StoreError};

/// A sample older than this many poll intervals is reported as stale.
pub const STALE_AFTER_INTERVALS: u32 = 3;

const RECENT_DELIVERIES: usize = 20;

#[derive(Debug, Clone)]
pub struct StatusReport {
    pub cycle: String,
    pub used_bytes: u64,
    pub quota_bytes: u64,
    pub notified_thresholds: Vec<u8>,
    pub shutdown_requested: bool,
    pub last_sample_time: Option<DateTime<Utc>>,
    pub stale: bool,
    pub previous_cycle: Option<CycleSummary>,
    pub recent_failures: Vec<DeliveryRecord>,
}

impl StatusReport {
    pub fn percent(&self) -> f64 {
        usage_percent(self.used_bytes, self.quota_bytes)
    }
}

/// Builds the report, or `None` when the daemon has never recorded a sample.
pub fn collect(
    store: &AccountingStore,
    quota_bytes: u64,
    poll_interval: Duration,
    now: DateTime<Utc>,
) -> Result<Option<StatusReport>, StoreError> {
    let Some(state) = store.load_state()? else {
        return Ok(None);
    };

    let stale = match state.last_sample_time {
        Some(at) => {
            let limit = poll_interval * STALE_AFTER_INTERVALS;
            now.signed_duration_since(at)
                .to_std()
                .map(|age| age > limit)
                .unwrap_or(false)
        }
        None => true,
    };

    let recent_failures = store
        .recent_deliveries(RECENT_DELIVERIES)?
        .into_iter()
        .filter(|r| !r.delivered)
        .collect();

    Ok(Some(StatusReport {
        cycle: state.cycle_id.to_string(),
        used_bytes: state.accumulated_bytes,
        quota_bytes,
        notified_thresholds: state.notified_thresholds.iter().copied().collect(),
        shutdown_requested: state.shutdown_requested_this_cycle(),
        last_sample_time: state.last_sample_time,
        stale,
        previous_cycle: store.previous_cycle()?,
        recent_failures,
    }))
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Cycle:      {}", self.cycle)?;
        writeln!(
            f,
            "Usage:      {} / {} ({:.1}%)",
            format_gib(self.used_bytes),
            format_gib(self.quota_bytes),
            self.percent()
        )?;
        let notified = if self.notified_thresholds.is_empty() {
            "none".to_string()
        } else {
            self.notified_thresholds
                .iter()
                .map(|t| format!("{t}%"))
                .collect::<Vec<_>>()
                .join(", ")
        };
        writeln!(f, "Notified:   {}", notified)?;
        writeln!(
            f,
            "Shutdown:   {}",
            if self.shutdown_requested {
                "requested this cycle"
            } else {
                "not requested"
            }
        )?;
        match self.last_sample_time {
            Some(at) => writeln!(
                f,
                "Last sample: {}{}",
                at.to_rfc3339(),
                if self.stale { " (stale, is the daemon running?)" } else { "" }
            )?,
            None => writeln!(f, "Last sample: never")?,
        }
        if let Some(prev) = &self.previous_cycle {
            writeln!(f, "Previous:   {} used {}", prev.cycle_id, format_gib(prev.used_bytes))?;
        }
        if !self.recent_failures.is_empty() {
            writeln!(f, "Recent delivery failures:")?;
            for r in &self.recent_failures {
                writeln!(
                    f,
                    "  {} {}% via {} after {} attempt(s): {}",
                    r.recorded_at.format("%Y-%m-%d %H:%M:%S"),
                    r.threshold,
                    r.channel,
                    r.attempts,
                    r.error.as_deref().unwrap_or("unknown error")
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tw_quota::units::GIB;
    use tw_quota::{AccountingState, CycleId, Rollover};

    const MINUTE: Duration = Duration::from_secs(60);

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 20, 12, 0, 0).unwrap()
    }

    #[test]
    fn empty_store_has_no_report() {
        let store = AccountingStore::in_memory().unwrap();
        assert!(collect(&store, 100 * GIB, MINUTE, now()).unwrap().is_none());
    }

    #[test]
    fn reports_usage_and_staleness() {
        let store = AccountingStore::in_memory().unwrap();
        let sampled = now() - chrono::Duration::minutes(10);
        let mut state = AccountingState::first_run(0, sampled);
        state.accumulated_bytes = 92 * GIB;
        state.notified_thresholds.insert(90);
        store.save_state(&state).unwrap();

        let report = collect(&store, 100 * GIB, MINUTE, now()).unwrap().unwrap();
        assert_eq!(report.cycle, "2025-07");
        assert_eq!(report.notified_thresholds, vec![90]);
        assert!(report.stale);
        assert!(!report.shutdown_requested);

        let fresh = collect(&store, 100 * GIB, Duration::from_secs(300), now())
            .unwrap()
            .unwrap();
        assert!(!fresh.stale);

        let text = report.to_string();
        assert!(text.contains("92.00 GB / 100.00 GB (92.0%)"));
        assert!(text.contains("Notified:   90%"));
        assert!(text.contains("stale"));
    }

    #[test]
    fn includes_previous_cycle_and_failures() {
        let store = AccountingStore::in_memory().unwrap();
        let state = AccountingState::first_run(0, now());
        store.save_state(&state).unwrap();
        store
            .archive_cycle(
                &Rollover {
                    closed: CycleId::new(2025, 6).unwrap(),
                    used_bytes: 40 * GIB,
                    opened: CycleId::new(2025, 7).unwrap(),
                },
                now(),
            )
            .unwrap();
        store
            .record_deliveries(&[
                DeliveryRecord {
                    cycle_id: state.cycle_id,
                    threshold: 90,
                    channel: "wecom".into(),
                    delivered: true,
                    attempts: 1,
                    error: None,
                    recorded_at: now(),
                },
                DeliveryRecord {
                    cycle_id: state.cycle_id,
                    threshold: 90,
                    channel: "email".into(),
                    delivered: false,
                    attempts: 3,
                    error: Some("connection refused".into()),
                    recorded_at: now(),
                },
            ])
            .unwrap();

        let report = collect(&store, 100 * GIB, MINUTE, now()).unwrap().unwrap();
        assert_eq!(report.previous_cycle.unwrap().used_bytes, 40 * GIB);
        assert_eq!(report.recent_failures.len(), 1);
        assert_eq!(report.recent_failures[0].channel, "email");
    }
}
