use crate::cycle::Rollover;
use crate::migrations;
use crate::state::{AccountingState, CycleId};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Corrupt state record: {0}")]
    Corrupt(String),
    #[error("State store lock poisoned")]
    Poisoned,
}

/// Closing figure of the immediately preceding cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    pub cycle_id: CycleId,
    pub used_bytes: u64,
    pub closed_at: DateTime<Utc>,
}

/// Outcome of delivering one threshold notification to one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryRecord {
    pub cycle_id: CycleId,
    pub threshold: u8,
    pub channel: String,
    pub delivered: bool,
    pub attempts: u32,
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Durable copy of the accounting state, backed by SQLite.
///
/// Counters are stored bit-for-bit in SQLite's signed 64-bit integers.
pub struct AccountingStore {
    conn: Mutex<Connection>,
}

fn to_db(value: u64) -> i64 {
    value as i64
}

fn from_db(value: i64) -> u64 {
    value as u64
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp {raw:?}: {e}")))
}

fn parse_cycle(raw: &str) -> Result<CycleId, StoreError> {
    raw.parse()
        .map_err(|e| StoreError::Corrupt(format!("{e}")))
}

impl AccountingStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    pub fn load_state(&self) -> Result<Option<AccountingState>, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT cycle_id, baseline_raw, last_raw, carried_bytes, accumulated_bytes,
                        shutdown_requested, last_sample_time
                 FROM accounting_state WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, Option<String>>(6)?,
                    ))
                },
            )
            .optional()?;

        let Some((cycle, baseline, last, carried, accumulated, shutdown, sampled)) = row else {
            return Ok(None);
        };

        let cycle_id = parse_cycle(&cycle)?;
        let mut stmt =
            conn.prepare("SELECT threshold FROM notified_thresholds WHERE cycle_id = ?1")?;
        let notified_thresholds = stmt
            .query_map([&cycle], |row| row.get::<_, u8>(0))?
            .collect::<Result<BTreeSet<_>, _>>()?;

        Ok(Some(AccountingState {
            cycle_id,
            baseline_raw: from_db(baseline),
            last_raw: from_db(last),
            carried_bytes: from_db(carried),
            accumulated_bytes: from_db(accumulated),
            notified_thresholds,
            shutdown_requested: shutdown.as_deref().map(parse_cycle).transpose()?,
            last_sample_time: sampled.as_deref().map(parse_time).transpose()?,
        }))
    }

    /// Replaces the stored state in a single transaction.
    pub fn save_state(&self, state: &AccountingState) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let cycle = state.cycle_id.to_string();
        tx.execute(
            "INSERT INTO accounting_state
                 (id, cycle_id, baseline_raw, last_raw, carried_bytes, accumulated_bytes,
                  shutdown_requested, last_sample_time, updated_at)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, datetime('now'))
             ON CONFLICT(id) DO UPDATE SET
                 cycle_id = excluded.cycle_id,
                 baseline_raw = excluded.baseline_raw,
                 last_raw = excluded.last_raw,
                 carried_bytes = excluded.carried_bytes,
                 accumulated_bytes = excluded.accumulated_bytes,
                 shutdown_requested = excluded.shutdown_requested,
                 last_sample_time = excluded.last_sample_time,
                 updated_at = excluded.updated_at",
            params![
                cycle,
                to_db(state.baseline_raw),
                to_db(state.last_raw),
                to_db(state.carried_bytes),
                to_db(state.accumulated_bytes),
                state.shutdown_requested.map(|c| c.to_string()),
                state.last_sample_time.map(|t| t.to_rfc3339()),
            ],
        )?;
        tx.execute("DELETE FROM notified_thresholds", [])?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO notified_thresholds (cycle_id, threshold) VALUES (?1, ?2)",
            )?;
            for threshold in &state.notified_thresholds {
                insert.execute(params![cycle, threshold])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Keeps the closing figure of `rollover.closed` as the only history row.
    pub fn archive_cycle(
        &self,
        rollover: &Rollover,
        closed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM cycle_history", [])?;
        tx.execute(
            "INSERT INTO cycle_history (cycle_id, used_bytes, closed_at) VALUES (?1, ?2, ?3)",
            params![
                rollover.closed.to_string(),
                to_db(rollover.used_bytes),
                closed_at.to_rfc3339()
            ],
        )?;
        let cutoff = rollover.closed.to_string();
        tx.execute("DELETE FROM delivery_log WHERE cycle_id < ?1", [cutoff])?;
        tx.commit()?;
        Ok(())
    }

    pub fn previous_cycle(&self) -> Result<Option<CycleSummary>, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT cycle_id, used_bytes, closed_at FROM cycle_history
                 ORDER BY cycle_id DESC LIMIT 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;
        row.map(|(cycle, used, closed)| -> Result<CycleSummary, StoreError> {
            Ok(CycleSummary {
                cycle_id: parse_cycle(&cycle)?,
                used_bytes: from_db(used),
                closed_at: parse_time(&closed)?,
            })
        })
        .transpose()
    }

    pub fn record_deliveries(&self, records: &[DeliveryRecord]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO delivery_log
                     (cycle_id, threshold, channel, delivered, attempts, error, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for record in records {
                insert.execute(params![
                    record.cycle_id.to_string(),
                    record.threshold,
                    record.channel,
                    record.delivered,
                    record.attempts,
                    record.error,
                    record.recorded_at.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Most recent delivery outcomes, newest first.
    pub fn recent_deliveries(&self, limit: usize) -> Result<Vec<DeliveryRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT cycle_id, threshold, channel, delivered, attempts, error, recorded_at
             FROM delivery_log ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map([limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u8>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, bool>(3)?,
                    row.get::<_, u32>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(
                |(cycle, threshold, channel, delivered, attempts, error, recorded)| -> Result<DeliveryRecord, StoreError> {
                    Ok(DeliveryRecord {
                        cycle_id: parse_cycle(&cycle)?,
                        threshold,
                        channel,
                        delivered,
                        attempts,
                        error,
                        recorded_at: parse_time(&recorded)?,
                    })
                },
            )
            .collect()
    }
}
