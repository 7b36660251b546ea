//! Billing cycle identity and rollover.
//!
//! Cycles are calendar months in UTC. Host timezone and DST changes never
//! move a cycle boundary.

use crate::state::{AccountingState, CycleId};
use chrono::{DateTime, Utc};

pub fn current_cycle_id(now: DateTime<Utc>) -> CycleId {
    CycleId::containing(now)
}

/// Summary of a cycle closed by [`maybe_rollover`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rollover {
    pub closed: CycleId,
    pub used_bytes: u64,
    pub opened: CycleId,
}

/// Resets accounting when `now` falls in a later cycle than `state`.
///
/// This is the only path that zeroes `accumulated_bytes`. A clock that steps
/// back into an earlier month leaves the state untouched.
pub fn maybe_rollover(state: &mut AccountingState, now: DateTime<Utc>) -> Option<Rollover> {
    let current = current_cycle_id(now);
    if current <= state.cycle_id {
        if current < state.cycle_id {
            tracing::warn!(
                cycle = %state.cycle_id,
                clock_cycle = %current,
                "Clock is behind the recorded cycle; keeping current accounting"
            );
        }
        return None;
    }

    let rollover = Rollover {
        closed: state.cycle_id,
        used_bytes: state.accumulated_bytes,
        opened: current,
    };

    state.cycle_id = current;
    state.accumulated_bytes = 0;
    state.carried_bytes = 0;
    state.baseline_raw = state.last_raw;
    state.notified_thresholds.clear();
    state.shutdown_requested = None;

    tracing::info!(
        closed = %rollover.closed,
        opened = %rollover.opened,
        used_bytes = rollover.used_bytes,
        "New billing cycle, statistics reset"
    );

    Some(rollover)
}
