//! Powers the host off once per cycle after the quota is exhausted.
//!
//! The decision reads only the accounting state, and the request is
//! persisted before the shutdown command runs. A daemon restarted between
//! the exhaustion alert and the shutdown therefore still shuts down, and
//! one restarted after the shutdown request never shuts down twice.

use tracing::{debug, error, warn};
use tw_host::ShutdownHost;
use tw_quota::{AccountingState, AccountingStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownOutcome {
    Disabled,
    NotExhausted,
    AlreadyRequested,
    Requested,
    Failed(String),
}

impl ShutdownOutcome {
    /// Whether this call invoked the shutdown command.
    pub fn invoked(&self) -> bool {
        matches!(self, ShutdownOutcome::Requested | ShutdownOutcome::Failed(_))
    }
}

/// Whether a call to [`maybe_shutdown`] right now would invoke the host
/// shutdown.
pub fn shutdown_pending(state: &AccountingState, auto_shutdown: bool) -> bool {
    auto_shutdown && state.quota_exhausted() && !state.shutdown_requested_this_cycle()
}

pub async fn maybe_shutdown<H: ShutdownHost>(
    state: &mut AccountingState,
    store: &AccountingStore,
    host: &H,
    auto_shutdown: bool,
) -> Result<ShutdownOutcome, StoreError> {
    if !state.quota_exhausted() {
        return Ok(ShutdownOutcome::NotExhausted);
    }
    if !auto_shutdown {
        debug!(cycle = %state.cycle_id, "Quota exhausted, auto-shutdown disabled");
        return Ok(ShutdownOutcome::Disabled);
    }
    if state.shutdown_requested_this_cycle() {
        debug!(cycle = %state.cycle_id, "Shutdown already requested this cycle");
        return Ok(ShutdownOutcome::AlreadyRequested);
    }

    state.shutdown_requested = Some(state.cycle_id);
    store.save_state(state)?;

    warn!(cycle = %state.cycle_id, "Quota exhausted, shutting down host");
    match host.shutdown_host().await {
        Ok(()) => Ok(ShutdownOutcome::Requested),
        Err(e) => {
            error!(cycle = %state.cycle_id, error = %e, "Shutdown command failed");
            Ok(ShutdownOutcome::Failed(e.to_string()))
        }
    }
}
