//! Periodic sampling loop.
//!
//! Each tick samples and accumulates, settles alerts for a cycle it is
//! about to close, rolls over, then evaluates, notifies, persists and
//! enforces on state owned by the scheduler. Ticks never overlap and a stop
//! request only takes effect between ticks.

use chrono::{DateTime, Utc};
use std::fmt;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use tw_config::{ConfigPaths, WatchdogConfig};
use tw_host::{CounterSource, ShutdownHost};
use tw_notify::{AlertContext, AlertMessage, Dispatcher};
use tw_quota::units::format_gib;
use tw_quota::{
    current_cycle_id, evaluate, maybe_rollover, observe, usage_percent, AccountingState,
    AccountingStore, QuotaEvent, Rollover, StoreError, Thresholds,
};

use crate::enforcer::{maybe_shutdown, shutdown_pending, ShutdownOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Running,
    Stopping,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SchedulerState::Stopped => "stopped",
            SchedulerState::Running => "running",
            SchedulerState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// Requests delivered to a running scheduler, usually from signal handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Reload,
    Stop,
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickReport {
    /// The counter could not be read; state is untouched.
    Skipped,
    Completed {
        accumulated_bytes: u64,
        discontinuity: bool,
        rollover: Option<Rollover>,
        /// Crossings in the cycle that this tick closed, sent before the reset.
        closing_events: Vec<QuotaEvent>,
        events: Vec<QuotaEvent>,
        shutdown: ShutdownOutcome,
    },
}

/// Live settings derived from a validated config. Swapped as a whole on
/// reload.
struct Settings {
    config: WatchdogConfig,
    quota_bytes: u64,
    thresholds: Thresholds,
    dispatcher: Dispatcher,
    host_name: String,
}

impl Settings {
    fn from_config(config: WatchdogConfig) -> anyhow::Result<Self> {
        let quota_bytes = config.bandwidth.quota_bytes()?;
        let thresholds = config.bandwidth.thresholds()?;
        let dispatcher = Dispatcher::from_config(&config)?;
        let host_name = config.host_name();
        Ok(Self {
            config,
            quota_bytes,
            thresholds,
            dispatcher,
            host_name,
        })
    }
}

pub struct Scheduler<C, H> {
    settings: Settings,
    store: AccountingStore,
    counters: C,
    host: H,
    state: Option<AccountingState>,
    phase: SchedulerState,
}

impl<C: CounterSource, H: ShutdownHost> Scheduler<C, H> {
    /// Opens the store named by `config` and loads any saved state.
    pub fn new(config: WatchdogConfig, counters: C, host: H) -> anyhow::Result<Self> {
        let store = AccountingStore::open(&config.state_path())?;
        Self::with_store(config, store, counters, host)
    }

    pub fn with_store(
        config: WatchdogConfig,
        store: AccountingStore,
        counters: C,
        host: H,
    ) -> anyhow::Result<Self> {
        let settings = Settings::from_config(config)?;
        let state = store.load_state()?;
        match &state {
            Some(s) => info!(
                cycle = %s.cycle_id,
                accumulated_bytes = s.accumulated_bytes,
                "Loaded accounting state"
            ),
            None => info!("No saved state, baseline will be taken from the first sample"),
        }
        Ok(Self {
            settings,
            store,
            counters,
            host,
            state,
            phase: SchedulerState::Stopped,
        })
    }

    pub fn config(&self) -> &WatchdogConfig {
        &self.settings.config
    }

    pub fn state(&self) -> Option<&AccountingState> {
        self.state.as_ref()
    }

    pub fn phase(&self) -> SchedulerState {
        self.phase
    }

    pub fn store(&self) -> &AccountingStore {
        &self.store
    }

    fn set_phase(&mut self, phase: SchedulerState) {
        if self.phase != phase {
            info!(from = %self.phase, to = %phase, "Scheduler state changed");
            self.phase = phase;
        }
    }

    /// Brings saved state up to the cycle containing `now`. Traffic seen
    /// while the daemon was down is attributed to the new cycle.
    pub fn reconcile(&mut self, now: DateTime<Utc>) -> Result<Option<Rollover>, StoreError> {
        let Some(state) = self.state.as_mut() else {
            return Ok(None);
        };
        let rollover = maybe_rollover(state, now);
        if let Some(r) = &rollover {
            self.store.archive_cycle(r, now)?;
            self.store.save_state(state)?;
        }
        Ok(rollover)
    }

    /// Replaces the live configuration. Interface and state file changes
    /// only take effect after a restart.
    pub fn apply_config(&mut self, config: WatchdogConfig) -> anyhow::Result<()> {
        let settings = Settings::from_config(config)?;
        let old = &self.settings.config.bandwidth;
        let new = &settings.config.bandwidth;
        if old.interfaces != new.interfaces || old.state_file != new.state_file {
            warn!("Interface or state_file changes require a restart to take effect");
        }
        self.settings = settings;
        info!(
            quota = %format_gib(self.settings.quota_bytes),
            thresholds = ?self.settings.thresholds.effective(),
            channels = self.settings.dispatcher.channels().len(),
            "Configuration applied"
        );
        Ok(())
    }

    /// Re-reads the config file. An unreadable or invalid file is logged and
    /// the running configuration stays in place.
    pub fn reload_from(&mut self, paths: &ConfigPaths) -> bool {
        match WatchdogConfig::load_from(paths).and_then(|c| self.apply_config(c)) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Config reload rejected, keeping previous configuration");
                false
            }
        }
    }

    fn evaluate_quota(&self, state: &mut AccountingState) -> Vec<QuotaEvent> {
        evaluate(
            state.accumulated_bytes,
            self.settings.quota_bytes,
            &self.settings.thresholds,
            &mut state.notified_thresholds,
        )
    }

    /// Sends one alert per event and logs every channel outcome under the
    /// state's cycle.
    async fn notify(
        &self,
        state: &AccountingState,
        events: &[QuotaEvent],
        shutting_down: bool,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if events.is_empty() {
            return Ok(());
        }
        let settings = &self.settings;
        let ctx = AlertContext {
            host: settings.host_name.clone(),
            cycle: state.cycle_id,
            used_bytes: state.accumulated_bytes,
            quota_bytes: settings.quota_bytes,
        };
        for event in events {
            info!(
                cycle = %state.cycle_id,
                threshold = event.threshold(),
                accumulated_bytes = state.accumulated_bytes,
                "Threshold crossed"
            );
            let message = AlertMessage::for_event(&ctx, event, shutting_down);
            let results = if event.is_exhaustion() && shutting_down {
                settings
                    .dispatcher
                    .dispatch_within(&message, settings.config.dispatch.shutdown_notice_timeout())
                    .await
            } else {
                settings.dispatcher.dispatch(&message).await
            };
            let records: Vec<_> = results
                .iter()
                .map(|r| r.to_record(state.cycle_id, event.threshold(), now))
                .collect();
            self.store.record_deliveries(&records)?;
        }
        Ok(())
    }

    /// Runs one full tick as if the clock read `now`.
    pub async fn tick_at(&mut self, now: DateTime<Utc>) -> Result<TickReport, StoreError> {
        let raw = match self.counters.read_counter() {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Sampling failed, skipping tick");
                return Ok(TickReport::Skipped);
            }
        };

        let mut state = match self.state.take() {
            Some(state) => state,
            None => {
                info!(raw, "First run, recording baseline");
                AccountingState::first_run(raw, now)
            }
        };

        let observation = observe(&mut state, raw);
        state.last_sample_time = Some(now);
        if observation.discontinuity {
            warn!(
                cycle = %state.cycle_id,
                raw,
                "Counter went backwards (reboot or reset), segment not counted"
            );
        }

        // Usage up to the boundary belongs to the closing cycle; alert on it
        // before the reset discards its thresholds.
        let closing_events = if current_cycle_id(now) > state.cycle_id {
            let events = self.evaluate_quota(&mut state);
            self.notify(&state, &events, false, now).await?;
            events
        } else {
            Vec::new()
        };

        let rollover = maybe_rollover(&mut state, now);
        if let Some(r) = &rollover {
            self.store.archive_cycle(r, now)?;
        }

        let auto_shutdown = self.settings.config.bandwidth.auto_shutdown;
        let events = self.evaluate_quota(&mut state);
        let shutting_down = shutdown_pending(&state, auto_shutdown);
        self.notify(&state, &events, shutting_down, now).await?;

        self.store.save_state(&state)?;

        let shutdown = maybe_shutdown(&mut state, &self.store, &self.host, auto_shutdown).await?;

        info!(
            cycle = %state.cycle_id,
            accumulated_bytes = state.accumulated_bytes,
            "Usage {} / {} ({:.1}%)",
            format_gib(state.accumulated_bytes),
            format_gib(self.settings.quota_bytes),
            usage_percent(state.accumulated_bytes, self.settings.quota_bytes)
        );

        let report = TickReport::Completed {
            accumulated_bytes: state.accumulated_bytes,
            discontinuity: observation.discontinuity,
            rollover,
            closing_events,
            events,
            shutdown,
        };
        self.state = Some(state);
        Ok(report)
    }

    /// Ticks every poll interval until [`Control::Stop`] arrives or the
    /// control channel closes. Only persistence errors end the loop early.
    pub async fn run(
        &mut self,
        paths: &ConfigPaths,
        mut control: mpsc::UnboundedReceiver<Control>,
    ) -> Result<(), StoreError> {
        self.reconcile(Utc::now())?;
        self.set_phase(SchedulerState::Running);

        let mut period = self.settings.config.bandwidth.poll_interval();
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // Pending control requests win over a due tick.
            let request = tokio::select! {
                biased;
                msg = control.recv() => Some(msg.unwrap_or(Control::Stop)),
                _ = interval.tick() => None,
            };

            match request {
                None => {
                    // Outside the select so a stop request never cancels a tick.
                    self.tick_at(Utc::now()).await?;
                }
                Some(Control::Reload) => {
                    info!("Reloading configuration");
                    if self.reload_from(paths) {
                        let next = self.settings.config.bandwidth.poll_interval();
                        if next != period {
                            debug!(seconds = next.as_secs(), "Poll interval changed");
                            period = next;
                            interval = tokio::time::interval_at(
                                tokio::time::Instant::now() + period,
                                period,
                            );
                            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        }
                    }
                }
                Some(Control::Stop) => break,
            }
        }

        self.set_phase(SchedulerState::Stopping);
        if let Some(state) = &self.state {
            self.store.save_state(state)?;
        }
        self.set_phase(SchedulerState::Stopped);
        Ok(())
    }
}
