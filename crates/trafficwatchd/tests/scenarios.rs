use chrono::{DateTime, TimeZone, Utc};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use trafficwatchd::scheduler::{Control, Scheduler, SchedulerState, TickReport};
use trafficwatchd::ShutdownOutcome;
use tw_config::{ConfigPaths, WatchdogConfig};
use tw_host::{CounterSource, SampleError, ShutdownError, ShutdownHost};
use tw_quota::units::GIB;
use tw_quota::{AccountingStore, QuotaEvent};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Counter whose next reading is set by the test; `None` fails the read.
#[derive(Clone, Default)]
struct FakeCounter(Arc<Mutex<Option<u64>>>);

impl FakeCounter {
    fn set(&self, raw: u64) {
        *self.0.lock().unwrap() = Some(raw);
    }

    fn fail(&self) {
        *self.0.lock().unwrap() = None;
    }
}

impl CounterSource for FakeCounter {
    fn read_counter(&mut self) -> Result<u64, SampleError> {
        self.0
            .lock()
            .unwrap()
            .ok_or_else(|| SampleError::InterfaceMissing("eth0".into()))
    }
}

#[derive(Clone, Default)]
struct FakeHost(Arc<AtomicU32>);

impl FakeHost {
    fn calls(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }
}

impl ShutdownHost for FakeHost {
    async fn shutdown_host(&self) -> Result<(), ShutdownError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn config_toml(quota: &str, thresholds: &str, auto_shutdown: bool) -> String {
    format!(
        r#"
hostname = "test-host"

[bandwidth]
interfaces = ["eth0"]
quota = "{quota}"
thresholds = {thresholds}
poll_interval_seconds = 1
auto_shutdown = {auto_shutdown}
"#
    )
}

fn config_in(dir: &Path, toml: &str) -> (ConfigPaths, WatchdogConfig) {
    let paths = ConfigPaths::with_base(dir.to_path_buf());
    std::fs::write(paths.config_path(), toml).unwrap();
    let config = WatchdogConfig::load_from(&paths).unwrap();
    (paths, config)
}

fn july(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 7, day, hour, 0, 0).unwrap()
}

fn events(report: &TickReport) -> Vec<u8> {
    match report {
        TickReport::Completed { events, .. } => events.iter().map(QuotaEvent::threshold).collect(),
        TickReport::Skipped => panic!("tick was skipped"),
    }
}

fn shutdown(report: &TickReport) -> ShutdownOutcome {
    match report {
        TickReport::Completed { shutdown, .. } => shutdown.clone(),
        TickReport::Skipped => panic!("tick was skipped"),
    }
}

#[tokio::test]
async fn crossing_each_threshold_notifies_once() {
    let dir = tempfile::tempdir().unwrap();
    let (_, config) = config_in(dir.path(), &config_toml("100GB", "[80, 90]", false));
    let counter = FakeCounter::default();
    let mut scheduler = Scheduler::new(config, counter.clone(), FakeHost::default()).unwrap();

    counter.set(0);
    assert!(events(&scheduler.tick_at(july(1, 0)).await.unwrap()).is_empty());

    counter.set(85 * GIB);
    assert_eq!(events(&scheduler.tick_at(july(10, 0)).await.unwrap()), vec![80]);

    counter.set(92 * GIB);
    assert_eq!(events(&scheduler.tick_at(july(20, 0)).await.unwrap()), vec![90]);

    counter.set(93 * GIB);
    assert!(events(&scheduler.tick_at(july(21, 0)).await.unwrap()).is_empty());

    let state = scheduler.state().unwrap();
    assert_eq!(state.accumulated_bytes, 93 * GIB);
    assert_eq!(state.notified_thresholds.iter().copied().collect::<Vec<_>>(), vec![80, 90]);
}

#[tokio::test]
async fn reboot_keeps_accumulated_usage() {
    let dir = tempfile::tempdir().unwrap();
    let (_, config) = config_in(dir.path(), &config_toml("1000GB", "[95]", false));
    let counter = FakeCounter::default();
    let mut scheduler = Scheduler::new(config, counter.clone(), FakeHost::default()).unwrap();

    counter.set(10 * GIB);
    scheduler.tick_at(july(1, 0)).await.unwrap();
    counter.set(60 * GIB);
    scheduler.tick_at(july(2, 0)).await.unwrap();

    // Host rebooted: counters restart near zero.
    counter.set(GIB);
    let report = scheduler.tick_at(july(3, 0)).await.unwrap();
    assert!(matches!(
        report,
        TickReport::Completed { discontinuity: true, accumulated_bytes, .. } if accumulated_bytes == 50 * GIB
    ));

    counter.set(4 * GIB);
    scheduler.tick_at(july(4, 0)).await.unwrap();
    assert_eq!(scheduler.state().unwrap().accumulated_bytes, 53 * GIB);
}

#[tokio::test]
async fn sampling_failure_skips_tick() {
    let dir = tempfile::tempdir().unwrap();
    let (_, config) = config_in(dir.path(), &config_toml("1000GB", "[95]", false));
    let counter = FakeCounter::default();
    let mut scheduler = Scheduler::new(config, counter.clone(), FakeHost::default()).unwrap();

    counter.set(5 * GIB);
    scheduler.tick_at(july(1, 0)).await.unwrap();
    let before = scheduler.state().cloned();

    counter.fail();
    assert_eq!(scheduler.tick_at(july(1, 1)).await.unwrap(), TickReport::Skipped);
    assert_eq!(scheduler.state().cloned(), before);
}

#[tokio::test]
async fn exhaustion_shuts_down_exactly_once_across_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let (_, config) = config_in(dir.path(), &config_toml("10GB", "[50]", true));
    let counter = FakeCounter::default();
    let host = FakeHost::default();

    {
        let mut scheduler = Scheduler::new(config.clone(), counter.clone(), host.clone()).unwrap();
        counter.set(0);
        scheduler.tick_at(july(1, 0)).await.unwrap();
        counter.set(11 * GIB);
        let report = scheduler.tick_at(july(5, 0)).await.unwrap();
        assert_eq!(events(&report), vec![50, 100]);
        assert_eq!(shutdown(&report), ShutdownOutcome::Requested);
    }
    assert_eq!(host.calls(), 1);

    // The shutdown did not take effect and the daemon was restarted.
    let mut scheduler = Scheduler::new(config, counter.clone(), host.clone()).unwrap();
    counter.set(12 * GIB);
    let report = scheduler.tick_at(july(5, 1)).await.unwrap();
    assert!(events(&report).is_empty());
    assert_eq!(shutdown(&report), ShutdownOutcome::AlreadyRequested);
    assert_eq!(host.calls(), 1);
}

#[tokio::test]
async fn restart_between_alert_and_shutdown_still_shuts_down() {
    let dir = tempfile::tempdir().unwrap();
    let (_, config) = config_in(dir.path(), &config_toml("10GB", "[50]", true));

    // Exhaustion was notified and saved, but the process died before the
    // shutdown request was recorded.
    {
        let store = AccountingStore::open(&config.state_path()).unwrap();
        let mut state = tw_quota::AccountingState::first_run(0, july(1, 0));
        state.last_raw = 11 * GIB;
        state.accumulated_bytes = 11 * GIB;
        state.notified_thresholds.extend([50, 100]);
        store.save_state(&state).unwrap();
    }

    let counter = FakeCounter::default();
    let host = FakeHost::default();
    let mut scheduler = Scheduler::new(config.clone(), counter.clone(), host.clone()).unwrap();
    counter.set(11 * GIB);
    let report = scheduler.tick_at(july(5, 0)).await.unwrap();
    assert!(events(&report).is_empty());
    assert_eq!(shutdown(&report), ShutdownOutcome::Requested);

    let report = scheduler.tick_at(july(5, 1)).await.unwrap();
    assert_eq!(shutdown(&report), ShutdownOutcome::AlreadyRequested);
    assert_eq!(host.calls(), 1);
}

#[tokio::test]
async fn month_boundary_starts_a_new_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let (_, config) = config_in(dir.path(), &config_toml("100GB", "[80]", false));
    let counter = FakeCounter::default();
    let mut scheduler = Scheduler::new(config, counter.clone(), FakeHost::default()).unwrap();

    counter.set(0);
    scheduler.tick_at(july(1, 0)).await.unwrap();
    counter.set(85 * GIB);
    scheduler.tick_at(july(31, 23)).await.unwrap();

    counter.set(86 * GIB);
    let august = Utc.with_ymd_and_hms(2025, 8, 1, 0, 0, 0).unwrap();
    let report = scheduler.tick_at(august).await.unwrap();
    match report {
        TickReport::Completed { rollover: Some(r), accumulated_bytes, .. } => {
            assert_eq!(r.closed.to_string(), "2025-07");
            assert_eq!(r.used_bytes, 86 * GIB);
            assert_eq!(accumulated_bytes, 0);
        }
        other => panic!("expected rollover, got {other:?}"),
    }

    let state = scheduler.state().unwrap();
    assert_eq!(state.cycle_id.to_string(), "2025-08");
    assert!(state.notified_thresholds.is_empty());
    let previous = scheduler.store().previous_cycle().unwrap().unwrap();
    assert_eq!(previous.used_bytes, 86 * GIB);

    counter.set(90 * GIB);
    scheduler.tick_at(august + chrono::Duration::hours(1)).await.unwrap();
    assert_eq!(scheduler.state().unwrap().accumulated_bytes, 4 * GIB);
}

#[tokio::test]
async fn invalid_reload_keeps_previous_config() {
    let dir = tempfile::tempdir().unwrap();
    let (paths, config) = config_in(dir.path(), &config_toml("100GB", "[80]", false));
    let mut scheduler = Scheduler::new(config, FakeCounter::default(), FakeHost::default()).unwrap();

    std::fs::write(paths.config_path(), config_toml("100GB", "[90, 80]", false)).unwrap();
    assert!(!scheduler.reload_from(&paths));
    assert_eq!(scheduler.config().bandwidth.thresholds().unwrap().configured(), &[80]);

    std::fs::write(paths.config_path(), config_toml("200GB", "[70, 90]", false)).unwrap();
    assert!(scheduler.reload_from(&paths));
    assert_eq!(scheduler.config().bandwidth.thresholds().unwrap().configured(), &[70, 90]);
    assert_eq!(scheduler.config().bandwidth.quota_bytes().unwrap(), 200 * GIB);
}

#[tokio::test]
async fn run_stops_on_request_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let (paths, config) = config_in(dir.path(), &config_toml("100GB", "[80]", false));
    let state_path = config.state_path();
    let counter = FakeCounter::default();
    counter.set(7 * GIB);
    let mut scheduler = Scheduler::new(config, counter, FakeHost::default()).unwrap();

    let (tx, rx) = mpsc::unbounded_channel();
    tx.send(Control::Reload).unwrap();
    tx.send(Control::Stop).unwrap();
    scheduler.run(&paths, rx).await.unwrap();

    assert_eq!(scheduler.phase(), SchedulerState::Stopped);
    drop(scheduler);
    assert!(state_path.exists());
}

fn with_wecom(toml: &str, endpoint: &str) -> String {
    format!(
        r#"{toml}
[dispatch]
max_attempts = 2
initial_backoff_ms = 10
max_backoff_ms = 20
channel_timeout_seconds = 5

[[channels]]
kind = "wecom"
name = "ops-wecom"
webhook_key = "key-1"
endpoint = "{endpoint}"
"#
    )
}

#[test]
fn sub_byte_quota_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let paths = ConfigPaths::with_base(dir.path().to_path_buf());
    std::fs::write(paths.config_path(), config_toml("0.5b", "[80]", true)).unwrap();
    assert!(WatchdogConfig::load_from(&paths).is_err());
}

#[tokio::test]
async fn reconcile_rolls_stale_state_into_the_current_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let (_, config) = config_in(dir.path(), &config_toml("100GB", "[80]", false));

    {
        let store = AccountingStore::open(&config.state_path()).unwrap();
        let mut state = tw_quota::AccountingState::first_run(0, july(1, 0));
        state.last_raw = 40 * GIB;
        state.accumulated_bytes = 30 * GIB;
        state.notified_thresholds.insert(80);
        store.save_state(&state).unwrap();
    }

    let mut scheduler =
        Scheduler::new(config.clone(), FakeCounter::default(), FakeHost::default()).unwrap();
    let august = Utc.with_ymd_and_hms(2025, 8, 3, 12, 0, 0).unwrap();
    let rollover = scheduler.reconcile(august).unwrap().expect("stale cycle is closed");
    assert_eq!(rollover.closed.to_string(), "2025-07");
    assert_eq!(rollover.used_bytes, 30 * GIB);

    let state = scheduler.state().unwrap();
    assert_eq!(state.cycle_id.to_string(), "2025-08");
    assert_eq!(state.accumulated_bytes, 0);
    assert!(state.notified_thresholds.is_empty());
    assert_eq!(state.baseline_raw, 40 * GIB);

    let previous = scheduler.store().previous_cycle().unwrap().unwrap();
    assert_eq!(previous.cycle_id.to_string(), "2025-07");
    assert_eq!(previous.used_bytes, 30 * GIB);

    // Already current: nothing more to do, and the reset was persisted.
    assert!(scheduler.reconcile(august).unwrap().is_none());
    let saved = AccountingStore::open(&config.state_path())
        .unwrap()
        .load_state()
        .unwrap()
        .unwrap();
    assert_eq!(saved.cycle_id.to_string(), "2025-08");
    assert_eq!(saved.accumulated_bytes, 0);
}

#[tokio::test]
async fn crossing_on_the_boundary_sample_alerts_the_closing_cycle() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"errcode": 0, "errmsg": "ok"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let (_, config) = config_in(
        dir.path(),
        &with_wecom(&config_toml("100GB", "[80]", false), &server.uri()),
    );
    let counter = FakeCounter::default();
    let mut scheduler = Scheduler::new(config, counter.clone(), FakeHost::default()).unwrap();

    counter.set(0);
    scheduler.tick_at(july(1, 0)).await.unwrap();
    counter.set(70 * GIB);
    assert!(events(&scheduler.tick_at(july(31, 23)).await.unwrap()).is_empty());

    // The last July traffic is only seen after midnight.
    counter.set(85 * GIB);
    let august = Utc.with_ymd_and_hms(2025, 8, 1, 0, 1, 0).unwrap();
    match scheduler.tick_at(august).await.unwrap() {
        TickReport::Completed { closing_events, events, rollover: Some(r), .. } => {
            assert_eq!(closing_events, vec![QuotaEvent::ThresholdCrossed { threshold: 80 }]);
            assert!(events.is_empty());
            assert_eq!(r.used_bytes, 85 * GIB);
        }
        other => panic!("expected rollover with closing alert, got {other:?}"),
    }

    let deliveries = scheduler.store().recent_deliveries(10).unwrap();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].cycle_id.to_string(), "2025-07");
    assert_eq!(deliveries[0].threshold, 80);
    assert!(deliveries[0].delivered);
    assert!(scheduler.state().unwrap().notified_thresholds.is_empty());
}

#[tokio::test]
async fn failing_channel_is_logged_as_undelivered() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let (_, config) = config_in(
        dir.path(),
        &with_wecom(&config_toml("100GB", "[80]", false), &server.uri()),
    );
    let counter = FakeCounter::default();
    let mut scheduler = Scheduler::new(config, counter.clone(), FakeHost::default()).unwrap();

    counter.set(0);
    scheduler.tick_at(july(1, 0)).await.unwrap();
    counter.set(81 * GIB);
    assert_eq!(events(&scheduler.tick_at(july(2, 0)).await.unwrap()), vec![80]);

    let deliveries = scheduler.store().recent_deliveries(10).unwrap();
    let row = deliveries
        .iter()
        .find(|d| d.channel == "ops-wecom")
        .expect("delivery row for the channel");
    assert!(!row.delivered);
    assert_eq!(row.threshold, 80);
    assert_eq!(row.attempts, 2);
    assert!(row.error.is_some());

    // A failed delivery still counts as notified; the next tick stays quiet.
    counter.set(82 * GIB);
    assert!(events(&scheduler.tick_at(july(2, 1)).await.unwrap()).is_empty());
}

#[tokio::test]
async fn queued_stop_wins_over_a_due_tick() {
    let dir = tempfile::tempdir().unwrap();
    let (paths, config) = config_in(dir.path(), &config_toml("100GB", "[80]", false));
    let counter = FakeCounter::default();
    counter.set(7 * GIB);
    let mut scheduler = Scheduler::new(config, counter, FakeHost::default()).unwrap();

    // The interval's first tick is due immediately; the stop must still win.
    let (tx, rx) = mpsc::unbounded_channel();
    tx.send(Control::Stop).unwrap();
    scheduler.run(&paths, rx).await.unwrap();

    assert_eq!(scheduler.phase(), SchedulerState::Stopped);
    assert!(scheduler.state().is_none());
}
