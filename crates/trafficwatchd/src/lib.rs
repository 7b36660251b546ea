//! Monthly traffic quota daemon: accounting loop, shutdown enforcement,
//! disk health checks, status report and service install helpers used by
//! the `trafficwatchd` binary.

pub mod disk;
pub mod enforcer;
pub mod install;
pub mod scheduler;
pub mod status;

pub use disk::{DeviceHealth, DiskCheck, DiskMonitor};
pub use enforcer::{maybe_shutdown, ShutdownOutcome};
pub use scheduler::{Control, Scheduler, SchedulerState, TickReport};
pub use status::StatusReport;

/// Build-time daemon version string.
///
/// When `TRAFFICWATCHD_VERSION` is provided in the build environment (for
/// example by CI release workflows), that value is used. Otherwise we fall
/// back to the crate package version.
pub const DAEMON_VERSION: &str = match option_env!("TRAFFICWATCHD_VERSION") {
    Some(version) => version,
    None => env!("CARGO_PKG_VERSION"),
};

/// Counter source for the configured interfaces. Any interface the host
/// does not have is a configuration error and the daemon must not start.
pub fn open_counters(
    config: &tw_config::WatchdogConfig,
) -> anyhow::Result<tw_host::InterfaceCounters> {
    let mut counters = tw_host::InterfaceCounters::new(config.bandwidth.interfaces.clone());
    if let Err(e) = counters.verify() {
        anyhow::bail!(
            "Invalid config {}: {}",
            config.paths().config_path().display(),
            e
        );
    }
    Ok(counters)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_interface_prevents_startup() {
        let config = tw_config::WatchdogConfig::from_toml(
            "[bandwidth]\ninterfaces = [\"tw-test-absent0\"]\n",
        )
        .unwrap();
        let err = open_counters(&config).err().unwrap();
        assert!(err.to_string().contains("tw-test-absent0"));
    }
}
