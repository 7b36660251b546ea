use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::sync::{mpsc, watch};
use trafficwatchd::scheduler::{Control, Scheduler};
use trafficwatchd::{install, status, DiskMonitor};
use tw_config::{ConfigPaths, WatchdogConfig};
use tw_host::{Smartctl, SystemShutdown};
use tw_notify::{AlertMessage, Dispatcher};
use tw_quota::AccountingStore;

#[derive(Parser)]
#[command(
    name = "trafficwatchd",
    version = trafficwatchd::DAEMON_VERSION,
    about = "Monthly traffic quota watchdog"
)]
struct Cli {
    /// Config file (defaults to $TRAFFICWATCH_CONFIG or /etc/trafficwatch/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon in the foreground
    Run,
    /// Show usage for the current cycle
    Status,
    /// Write a default config and install the systemd unit
    Init,
    /// Remove the systemd unit
    Clean {
        /// Also delete the usage database
        #[arg(long)]
        purge: bool,
    },
    /// Check SMART health of the configured disks once and alert on issues
    DiskCheck,
    /// Send a test message through every enabled channel
    NotifyTest {
        /// Extra text included in the message
        #[arg(long)]
        message: Option<String>,
    },
    /// Print version
    Version,
}

/// Forwards SIGTERM / Ctrl-C as `Stop` and SIGHUP as `Reload`.
fn spawn_signal_forwarder(tx: mpsc::UnboundedSender<Control>) -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = signal(SignalKind::terminate())?;
        let mut hangup = signal(SignalKind::hangup())?;
        tokio::spawn(async move {
            loop {
                let control = tokio::select! {
                    _ = tokio::signal::ctrl_c() => Control::Stop,
                    _ = terminate.recv() => Control::Stop,
                    _ = hangup.recv() => Control::Reload,
                };
                if control == Control::Stop {
                    tracing::info!("Shutting down...");
                }
                if tx.send(control).is_err() || control == Control::Stop {
                    break;
                }
            }
        });
    }
    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutting down...");
                let _ = tx.send(Control::Stop);
            }
        });
    }
    Ok(())
}

async fn run(paths: ConfigPaths) -> anyhow::Result<()> {
    let config = WatchdogConfig::load_from(&paths)?;

    let counters = trafficwatchd::open_counters(&config)?;

    tracing::info!(
        version = trafficwatchd::DAEMON_VERSION,
        config = %paths.config_path().display(),
        state = %config.state_path().display(),
        interfaces = ?config.bandwidth.interfaces,
        "Traffic watchdog starting"
    );

    let mut scheduler = Scheduler::new(config.clone(), counters, SystemShutdown::default())?;

    // Disk checks run on their own task and timer.
    let (stop_disk, stop_rx) = watch::channel(false);
    let disk_task = if config.disk_smart.enabled {
        let monitor = DiskMonitor::new(&config, smartctl(&config))?;
        Some(tokio::spawn(async move { monitor.run(stop_rx).await }))
    } else {
        None
    };

    let (tx, rx) = mpsc::unbounded_channel();
    spawn_signal_forwarder(tx)?;

    let result = scheduler.run(&paths, rx).await;
    let _ = stop_disk.send(true);
    if let Some(task) = disk_task {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "Disk health monitor ended abnormally");
        }
    }
    if let Err(e) = result {
        tracing::error!(error = %e, "Persisting accounting state failed, exiting");
        return Err(e.into());
    }
    Ok(())
}

fn smartctl(config: &WatchdogConfig) -> Smartctl {
    Smartctl::new(
        config.disk_smart.smartctl.clone(),
        config.disk_smart.command_timeout(),
    )
}

async fn disk_check(paths: &ConfigPaths) -> anyhow::Result<()> {
    let config = WatchdogConfig::load_from(paths)?;
    if config.disk_smart.devices.is_empty() {
        anyhow::bail!("No disk_smart.devices configured in {}", paths.config_path().display());
    }
    let monitor = DiskMonitor::new(&config, smartctl(&config))?;
    let check = monitor.check_at(Utc::now()).await;

    for device in &check.devices {
        if device.is_healthy() {
            println!("  {:<12} healthy", device.device());
        } else {
            println!("{}\n", device.report());
        }
    }
    for r in &check.deliveries {
        match r.error() {
            None => println!("  alert via {} ok", r.channel),
            Some(e) => println!("  alert via {} FAILED: {}", r.channel, e),
        }
    }
    let unhealthy = check.unhealthy().count();
    if unhealthy > 0 {
        anyhow::bail!("{} of {} disks need attention", unhealthy, check.devices.len());
    }
    Ok(())
}

fn print_status(paths: &ConfigPaths) -> anyhow::Result<()> {
    let config = WatchdogConfig::load_from(paths)?;
    let state_path = config.state_path();
    if !state_path.exists() {
        println!("No usage recorded yet ({} does not exist)", state_path.display());
        return Ok(());
    }
    let store = AccountingStore::open(&state_path)?;
    match status::collect(
        &store,
        config.bandwidth.quota_bytes()?,
        config.bandwidth.poll_interval(),
        Utc::now(),
    )? {
        Some(report) => print!("{}", report),
        None => println!("No usage recorded yet"),
    }
    Ok(())
}

async fn notify_test(paths: &ConfigPaths, note: Option<String>) -> anyhow::Result<()> {
    let config = WatchdogConfig::load_from(paths)?;
    let dispatcher = Dispatcher::from_config(&config)?;
    if dispatcher.is_empty() {
        anyhow::bail!("No notification channels are enabled in {}", paths.config_path().display());
    }

    let note = note.unwrap_or_else(|| "This is a test notification from trafficwatchd.".to_string());
    let results = dispatcher
        .dispatch(&AlertMessage::test(&config.host_name(), &note))
        .await;

    let mut failed = 0;
    for r in &results {
        match r.error() {
            None => println!("  {:<12} ok ({} attempt(s))", r.channel, r.attempts),
            Some(e) => {
                failed += 1;
                println!("  {:<12} FAILED after {} attempt(s): {}", r.channel, r.attempts, e);
            }
        }
    }
    if failed > 0 {
        anyhow::bail!("{} of {} channels failed", failed, results.len());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "trafficwatchd=info,tw_quota=info,tw_notify=info,tw_host=info".into()
            }),
        )
        .init();

    let cli = Cli::parse();
    let paths = match cli.config {
        Some(file) => ConfigPaths::from_config_file(file),
        None => ConfigPaths::new(),
    };

    match cli.command {
        Commands::Run => run(paths).await,
        Commands::Status => print_status(&paths),
        Commands::Init => install::init(&paths),
        Commands::Clean { purge } => install::clean(&paths, purge),
        Commands::DiskCheck => disk_check(&paths).await,
        Commands::NotifyTest { message } => notify_test(&paths, message).await,
        Commands::Version => {
            println!("trafficwatchd {}", trafficwatchd::DAEMON_VERSION);
            Ok(())
        }
    }
}
