//! systemd service installation (`init` / `clean`).

use std::fs;
use std::path::Path;
use std::process::Command;
use tw_config::{ConfigPaths, WatchdogConfig, DEFAULT_CONFIG_TOML};

pub const UNIT_NAME: &str = "trafficwatchd.service";
pub const UNIT_PATH: &str = "/etc/systemd/system/trafficwatchd.service";

/// Fails unless running as root.
pub fn require_root() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        let euid = unsafe { libc::geteuid() };
        if euid != 0 {
            anyhow::bail!("This command must be run as root (try sudo)");
        }
    }
    Ok(())
}

pub fn render_unit(exe: &Path, config: &Path) -> String {
    format!(
        "[Unit]
Description=Monthly traffic quota watchdog
After=network-online.target
Wants=network-online.target

[Service]
Type=simple
ExecStart={} run --config {}
ExecReload=/bin/kill -HUP $MAINPID
Restart=on-failure
RestartSec=10

[Install]
WantedBy=multi-user.target
",
        exe.display(),
        config.display()
    )
}

/// Writes `contents` to `path` unless the file already exists. Returns
/// whether it was written.
pub fn write_if_absent(path: &Path, contents: &str) -> anyhow::Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)?;
    Ok(true)
}

/// Removes `path` if present. Returns whether something was removed.
pub fn remove_if_present(path: &Path) -> anyhow::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn daemon_reload() -> anyhow::Result<()> {
    let status = Command::new("systemctl").arg("daemon-reload").status()?;
    if !status.success() {
        anyhow::bail!("systemctl daemon-reload failed: {}", status);
    }
    Ok(())
}

pub fn init(paths: &ConfigPaths) -> anyhow::Result<()> {
    require_root()?;

    paths.ensure_config_dir()?;
    let config_path = paths.config_path();
    if write_if_absent(config_path, DEFAULT_CONFIG_TOML)? {
        println!("Wrote default config to {}", config_path.display());
    } else {
        println!("Config already exists at {}, left unchanged", config_path.display());
    }

    let exe = std::env::current_exe()?;
    if write_if_absent(Path::new(UNIT_PATH), &render_unit(&exe, config_path))? {
        println!("Installed {}", UNIT_PATH);
        daemon_reload()?;
    } else {
        println!("{} already exists, left unchanged", UNIT_PATH);
    }

    println!();
    println!("Edit the config, then enable the service with:");
    println!("  systemctl enable --now {}", UNIT_NAME);
    Ok(())
}

pub fn clean(paths: &ConfigPaths, purge: bool) -> anyhow::Result<()> {
    require_root()?;

    if remove_if_present(Path::new(UNIT_PATH))? {
        println!("Removed {}", UNIT_PATH);
        daemon_reload()?;
    } else {
        println!("No unit file at {}", UNIT_PATH);
    }

    if purge {
        let state_path = match WatchdogConfig::load_from(paths) {
            Ok(config) => config.state_path(),
            Err(_) => paths.resolve(Path::new("usage.db")),
        };
        // WAL mode leaves sidecar files next to the database.
        for suffix in ["", "-wal", "-shm"] {
            let mut file = state_path.clone().into_os_string();
            file.push(suffix);
            if remove_if_present(Path::new(&file))? {
                println!("Removed {}", Path::new(&file).display());
            }
        }
    }
    Ok(())
}
