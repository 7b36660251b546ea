use std::path::{Path, PathBuf};

/// Environment variable overriding the configuration file location.
pub const CONFIG_ENV: &str = "TRAFFICWATCH_CONFIG";

const SYSTEM_CONFIG_DIR: &str = "/etc/trafficwatch";
const CONFIG_FILE_NAME: &str = "config.toml";

/// Locates the configuration file and the files resolved relative to it.
///
/// Use `ConfigPaths::new()` for production (honours `TRAFFICWATCH_CONFIG`,
/// otherwise `/etc/trafficwatch/config.toml`), or `ConfigPaths::with_base()`
/// for testing with an isolated directory.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    base: PathBuf,
    config_file: PathBuf,
}

impl ConfigPaths {
    pub fn new() -> Self {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) if !path.is_empty() => Self::from_config_file(PathBuf::from(path)),
            _ => Self::with_base(PathBuf::from(SYSTEM_CONFIG_DIR)),
        }
    }

    /// Paths rooted at a custom base directory (useful for tests).
    pub fn with_base(base: PathBuf) -> Self {
        let config_file = base.join(CONFIG_FILE_NAME);
        Self { base, config_file }
    }

    /// Paths for an explicit config file; relative files resolve next to it.
    pub fn from_config_file(config_file: PathBuf) -> Self {
        let base = match config_file.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Self { base, config_file }
    }

    pub fn config_dir(&self) -> &Path {
        &self.base
    }

    pub fn config_path(&self) -> &Path {
        &self.config_file
    }

    /// Resolves `path` against the config directory unless it is absolute.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base.join(path)
        }
    }

    /// Ensure the config directory exists, creating it if necessary.
    pub fn ensure_config_dir(&self) -> anyhow::Result<PathBuf> {
        if !self.base.exists() {
            std::fs::create_dir_all(&self.base)?;
        }
        Ok(self.base.clone())
    }
}

impl Default for ConfigPaths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_base_places_config_inside_base() {
        let paths = ConfigPaths::with_base(PathBuf::from("/tmp/tw"));
        assert_eq!(paths.config_dir(), Path::new("/tmp/tw"));
        assert_eq!(paths.config_path(), Path::new("/tmp/tw/config.toml"));
    }

    #[test]
    fn explicit_config_file_uses_its_directory() {
        let paths = ConfigPaths::from_config_file(PathBuf::from("/opt/tw/custom.toml"));
        assert_eq!(paths.config_dir(), Path::new("/opt/tw"));
        assert_eq!(paths.config_path(), Path::new("/opt/tw/custom.toml"));
    }

    #[test]
    fn bare_file_name_resolves_against_cwd() {
        let paths = ConfigPaths::from_config_file(PathBuf::from("config.toml"));
        assert_eq!(paths.config_dir(), Path::new("."));
    }

    #[test]
    fn resolve_keeps_absolute_and_joins_relative() {
        let paths = ConfigPaths::with_base(PathBuf::from("/etc/trafficwatch"));
        assert_eq!(
            paths.resolve(Path::new("usage.db")),
            PathBuf::from("/etc/trafficwatch/usage.db")
        );
        assert_eq!(
            paths.resolve(Path::new("/var/lib/tw/usage.db")),
            PathBuf::from("/var/lib/tw/usage.db")
        );
    }

    #[test]
    fn ensure_config_dir_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("nested").join("config");
        let paths = ConfigPaths::with_base(base.clone());

        assert!(!base.exists());
        let result = paths.ensure_config_dir().unwrap();
        assert_eq!(result, base);
        assert!(base.exists());
        paths.ensure_config_dir().unwrap();
    }
}
