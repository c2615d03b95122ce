//! Configuration management for bus-mgr

mod bus;
pub mod serde_utils;

pub use bus::{default_bus_address, BusConfig, BUS_ADDRESS_ENV};

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

/// Directory holding bus-mgr configuration, e.g. `~/.config/bus-mgr`
pub fn default_config_dir() -> PathBuf {
    match dirs::config_dir() {
        Some(dir) => dir.join("bus-mgr"),
        None => PathBuf::from("bus-mgr"),
    }
}

/// `config.toml` inside [`default_config_dir`]
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Read a TOML configuration file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::NotFound(path.to_path_buf()))
        }
        Err(e) => {
            return Err(ConfigError::Invalid(format!(
                "Cannot read {}: {}",
                path.display(),
                e
            )))
        }
    };

    Ok(toml::from_str(&content)?)
}

/// Write `config` as TOML, creating parent directories.
///
/// The file is written next to `path` first and then renamed over it, so a
/// reader never sees a half-written config.
pub fn save_config<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;
    let io_error = |what: &str, e: std::io::Error| {
        ConfigError::Invalid(format!("Cannot {} {}: {}", what, path.display(), e))
    };

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| io_error("create directory for", e))?;
    }

    let staging = path.with_extension("toml.tmp");
    std::fs::write(&staging, content).map_err(|e| io_error("write", e))?;
    std::fs::rename(&staging, path).map_err(|e| io_error("replace", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_load_missing_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        let result: Result<BusConfig, _> = load_config(&path);
        assert!(matches!(result, Err(ConfigError::NotFound(p)) if p == path));
    }

    #[test]
    fn test_save_then_load_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = BusConfig {
            bus_address: Some("tcp:addr=10.0.0.2,port=9955".to_string()),
            interrupt_poll_interval: Duration::from_millis(250),
            ..BusConfig::default()
        };
        save_config(&path, &config).unwrap();

        let loaded: BusConfig = load_config(&path).unwrap();
        assert_eq!(loaded.bus_address.as_deref(), Some("tcp:addr=10.0.0.2,port=9955"));
        assert_eq!(loaded.interrupt_poll_interval, Duration::from_millis(250));
        assert_eq!(loaded.session_port, config.session_port);
    }

    #[test]
    fn test_save_replaces_existing_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "bus_address = \"null:\"").unwrap();

        save_config(&path, &BusConfig::default()).unwrap();

        let loaded: BusConfig = load_config(&path).unwrap();
        assert!(loaded.bus_address.is_none());
        assert!(!path.with_extension("toml.tmp").exists());
    }

    #[test]
    fn test_load_malformed_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "session_port = \"not a number\"").unwrap();

        let result: Result<BusConfig, _> = load_config(&path);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
