//! Configuration file location and session settings.
//!
//! `playctl.json` holds [`SessionConfig`]. A missing file means defaults;
//! a malformed one is an error.

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::player::SessionOptions;
use crate::core::runtime::{RuntimeOptions, DEFAULT_ENGINE_ARGS};

/// Session config file name
pub const CONFIG_FILE: &str = "playctl.json";

/// Log file name used when `--log` has no explicit path
pub const LOG_FILE: &str = "playctl.log";

/// Environment override for the config directory
pub const CONFIG_DIR_ENV: &str = "PLAYCTL_CONFIG_DIR";

/// Configuration for overriding default application paths
#[derive(Debug, Clone)]
pub struct PathConfig {
    /// Custom config directory (from CLI or ENV)
    pub config_dir: Option<PathBuf>,
}

impl PathConfig {
    /// Priority: CLI args → ENV var (PLAYCTL_CONFIG_DIR) → None (use defaults)
    pub fn from_env_and_cli(cli_dir: Option<PathBuf>) -> Self {
        let config_dir = cli_dir.or_else(|| std::env::var(CONFIG_DIR_ENV).ok().map(PathBuf::from));
        Self { config_dir }
    }
}

/// Get path to a configuration file
///
/// Priority:
/// 1. CLI --config-dir argument
/// 2. PLAYCTL_CONFIG_DIR environment variable
/// 3. Local folder IF playctl.json or playctl.log exists there
/// 4. Platform-specific config directory from dirs-next (default)
pub fn config_file(name: &str, config: &PathConfig) -> PathBuf {
    config_dir(config).join(name)
}

/// Get path to a data file (logs, snapshots). Same priority as [`config_file`].
pub fn data_file(name: &str, config: &PathConfig) -> PathBuf {
    data_dir(config).join(name)
}

/// Create config and data directories if missing
pub fn ensure_dirs(config: &PathConfig) -> Result<()> {
    let config_dir = config_dir(config);
    let data_dir = data_dir(config);

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create config directory: {}", config_dir.display()))?;
    }

    if data_dir != config_dir && !data_dir.exists() {
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;
    }

    Ok(())
}

fn has_local_config_files(dir: &Path) -> bool {
    [CONFIG_FILE, LOG_FILE].iter().any(|f| dir.join(f).exists())
}

fn local_dir() -> Option<PathBuf> {
    std::env::current_dir().ok().filter(|dir| has_local_config_files(dir))
}

fn config_dir(config: &PathConfig) -> PathBuf {
    if let Some(dir) = &config.config_dir {
        return dir.clone();
    }
    if let Some(dir) = local_dir() {
        return dir;
    }
    dirs_next::config_dir()
        .map(|dir| dir.join("playctl"))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn data_dir(config: &PathConfig) -> PathBuf {
    if let Some(dir) = &config.config_dir {
        return dir.clone();
    }
    if let Some(dir) = local_dir() {
        return dir;
    }
    dirs_next::data_dir()
        .map(|dir| dir.join("playctl"))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Persisted session settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub buffering_timeout_ms: u64,
    pub snapshot_timeout_ms: u64,
    pub boundary_workers: usize,
    /// Flags for the native engine library
    pub engine_args: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            buffering_timeout_ms: 5000,
            snapshot_timeout_ms: 1000,
            boundary_workers: 1,
            engine_args: DEFAULT_ENGINE_ARGS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl SessionConfig {
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            buffering_timeout: Duration::from_millis(self.buffering_timeout_ms),
            snapshot_timeout: Duration::from_millis(self.snapshot_timeout_ms),
            boundary_workers: self.boundary_workers.max(1),
        }
    }

    pub fn runtime_options(&self) -> RuntimeOptions {
        RuntimeOptions {
            engine_args: self.engine_args.clone(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize session config")?;
        std::fs::write(path, json).with_context(|| format!("Failed to write config: {}", path.display()))
    }
}

/// Read `playctl.json` from the resolved config directory, defaults if absent
pub fn load_config(paths: &PathConfig) -> Result<SessionConfig> {
    load_config_from(&config_file(CONFIG_FILE, paths))
}

pub fn load_config_from(path: &Path) -> Result<SessionConfig> {
    if !path.exists() {
        debug!("No config at {}, using defaults", path.display());
        return Ok(SessionConfig::default());
    }
    let raw = std::fs::read_to_string(path).with_context(|| format!("Failed to read config: {}", path.display()))?;
    let config: SessionConfig =
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse config: {}", path.display()))?;
    info!("Loaded config from {}", path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_file_with_custom_dir() {
        let config = PathConfig {
            config_dir: Some(PathBuf::from("/custom")),
        };
        assert_eq!(config_file("test.json", &config), PathBuf::from("/custom/test.json"));
        assert_eq!(data_file("playctl.log", &config), PathBuf::from("/custom/playctl.log"));
    }

    #[test]
    fn test_cli_dir_wins_over_env() {
        let config = PathConfig::from_env_and_cli(Some(PathBuf::from("/from-cli")));
        assert_eq!(config.config_dir, Some(PathBuf::from("/from-cli")));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config, SessionConfig::default());
        assert_eq!(config.session_options(), SessionOptions::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, r#"{ "snapshot_timeout_ms": 250, "boundary_workers": 0 }"#).unwrap();

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.snapshot_timeout_ms, 250);
        assert_eq!(config.buffering_timeout_ms, 5000);

        let options = config.session_options();
        assert_eq!(options.snapshot_timeout, Duration::from_millis(250));
        assert_eq!(options.boundary_workers, 1);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let paths = PathConfig {
            config_dir: Some(dir.path().to_path_buf()),
        };
        let config = SessionConfig {
            engine_args: vec!["--no-osd".into()],
            ..SessionConfig::default()
        };
        config.save(&config_file(CONFIG_FILE, &paths)).unwrap();
        assert_eq!(load_config(&paths).unwrap(), config);
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "{ not json").unwrap();
        let err = load_config_from(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse config"));
    }
}
