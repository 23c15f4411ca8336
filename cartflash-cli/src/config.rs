//! Configuration file support for cartflash.
//!
//! Configuration is loaded with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (CARTFLASH_*)
//! 3. Local config file (./cartflash.toml)
//! 4. Global config file (~/.config/cartflash/config.toml)

use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Preferred serial port (e.g., "/dev/ttyACM0" or "COM3").
    pub port: Option<String>,
    /// Re-enumeration timeout in seconds.
    pub timeout_secs: Option<u64>,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global);
            }
        }

        // Local config overrides global
        if let Some(local) = Self::load_from_file(Path::new("cartflash.toml")) {
            debug!("Loaded local config from cartflash.toml");
            config.merge(local);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    fn merge(&mut self, other: Self) {
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.timeout_secs.is_some() {
            self.timeout_secs = other.timeout_secs;
        }
    }

    /// Path of the global config file, if a home directory exists.
    pub fn global_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "cartflash")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Persist this configuration to the global config file.
    pub fn save(&self) -> std::io::Result<()> {
        let Some(path) = Self::global_config_path() else {
            return Err(std::io::Error::other("no home directory"));
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        fs::write(&path, content)?;
        debug!("Saved config to {}", path.display());
        Ok(())
    }
}
