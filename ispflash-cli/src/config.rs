//! Configuration file support for ispflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (ISPFLASH_*)
//! 3. Local config file (./ispflash.toml)
//! 4. Global config file (~/.config/ispflash/config.toml)

use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the local configuration file.
pub const LOCAL_CONFIG_FILE: &str = "ispflash.toml";

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub port: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
}

/// Flash configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlashConfig {
    /// Default firmware file for `flash`.
    pub firmware: Option<PathBuf>,
    /// First sector to erase.
    pub first_sector: Option<u32>,
    /// Last sector to erase.
    pub last_sector: Option<u32>,
    /// Do not wait for a manual device reset.
    #[serde(default)]
    pub skip_reset_prompt: bool,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection configuration.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Flash configuration.
    #[serde(default)]
    pub flash: FlashConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
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

    /// Load configuration from a specific file.
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

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "ispflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.connection.port.is_some() {
            self.connection.port = other.connection.port;
        }
        if other.connection.baud.is_some() {
            self.connection.baud = other.connection.baud;
        }

        if other.flash.firmware.is_some() {
            self.flash.firmware = other.flash.firmware;
        }
        if other.flash.first_sector.is_some() {
            self.flash.first_sector = other.flash.first_sector;
        }
        if other.flash.last_sector.is_some() {
            self.flash.last_sector = other.flash.last_sector;
        }
        if other.flash.skip_reset_prompt {
            self.flash.skip_reset_prompt = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---- Default values ----

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.connection.port.is_none());
        assert!(config.connection.baud.is_none());
        assert!(config.flash.firmware.is_none());
        assert!(config.flash.first_sector.is_none());
        assert!(config.flash.last_sector.is_none());
        assert!(!config.flash.skip_reset_prompt);
    }

    // ---- Config merge ----

    #[test]
    fn test_config_merge_overrides_set_fields() {
        let mut base = Config::default();
        base.connection.port = Some("/dev/ttyUSB0".to_string());
        base.connection.baud = Some(9600);

        let mut other = Config::default();
        other.connection.port = Some("COM3".to_string());
        other.flash.last_sector = Some(15);

        base.merge(other);
        assert_eq!(base.connection.port.as_deref(), Some("COM3"));
        assert_eq!(base.connection.baud, Some(9600));
        assert_eq!(base.flash.last_sector, Some(15));
        assert!(base.flash.first_sector.is_none());
    }

    #[test]
    fn test_config_merge_keeps_skip_reset_prompt() {
        let mut base = Config::default();
        base.flash.skip_reset_prompt = true;
        base.merge(Config::default());
        assert!(base.flash.skip_reset_prompt);
    }

    // ---- TOML parsing ----

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
[connection]
port = "/dev/ttyACM0"
baud = 57600

[flash]
firmware = "build/app.hex"
first_sector = 0
last_sector = 17
skip_reset_prompt = true
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.connection.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(config.connection.baud, Some(57600));
        assert_eq!(
            config.flash.firmware.as_deref(),
            Some(Path::new("build/app.hex"))
        );
        assert_eq!(config.flash.first_sector, Some(0));
        assert_eq!(config.flash.last_sector, Some(17));
        assert!(config.flash.skip_reset_prompt);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: Config = toml::from_str("[connection]\nbaud = 115200\n").unwrap();
        assert_eq!(config.connection.baud, Some(115200));
        assert!(config.connection.port.is_none());
        assert!(!config.flash.skip_reset_prompt);
    }

    #[test]
    fn test_parse_empty_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.connection.port.is_none());
    }

    // ---- File loading ----

    #[test]
    fn test_load_from_file_missing_is_none() {
        assert!(Config::load_from_file(Path::new("/nonexistent/ispflash.toml")).is_none());
    }

    #[test]
    fn test_load_from_file_invalid_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "invalid toml [[[").unwrap();
        assert!(Config::load_from_file(&path).is_none());
    }

    #[test]
    fn test_load_from_path_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[flash]\nlast_sector = \"many\"\n").unwrap();
        let config = Config::load_from_path(&path);
        assert!(config.flash.last_sector.is_none());
    }

    #[test]
    fn test_load_from_path_reads_valid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(&path, "[connection]\nport = \"COM7\"\n").unwrap();
        let config = Config::load_from_path(&path);
        assert_eq!(config.connection.port.as_deref(), Some("COM7"));
    }

    #[test]
    fn test_global_config_path_is_config_toml() {
        if let Some(path) = Config::global_config_path() {
            assert_eq!(path.file_name().unwrap(), "config.toml");
        }
    }
}
