//! Configuration file support for robolink.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (ROBOLINK_*)
//! 3. Local config file (./robolink.toml)
//! 4. Global config file (~/.config/robolink/config.toml)

use directories::ProjectDirs;
use log::{debug, warn};
use robolink::SessionConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the local configuration file.
pub const LOCAL_CONFIG: &str = "robolink.toml";

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyACM0" or "COM3").
    pub serial: Option<String>,
    /// Baud rate override.
    pub baud: Option<u32>,
}

/// Upload configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Default robot type (mbot2, spike).
    pub robot: Option<String>,
    /// mBot2 block size in bytes.
    pub block_size: Option<usize>,
    /// SPIKE Hub package size in characters.
    pub package_size: Option<usize>,
    /// Acknowledgment deadline in milliseconds.
    pub ack_timeout_ms: Option<u64>,
    /// Command round-trip deadline in milliseconds.
    pub response_timeout_ms: Option<u64>,
    /// Switch off the mBot2 REPL before uploading.
    #[serde(default)]
    pub quiet_repl: bool,
    /// Name reported for the robot.
    pub brick_name: Option<String>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection configuration.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Upload configuration.
    #[serde(default)]
    pub upload: UploadConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Local config overrides global
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
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
        ProjectDirs::from("", "", "robolink").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.connection.serial.is_some() {
            self.connection.serial = other.connection.serial;
        }
        if other.connection.baud.is_some() {
            self.connection.baud = other.connection.baud;
        }

        let upload = other.upload;
        if upload.robot.is_some() {
            self.upload.robot = upload.robot;
        }
        if upload.block_size.is_some() {
            self.upload.block_size = upload.block_size;
        }
        if upload.package_size.is_some() {
            self.upload.package_size = upload.package_size;
        }
        if upload.ack_timeout_ms.is_some() {
            self.upload.ack_timeout_ms = upload.ack_timeout_ms;
        }
        if upload.response_timeout_ms.is_some() {
            self.upload.response_timeout_ms = upload.response_timeout_ms;
        }
        if upload.quiet_repl {
            self.upload.quiet_repl = true;
        }
        if upload.brick_name.is_some() {
            self.upload.brick_name = upload.brick_name;
        }
    }

    /// Session settings with file values applied over the defaults.
    pub fn session_config(&self) -> SessionConfig {
        let mut session = SessionConfig::default().with_quiet_repl(self.upload.quiet_repl);
        if let Some(baud) = self.connection.baud {
            session = session.with_baud(baud);
        }
        if let Some(bytes) = self.upload.block_size {
            session = session.with_max_body_chunk(bytes);
        }
        if let Some(chars) = self.upload.package_size {
            session = session.with_max_package_chars(chars);
        }
        if let Some(ms) = self.upload.ack_timeout_ms {
            session = session.with_ack_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.upload.response_timeout_ms {
            session = session.with_response_timeout(Duration::from_millis(ms));
        }
        if let Some(name) = &self.upload.brick_name {
            session = session.with_brick_name(name.clone());
        }
        session
    }
}
