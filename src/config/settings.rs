//! Configuration structures for aesdsocket

use crate::{AesdError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Fixed TCP port the server listens on
pub const DEFAULT_PORT: u16 = 9000;

/// Receive and send chunk size in bytes
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 5;

/// Location of the shared append-only log
pub const DEFAULT_DATA_FILE: &str = "/var/tmp/aesdsocketdata";

/// Server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener settings
    pub server: ServerSettings,
    /// Log file settings
    pub storage: StorageSettings,
    /// Diagnostic sink settings
    pub logging: LoggingSettings,
}

/// Core server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Host to resolve the passive endpoint on
    pub bind_address: String,
    /// TCP port; 0 picks an ephemeral port
    pub port: u16,
    /// Listen backlog
    pub backlog: u32,
    /// Receive and send chunk size
    pub chunk_size: usize,
    /// Consecutive failed sends tolerated while replaying the log
    pub send_retries: u32,
}

/// Log file configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Path of the append-only log file
    pub data_file: PathBuf,
    /// Permission bits used when the file is created
    pub file_mode: u32,
    /// Remove the log file on graceful shutdown
    pub remove_on_shutdown: bool,
}

/// Diagnostic sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Forward diagnostics to the local syslog
    pub syslog: bool,
    /// Syslog identifier
    pub identifier: String,
    /// Console output format
    pub format: LogFormat,
}

/// Console output format for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            backlog: 100,
            chunk_size: DEFAULT_CHUNK_SIZE,
            send_retries: 5,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_file: PathBuf::from(DEFAULT_DATA_FILE),
            file_mode: 0o644,
            remove_on_shutdown: true,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            syslog: true,
            identifier: "aesdsocket".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl StorageSettings {
    /// Anchor a relative `data_file` at `base`. Needed before detaching,
    /// since the daemon changes its working directory to `/`.
    pub fn anchor_data_file(&mut self, base: &Path) {
        if self.data_file.is_relative() {
            self.data_file = base.join(&self.data_file);
        }
    }
}

impl ServerConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AesdError::Config(format!("Failed to read config file: {}", e)))?;

        let config: ServerConfig = toml::from_str(&content)?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.bind_address.is_empty() {
            return Err(AesdError::Config("Bind address cannot be empty".to_string()));
        }
        if self.server.chunk_size == 0 {
            return Err(AesdError::Config("Chunk size must be positive".to_string()));
        }
        if self.server.backlog == 0 {
            return Err(AesdError::Config("Backlog must be positive".to_string()));
        }
        if self.storage.data_file.as_os_str().is_empty() {
            return Err(AesdError::Config("Data file path cannot be empty".to_string()));
        }
        if self.logging.identifier.is_empty() {
            return Err(AesdError::Config("Syslog identifier cannot be empty".to_string()));
        }
        Ok(())
    }
}
