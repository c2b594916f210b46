//! Configuration management for aesdsocket

pub mod settings;

pub use settings::{LogFormat, LoggingSettings, ServerConfig, ServerSettings, StorageSettings};
