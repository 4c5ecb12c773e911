//! Configuration management for the chat worker
//!
//! Supports loading configuration from:
//! - TOML files
//! - Environment variables (`CHAT_WORKER_` prefix, `__` nesting)
//! - Runtime overrides (per-request `rag` payload, applied in the pipeline)

pub mod constants;
pub mod logging;
pub mod settings;

pub use logging::init_tracing;
pub use settings::{
    load_settings, CompressSettings, ObservabilityConfig, RagSettings, RerankSettings, SearchType,
    Settings,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
