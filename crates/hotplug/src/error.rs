//! Error types for hotplug registration and configuration

use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by callback registration
///
/// Only `register` can fail. Deregistration and dispatch have no error
/// channel.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HotplugError {
    /// The platform (or configuration) does not provide hotplug events
    #[error("hotplug is not supported on this platform")]
    NotSupported,

    /// A filter value was out of range or no callback was supplied
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    /// The callback record could not be allocated
    #[error("out of memory allocating callback record")]
    NoMem,
}

/// Errors that can occur while loading a configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the file
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File contents were not valid JSON for this config
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}
