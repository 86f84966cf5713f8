//! Hotplug context configuration

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Configuration for a hotplug context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotplugConfig {
    /// Deliver hotplug events if the backend supports them.
    /// When false, registration fails with `NotSupported`.
    pub hotplug_enabled: bool,
    /// Maximum number of registered callbacks (None = unbounded)
    pub max_callbacks: Option<usize>,
    /// Warn when a single callback invocation runs longer than this (ms)
    pub slow_callback_warn_ms: u64,
}

impl Default for HotplugConfig {
    fn default() -> Self {
        Self {
            hotplug_enabled: true,
            max_callbacks: None,
            slow_callback_warn_ms: 100,
        }
    }
}

impl HotplugConfig {
    /// Parse a configuration from a JSON string
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HotplugConfig::default();
        assert!(config.hotplug_enabled);
        assert_eq!(config.max_callbacks, None);
        assert_eq!(config.slow_callback_warn_ms, 100);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = HotplugConfig::from_json(r#"{ "max_callbacks": 8 }"#).unwrap();
        assert_eq!(config.max_callbacks, Some(8));
        assert!(config.hotplug_enabled);
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            HotplugConfig::from_json("{ nope"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = HotplugConfig::load(Path::new("/nonexistent/hotplug.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
