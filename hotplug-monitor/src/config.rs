//! Monitor configuration

use std::path::{Path, PathBuf};

use anyhow::Context;
use hotplug::{DeviceFilter, EventMask, HotplugConfig};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Monitor configuration, read from JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Settings for the hotplug context
    pub hotplug: HotplugConfig,
    /// Events to log
    pub events: EventMask,
    /// Only log devices matching this filter
    pub filter: DeviceFilter,
    /// Report devices already present at startup
    pub enumerate: bool,
    /// Serial port polling interval in milliseconds
    pub poll_interval_ms: u64,
    /// Skip ports whose name contains any of these
    pub skip_patterns: Vec<String>,
    /// Replay this scenario file instead of watching serial ports
    pub scenario: Option<PathBuf>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            hotplug: HotplugConfig::default(),
            events: EventMask::ALL,
            filter: DeviceFilter::ANY,
            enumerate: true,
            poll_interval_ms: 1000,
            skip_patterns: vec![
                // Bluetooth ports on macOS
                "Bluetooth".to_string(),
                "debug".to_string(),
            ],
            scenario: None,
        }
    }
}

impl MonitorConfig {
    /// Get the XDG config directory for the monitor
    /// Uses $XDG_CONFIG_HOME/hotplug-monitor, falls back to ~/.config/hotplug-monitor
    fn config_dir() -> Option<PathBuf> {
        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_config);
            if path.is_absolute() {
                return Some(path.join("hotplug-monitor"));
            }
        }

        dirs::home_dir().map(|h| h.join(".config").join("hotplug-monitor"))
    }

    /// Default config file path
    pub fn default_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("monitor.json"))
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("invalid monitor configuration")
    }

    /// Load configuration from a file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config = Self::from_json(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load from the default location, falling back to defaults if absent
    pub fn load_default() -> anyhow::Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => {
                debug!("No configuration file found; using defaults");
                Ok(Self::default())
            }
        }
    }
}
