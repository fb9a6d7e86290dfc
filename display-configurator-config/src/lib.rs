// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};

/// Static configuration of the display-configurator daemon.
///
/// Every field has a default, so an empty `()` file is a valid configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ConfiguratorConfig {
    /// Force a backend instead of auto-detecting it.
    pub backend: Option<BackendKind>,
    /// Gap in pixels between two extended outputs stacked on top of each other.
    pub vertical_gap: u32,
    /// Pixel density above which an output is treated as high-density.
    pub high_dpi_threshold: f64,
    /// Preferred layout when two outputs get connected.
    pub initial_state: Option<DualState>,
    pub power_manager: PowerManagerConfig,
    pub inhibit_lid_when_projecting: bool,
}

impl Default for ConfiguratorConfig {
    fn default() -> ConfiguratorConfig {
        ConfiguratorConfig {
            backend: None,
            vertical_gap: 30,
            high_dpi_threshold: 160.0,
            initial_state: None,
            power_manager: PowerManagerConfig::default(),
            inhibit_lid_when_projecting: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Kms,
    X11,
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kms" => Ok(BackendKind::Kms),
            "x11" => Ok(BackendKind::X11),
            other => Err(format!("There is no backend with identifier {:?}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DualState {
    Mirror,
    PrimaryOnly,
    SecondaryOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PowerManagerConfig {
    pub enabled: bool,
    pub service: String,
    pub path: String,
}

impl Default for PowerManagerConfig {
    fn default() -> PowerManagerConfig {
        PowerManagerConfig {
            enabled: true,
            service: String::from("org.chromium.PowerManager"),
            path: String::from("/org/chromium/PowerManager"),
        }
    }
}

pub fn from_str(config: &str) -> Result<ConfiguratorConfig, ron::error::SpannedError> {
    ron::from_str(config)
}
