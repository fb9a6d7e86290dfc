// SPDX-License-Identifier: GPL-3.0-only

use crate::configurator::ConfiguratorOptions;
use anyhow::{Context, Result};
use display_configurator_config::{BackendKind, ConfiguratorConfig};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const BACKEND_VAR: &str = "DISPLAY_CONFIGURATOR_BACKEND";
pub const NO_DBUS_VAR: &str = "DISPLAY_CONFIGURATOR_NO_DBUS";

#[derive(Debug, Clone)]
pub struct Config {
    pub static_conf: ConfiguratorConfig,
    /// File the configuration was read from, if any.
    pub path: Option<PathBuf>,
    backend_override: Option<BackendKind>,
    dbus_disabled: bool,
}

pub fn bool_var(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?.to_lowercase();
    Some(["1", "true", "yes", "y"].contains(&value.as_str()))
}

fn backend_var() -> Result<Option<BackendKind>> {
    match std::env::var(BACKEND_VAR) {
        Ok(value) => value
            .parse::<BackendKind>()
            .map(Some)
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("Invalid {}", BACKEND_VAR)),
        Err(_) => Ok(None),
    }
}

impl Config {
    pub fn new(static_conf: ConfiguratorConfig) -> Config {
        Config {
            static_conf,
            path: None,
            backend_override: None,
            dbus_disabled: false,
        }
    }

    pub fn load() -> Result<Config> {
        let xdg = xdg::BaseDirectories::new().ok();
        let (path, static_conf) = Self::load_static(xdg.as_ref())?;

        Ok(Config {
            static_conf,
            path,
            backend_override: backend_var()?,
            dbus_disabled: bool_var(NO_DBUS_VAR).unwrap_or(false),
        })
    }

    fn locations(xdg: Option<&xdg::BaseDirectories>) -> Vec<PathBuf> {
        let mut locations = if let Some(base) = xdg {
            vec![
                base.get_config_file("display-configurator.ron"),
                base.get_config_file("display-configurator/config.ron"),
            ]
        } else {
            Vec::with_capacity(2)
        };
        if cfg!(debug_assertions) {
            if let Ok(mut cwd) = std::env::current_dir() {
                cwd.push("config.ron");
                locations.push(cwd);
            }
        }
        locations.push(PathBuf::from("/etc/display-configurator/config.ron"));
        locations
    }

    fn load_static(
        xdg: Option<&xdg::BaseDirectories>,
    ) -> Result<(Option<PathBuf>, ConfiguratorConfig)> {
        for path in Self::locations(xdg) {
            debug!("Trying config location: {}", path.display());
            if path.exists() {
                info!("Using config at {}", path.display());
                let config = read_config(&path)?;
                return Ok((Some(path), config));
            }
        }

        info!("No config file found, using defaults.");
        Ok((None, ConfiguratorConfig::default()))
    }

    /// Backend requested through the environment or the config file.
    pub fn backend(&self) -> Option<BackendKind> {
        self.backend_override.or(self.static_conf.backend)
    }

    pub fn dbus_enabled(&self) -> bool {
        !self.dbus_disabled
    }

    pub fn options(&self) -> ConfiguratorOptions {
        ConfiguratorOptions {
            vertical_gap: self.static_conf.vertical_gap,
            high_dpi_threshold: self.static_conf.high_dpi_threshold,
            preferred_dual_state: self.static_conf.initial_state.map(Into::into),
        }
    }
}

fn read_config(path: &Path) -> Result<ConfiguratorConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    display_configurator_config::from_str(&content)
        .with_context(|| format!("Malformed config file {}", path.display()))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::configurator::DisplayState;
    use display_configurator_config::DualState;

    #[test]
    fn options_follow_config() {
        let config = Config::new(ConfiguratorConfig {
            vertical_gap: 12,
            high_dpi_threshold: 200.0,
            initial_state: Some(DualState::SecondaryOnly),
            ..Default::default()
        });

        let options = config.options();
        assert_eq!(options.vertical_gap, 12);
        assert_eq!(options.high_dpi_threshold, 200.0);
        assert_eq!(
            options.preferred_dual_state,
            Some(DisplayState::DualSecondaryOnly)
        );
        assert_eq!(Config::new(Default::default()).options(), ConfiguratorOptions::default());
    }

    #[test]
    fn backend_override_wins() {
        let mut config = Config::new(ConfiguratorConfig {
            backend: Some(BackendKind::X11),
            ..Default::default()
        });
        assert_eq!(config.backend(), Some(BackendKind::X11));

        config.backend_override = Some(BackendKind::Kms);
        assert_eq!(config.backend(), Some(BackendKind::Kms));
        assert_eq!(Config::new(Default::default()).backend(), None);
    }

    #[test]
    fn reads_config_files() {
        let dir = std::env::temp_dir().join(format!("display-configurator-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let good = dir.join("good.ron");
        std::fs::write(&good, "(vertical_gap: 42, backend: Some(kms))").unwrap();
        let config = read_config(&good).unwrap();
        assert_eq!(config.vertical_gap, 42);
        assert_eq!(config.backend, Some(BackendKind::Kms));

        let bad = dir.join("bad.ron");
        std::fs::write(&bad, "(vertical_gap: -1").unwrap();
        assert!(read_config(&bad).is_err());
        assert!(read_config(&dir.join("missing.ron")).is_err());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn bool_vars() {
        std::env::set_var("DISPLAY_CONFIGURATOR_TEST_BOOL", "Yes");
        assert_eq!(bool_var("DISPLAY_CONFIGURATOR_TEST_BOOL"), Some(true));
        std::env::set_var("DISPLAY_CONFIGURATOR_TEST_BOOL", "0");
        assert_eq!(bool_var("DISPLAY_CONFIGURATOR_TEST_BOOL"), Some(false));
        std::env::remove_var("DISPLAY_CONFIGURATOR_TEST_BOOL");
        assert_eq!(bool_var("DISPLAY_CONFIGURATOR_TEST_BOOL"), None);
    }
}
