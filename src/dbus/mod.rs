// SPDX-License-Identifier: GPL-3.0-only

use crate::{config::Config, configurator::ProjectionSink};
use tracing::info;

#[cfg(feature = "systemd")]
pub mod logind;
pub mod power;

/// Connects every enabled projection sink, skipping those whose service is unreachable.
pub fn init(config: &Config) -> Vec<Box<dyn ProjectionSink>> {
    let mut sinks: Vec<Box<dyn ProjectionSink>> = Vec::new();
    if !config.dbus_enabled() {
        info!("D-Bus notifications disabled.");
        return sinks;
    }

    let power_manager = &config.static_conf.power_manager;
    if power_manager.enabled {
        match power::PowerManagerSink::new(&power_manager.service, &power_manager.path) {
            Ok(sink) => sinks.push(Box::new(sink)),
            Err(err) => info!(?err, "Failed to connect to {}", power_manager.service),
        }
    }

    #[cfg(feature = "systemd")]
    if config.static_conf.inhibit_lid_when_projecting {
        sinks.push(Box::new(logind::LidInhibitSink::default()));
    }

    sinks
}
