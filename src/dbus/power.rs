// SPDX-License-Identifier: GPL-3.0-only

use crate::configurator::ProjectionSink;
use anyhow::{Context, Result};
use tracing::{debug, warn};
use zbus::{blocking::Connection, proxy::CacheProperties};

#[zbus::proxy(
    interface = "org.chromium.PowerManager",
    default_service = "org.chromium.PowerManager",
    default_path = "/org/chromium/PowerManager"
)]
pub trait PowerManager {
    fn set_is_projecting(&self, is_projecting: bool) -> zbus::Result<()>;
}

/// Tells the power manager whether an internal panel is being mirrored or
/// extended, so it can adjust its idle and lid policies.
pub struct PowerManagerSink {
    proxy: PowerManagerProxyBlocking<'static>,
}

impl PowerManagerSink {
    pub fn new(service: &str, path: &str) -> Result<PowerManagerSink> {
        let conn = Connection::system().context("Failed to connect to system D-Bus")?;
        let proxy = PowerManagerProxyBlocking::builder(&conn)
            .destination(service.to_owned())?
            .path(path.to_owned())?
            .cache_properties(CacheProperties::No)
            .build()
            .with_context(|| format!("Failed to create proxy for {}", service))?;
        Ok(PowerManagerSink { proxy })
    }
}

impl ProjectionSink for PowerManagerSink {
    fn projecting_changed(&mut self, projecting: bool) {
        debug!(projecting, "Notifying power manager.");
        if let Err(err) = self.proxy.set_is_projecting(projecting) {
            warn!(?err, "Failed to notify power manager about projection state.");
        }
    }
}
