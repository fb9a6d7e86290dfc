// SPDX-License-Identifier: GPL-3.0-only

use crate::configurator::ProjectionSink;
use logind_zbus::manager::{InhibitType::HandleLidSwitch, ManagerProxyBlocking};
use std::os::fd::OwnedFd;
use tracing::{debug, warn};
use zbus::blocking::Connection;

pub fn inhibit_lid() -> anyhow::Result<OwnedFd> {
    let conn = Connection::system()?;
    let proxy = ManagerProxyBlocking::new(&conn)?;
    let fd = proxy.inhibit(
        HandleLidSwitch,
        "display-configurator",
        "External output connected",
        "block",
    )?;

    Ok(fd.into())
}

/// Keeps the machine awake with the lid closed while projecting.
#[derive(Debug, Default)]
pub struct LidInhibitSink {
    inhibitor: Option<OwnedFd>,
}

impl ProjectionSink for LidInhibitSink {
    fn projecting_changed(&mut self, projecting: bool) {
        if !projecting {
            if self.inhibitor.take().is_some() {
                debug!("Released lid switch inhibitor.");
            }
            return;
        }
        if self.inhibitor.is_some() {
            return;
        }

        match inhibit_lid() {
            Ok(fd) => {
                debug!("Inhibiting lid switch while projecting.");
                self.inhibitor = Some(fd);
            }
            Err(err) => warn!(?err, "Failed to inhibit lid switch."),
        }
    }
}
