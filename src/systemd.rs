// SPDX-License-Identifier: GPL-3.0-only

use crate::configurator::DisplayState;
use libsystemd::daemon::{booted, notify, NotifyState};
use tracing::error;

pub fn ready(state: DisplayState) {
    if booted() {
        if let Err(err) = notify(
            false,
            &[
                NotifyState::Ready,
                NotifyState::Status(format!("Outputs configured: {}", state)),
            ],
        ) {
            error!(?err, "Failed to notify systemd");
        }
    }
}

pub fn status(state: DisplayState) {
    if booted() {
        if let Err(err) = notify(false, &[NotifyState::Status(format!("Outputs configured: {}", state))]) {
            error!(?err, "Failed to update systemd status");
        }
    }
}
