// SPDX-License-Identifier: GPL-3.0-only

use crate::{
    config::Config,
    configurator::OutputConfigurator,
    state::{BackendData, State},
};

use anyhow::{Context, Result};
use smithay::{
    backend::{
        drm::DrmDeviceFd,
        session::{libseat::LibSeatSession, Event as SessionEvent, Session},
        udev::{primary_gpu, UdevBackend, UdevEvent},
    },
    reexports::{calloop::LoopHandle, rustix::fs::OFlags},
    utils::DeviceFd,
};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, trace, warn};

mod device;
mod drm_helpers;
pub use device::KmsDevice;

#[derive(Debug)]
pub struct KmsState {
    pub configurator: OutputConfigurator<KmsDevice>,
    pub session: LibSeatSession,
    pub dev_id: libc::dev_t,
}

pub fn init_backend(evlh: &LoopHandle<'static, State>, config: &Config) -> Result<BackendData> {
    // establish session
    let (mut session, notifier) = LibSeatSession::new().context("Failed to acquire session")?;

    let udev_backend =
        UdevBackend::new(session.seat()).context("Failed to initialize udev connection")?;
    let (dev_id, path) = select_device(&udev_backend, &session.seat())?;

    let fd = session
        .open(
            &path,
            OFlags::RDWR | OFlags::CLOEXEC | OFlags::NOCTTY | OFlags::NONBLOCK,
        )
        .with_context(|| {
            format!(
                "Failed to optain file descriptor for drm device: {}",
                path.display()
            )
        })?;
    let drm = DrmDeviceFd::new(DeviceFd::from(fd));
    info!("Using {} for output configuration.", path.display());

    // watch for connector changes
    evlh.insert_source(udev_backend, move |event, _, state: &mut State| match event {
        UdevEvent::Changed { device_id } => {
            if matches!(&state.backend, BackendData::Kms(kms) if kms.dev_id == device_id) {
                state.handle_hotplug();
            } else {
                trace!(device_id, "Ignoring change of unused drm device.");
            }
        }
        UdevEvent::Added { device_id, path } => {
            debug!(device_id, path = %path.display(), "Drm device added, not using it.");
        }
        UdevEvent::Removed { device_id } => {
            if matches!(&state.backend, BackendData::Kms(kms) if kms.dev_id == device_id) {
                error!("Drm device in use was removed.");
                state.loop_signal.stop();
            }
        }
    })
    .map_err(|err| err.error)
    .context("Failed to register udev event source")?;

    // handle session events
    evlh.insert_source(notifier, move |event, &mut (), state| match event {
        SessionEvent::ActivateSession => state.resume_session(),
        SessionEvent::PauseSession => state.pause_session(),
    })
    .map_err(|err| err.error)
    .context("Failed to initialize session event source")?;

    Ok(BackendData::Kms(KmsState {
        configurator: OutputConfigurator::new(
            KmsDevice::new(drm, path),
            Vec::new(),
            config.options(),
        ),
        session,
        dev_id,
    }))
}

/// The boot gpu of the seat, or the first card udev knows about.
fn select_device(udev: &UdevBackend, seat: &str) -> Result<(libc::dev_t, PathBuf)> {
    let primary = match primary_gpu(seat) {
        Ok(primary) => primary,
        Err(err) => {
            warn!(?err, "Failed to determine boot gpu.");
            None
        }
    };

    let devices = udev
        .device_list()
        .map(|(dev_id, path)| (dev_id, path.to_path_buf()))
        .collect::<Vec<_>>();
    if let Some(primary) = primary.as_deref() {
        if let Some(device) = devices.iter().find(|(_, path)| path.as_path() == primary) {
            return Ok(device.clone());
        }
    }

    devices
        .into_iter()
        .next()
        .with_context(|| format!("No drm device found on {}", seat))
}

impl KmsState {
    pub fn device_path(&self) -> &Path {
        self.configurator.backend().path()
    }
}

impl State {
    pub(crate) fn resume_session(&mut self) {
        let BackendData::Kms(kms) = &mut self.backend else {
            return;
        };

        info!(device = %kms.device_path().display(), "Session activated, restoring outputs.");
        if let Err(err) = kms.configurator.resume() {
            error!(?err, "Failed to restore output configuration.");
        }
    }

    pub(crate) fn pause_session(&mut self) {
        if let BackendData::Kms(kms) = &self.backend {
            info!(device = %kms.device_path().display(), "Session paused.");
        }
    }
}
