// SPDX-License-Identifier: GPL-3.0-only

use super::drm_helpers::{
    interface_name, is_internal_interface, mode_dimensions, possible_crtcs, preferred_mode,
};
use crate::backend::{io_err, BackendError, CrtcState, DisplayMode, OutputBackend};
use smithay::{
    backend::drm::DrmDeviceFd,
    reexports::drm::{
        buffer::DrmFourcc,
        control::{
            connector::{self, State as ConnectorState},
            crtc,
            dumbbuffer::DumbBuffer,
            framebuffer, Device as ControlDevice, Mode,
        },
    },
};
use std::{collections::HashMap, fmt, path::PathBuf};
use tracing::{debug, trace, warn};

impl DisplayMode for Mode {
    fn dimensions(&self) -> (u32, u32) {
        mode_dimensions(self)
    }
}

/// Mode-setting on a single drm card using legacy SETCRTC and dumb buffers.
pub struct KmsDevice {
    drm: DrmDeviceFd,
    path: PathBuf,
    dumb_buffers: HashMap<framebuffer::Handle, DumbBuffer>,
}

impl fmt::Debug for KmsDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KmsDevice")
            .field("path", &self.path)
            .field("framebuffers", &self.dumb_buffers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl KmsDevice {
    pub fn new(drm: DrmDeviceFd, path: PathBuf) -> KmsDevice {
        KmsDevice {
            drm,
            path,
            dumb_buffers: HashMap::new(),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn connector_info(&self, conn: connector::Handle) -> Result<connector::Info, BackendError> {
        self.drm
            .get_connector(conn, false)
            .map_err(io_err("get connector"))
    }
}

impl OutputBackend for KmsDevice {
    type Output = connector::Handle;
    type Crtc = crtc::Handle;
    type Framebuffer = framebuffer::Handle;
    type Mode = Mode;

    fn outputs(&self) -> Result<Vec<connector::Handle>, BackendError> {
        Ok(self
            .drm
            .resource_handles()
            .map_err(io_err("get resources"))?
            .connectors()
            .to_vec())
    }

    fn is_connected(&self, output: connector::Handle) -> Result<bool, BackendError> {
        Ok(self.connector_info(output)?.state() == ConnectorState::Connected)
    }

    fn preferred_mode(&self, output: connector::Handle) -> Result<Option<Mode>, BackendError> {
        Ok(preferred_mode(&self.connector_info(output)?))
    }

    fn available_modes(&self, output: connector::Handle) -> Result<Vec<Mode>, BackendError> {
        let mut modes = self.connector_info(output)?.modes().to_vec();
        // stable, so the driver's refresh ordering survives within one size
        modes.sort_by(|a, b| mode_dimensions(b).cmp(&mode_dimensions(a)));
        Ok(modes)
    }

    fn is_internal(&self, output: connector::Handle) -> Result<bool, BackendError> {
        Ok(is_internal_interface(self.connector_info(output)?.interface()))
    }

    fn physical_size(&self, output: connector::Handle) -> Result<(u32, u32), BackendError> {
        Ok(self.connector_info(output)?.size().unwrap_or((0, 0)))
    }

    fn crtcs_for_output(&self, output: connector::Handle) -> Result<Vec<crtc::Handle>, BackendError> {
        possible_crtcs(&self.drm, output).map_err(io_err("get encoders"))
    }

    fn crtc_state(
        &self,
        crtc: crtc::Handle,
    ) -> Result<CrtcState<framebuffer::Handle, Mode>, BackendError> {
        let info = self.drm.get_crtc(crtc).map_err(io_err("get crtc"))?;
        Ok(CrtcState {
            position: info.position(),
            framebuffer: info.framebuffer(),
            mode: info.mode(),
        })
    }

    fn set_crtc(
        &mut self,
        crtc: crtc::Handle,
        position: (u32, u32),
        framebuffer: framebuffer::Handle,
        mode: Mode,
        output: connector::Handle,
    ) -> Result<(), BackendError> {
        debug!(
            ?crtc,
            connector = interface_name(&self.drm, output).unwrap_or_else(|_| format!("{:?}", output)),
            ?position,
            mode = ?mode_dimensions(&mode),
            "Setting crtc"
        );
        self.drm
            .set_crtc(crtc, Some(framebuffer), position, &[output], Some(mode))
            .map_err(io_err("set crtc"))
    }

    fn create_framebuffer(
        &mut self,
        width: u32,
        height: u32,
    ) -> Result<framebuffer::Handle, BackendError> {
        // dumb buffers come zeroed, which is black in XRGB8888
        let buffer = self
            .drm
            .create_dumb_buffer((width, height), DrmFourcc::Xrgb8888, 32)
            .map_err(io_err("create dumb buffer"))?;
        let framebuffer = match self.drm.add_framebuffer(&buffer, 24, 32) {
            Ok(fb) => fb,
            Err(err) => {
                if let Err(err) = self.drm.destroy_dumb_buffer(buffer) {
                    warn!(?err, "Failed to release dumb buffer");
                }
                return Err(io_err("add framebuffer")(err));
            }
        };

        trace!(?framebuffer, width, height, "Created framebuffer");
        self.dumb_buffers.insert(framebuffer, buffer);
        Ok(framebuffer)
    }

    fn destroy_framebuffer(&mut self, framebuffer: framebuffer::Handle) -> Result<(), BackendError> {
        self.drm
            .destroy_framebuffer(framebuffer)
            .map_err(io_err("remove framebuffer"))?;
        // framebuffers set up by the previous drm master have no buffer of ours
        if let Some(buffer) = self.dumb_buffers.remove(&framebuffer) {
            self.drm
                .destroy_dumb_buffer(buffer)
                .map_err(io_err("destroy dumb buffer"))?;
        }
        trace!(?framebuffer, "Destroyed framebuffer");
        Ok(())
    }
}
