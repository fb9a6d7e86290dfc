// SPDX-License-Identifier: GPL-3.0-only

use crate::{
    backend::{BackendError, CrtcState, DisplayMode, OutputBackend},
    config::Config,
    configurator::OutputConfigurator,
    state::{BackendData, State},
};
use anyhow::{bail, Context, Result};
use smithay::reexports::calloop::{
    generic::Generic, Interest, LoopHandle, Mode as TriggerMode, PostAction,
};
use std::{
    fmt,
    os::fd::{AsFd, AsRawFd, BorrowedFd},
    sync::Arc,
};
use tracing::{debug, error, info, trace, warn};
use xcb::{randr, x, Xid};

// Xvfb's default
const SCREEN_DPI: f64 = 96.0;
const INTERNAL_PREFIXES: [&str; 3] = ["eDP", "LVDS", "DSI"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct X11Mode {
    pub id: randr::Mode,
    pub width: u32,
    pub height: u32,
}

impl DisplayMode for X11Mode {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// On X11 all crtcs scan out of the root window, so the "framebuffer" is its size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug)]
pub struct X11State {
    pub configurator: OutputConfigurator<RandrBackend>,
}

pub struct RandrBackend {
    conn: Arc<xcb::Connection>,
    root: x::Window,
}

impl fmt::Debug for RandrBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RandrBackend")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

fn is_internal_name(name: &[u8]) -> bool {
    INTERNAL_PREFIXES
        .iter()
        .any(|prefix| name.starts_with(prefix.as_bytes()))
}

fn coordinate(value: u32) -> Result<i16, BackendError> {
    i16::try_from(value).map_err(|_| BackendError::Protocol(format!("{} is out of range", value)))
}

impl RandrBackend {
    pub fn connect() -> Result<RandrBackend> {
        let (conn, screen_num) =
            xcb::Connection::connect_with_extensions(None, &[xcb::Extension::RandR], &[])?;
        let root = conn
            .get_setup()
            .roots()
            .nth(screen_num as usize)
            .context("No preferred screen")?
            .root();

        let version = conn.wait_for_reply(conn.send_request(&randr::QueryVersion {
            major_version: 1,
            minor_version: 2,
        }))?;
        if (version.major_version(), version.minor_version()) < (1, 2) {
            bail!(
                "RandR 1.2 required, server supports {}.{}",
                version.major_version(),
                version.minor_version()
            );
        }

        conn.send_and_check_request(&randr::SelectInput {
            window: root,
            enable: randr::NotifyMask::SCREEN_CHANGE | randr::NotifyMask::OUTPUT_CHANGE,
        })?;

        Ok(RandrBackend {
            conn: Arc::new(conn),
            root,
        })
    }

    fn reply<R>(
        &self,
        request: &R,
    ) -> Result<<R::Cookie as xcb::CookieWithReplyChecked>::Reply, BackendError>
    where
        R: xcb::Request,
        R::Cookie: xcb::CookieWithReplyChecked,
    {
        Ok(self.conn.wait_for_reply(self.conn.send_request(request))?)
    }

    fn resources(&self) -> Result<randr::GetScreenResourcesCurrentReply, BackendError> {
        self.reply(&randr::GetScreenResourcesCurrent { window: self.root })
    }

    fn output_info(
        &self,
        output: randr::Output,
    ) -> Result<randr::GetOutputInfoReply, BackendError> {
        self.reply(&randr::GetOutputInfo {
            output,
            config_timestamp: x::CURRENT_TIME,
        })
    }

    fn crtc_info(&self, crtc: randr::Crtc) -> Result<randr::GetCrtcInfoReply, BackendError> {
        self.reply(&randr::GetCrtcInfo {
            crtc,
            config_timestamp: x::CURRENT_TIME,
        })
    }

    fn lookup_mode(
        resources: &randr::GetScreenResourcesCurrentReply,
        mode: randr::Mode,
    ) -> Option<X11Mode> {
        resources
            .modes()
            .iter()
            .find(|info| info.id == mode.resource_id())
            .map(|info| X11Mode {
                id: mode,
                width: info.width as u32,
                height: info.height as u32,
            })
    }

    /// Modes in the order the server lists them, preferred ones first.
    fn output_modes(&self, output: randr::Output) -> Result<Vec<X11Mode>, BackendError> {
        let resources = self.resources()?;
        let info = self.output_info(output)?;
        Ok(info
            .modes()
            .iter()
            .filter_map(|mode| Self::lookup_mode(&resources, *mode))
            .collect())
    }

    fn screen_size(&self) -> Result<ScreenSize, BackendError> {
        let geometry = self.reply(&x::GetGeometry {
            drawable: x::Drawable::Window(self.root),
        })?;
        Ok(ScreenSize {
            width: geometry.width() as u32,
            height: geometry.height() as u32,
        })
    }

    fn configure_crtc(
        &self,
        crtc: randr::Crtc,
        position: (u32, u32),
        mode: randr::Mode,
        outputs: &[randr::Output],
    ) -> Result<(), BackendError> {
        let config_timestamp = self.resources()?.config_timestamp();
        let reply = self.reply(&randr::SetCrtcConfig {
            crtc,
            timestamp: x::CURRENT_TIME,
            config_timestamp,
            x: coordinate(position.0)?,
            y: coordinate(position.1)?,
            mode,
            rotation: randr::Rotation::ROTATE_0,
            outputs,
        })?;
        match reply.status() {
            randr::SetConfig::Success => Ok(()),
            status => Err(BackendError::Protocol(format!(
                "SetCrtcConfig on {:?} returned {:?}",
                crtc, status
            ))),
        }
    }

    fn connection(&self) -> Arc<xcb::Connection> {
        self.conn.clone()
    }
}

impl OutputBackend for RandrBackend {
    type Output = randr::Output;
    type Crtc = randr::Crtc;
    type Framebuffer = ScreenSize;
    type Mode = X11Mode;

    fn outputs(&self) -> Result<Vec<randr::Output>, BackendError> {
        Ok(self.resources()?.outputs().to_vec())
    }

    fn is_connected(&self, output: randr::Output) -> Result<bool, BackendError> {
        Ok(self.output_info(output)?.connection() == randr::Connection::Connected)
    }

    fn preferred_mode(&self, output: randr::Output) -> Result<Option<X11Mode>, BackendError> {
        Ok(self.output_modes(output)?.first().copied())
    }

    fn available_modes(&self, output: randr::Output) -> Result<Vec<X11Mode>, BackendError> {
        let mut modes = self.output_modes(output)?;
        modes.sort_by(|a, b| b.dimensions().cmp(&a.dimensions()));
        Ok(modes)
    }

    fn is_internal(&self, output: randr::Output) -> Result<bool, BackendError> {
        Ok(is_internal_name(self.output_info(output)?.name()))
    }

    fn physical_size(&self, output: randr::Output) -> Result<(u32, u32), BackendError> {
        let info = self.output_info(output)?;
        Ok((info.mm_width(), info.mm_height()))
    }

    fn crtcs_for_output(&self, output: randr::Output) -> Result<Vec<randr::Crtc>, BackendError> {
        let info = self.output_info(output)?;
        let mut crtcs = Vec::new();
        if !info.crtc().is_none() {
            crtcs.push(info.crtc());
        }
        crtcs.extend(info.crtcs().iter().filter(|crtc| **crtc != info.crtc()));
        Ok(crtcs)
    }

    fn crtc_state(&self, crtc: randr::Crtc) -> Result<CrtcState<ScreenSize, X11Mode>, BackendError> {
        let info = self.crtc_info(crtc)?;
        let mode = if info.mode().is_none() {
            None
        } else {
            Self::lookup_mode(&self.resources()?, info.mode())
        };
        let framebuffer = match mode {
            Some(_) => Some(self.screen_size()?),
            None => None,
        };
        Ok(CrtcState {
            position: (info.x().max(0) as u32, info.y().max(0) as u32),
            framebuffer,
            mode,
        })
    }

    fn set_crtc(
        &mut self,
        crtc: randr::Crtc,
        position: (u32, u32),
        _framebuffer: ScreenSize,
        mode: X11Mode,
        output: randr::Output,
    ) -> Result<(), BackendError> {
        debug!(?crtc, ?output, ?position, mode = ?mode.dimensions(), "Setting crtc");
        self.configure_crtc(crtc, position, mode.id, &[output])
    }

    fn create_framebuffer(&mut self, width: u32, height: u32) -> Result<ScreenSize, BackendError> {
        // the server refuses screen sizes not covering every active crtc
        let resources = self.resources()?;
        for crtc in resources.crtcs() {
            let info = self.crtc_info(*crtc)?;
            if info.mode().is_none() {
                continue;
            }
            let right = info.x().max(0) as u32 + info.width() as u32;
            let bottom = info.y().max(0) as u32 + info.height() as u32;
            if right > width || bottom > height {
                trace!(?crtc, "Disabling crtc outside of the new screen");
                self.configure_crtc(*crtc, (0, 0), randr::Mode::none(), &[])?;
            }
        }

        let px_to_mm = 25.4 / SCREEN_DPI;
        self.conn
            .send_and_check_request(&randr::SetScreenSize {
                window: self.root,
                width: u16::try_from(width)
                    .map_err(|_| BackendError::Protocol(format!("screen width {}", width)))?,
                height: u16::try_from(height)
                    .map_err(|_| BackendError::Protocol(format!("screen height {}", height)))?,
                mm_width: (width as f64 * px_to_mm).round() as u32,
                mm_height: (height as f64 * px_to_mm).round() as u32,
            })
            .map_err(|err| BackendError::X11(xcb::Error::Protocol(err)))?;

        Ok(ScreenSize { width, height })
    }

    fn destroy_framebuffer(&mut self, _framebuffer: ScreenSize) -> Result<(), BackendError> {
        Ok(())
    }
}

impl X11State {
    /// Whether RandR changes are queued inside xcb.
    ///
    /// Events read off the socket while waiting for a reply never make the fd
    /// readable again, so they have to be checked after our own requests.
    pub fn take_queued_changes(&self) -> bool {
        match drain_randr_events(&self.configurator.backend().connection()) {
            Ok(changed) => changed,
            Err(err) => {
                warn!(?err, "Failed to read queued X11 events.");
                false
            }
        }
    }
}

struct XcbFd(Arc<xcb::Connection>);

impl AsFd for XcbFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        // SAFETY: the connection owns the socket and lives as long as `self`
        unsafe { BorrowedFd::borrow_raw(self.0.as_raw_fd()) }
    }
}

/// Drains pending events, returns whether any of them was a RandR change.
fn drain_randr_events(conn: &xcb::Connection) -> xcb::Result<bool> {
    let mut changed = false;
    while let Some(event) = conn.poll_for_event()? {
        match event {
            xcb::Event::RandR(
                randr::Event::ScreenChangeNotify(_) | randr::Event::Notify(_),
            ) => changed = true,
            event => trace!(?event, "Ignoring X11 event."),
        }
    }
    Ok(changed)
}

pub fn init_backend(evlh: &LoopHandle<'static, State>, config: &Config) -> Result<BackendData> {
    let backend = RandrBackend::connect().context("Failed to connect to the X server")?;
    let conn = backend.connection();
    info!("Using X11 RandR for output configuration.");

    let source = Generic::new(XcbFd(conn.clone()), Interest::READ, TriggerMode::Level);
    evlh.insert_source(source, move |_, _, state: &mut State| {
        // our own mode-sets queue change events as well, handling
        // them is a no-op rescan
        loop {
            match drain_randr_events(&conn) {
                Ok(true) => state.handle_hotplug(),
                Ok(false) => break,
                Err(err) => {
                    error!(?err, "Lost connection to the X server.");
                    state.loop_signal.stop();
                    return Ok(PostAction::Remove);
                }
            }
        }
        Ok(PostAction::Continue)
    })
    .map_err(|err| err.error)
    .context("Failed to register X11 event source")?;

    Ok(BackendData::X11(X11State {
        configurator: OutputConfigurator::new(backend, Vec::new(), config.options()),
    }))
}
