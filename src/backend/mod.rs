// SPDX-License-Identifier: GPL-3.0-only

use crate::{config::Config, state::BackendData, state::State};
use anyhow::Result;
use display_configurator_config::BackendKind;
use smithay::reexports::calloop::LoopHandle;
use std::{fmt, hash::Hash, io};
use tracing::{info, warn};

#[cfg(test)]
pub mod fake;
pub mod kms;
pub mod x11;

/// A display mode as reported by a backend.
pub trait DisplayMode: Copy + fmt::Debug {
    /// Active area of the mode in pixels, `(width, height)`.
    fn dimensions(&self) -> (u32, u32);
}

/// Current configuration of a single CRTC.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrtcState<F, M> {
    pub position: (u32, u32),
    pub framebuffer: Option<F>,
    pub mode: Option<M>,
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("{op} failed")]
    Io {
        op: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("X11 request failed")]
    X11(#[from] xcb::Error),
    #[error("X11 request was rejected: {0}")]
    Protocol(String),
    #[error("output {0} does not report any mode")]
    NoMode(String),
    #[error("{0} is not supported by this backend")]
    Unsupported(&'static str),
}

pub(crate) fn io_err(op: &'static str) -> impl FnOnce(io::Error) -> BackendError {
    move |source| BackendError::Io { op, source }
}

/// Output enumeration and mode-setting primitives of a platform.
///
/// Queries take `&self`, anything changing the hardware state takes `&mut self`.
pub trait OutputBackend {
    type Output: Copy + Eq + Hash + fmt::Debug;
    type Crtc: Copy + Eq + Hash + fmt::Debug;
    type Framebuffer: Copy + Eq + fmt::Debug;
    type Mode: DisplayMode;

    fn outputs(&self) -> Result<Vec<Self::Output>, BackendError>;
    fn is_connected(&self, output: Self::Output) -> Result<bool, BackendError>;
    fn preferred_mode(&self, output: Self::Output) -> Result<Option<Self::Mode>, BackendError>;
    /// All modes of the output, sorted by width and then height, largest first.
    fn available_modes(&self, output: Self::Output) -> Result<Vec<Self::Mode>, BackendError>;
    fn is_internal(&self, output: Self::Output) -> Result<bool, BackendError>;
    /// Physical size in millimeters, `(0, 0)` if unknown.
    fn physical_size(&self, output: Self::Output) -> Result<(u32, u32), BackendError>;
    /// CRTCs able to drive the output. The currently attached one comes first.
    fn crtcs_for_output(&self, output: Self::Output) -> Result<Vec<Self::Crtc>, BackendError>;
    fn crtc_state(
        &self,
        crtc: Self::Crtc,
    ) -> Result<CrtcState<Self::Framebuffer, Self::Mode>, BackendError>;

    fn set_crtc(
        &mut self,
        crtc: Self::Crtc,
        position: (u32, u32),
        framebuffer: Self::Framebuffer,
        mode: Self::Mode,
        output: Self::Output,
    ) -> Result<(), BackendError>;
    fn create_framebuffer(
        &mut self,
        width: u32,
        height: u32,
    ) -> Result<Self::Framebuffer, BackendError>;
    fn destroy_framebuffer(&mut self, framebuffer: Self::Framebuffer) -> Result<(), BackendError>;
}

pub fn init_backend_auto(evlh: &LoopHandle<'static, State>, config: &Config) -> Result<BackendData> {
    match config.backend() {
        Some(BackendKind::X11) => x11::init_backend(evlh, config),
        Some(BackendKind::Kms) => kms::init_backend(evlh, config),
        None => {
            if std::env::var_os("DISPLAY").is_some() {
                match x11::init_backend(evlh, config) {
                    Ok(backend) => Ok(backend),
                    Err(err) => {
                        warn!(?err, "Initializing X11 Backend failed.");
                        info!("Falling back to kms backend.");
                        kms::init_backend(evlh, config)
                    }
                }
            } else {
                kms::init_backend(evlh, config)
            }
        }
    }
}
