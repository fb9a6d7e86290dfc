// SPDX-License-Identifier: GPL-3.0-only

use crate::{
    backend::{kms::KmsState, x11::X11State},
    config::Config,
    configurator::{ConfigureError, DisplayState, ProjectionSink},
};
use smithay::{backend::session::Session, reexports::calloop::LoopSignal};
use tracing::{debug, error, info, trace};

#[derive(Debug)]
pub enum BackendData {
    Kms(KmsState),
    X11(X11State),
}

// The configurators of both backends have different types,
// so every call has to be spelled out per variant.
macro_rules! with_configurator {
    ($backend:expr, |$configurator:ident| $body:expr) => {
        match $backend {
            BackendData::Kms(kms) => {
                let $configurator = &mut kms.configurator;
                $body
            }
            BackendData::X11(x11) => {
                let $configurator = &mut x11.configurator;
                $body
            }
        }
    };
}

impl BackendData {
    pub fn name(&self) -> &'static str {
        match self {
            BackendData::Kms(_) => "kms",
            BackendData::X11(_) => "x11",
        }
    }

    /// Whether we may touch the hardware right now.
    pub fn is_active(&self) -> bool {
        match self {
            BackendData::Kms(kms) => kms.session.is_active(),
            BackendData::X11(_) => true,
        }
    }

    pub fn display_state(&self) -> DisplayState {
        match self {
            BackendData::Kms(kms) => kms.configurator.state(),
            BackendData::X11(x11) => x11.configurator.state(),
        }
    }

    pub fn is_projecting(&self) -> bool {
        match self {
            BackendData::Kms(kms) => kms.configurator.is_projecting(),
            BackendData::X11(x11) => x11.configurator.is_projecting(),
        }
    }

    pub fn add_sink(&mut self, sink: Box<dyn ProjectionSink>) {
        with_configurator!(self, |configurator| configurator.add_sink(sink))
    }
}

pub struct State {
    pub backend: BackendData,
    pub config: Config,
    pub loop_signal: LoopSignal,
}

impl State {
    pub fn new(backend: BackendData, config: Config, loop_signal: LoopSignal) -> State {
        State {
            backend,
            config,
            loop_signal,
        }
    }

    pub fn init_outputs(&mut self) -> Result<DisplayState, ConfigureError> {
        let state = with_configurator!(&mut self.backend, |configurator| configurator.init())?;
        info!(backend = self.backend.name(), %state, "Outputs initialized.");
        Ok(state)
    }

    pub fn handle_hotplug(&mut self) {
        if !self.backend.is_active() {
            debug!("Session inactive, ignoring hotplug.");
            return;
        }

        match with_configurator!(&mut self.backend, |configurator| configurator.dispatch()) {
            Ok(true) => {
                let state = self.backend.display_state();
                let projecting = self.backend.is_projecting();
                info!(%state, projecting, "Outputs changed.");
                #[cfg(feature = "systemd")]
                crate::systemd::status(state);
            }
            Ok(false) => trace!("Output topology unchanged."),
            Err(err) => error!(?err, "Failed to apply output configuration after hotplug."),
        }
    }

    pub fn cycle_display_mode(&mut self) {
        if !self.backend.is_active() {
            debug!("Session inactive, not cycling display mode.");
            return;
        }

        match with_configurator!(&mut self.backend, |configurator| {
            configurator.cycle_display_mode()
        }) {
            Ok(true) => {
                let state = self.backend.display_state();
                info!(%state, "Cycled display mode.");
                #[cfg(feature = "systemd")]
                crate::systemd::status(state);
            }
            Ok(false) => debug!(
                state = %self.backend.display_state(),
                "Display mode cannot be cycled."
            ),
            Err(err) => error!(?err, "Failed to cycle display mode."),
        }

        // a hotplug racing the mode-set is only queued inside xcb
        if let BackendData::X11(x11) = &self.backend {
            if x11.take_queued_changes() {
                self.handle_hotplug();
            }
        }
    }
}
