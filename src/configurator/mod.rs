// SPDX-License-Identifier: GPL-3.0-only

use crate::backend::{BackendError, DisplayMode, OutputBackend};
use display_configurator_config::DualState;
use std::fmt;
use tracing::{debug, error, info, warn};

pub mod cache;
pub mod modes;

use self::{
    cache::{CachedOutput, OutputCache},
    modes::{device_scale_factor, stacked_layout},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisplayState {
    /// Unknown. Never a resting state after startup.
    Invalid,
    Headless,
    Single,
    DualMirror,
    DualPrimaryOnly,
    DualSecondaryOnly,
}

impl fmt::Display for DisplayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DisplayState::Invalid => "invalid",
            DisplayState::Headless => "headless",
            DisplayState::Single => "single",
            DisplayState::DualMirror => "dual-mirror",
            DisplayState::DualPrimaryOnly => "dual-primary-only",
            DisplayState::DualSecondaryOnly => "dual-secondary-only",
        })
    }
}

impl From<DualState> for DisplayState {
    fn from(state: DualState) -> DisplayState {
        match state {
            DualState::Mirror => DisplayState::DualMirror,
            DualState::PrimaryOnly => DisplayState::DualPrimaryOnly,
            DualState::SecondaryOnly => DisplayState::DualSecondaryOnly,
        }
    }
}

/// Receives the "projecting" status whenever it changes.
///
/// Calls are fire-and-forget, implementations handle their own failures.
pub trait ProjectionSink {
    fn projecting_changed(&mut self, projecting: bool);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfiguratorOptions {
    pub vertical_gap: u32,
    pub high_dpi_threshold: f64,
    pub preferred_dual_state: Option<DisplayState>,
}

impl Default for ConfiguratorOptions {
    fn default() -> ConfiguratorOptions {
        ConfiguratorOptions {
            vertical_gap: 30,
            high_dpi_threshold: 160.0,
            preferred_dual_state: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigureError {
    #[error("failed to query outputs")]
    Backend(#[from] BackendError),
    #[error("failed to apply {state}")]
    ApplyFailed {
        state: DisplayState,
        #[source]
        source: BackendError,
    },
    #[error("{state} cannot be applied with {connected} connected outputs")]
    Unsupported {
        state: DisplayState,
        connected: usize,
    },
    #[error("output #{0} has no crtc to drive it")]
    NoCrtc(usize),
}

struct Assignment<B: OutputBackend> {
    index: usize,
    output: B::Output,
    crtc: B::Crtc,
    position: (u32, u32),
    mode: B::Mode,
}

struct Plan<B: OutputBackend> {
    framebuffer: (u32, u32),
    assignments: Vec<Assignment<B>>,
}

/// Decides and applies the layout of up to two connected outputs.
pub struct OutputConfigurator<B: OutputBackend> {
    backend: B,
    cache: OutputCache<B>,
    state: DisplayState,
    framebuffer: Option<B::Framebuffer>,
    /// A mode-set failed halfway, the hardware may not match `state`.
    needs_apply: bool,
    sinks: Vec<Box<dyn ProjectionSink>>,
    last_projecting: Option<bool>,
    options: ConfiguratorOptions,
}

impl<B: OutputBackend> fmt::Debug for OutputConfigurator<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputConfigurator")
            .field("cache", &self.cache)
            .field("state", &self.state)
            .field("framebuffer", &self.framebuffer)
            .field("needs_apply", &self.needs_apply)
            .field("sinks", &self.sinks.len())
            .field("last_projecting", &self.last_projecting)
            .field("options", &self.options)
            .finish()
    }
}

impl<B: OutputBackend> OutputConfigurator<B> {
    pub fn new(
        backend: B,
        sinks: Vec<Box<dyn ProjectionSink>>,
        options: ConfiguratorOptions,
    ) -> Self {
        OutputConfigurator {
            backend,
            cache: OutputCache::default(),
            state: DisplayState::Invalid,
            framebuffer: None,
            needs_apply: false,
            sinks,
            last_projecting: None,
            options,
        }
    }

    /// Sinks added after `init` only hear about the next change.
    pub fn add_sink(&mut self, sink: Box<dyn ProjectionSink>) {
        self.sinks.push(sink);
    }

    pub fn state(&self) -> DisplayState {
        self.state
    }

    pub fn cache(&self) -> &OutputCache<B> {
        &self.cache
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[cfg(test)]
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn is_projecting(&self) -> bool {
        self.cache.is_projecting()
    }

    /// Picks up whatever configuration the hardware is in, or applies the
    /// default one if it is not one we would have produced ourselves.
    pub fn init(&mut self) -> Result<DisplayState, ConfigureError> {
        self.cache.rescan(&self.backend)?;
        self.notify_projecting();

        let current = self.infer_current_state()?;
        if current == DisplayState::Invalid {
            let state = self.default_state();
            info!(%state, "Unrecognized output configuration, applying default");
            self.apply_state(state)?;
        } else {
            info!(state = %current, "Keeping output configuration found on startup");
            self.state = current;
        }

        Ok(self.state)
    }

    /// Entry point for hotplug events.
    pub fn dispatch(&mut self) -> Result<bool, ConfigureError> {
        self.recache_and_use_default_state()
    }

    /// Applies the default state if the topology changed.
    ///
    /// Without a change, a previously failed apply is retried: the default
    /// state if the recorded one no longer fits the outputs, the recorded one
    /// otherwise.
    pub fn recache_and_use_default_state(&mut self) -> Result<bool, ConfigureError> {
        if !self.cache.rescan(&self.backend)? {
            if self.state_fits_topology() && !self.needs_apply {
                return Ok(false);
            }
            let state = self.retry_state();
            info!(%state, "Retrying output configuration");
            self.apply_state(state)?;
            return Ok(true);
        }
        self.notify_projecting();

        let state = self.default_state();
        self.apply_state(state)?;
        Ok(true)
    }

    /// Restores the configuration after another drm master had the device.
    pub fn resume(&mut self) -> Result<(), ConfigureError> {
        if self.recache_and_use_default_state()? {
            return Ok(());
        }
        self.apply_state(self.retry_state())
    }

    fn retry_state(&self) -> DisplayState {
        if self.state_fits_topology() {
            self.state
        } else {
            self.default_state()
        }
    }

    /// Whether the recorded state can be applied to the cached outputs.
    fn state_fits_topology(&self) -> bool {
        let primary = self.cache.primary_index().is_some();
        let secondary = self.cache.secondary_index().is_some();
        match self.state {
            DisplayState::Invalid => false,
            DisplayState::Headless => !primary,
            DisplayState::Single => primary && !secondary,
            DisplayState::DualMirror => secondary && self.cache.mirror_supported(),
            DisplayState::DualPrimaryOnly | DisplayState::DualSecondaryOnly => secondary,
        }
    }

    pub fn default_state(&self) -> DisplayState {
        match (self.cache.primary_index(), self.cache.secondary_index()) {
            (None, _) => DisplayState::Headless,
            (Some(_), None) => DisplayState::Single,
            (Some(_), Some(_)) => match self.options.preferred_dual_state {
                Some(DisplayState::DualPrimaryOnly) => DisplayState::DualPrimaryOnly,
                Some(DisplayState::DualSecondaryOnly) => DisplayState::DualSecondaryOnly,
                _ if self.cache.mirror_supported() => DisplayState::DualMirror,
                _ => DisplayState::DualPrimaryOnly,
            },
        }
    }

    /// Reads back the CRTCs of the connected outputs and matches them against
    /// the layouts `apply_state` would produce.
    ///
    /// Works on the cache as of the last rescan, an empty cache reads as `Headless`.
    pub fn infer_current_state(&self) -> Result<DisplayState, BackendError> {
        let (primary, secondary) = match (self.cache.connected_count(), self.cache.primary()) {
            (0, _) => return Ok(DisplayState::Headless),
            (1, Some(primary)) => {
                let ideal = primary.ideal_mode.map(|m| m.dimensions());
                return Ok(match self.readback(primary)? {
                    Some((_, (0, 0), size)) if Some(size) == ideal => DisplayState::Single,
                    _ => DisplayState::Invalid,
                });
            }
            (2, Some(primary)) => match self.cache.secondary() {
                Some(secondary) => (primary, secondary),
                None => return Ok(DisplayState::Invalid),
            },
            _ => return Ok(DisplayState::Invalid),
        };

        let (Some((p_fb, p_pos, p_size)), Some((s_fb, s_pos, s_size))) =
            (self.readback(primary)?, self.readback(secondary)?)
        else {
            return Ok(DisplayState::Invalid);
        };
        // both layouts scan out of one shared framebuffer
        if p_fb != s_fb {
            return Ok(DisplayState::Invalid);
        }
        let size_of = |mode: Option<B::Mode>| mode.map(|m| m.dimensions());

        if self.cache.mirror_supported()
            && p_pos == (0, 0)
            && s_pos == (0, 0)
            && Some(p_size) == size_of(primary.mirror_mode)
            && Some(s_size) == size_of(secondary.mirror_mode)
        {
            return Ok(DisplayState::DualMirror);
        }

        if Some(p_size) == size_of(primary.ideal_mode) && Some(s_size) == size_of(secondary.ideal_mode)
        {
            if p_pos == (0, 0) && s_pos == (0, p_size.1 + self.gap_below(primary)) {
                return Ok(DisplayState::DualPrimaryOnly);
            }
            if s_pos == (0, 0) && p_pos == (0, s_size.1 + self.gap_below(secondary)) {
                return Ok(DisplayState::DualSecondaryOnly);
            }
        }

        Ok(DisplayState::Invalid)
    }

    /// Advances mirror -> primary only -> secondary only -> mirror.
    ///
    /// Returns `false` without touching the hardware unless two outputs are
    /// connected and one of the dual states is active.
    pub fn cycle_display_mode(&mut self) -> Result<bool, ConfigureError> {
        if self.cache.connected_count() < 2 {
            debug!("Not cycling display mode, less than two outputs connected");
            return Ok(false);
        }

        let next = match self.state {
            DisplayState::DualMirror => DisplayState::DualPrimaryOnly,
            DisplayState::DualPrimaryOnly => DisplayState::DualSecondaryOnly,
            DisplayState::DualSecondaryOnly if self.cache.mirror_supported() => {
                DisplayState::DualMirror
            }
            DisplayState::DualSecondaryOnly => DisplayState::DualPrimaryOnly,
            _ => return Ok(false),
        };

        let applied = self.set_display_mode(next)?;
        self.notify_projecting();
        Ok(applied)
    }

    pub fn set_display_mode(&mut self, state: DisplayState) -> Result<bool, ConfigureError> {
        if matches!(
            self.state,
            DisplayState::Invalid | DisplayState::Headless | DisplayState::Single
        ) {
            debug!(current = %self.state, requested = %state, "Rejecting display mode change");
            return Ok(false);
        }

        self.apply_state(state)?;
        Ok(true)
    }

    /// Creates a framebuffer for `state` and points every involved CRTC at it.
    ///
    /// The recorded state only changes once every mode-set went through.
    pub fn apply_state(&mut self, state: DisplayState) -> Result<(), ConfigureError> {
        let plan = self.plan(state)?;
        if plan.assignments.is_empty() {
            if let Some(old) = self.framebuffer.take() {
                if let Err(err) = self.backend.destroy_framebuffer(old) {
                    warn!(?err, "Failed to release previous framebuffer");
                }
            }
            self.needs_apply = false;
            self.state = state;
            info!(%state, "Applied output configuration");
            return Ok(());
        }

        let (width, height) = plan.framebuffer;
        let framebuffer = self
            .backend
            .create_framebuffer(width, height)
            .map_err(|source| ConfigureError::ApplyFailed { state, source })?;

        for assignment in &plan.assignments {
            if let Err(source) = self.backend.set_crtc(
                assignment.crtc,
                assignment.position,
                framebuffer,
                assignment.mode,
                assignment.output,
            ) {
                error!(
                    ?source,
                    crtc = ?assignment.crtc,
                    output = ?assignment.output,
                    "Mode-set failed, keeping {}", self.state
                );
                if let Err(err) = self.backend.destroy_framebuffer(framebuffer) {
                    warn!(?err, "Failed to release unused framebuffer");
                }
                self.needs_apply = true;
                return Err(ConfigureError::ApplyFailed { state, source });
            }
        }

        for assignment in &plan.assignments {
            self.cache.set_position(assignment.index, assignment.position);
        }
        if let Some(old) = self.framebuffer.replace(framebuffer) {
            if let Err(err) = self.backend.destroy_framebuffer(old) {
                warn!(?err, "Failed to release previous framebuffer");
            }
        }

        self.needs_apply = false;
        self.state = state;
        info!(%state, width, height, "Applied output configuration");
        Ok(())
    }

    fn plan(&self, state: DisplayState) -> Result<Plan<B>, ConfigureError> {
        let unsupported = || ConfigureError::Unsupported {
            state,
            connected: self.cache.connected_count(),
        };
        let primary = self.cache.primary_index();
        let secondary = self.cache.secondary_index();

        match state {
            DisplayState::Invalid => Err(unsupported()),
            DisplayState::Headless if primary.is_none() => Ok(Plan {
                framebuffer: (0, 0),
                assignments: Vec::new(),
            }),
            DisplayState::Headless => Err(unsupported()),
            DisplayState::Single => {
                let primary = primary.ok_or_else(unsupported)?;
                let mode = self.ideal_mode(primary)?;
                Ok(Plan {
                    framebuffer: mode.dimensions(),
                    assignments: vec![self.assign(primary, (0, 0), mode)?],
                })
            }
            DisplayState::DualMirror => {
                let (Some(primary), Some(secondary)) = (primary, secondary) else {
                    return Err(unsupported());
                };
                let outputs = self.cache.outputs();
                let (Some(primary_mode), Some(secondary_mode)) =
                    (outputs[primary].mirror_mode, outputs[secondary].mirror_mode)
                else {
                    return Err(unsupported());
                };
                Ok(Plan {
                    framebuffer: primary_mode.dimensions(),
                    assignments: vec![
                        self.assign(primary, (0, 0), primary_mode)?,
                        self.assign(secondary, (0, 0), secondary_mode)?,
                    ],
                })
            }
            DisplayState::DualPrimaryOnly | DisplayState::DualSecondaryOnly => {
                let (Some(primary), Some(secondary)) = (primary, secondary) else {
                    return Err(unsupported());
                };
                let (top, bottom) = if state == DisplayState::DualPrimaryOnly {
                    (primary, secondary)
                } else {
                    (secondary, primary)
                };
                self.stacked_plan(top, bottom)
            }
        }
    }

    fn stacked_plan(&self, top: usize, bottom: usize) -> Result<Plan<B>, ConfigureError> {
        let top_mode = self.ideal_mode(top)?;
        let bottom_mode = self.ideal_mode(bottom)?;
        let gap = self.gap_below(&self.cache.outputs()[top]);
        let layout = stacked_layout(top_mode.dimensions(), bottom_mode.dimensions(), gap);

        Ok(Plan {
            framebuffer: layout.framebuffer,
            assignments: vec![
                self.assign(top, (0, 0), top_mode)?,
                self.assign(bottom, (0, layout.bottom_y), bottom_mode)?,
            ],
        })
    }

    fn assign(
        &self,
        index: usize,
        position: (u32, u32),
        mode: B::Mode,
    ) -> Result<Assignment<B>, ConfigureError> {
        let output = &self.cache.outputs()[index];
        Ok(Assignment {
            index,
            output: output.output,
            crtc: output.crtc.ok_or(ConfigureError::NoCrtc(index))?,
            position,
            mode,
        })
    }

    fn ideal_mode(&self, index: usize) -> Result<B::Mode, ConfigureError> {
        let output = &self.cache.outputs()[index];
        output
            .ideal_mode
            .ok_or_else(|| BackendError::NoMode(format!("{:?}", output.output)).into())
    }

    /// Gap kept below `top`, doubled on high-density outputs.
    fn gap_below(&self, top: &CachedOutput<B>) -> u32 {
        let width = top.ideal_mode.map(|m| m.dimensions().0).unwrap_or(0);
        let scale = device_scale_factor(top.mm_width, width, self.options.high_dpi_threshold);
        self.options.vertical_gap * scale
    }

    fn readback(
        &self,
        output: &CachedOutput<B>,
    ) -> Result<Option<(B::Framebuffer, (u32, u32), (u32, u32))>, BackendError> {
        let Some(crtc) = output.crtc else {
            return Ok(None);
        };
        let state = self.backend.crtc_state(crtc)?;
        Ok(match (state.framebuffer, state.mode) {
            (Some(fb), Some(mode)) => Some((fb, state.position, mode.dimensions())),
            _ => None,
        })
    }

    fn notify_projecting(&mut self) {
        let projecting = self.cache.is_projecting();
        if self.last_projecting == Some(projecting) {
            return;
        }
        debug!(projecting, "Projecting state changed");
        for sink in self.sinks.iter_mut() {
            sink.projecting_changed(projecting);
        }
        self.last_projecting = Some(projecting);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backend::fake::{mode, FakeBackend, FakeOutput, SetCrtcCall};
    use std::{cell::RefCell, rc::Rc};

    struct RecordingSink(Rc<RefCell<Vec<bool>>>);

    impl ProjectionSink for RecordingSink {
        fn projecting_changed(&mut self, projecting: bool) {
            self.0.borrow_mut().push(projecting);
        }
    }

    /// 14" 1920x1080 panel, above the density threshold.
    fn laptop() -> FakeOutput {
        let mut output =
            FakeOutput::internal(10, vec![mode(1920, 1080), mode(1280, 720), mode(1024, 768)]);
        output.mm = (294, 165);
        output
    }

    fn monitor() -> FakeOutput {
        FakeOutput::external(11, vec![mode(2560, 1440), mode(1920, 1080), mode(1280, 720)])
    }

    fn setup(
        outputs: Vec<FakeOutput>,
    ) -> (OutputConfigurator<FakeBackend>, Rc<RefCell<Vec<bool>>>) {
        setup_with(FakeBackend::new(outputs), ConfiguratorOptions::default())
    }

    fn setup_with(
        backend: FakeBackend,
        options: ConfiguratorOptions,
    ) -> (OutputConfigurator<FakeBackend>, Rc<RefCell<Vec<bool>>>) {
        let notifications = Rc::new(RefCell::new(Vec::new()));
        let sink = Box::new(RecordingSink(notifications.clone()));
        (OutputConfigurator::new(backend, vec![sink], options), notifications)
    }

    #[test]
    fn default_state() {
        let (mut configurator, _) = setup(Vec::new());
        configurator.init().unwrap();
        assert_eq!(configurator.default_state(), DisplayState::Headless);

        let (mut configurator, _) = setup(vec![laptop()]);
        configurator.init().unwrap();
        assert_eq!(configurator.default_state(), DisplayState::Single);

        let (mut configurator, _) = setup(vec![laptop(), monitor()]);
        configurator.init().unwrap();
        assert_eq!(configurator.default_state(), DisplayState::DualMirror);

        let (mut configurator, _) = setup(vec![
            FakeOutput::internal(10, vec![mode(1366, 768)]),
            FakeOutput::external(11, vec![mode(1920, 1200)]),
        ]);
        configurator.init().unwrap();
        assert_eq!(configurator.default_state(), DisplayState::DualPrimaryOnly);
    }

    #[test]
    fn preferred_dual_state() {
        let options = ConfiguratorOptions {
            preferred_dual_state: Some(DisplayState::DualSecondaryOnly),
            ..Default::default()
        };
        let (mut configurator, _) =
            setup_with(FakeBackend::new(vec![laptop(), monitor()]), options);
        assert_eq!(configurator.init().unwrap(), DisplayState::DualSecondaryOnly);

        // mirroring is only used when possible
        let options = ConfiguratorOptions {
            preferred_dual_state: Some(DisplayState::DualMirror),
            ..Default::default()
        };
        let backend = FakeBackend::new(vec![
            FakeOutput::internal(10, vec![mode(1366, 768)]),
            FakeOutput::external(11, vec![mode(1920, 1200)]),
        ]);
        let (mut configurator, _) = setup_with(backend, options);
        assert_eq!(configurator.init().unwrap(), DisplayState::DualPrimaryOnly);
    }

    #[test]
    fn init_applies_mirror() {
        let (mut configurator, notifications) = setup(vec![laptop(), monitor()]);
        assert_eq!(configurator.init().unwrap(), DisplayState::DualMirror);

        let backend = configurator.backend();
        let fb = *backend.live_framebuffers().iter().next().unwrap();
        assert_eq!(backend.framebuffers[&fb], (1920, 1080));
        assert_eq!(
            backend.set_crtc_calls,
            vec![
                SetCrtcCall {
                    crtc: 1,
                    position: (0, 0),
                    framebuffer: fb,
                    mode: (1920, 1080),
                    output: 10,
                },
                SetCrtcCall {
                    crtc: 2,
                    position: (0, 0),
                    framebuffer: fb,
                    mode: (1920, 1080),
                    output: 11,
                },
            ]
        );
        assert_eq!(*notifications.borrow(), vec![true]);
    }

    #[test]
    fn init_keeps_recognized_configuration() {
        let mut backend = FakeBackend::new(vec![laptop(), monitor()]);
        // laptop panel is high density, so the gap doubles
        backend.preset_crtc(1, (0, 0), mode(1920, 1080));
        backend.preset_crtc(2, (0, 1080 + 60), mode(2560, 1440));
        let (mut configurator, _) = setup_with(backend, Default::default());

        assert_eq!(configurator.init().unwrap(), DisplayState::DualPrimaryOnly);
        assert!(configurator.backend().set_crtc_calls.is_empty());
    }

    #[test]
    fn init_recognizes_secondary_only_and_single() {
        let mut backend = FakeBackend::new(vec![laptop(), monitor()]);
        backend.preset_crtc(2, (0, 0), mode(2560, 1440));
        backend.preset_crtc(1, (0, 1440 + 30), mode(1920, 1080));
        let (mut configurator, _) = setup_with(backend, Default::default());
        assert_eq!(configurator.init().unwrap(), DisplayState::DualSecondaryOnly);

        let mut backend = FakeBackend::new(vec![laptop()]);
        backend.preset_crtc(1, (0, 0), mode(1920, 1080));
        let (mut configurator, _) = setup_with(backend, Default::default());
        assert_eq!(configurator.init().unwrap(), DisplayState::Single);
        assert!(configurator.backend().set_crtc_calls.is_empty());
    }

    #[test]
    fn init_replaces_unknown_configuration() {
        let mut backend = FakeBackend::new(vec![laptop(), monitor()]);
        backend.preset_crtc(1, (0, 0), mode(1280, 720));
        backend.preset_crtc(2, (1280, 0), mode(1920, 1080));
        let (mut configurator, _) = setup_with(backend, Default::default());

        assert!(configurator.cache.rescan(&configurator.backend).unwrap());
        assert_eq!(configurator.infer_current_state().unwrap(), DisplayState::Invalid);
        assert_eq!(configurator.init().unwrap(), DisplayState::DualMirror);
        assert_eq!(configurator.backend().set_crtc_calls.len(), 2);
    }

    #[test]
    fn init_needs_a_shared_framebuffer() {
        let mut backend = FakeBackend::new(vec![laptop(), monitor()]);
        backend.preset_crtc(1, (0, 0), mode(1920, 1080));
        backend.preset_crtc(2, (0, 0), mode(1920, 1080));
        if let Some(crtc) = backend.crtcs.get_mut(&2) {
            crtc.framebuffer = Some(2);
        }
        let (mut configurator, _) = setup_with(backend, Default::default());

        assert!(configurator.cache.rescan(&configurator.backend).unwrap());
        assert_eq!(configurator.infer_current_state().unwrap(), DisplayState::Invalid);
        assert_eq!(configurator.init().unwrap(), DisplayState::DualMirror);
        assert_eq!(configurator.backend().set_crtc_calls.len(), 2);
    }

    #[test]
    fn primary_only_geometry() {
        let backend = FakeBackend::new(vec![
            FakeOutput::external(10, vec![mode(1920, 1080)]),
            FakeOutput::external(11, vec![mode(1280, 1024)]),
        ]);
        let (mut configurator, _) = setup_with(backend, Default::default());
        assert_eq!(configurator.init().unwrap(), DisplayState::DualPrimaryOnly);

        let backend = configurator.backend();
        let fb = *backend.live_framebuffers().iter().next().unwrap();
        assert_eq!(backend.framebuffers[&fb], (1920, 1080 + 1024 + 30));
        assert_eq!(backend.set_crtc_calls[0].position, (0, 0));
        assert_eq!(backend.set_crtc_calls[1].position, (0, 1080 + 30));
        assert_eq!(configurator.cache().outputs()[1].y, 1080 + 30);
    }

    #[test]
    fn secondary_only_geometry_with_high_density_panel() {
        let (mut configurator, _) = setup(vec![laptop(), monitor()]);
        configurator.init().unwrap();

        assert!(configurator.cycle_display_mode().unwrap());
        assert_eq!(configurator.state(), DisplayState::DualPrimaryOnly);
        let calls = &configurator.backend().set_crtc_calls[2..];
        assert_eq!(calls[1].position, (0, 1080 + 60));

        assert!(configurator.cycle_display_mode().unwrap());
        assert_eq!(configurator.state(), DisplayState::DualSecondaryOnly);
        let backend = configurator.backend();
        let calls = &backend.set_crtc_calls[4..];
        assert_eq!(calls[0].output, 11);
        assert_eq!(calls[0].position, (0, 0));
        assert_eq!(calls[1].output, 10);
        assert_eq!(calls[1].position, (0, 1440 + 30));
        assert_eq!(backend.framebuffers[&calls[0].framebuffer], (2560, 1440 + 1080 + 30));
        assert_eq!(configurator.cache().outputs()[0].y, 1440 + 30);
        assert_eq!(configurator.cache().outputs()[1].y, 0);
    }

    #[test]
    fn cycle_returns_to_mirror() {
        let (mut configurator, _) = setup(vec![laptop(), monitor()]);
        configurator.init().unwrap();

        let mut visited = Vec::new();
        for _ in 0..3 {
            assert!(configurator.cycle_display_mode().unwrap());
            visited.push(configurator.state());
        }
        assert_eq!(
            visited,
            vec![
                DisplayState::DualPrimaryOnly,
                DisplayState::DualSecondaryOnly,
                DisplayState::DualMirror,
            ]
        );

        assert!(configurator.cycle_display_mode().unwrap());
        assert_eq!(configurator.state(), DisplayState::DualPrimaryOnly);
    }

    #[test]
    fn cycle_without_mirror() {
        let (mut configurator, _) = setup(vec![
            FakeOutput::internal(10, vec![mode(1366, 768)]),
            FakeOutput::external(11, vec![mode(1920, 1200)]),
        ]);
        assert_eq!(configurator.init().unwrap(), DisplayState::DualPrimaryOnly);

        assert!(configurator.cycle_display_mode().unwrap());
        assert_eq!(configurator.state(), DisplayState::DualSecondaryOnly);
        assert!(configurator.cycle_display_mode().unwrap());
        assert_eq!(configurator.state(), DisplayState::DualPrimaryOnly);
    }

    #[test]
    fn cycle_needs_two_outputs() {
        for outputs in [vec![], vec![laptop()], vec![laptop(), monitor().disconnected()]] {
            let (mut configurator, _) = setup(outputs);
            let state = configurator.init().unwrap();
            let calls = configurator.backend().set_crtc_calls.len();

            assert!(!configurator.cycle_display_mode().unwrap());
            assert_eq!(configurator.state(), state);
            assert_eq!(configurator.backend().set_crtc_calls.len(), calls);
        }
    }

    #[test]
    fn set_display_mode_rejected_outside_dual_states() {
        let (mut configurator, _) = setup(vec![laptop()]);
        configurator.init().unwrap();
        assert!(!configurator
            .set_display_mode(DisplayState::DualPrimaryOnly)
            .unwrap());
        assert_eq!(configurator.state(), DisplayState::Single);

        let (mut configurator, _) = setup(vec![laptop(), monitor()]);
        assert!(!configurator.set_display_mode(DisplayState::DualMirror).unwrap());
        assert_eq!(configurator.state(), DisplayState::Invalid);
    }

    #[test]
    fn framebuffers_do_not_accumulate() {
        let (mut configurator, _) = setup(vec![laptop(), monitor()]);
        configurator.init().unwrap();

        for _ in 0..10 {
            configurator.cycle_display_mode().unwrap();
            assert_eq!(configurator.backend().live_framebuffers().len(), 1);
        }
    }

    #[test]
    fn failed_mode_set_keeps_state() {
        let (mut configurator, _) = setup(vec![laptop(), monitor()]);
        configurator.init().unwrap();
        let live = configurator.backend().live_framebuffers();

        configurator.backend_mut().fail_set_crtc = Some(1);
        let err = configurator.cycle_display_mode().unwrap_err();
        assert!(matches!(
            err,
            ConfigureError::ApplyFailed {
                state: DisplayState::DualPrimaryOnly,
                ..
            }
        ));
        assert_eq!(configurator.state(), DisplayState::DualMirror);
        assert_eq!(configurator.backend().live_framebuffers(), live);
        assert_eq!(configurator.cache().outputs()[1].y, 0);

        // the next attempt goes through
        assert!(configurator.cycle_display_mode().unwrap());
        assert_eq!(configurator.state(), DisplayState::DualPrimaryOnly);
    }

    #[test]
    fn failed_framebuffer_keeps_state() {
        let (mut configurator, _) = setup(vec![laptop(), monitor()]);
        configurator.init().unwrap();
        let calls = configurator.backend().set_crtc_calls.len();

        configurator.backend_mut().fail_create_framebuffer = true;
        assert!(configurator.cycle_display_mode().is_err());
        assert_eq!(configurator.state(), DisplayState::DualMirror);
        assert_eq!(configurator.backend().set_crtc_calls.len(), calls);
    }

    #[test]
    fn failed_hotplug_apply_is_retried() {
        let (mut configurator, _) = setup(vec![laptop(), monitor()]);
        assert_eq!(configurator.init().unwrap(), DisplayState::DualMirror);

        configurator.backend_mut().outputs[1].connected = false;
        configurator.backend_mut().fail_set_crtc = Some(0);
        assert!(matches!(
            configurator.dispatch(),
            Err(ConfigureError::ApplyFailed {
                state: DisplayState::Single,
                ..
            })
        ));
        assert_eq!(configurator.state(), DisplayState::DualMirror);

        // nothing changed since, but the recorded state does not fit one output
        assert!(configurator.dispatch().unwrap());
        assert_eq!(configurator.state(), DisplayState::Single);
        assert_eq!(configurator.backend().live_framebuffers().len(), 1);
        assert!(!configurator.dispatch().unwrap());
    }

    #[test]
    fn resume_after_failed_hotplug_apply() {
        let (mut configurator, _) = setup(vec![laptop(), monitor()]);
        configurator.init().unwrap();

        configurator.backend_mut().outputs[1].connected = false;
        configurator.backend_mut().fail_set_crtc = Some(0);
        assert!(configurator.dispatch().is_err());

        configurator.resume().unwrap();
        assert_eq!(configurator.state(), DisplayState::Single);
        assert!(!configurator.cycle_display_mode().unwrap());
    }

    #[test]
    fn failed_init_is_retried() {
        let mut backend = FakeBackend::new(vec![laptop(), monitor()]);
        backend.fail_create_framebuffer = true;
        let (mut configurator, _) = setup_with(backend, Default::default());
        assert!(configurator.init().is_err());
        assert_eq!(configurator.state(), DisplayState::Invalid);

        configurator.backend_mut().fail_create_framebuffer = false;
        assert!(configurator.dispatch().unwrap());
        assert_eq!(configurator.state(), DisplayState::DualMirror);
    }

    #[test]
    fn partial_mode_set_is_reapplied() {
        let (mut configurator, _) = setup(vec![laptop(), monitor()]);
        configurator.init().unwrap();
        let calls = configurator.backend().set_crtc_calls.len();

        configurator.backend_mut().fail_set_crtc = Some(1);
        assert!(configurator.cycle_display_mode().is_err());
        assert_eq!(configurator.backend().set_crtc_calls.len(), calls + 1);

        // the recorded state is driven again on the next event
        assert!(configurator.dispatch().unwrap());
        assert_eq!(configurator.state(), DisplayState::DualMirror);
        assert_eq!(configurator.backend().set_crtc_calls.len(), calls + 3);
        assert!(!configurator.dispatch().unwrap());
    }

    #[test]
    fn hotplug() {
        let (mut configurator, notifications) =
            setup(vec![laptop(), monitor().disconnected()]);
        assert_eq!(configurator.init().unwrap(), DisplayState::Single);
        assert!(!configurator.dispatch().unwrap());

        configurator.backend_mut().outputs[1].connected = true;
        assert!(configurator.dispatch().unwrap());
        assert_eq!(configurator.state(), DisplayState::DualMirror);
        assert!(configurator.is_projecting());

        configurator.backend_mut().outputs[1].connected = false;
        assert!(configurator.dispatch().unwrap());
        assert_eq!(configurator.state(), DisplayState::Single);
        assert_eq!(configurator.backend().live_framebuffers().len(), 1);

        configurator.backend_mut().outputs[0].connected = false;
        assert!(configurator.dispatch().unwrap());
        assert_eq!(configurator.state(), DisplayState::Headless);
        assert!(configurator.backend().live_framebuffers().is_empty());

        assert_eq!(*notifications.borrow(), vec![false, true, false]);
    }

    #[test]
    fn cycling_does_not_repeat_notifications() {
        let (mut configurator, notifications) = setup(vec![laptop(), monitor()]);
        configurator.init().unwrap();
        for _ in 0..3 {
            configurator.cycle_display_mode().unwrap();
        }
        assert_eq!(*notifications.borrow(), vec![true]);
    }

    #[test]
    fn third_output_is_left_alone() {
        let (mut configurator, _) = setup(vec![
            laptop(),
            monitor(),
            FakeOutput::external(12, vec![mode(1920, 1080)]),
        ]);
        assert_eq!(configurator.init().unwrap(), DisplayState::DualPrimaryOnly);
        assert!(configurator
            .backend()
            .set_crtc_calls
            .iter()
            .all(|call| call.output != 12));
    }

    #[test]
    fn resume_reapplies_state() {
        let (mut configurator, _) = setup(vec![laptop(), monitor()]);
        configurator.init().unwrap();
        configurator.cycle_display_mode().unwrap();

        configurator.backend_mut().crtcs.clear();
        configurator.resume().unwrap();
        assert_eq!(configurator.state(), DisplayState::DualPrimaryOnly);
        assert_eq!(
            configurator.infer_current_state().unwrap(),
            DisplayState::DualPrimaryOnly
        );
    }

    #[test]
    fn unsupported_states() {
        let (mut configurator, _) = setup(vec![laptop()]);
        configurator.init().unwrap();

        assert!(matches!(
            configurator.apply_state(DisplayState::DualMirror),
            Err(ConfigureError::Unsupported { connected: 1, .. })
        ));
        assert!(matches!(
            configurator.apply_state(DisplayState::Headless),
            Err(ConfigureError::Unsupported { .. })
        ));
        assert!(matches!(
            configurator.apply_state(DisplayState::Invalid),
            Err(ConfigureError::Unsupported { .. })
        ));
        assert_eq!(configurator.state(), DisplayState::Single);
    }
}
