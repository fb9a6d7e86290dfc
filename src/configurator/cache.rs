// SPDX-License-Identifier: GPL-3.0-only

use super::modes::find_mirror_mode;
use crate::backend::{BackendError, OutputBackend};
use std::{collections::HashSet, fmt};
use tracing::{debug, warn};

/// Snapshot of one physical connector.
pub struct CachedOutput<B: OutputBackend> {
    pub output: B::Output,
    pub is_connected: bool,
    pub is_internal: bool,
    /// Always set for connected outputs.
    pub ideal_mode: Option<B::Mode>,
    /// Only set while exactly two outputs are connected and share a mode.
    pub mirror_mode: Option<B::Mode>,
    pub crtc: Option<B::Crtc>,
    pub x: u32,
    pub y: u32,
    pub mm_width: u32,
    pub mm_height: u32,
}

impl<B: OutputBackend> CachedOutput<B> {
    fn disconnected(output: B::Output) -> Self {
        CachedOutput {
            output,
            is_connected: false,
            is_internal: false,
            ideal_mode: None,
            mirror_mode: None,
            crtc: None,
            x: 0,
            y: 0,
            mm_width: 0,
            mm_height: 0,
        }
    }
}

impl<B: OutputBackend> fmt::Debug for CachedOutput<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedOutput")
            .field("output", &self.output)
            .field("is_connected", &self.is_connected)
            .field("is_internal", &self.is_internal)
            .field("ideal_mode", &self.ideal_mode)
            .field("mirror_mode", &self.mirror_mode)
            .field("crtc", &self.crtc)
            .field("position", &(self.x, self.y))
            .field("size_mm", &(self.mm_width, self.mm_height))
            .finish()
    }
}

/// What the configurator believes about the hardware between two rescans.
///
/// The cache is only ever replaced as a whole. Apart from the offsets recorded
/// after a mode-set, nothing mutates it in place.
pub struct OutputCache<B: OutputBackend> {
    outputs: Vec<CachedOutput<B>>,
    primary: Option<usize>,
    secondary: Option<usize>,
    mirror_supported: bool,
}

impl<B: OutputBackend> Default for OutputCache<B> {
    fn default() -> Self {
        OutputCache {
            outputs: Vec::new(),
            primary: None,
            secondary: None,
            mirror_supported: false,
        }
    }
}

impl<B: OutputBackend> fmt::Debug for OutputCache<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputCache")
            .field("outputs", &self.outputs)
            .field("primary", &self.primary)
            .field("secondary", &self.secondary)
            .field("mirror_supported", &self.mirror_supported)
            .finish()
    }
}

impl<B: OutputBackend> OutputCache<B> {
    /// Re-reads the output topology and rebuilds the cache if it changed.
    ///
    /// Returns whether a rebuild happened. On error the previous cache is kept.
    pub fn rescan(&mut self, backend: &B) -> Result<bool, BackendError> {
        if !self.topology_changed(backend)? {
            return Ok(false);
        }

        *self = Self::scan(backend)?;
        debug!(
            outputs = self.outputs.len(),
            connected = self.connected_count(),
            primary = ?self.primary,
            secondary = ?self.secondary,
            mirror_supported = self.mirror_supported,
            "Output topology changed"
        );
        Ok(true)
    }

    // Outputs are compared by position in the enumeration, not by handle.
    fn topology_changed(&self, backend: &B) -> Result<bool, BackendError> {
        let outputs = backend.outputs()?;
        if outputs.len() != self.outputs.len() {
            return Ok(true);
        }
        for (cached, output) in self.outputs.iter().zip(outputs) {
            if backend.is_connected(output)? != cached.is_connected {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn scan(backend: &B) -> Result<Self, BackendError> {
        let mut cache = OutputCache::default();
        let mut claimed = HashSet::new();

        for output in backend.outputs()? {
            let mut cached = CachedOutput::disconnected(output);
            cached.is_connected = backend.is_connected(output)?;
            if !cached.is_connected {
                cache.outputs.push(cached);
                continue;
            }

            cached.crtc = backend
                .crtcs_for_output(output)?
                .into_iter()
                .find(|crtc| !claimed.contains(crtc));
            match cached.crtc {
                Some(crtc) => {
                    claimed.insert(crtc);
                    let state = backend.crtc_state(crtc)?;
                    (cached.x, cached.y) = state.position;
                }
                None => warn!(?output, "No free crtc left for connected output"),
            }

            cached.is_internal = backend.is_internal(output)?;
            cached.ideal_mode = Some(
                backend
                    .preferred_mode(output)?
                    .ok_or_else(|| BackendError::NoMode(format!("{:?}", output)))?,
            );
            (cached.mm_width, cached.mm_height) = backend.physical_size(output)?;

            let index = cache.outputs.len();
            if cache.primary.is_none() {
                cache.primary = Some(index);
            } else if cache.secondary.is_none() {
                cache.secondary = Some(index);
            }
            cache.outputs.push(cached);
        }

        if cache.connected_count() == 2 {
            if let (Some(primary), Some(secondary)) = (cache.primary, cache.secondary) {
                let primary_modes = backend.available_modes(cache.outputs[primary].output)?;
                let secondary_modes = backend.available_modes(cache.outputs[secondary].output)?;
                if let Some((primary_mode, secondary_mode)) =
                    find_mirror_mode(&primary_modes, &secondary_modes)
                {
                    cache.outputs[primary].mirror_mode = Some(primary_mode);
                    cache.outputs[secondary].mirror_mode = Some(secondary_mode);
                    cache.mirror_supported = true;
                }
            }
        }

        Ok(cache)
    }

    pub fn outputs(&self) -> &[CachedOutput<B>] {
        &self.outputs
    }

    pub fn primary_index(&self) -> Option<usize> {
        self.primary
    }

    pub fn secondary_index(&self) -> Option<usize> {
        self.secondary
    }

    pub fn primary(&self) -> Option<&CachedOutput<B>> {
        self.primary.map(|i| &self.outputs[i])
    }

    pub fn secondary(&self) -> Option<&CachedOutput<B>> {
        self.secondary.map(|i| &self.outputs[i])
    }

    pub fn mirror_supported(&self) -> bool {
        self.mirror_supported
    }

    pub fn connected_count(&self) -> usize {
        self.outputs.iter().filter(|o| o.is_connected).count()
    }

    /// More than one output is connected and one of them is a built-in panel.
    pub fn is_projecting(&self) -> bool {
        self.connected_count() > 1 && self.outputs.iter().any(|o| o.is_connected && o.is_internal)
    }

    pub(super) fn set_position(&mut self, index: usize, (x, y): (u32, u32)) {
        let output = &mut self.outputs[index];
        output.x = x;
        output.y = y;
    }
}
