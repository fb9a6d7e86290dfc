// SPDX-License-Identifier: GPL-3.0-only

//! Scripted in-memory backend for exercising the configurator without hardware.

use super::{BackendError, CrtcState, DisplayMode, OutputBackend};
use std::{
    cell::Cell,
    collections::{HashMap, HashSet},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FakeMode {
    pub width: u32,
    pub height: u32,
    pub refresh: u32,
}

impl DisplayMode for FakeMode {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

pub fn mode(width: u32, height: u32) -> FakeMode {
    FakeMode {
        width,
        height,
        refresh: 60_000,
    }
}

#[derive(Debug, Clone)]
pub struct FakeOutput {
    pub id: u32,
    pub connected: bool,
    pub internal: bool,
    pub mm: (u32, u32),
    /// First entry is the preferred mode.
    pub modes: Vec<FakeMode>,
    pub crtcs: Vec<u32>,
}

impl FakeOutput {
    pub fn internal(id: u32, modes: Vec<FakeMode>) -> FakeOutput {
        FakeOutput {
            id,
            connected: true,
            internal: true,
            mm: (290, 170),
            modes,
            crtcs: vec![1, 2],
        }
    }

    pub fn external(id: u32, modes: Vec<FakeMode>) -> FakeOutput {
        FakeOutput {
            id,
            connected: true,
            internal: false,
            mm: (530, 300),
            modes,
            crtcs: vec![1, 2],
        }
    }

    pub fn disconnected(mut self) -> FakeOutput {
        self.connected = false;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetCrtcCall {
    pub crtc: u32,
    pub position: (u32, u32),
    pub framebuffer: u32,
    pub mode: (u32, u32),
    pub output: u32,
}

#[derive(Debug, Default)]
pub struct FakeBackend {
    pub outputs: Vec<FakeOutput>,
    pub crtcs: HashMap<u32, CrtcState<u32, FakeMode>>,
    pub framebuffers: HashMap<u32, (u32, u32)>,
    pub set_crtc_calls: Vec<SetCrtcCall>,
    /// Fail the n-th upcoming `set_crtc` call (0 = the next one).
    pub fail_set_crtc: Option<usize>,
    pub fail_create_framebuffer: bool,
    pub connection_queries: Cell<usize>,
    next_framebuffer: u32,
}

impl FakeBackend {
    pub fn new(outputs: Vec<FakeOutput>) -> FakeBackend {
        FakeBackend {
            outputs,
            next_framebuffer: 100,
            ..Default::default()
        }
    }

    fn output(&self, id: u32) -> Result<&FakeOutput, BackendError> {
        self.outputs
            .iter()
            .find(|o| o.id == id)
            .ok_or(BackendError::Unsupported("unknown output"))
    }

    pub fn live_framebuffers(&self) -> HashSet<u32> {
        self.framebuffers.keys().copied().collect()
    }

    /// Pretend something else already drives the crtc.
    pub fn preset_crtc(&mut self, crtc: u32, position: (u32, u32), mode: FakeMode) {
        self.crtcs.insert(
            crtc,
            CrtcState {
                position,
                framebuffer: Some(1),
                mode: Some(mode),
            },
        );
    }
}

impl OutputBackend for FakeBackend {
    type Output = u32;
    type Crtc = u32;
    type Framebuffer = u32;
    type Mode = FakeMode;

    fn outputs(&self) -> Result<Vec<u32>, BackendError> {
        Ok(self.outputs.iter().map(|o| o.id).collect())
    }

    fn is_connected(&self, output: u32) -> Result<bool, BackendError> {
        self.connection_queries.set(self.connection_queries.get() + 1);
        Ok(self.output(output)?.connected)
    }

    fn preferred_mode(&self, output: u32) -> Result<Option<FakeMode>, BackendError> {
        Ok(self.output(output)?.modes.first().copied())
    }

    fn available_modes(&self, output: u32) -> Result<Vec<FakeMode>, BackendError> {
        let mut modes = self.output(output)?.modes.clone();
        modes.sort_by(|a, b| b.dimensions().cmp(&a.dimensions()));
        Ok(modes)
    }

    fn is_internal(&self, output: u32) -> Result<bool, BackendError> {
        Ok(self.output(output)?.internal)
    }

    fn physical_size(&self, output: u32) -> Result<(u32, u32), BackendError> {
        Ok(self.output(output)?.mm)
    }

    fn crtcs_for_output(&self, output: u32) -> Result<Vec<u32>, BackendError> {
        Ok(self.output(output)?.crtcs.clone())
    }

    fn crtc_state(&self, crtc: u32) -> Result<CrtcState<u32, FakeMode>, BackendError> {
        Ok(self.crtcs.get(&crtc).copied().unwrap_or(CrtcState {
            position: (0, 0),
            framebuffer: None,
            mode: None,
        }))
    }

    fn set_crtc(
        &mut self,
        crtc: u32,
        position: (u32, u32),
        framebuffer: u32,
        mode: FakeMode,
        output: u32,
    ) -> Result<(), BackendError> {
        match self.fail_set_crtc {
            Some(0) => {
                self.fail_set_crtc = None;
                return Err(BackendError::Unsupported("scripted set_crtc failure"));
            }
            Some(n) => self.fail_set_crtc = Some(n - 1),
            None => {}
        }

        self.set_crtc_calls.push(SetCrtcCall {
            crtc,
            position,
            framebuffer,
            mode: mode.dimensions(),
            output,
        });
        self.crtcs.insert(
            crtc,
            CrtcState {
                position,
                framebuffer: Some(framebuffer),
                mode: Some(mode),
            },
        );
        Ok(())
    }

    fn create_framebuffer(&mut self, width: u32, height: u32) -> Result<u32, BackendError> {
        if self.fail_create_framebuffer {
            return Err(BackendError::Unsupported("scripted framebuffer failure"));
        }
        let fb = self.next_framebuffer;
        self.next_framebuffer += 1;
        self.framebuffers.insert(fb, (width, height));
        Ok(fb)
    }

    fn destroy_framebuffer(&mut self, framebuffer: u32) -> Result<(), BackendError> {
        self.framebuffers
            .remove(&framebuffer)
            .map(|_| ())
            .ok_or(BackendError::Unsupported("destroying unknown framebuffer"))
    }
}
