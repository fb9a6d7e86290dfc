// SPDX-License-Identifier: GPL-3.0-only

use crate::state::State;
use anyhow::{Context, Result};
use calloop::{
    signals::{Signal, Signals},
    LoopHandle,
};
use tracing::info;

/// SIGUSR1 cycles the display mode, like the projection hotkey would.
pub fn listen(handle: &LoopHandle<'static, State>) -> Result<()> {
    let signals = Signals::new(&[Signal::SIGINT, Signal::SIGTERM, Signal::SIGUSR1])
        .context("Failed to block signals")?;

    handle
        .insert_source(signals, |event, _, state| match event.signal() {
            Signal::SIGUSR1 => state.cycle_display_mode(),
            signal => {
                info!("Quitting due to receiving signal {:?}", signal);
                state.loop_signal.stop();
            }
        })
        .map_err(|err| err.error)
        .context("Failed to add signal source to event loop")?;

    Ok(())
}
