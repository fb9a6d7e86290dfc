// SPDX-License-Identifier: GPL-3.0-only

use anyhow::Context;
use clap_lex::RawArgs;
use smithay::reexports::calloop::EventLoop;
use state::State;
use std::{error::Error, process};
use tracing::{error, info};

pub mod backend;
pub mod config;
pub mod configurator;
pub mod dbus;
mod logger;
mod signals;
pub mod state;
#[cfg(feature = "systemd")]
pub mod systemd;

fn main() {
    if let Err(err) = main_inner() {
        error!("Error occured in main(): {}", err);
        process::exit(1);
    }
}

fn main_inner() -> Result<(), Box<dyn Error>> {
    let raw_args = RawArgs::from_args();
    let mut cursor = raw_args.cursor();
    let git_hash = option_env!("GIT_HASH").unwrap_or("unknown");
    let mut cycle_on_start = false;

    // Parse the arguments
    while let Some(arg) = raw_args.next_os(&mut cursor) {
        match arg.to_str() {
            Some("--help") | Some("-h") => {
                print_help(env!("CARGO_PKG_VERSION"), git_hash);
                return Ok(());
            }
            Some("--version") | Some("-V") => {
                println!(
                    "display-configurator {} (git commit {})",
                    env!("CARGO_PKG_VERSION"),
                    git_hash
                );
                return Ok(());
            }
            Some("--cycle-on-start") => cycle_on_start = true,
            _ => {}
        }
    }

    // setup logger
    logger::init_logger()?;
    info!("Display configurator starting up!");

    let config = config::Config::load().context("Failed to load configuration")?;
    if config.path.is_none() {
        info!("No config file found, using defaults.");
    }

    // init event loop
    let mut event_loop =
        EventLoop::<State>::try_new().context("Failed to initialize event loop")?;
    // init backend
    let backend = backend::init_backend_auto(&event_loop.handle(), &config)?;
    let mut state = State::new(backend, config, event_loop.get_signal());
    for sink in dbus::init(&state.config) {
        state.backend.add_sink(sink);
    }
    signals::listen(&event_loop.handle())?;

    // a failed startup configuration is retried once the topology changes
    if let Err(err) = state.init_outputs() {
        error!(?err, "Failed to configure outputs.");
    }
    #[cfg(feature = "systemd")]
    systemd::ready(state.backend.display_state());
    if cycle_on_start {
        state.cycle_display_mode();
    }

    // run the event loop
    event_loop.run(None, &mut state, |_| {})?;
    info!("Shutting down");

    Ok(())
}

fn print_help(version: &str, git_rev: &str) {
    println!(
        r#"display-configurator {version} (git commit {git_rev})

Configures up to two connected outputs through KMS or X11 RandR,
mirroring or extending them, and reports when the internal panel is projecting.

Environment:
  DISPLAY_CONFIGURATOR_BACKEND  Force the `kms` or `x11` backend
  DISPLAY_CONFIGURATOR_NO_DBUS  Do not notify the power manager or logind

Signals:
  SIGUSR1  Cycle mirror / primary only / secondary only

Options:
  -h, --help          Show this message
  -V, --version       Show the version of display-configurator
  --cycle-on-start    Cycle the display mode once after startup"#
    );
}
