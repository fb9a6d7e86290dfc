// SPDX-License-Identifier: GPL-3.0-only

use anyhow::Result;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init_logger() -> Result<()> {
    let directives = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            "display_configurator=debug,info".to_owned()
        } else {
            "info".to_owned()
        }
    });
    let env_filter = EnvFilter::builder().parse_lossy(directives);

    // journald is optional, e.g. when running nested in a terminal
    let (journald, journald_err) = match tracing_journald::layer() {
        Ok(layer) => (Some(layer), None),
        Err(err) => (None, Some(err)),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact())
        .with(journald)
        .with(env_filter)
        .try_init()?;
    log_panics::init();

    if let Some(err) = journald_err {
        warn!(?err, "Failed to connect to journald, logging to stderr only.");
    }
    info!("Version: {}", std::env!("CARGO_PKG_VERSION"));
    debug!(
        "Debug build ({})",
        std::option_env!("GIT_HASH").unwrap_or("Unknown")
    );

    Ok(())
}
