//! File logging.
//!
//! The terminal is owned by the UI, so all tracing output goes to `debug.log`
//! in the working directory. Filter with `RUST_LOG`, e.g.
//! `RUST_LOG=dashty::websocket=debug`.

use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

pub const LOG_FILE: &str = "debug.log";

pub fn init() -> std::io::Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(LOG_FILE)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(true)
        .init();

    tracing::info!("starting dashty {}", env!("CARGO_PKG_VERSION"));
    Ok(())
}
