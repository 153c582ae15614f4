//! vpn-tether: control-socket supervisor for a tun tether
//!
//! This is the main entry point for the vpn-tether binary. It handles CLI
//! argument parsing, configuration loading, telemetry initialization, and
//! dispatches to the `serve` or `connect` handler.
//!
//! # I/O Architecture
//!
//! - **Audit logging**: goes to syslog as JSON, tagged `VPN_TETHER`
//! - **Debug logging**: `tracing` to stderr, filtered by `-v` or
//!   `general.log_level`
//! - **stdin** (`connect` only): the control handle of the forwarding
//!   engine; input or EOF ends the session

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{debug, warn};
use vpn_tether::{
    cli::Cli,
    cli_handler,
    config::ConfigLoader,
    telemetry::AuditLogger,
};

fn main() -> Result<()> {
    // Parse CLI arguments first (before any other initialization)
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load(&cli)
        .context("Failed to load configuration")?;

    init_tracing(cli.verbose, config.general.log_level.as_deref())?;

    debug!("Parsed CLI arguments: {:?}", cli);
    debug!("Loaded configuration: {:?}", config);

    // Syslog may be missing in containers; keep running without audit events
    let audit = match AuditLogger::new() {
        Ok(logger) => logger,
        Err(e) => {
            warn!("Audit logging disabled: {}", e);
            AuditLogger::new_null()
        }
    };

    cli_handler::handle_command(&cli, &config, Arc::new(audit))
}

/// Initialize the tracing subscriber for debug/development logging.
///
/// This is separate from the audit telemetry which goes to syslog.
///
/// # Verbosity Levels
/// - 0 (default): `log_level` from config, then `RUST_LOG`, then warn
/// - 1 (-v): Info level
/// - 2 (-vv): Debug level
/// - 3+ (-vvv): Trace level
fn init_tracing(verbose: u8, log_level: Option<&str>) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = match verbose {
        0 => match log_level {
            Some(level) => EnvFilter::new(level),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        },
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(())
}
