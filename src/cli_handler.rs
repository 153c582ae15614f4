//! Subcommand handling for vpn-tether.
//!
//! `serve` keeps the supervisor on the main thread and parks in a small
//! tokio runtime until a signal arrives or the listener terminates on its
//! own. `connect` runs the forwarding engine directly on the calling thread.

use anyhow::{Context, Result, bail};
use std::io;
use std::os::fd::AsFd;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cli::{Cli, Commands};
use crate::config::Config;
use crate::control::{ControlClient, ControlTarget, build_parameters};
use crate::interface::{NetAdminBroker, TunEstablisher, TunSettings, open_tun};
use crate::session::{
    ForwardingEngine, ListenerState, PacketForwarder, Supervisor, SupervisorOptions,
};
use crate::telemetry::AuditLogger;

/// Dispatch a parsed command line.
pub fn handle_command(cli: &Cli, config: &Config, audit: Arc<AuditLogger>) -> Result<()> {
    match &cli.command {
        Commands::Serve { .. } => run_serve(config, audit),
        Commands::Connect {
            tun,
            target,
            options,
        } => run_connect(tun, target, options),
    }
}

/// Run the supervisor until SIGINT/SIGTERM or listener termination.
fn run_serve(config: &Config, audit: Arc<AuditLogger>) -> Result<()> {
    let establisher = TunEstablisher::new(
        TunSettings::from(&config.interface),
        Arc::new(NetAdminBroker),
    );
    let mut supervisor = Supervisor::new(
        Arc::new(establisher),
        Arc::new(PacketForwarder),
        SupervisorOptions::from(config),
    )
    .with_audit(audit);

    supervisor
        .start(None)
        .context("Failed to start control listener")?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;
    rt.block_on(wait_for_exit(supervisor.subscribe()))?;

    let report = supervisor.stop();
    if !report.is_joined() {
        warn!("Listener thread did not exit; leaving it behind");
    }

    match supervisor.state() {
        ListenerState::Terminated(cause) if cause.is_failure() => {
            bail!("Control listener terminated: {}", cause)
        }
        state => {
            debug!("Final listener state: {:?}", state);
            Ok(())
        }
    }
}

/// Wait for SIGINT, SIGTERM or the listener ending by itself.
async fn wait_for_exit(mut state: watch::Receiver<ListenerState>) -> Result<()> {
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for SIGINT")?;
            info!("Received SIGINT, shutting down");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down");
        }
        result = state.wait_for(ListenerState::is_terminated) => {
            match result {
                Ok(state) => info!("Listener ended: {:?}", *state),
                Err(_) => debug!("Listener state channel closed"),
            }
        }
    }

    Ok(())
}

/// Host side: open the tun, send the configuration, forward until stdin
/// becomes readable or the connection ends.
fn run_connect(tun: &str, target: &str, options: &[String]) -> Result<()> {
    let line = build_parameters(options).context("Invalid interface options")?;
    let interface =
        open_tun(tun).with_context(|| format!("Failed to open tun interface {}", tun))?;

    let target = ControlTarget::parse(target);
    let mut client = ControlClient::connect(&target)?;
    client
        .send_config(&line)
        .context("Failed to send configuration")?;
    info!("Sent configuration to {}: {}", target, line);

    // Any input on stdin (or EOF) ends forwarding
    let control = io::stdin()
        .as_fd()
        .try_clone_to_owned()
        .context("Failed to duplicate stdin")?;

    let status = PacketForwarder.forward(control, client.into_fd(), interface);
    if !status.is_success() {
        bail!("Forwarding failed with status {}", status);
    }
    Ok(())
}
