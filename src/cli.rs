//! Command-line interface definitions for vpn-tether.
//!
//! Uses clap's derive API for type-safe argument parsing.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Tether a VPN-style tun interface over a local control socket.
///
/// `serve` runs the supervisor: it listens on a control socket, creates a tun
/// interface for each client configuration and forwards packets until the
/// client goes away. `connect` is the other end: it opens a local tun
/// interface, sends the configuration and forwards packets over the same
/// connection.
#[derive(Parser, Debug)]
#[command(name = "vpn-tether")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Commands,

    /// Path to additional config file.
    ///
    /// This config file is merged on top of system and user configs,
    /// giving it the highest priority (except for CLI flags).
    #[arg(short = 'c', long = "config", value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity.
    ///
    /// Can be specified multiple times:
    /// -v    = info level
    /// -vv   = debug level
    /// -vvv  = trace level
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

/// Subcommands for vpn-tether.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the supervisor until SIGINT/SIGTERM or until the listener ends.
    Serve {
        /// Control socket name (a name containing `/` is a filesystem path).
        #[arg(short = 's', long = "socket", value_name = "NAME")]
        socket: Option<String>,
    },

    /// Connect a local tun interface to a running supervisor.
    ///
    /// Options are turned into the configuration line: `-x` starts a new
    /// parameter tagged `x` and every following argument becomes a field,
    /// e.g. `-a 10.0.0.2 24 -r 0.0.0.0 0 -m 1400`. Put them after `--` when a
    /// tag would clash with one of this command's own flags.
    Connect {
        /// Local tun interface to forward packets to.
        tun: String,

        /// TCP port on 127.0.0.1, or a local socket name.
        #[arg(value_name = "PORT|NAME")]
        target: String,

        /// Interface options sent to the supervisor.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        options: Vec<String>,
    },
}

impl Cli {
    /// Socket name given on the command line, if any.
    pub fn socket_override(&self) -> Option<&str> {
        match &self.command {
            Commands::Serve { socket } => socket.as_deref(),
            Commands::Connect { .. } => None,
        }
    }
}
