//! vpn-tether: control-socket supervisor for a tun tether
//!
//! A client (typically a host reached over a forwarded port) connects to a
//! local control socket and sends one configuration line describing the
//! interface it wants: addresses, routes, DNS servers, MTU. The supervisor
//! creates a tun interface from it and hands the connection and the
//! interface to a forwarding engine that moves packets between them until
//! the session ends.
//!
//! # Architecture
//!
//! - **Control**: wire protocol, local socket naming, the accept loop and the
//!   host-side client
//! - **Interface**: tun creation behind a permission broker
//! - **Session**: forwarding engine, supervisor and shutdown coordination
//! - **Config**: Hierarchical TOML configuration
//! - **Telemetry**: Structured syslog logging for audit trails

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod cli;
pub mod cli_handler;
pub mod config;
pub mod control;
pub mod interface;
pub mod session;
pub mod telemetry;
