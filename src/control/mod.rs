//! Control channel between a tether client and the supervisor.
//!
//! A client connects to a local socket and sends one length-prefixed
//! configuration line describing the interface it wants. The supervisor side
//! accepts connections one at a time in [`listener`]; [`client`] is the host
//! side of the same exchange.

pub mod client;
pub(crate) mod listener;
pub mod protocol;
pub mod socket;

pub use client::{ClientError, ControlClient, ControlTarget};
pub use listener::ListenerOptions;
pub use protocol::{
    InterfaceSpec, IpPrefix, MAX_CONFIG_LENGTH, ParseError, ParseOutcome, ProtocolError,
    QUIT_MESSAGE, build_parameters, parse,
};
pub use socket::{ControlSocketServer, DEFAULT_SOCKET_NAME, SocketName};
