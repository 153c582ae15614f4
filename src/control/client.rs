//! Client side of the control protocol.
//!
//! Used by the host end of a tether: connect to the supervisor (directly
//! over a local socket, or through a forwarded TCP port), send one
//! configuration line, then hand the connection to a forwarding engine.

use std::fmt;
use std::io::{self, Write};
use std::net::{Ipv4Addr, TcpStream};
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;

use thiserror::Error;
use tracing::info;

use super::protocol::{ProtocolError, QUIT_MESSAGE, write_config_line};
use super::socket::SocketName;

/// Errors from client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Failed to connect to the control endpoint.
    #[error("Failed to connect to {target}: {source}")]
    Connect {
        /// Endpoint we tried to reach.
        target: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Failed to send the configuration line.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Where the supervisor's control socket can be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlTarget {
    /// A TCP port on the loopback interface (e.g. set up by `adb forward`).
    Tcp(u16),
    /// A local socket name.
    Local(SocketName),
}

impl ControlTarget {
    /// A non-zero number is a TCP port, anything else a socket name.
    pub fn parse(target: &str) -> Self {
        match target.parse::<u16>() {
            Ok(port) if port != 0 => Self::Tcp(port),
            _ => Self::Local(SocketName::parse(target)),
        }
    }
}

impl fmt::Display for ControlTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(port) => write!(f, "{}:{}", Ipv4Addr::LOCALHOST, port),
            Self::Local(name) => write!(f, "{name}"),
        }
    }
}

enum Connection {
    Tcp(TcpStream),
    Local(UnixStream),
}

/// A connected control client.
pub struct ControlClient {
    connection: Connection,
}

impl ControlClient {
    /// Connect to a supervisor.
    pub fn connect(target: &ControlTarget) -> Result<Self, ClientError> {
        let connected = match target {
            ControlTarget::Tcp(port) => {
                TcpStream::connect((Ipv4Addr::LOCALHOST, *port)).map(Connection::Tcp)
            }
            ControlTarget::Local(name) => name.connect().map(Connection::Local),
        };

        let connection = connected.map_err(|source| ClientError::Connect {
            target: target.to_string(),
            source,
        })?;
        info!("Connected to {}", target);
        Ok(Self { connection })
    }

    fn writer(&mut self) -> &mut dyn Write {
        match &mut self.connection {
            Connection::Tcp(stream) => stream,
            Connection::Local(stream) => stream,
        }
    }

    /// Send the configuration line.
    pub fn send_config(&mut self, line: &str) -> Result<(), ClientError> {
        write_config_line(self.writer(), line)?;
        Ok(())
    }

    /// Send the quit message.
    pub fn send_quit(&mut self) -> Result<(), ClientError> {
        let writer = self.writer();
        writer.write_all(&QUIT_MESSAGE)?;
        writer.flush()?;
        Ok(())
    }

    /// Give up the connection, e.g. to pass it to a forwarding engine.
    pub fn into_fd(self) -> OwnedFd {
        match self.connection {
            Connection::Tcp(stream) => stream.into(),
            Connection::Local(stream) => stream.into(),
        }
    }
}
