//! Control listener: the sequential accept loop.
//!
//! Each accepted connection carries one configuration line. The listener
//! parses it, asks the establisher for an interface and then blocks inside
//! the forwarding engine until the session ends, before accepting the next
//! client. Protocol and parse errors only cost the offending connection; a
//! platform refusal ends the listener.

use std::io;
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::protocol::{ParseOutcome, ProtocolError, parse, read_config_line};
use super::socket::{ControlSocketServer, SocketName};
use crate::interface::{Establisher, Establishment};
use crate::session::host::{SessionHost, SessionOutcome};
use crate::session::{ListenerState, TerminationCause};
use crate::telemetry::{AuditEvent, RejectReason};

/// Whether the accept loop keeps going after a connection.
enum Flow {
    Continue,
    Terminate(TerminationCause),
}

/// Listener settings taken from configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListenerOptions {
    /// Upper bound on reading the configuration line; `None` waits forever.
    pub read_timeout: Option<Duration>,
    /// End the listener when the engine exits with a failure status.
    pub stop_on_engine_failure: bool,
}

/// Accept loop bound to one socket name.
pub(crate) struct ControlListener {
    socket: SocketName,
    establisher: Arc<dyn Establisher>,
    host: Arc<SessionHost>,
    options: ListenerOptions,
}

impl ControlListener {
    pub(crate) fn new(
        socket: SocketName,
        establisher: Arc<dyn Establisher>,
        host: Arc<SessionHost>,
        options: ListenerOptions,
    ) -> Self {
        Self {
            socket,
            establisher,
            host,
            options,
        }
    }

    /// Bind, then serve connections until something ends the loop.
    pub(crate) fn run(&self) -> TerminationCause {
        let server = match ControlSocketServer::bind(&self.socket) {
            Ok(server) => server,
            Err(e) => {
                error!("Failed to bind control socket {}: {}", self.socket, e);
                return TerminationCause::ListenerFailed(format!("bind {}: {}", self.socket, e));
            }
        };

        // A stop that raced with binding found nothing to connect to
        if self.host.is_stopping() {
            return TerminationCause::Stopped;
        }
        self.host.set_state(ListenerState::Listening);
        self.host.audit(AuditEvent::ListenerStart {
            socket: self.socket.to_string(),
            pid: std::process::id(),
        });

        loop {
            let stream = match server.accept() {
                Ok(stream) => stream,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("Accept failed on {}: {}", self.socket, e);
                    return TerminationCause::ListenerFailed(format!("accept: {e}"));
                }
            };

            if self.host.is_stopping() {
                debug!("Stop requested, closing listener");
                return TerminationCause::Stopped;
            }

            if let Flow::Terminate(cause) = self.serve(stream) {
                return cause;
            }

            if self.host.is_stopping() {
                return TerminationCause::Stopped;
            }
        }
    }

    fn reject(&self, reason: RejectReason, detail: String) -> Flow {
        self.host.audit(AuditEvent::ConnectionRejected { reason, detail });
        Flow::Continue
    }

    /// Handle one connection. The stream is closed on every path that does
    /// not hand it to the engine.
    fn serve(&self, mut stream: UnixStream) -> Flow {
        debug!("Reading configuration line");
        if let Err(e) = stream.set_read_timeout(self.options.read_timeout) {
            warn!("Failed to set read timeout: {}", e);
        }

        let line = match read_config_line(&mut stream) {
            Ok(line) => line,
            Err(ProtocolError::MessageTooLarge(len, max)) => {
                info!("Bad configuration line: {} bytes (max {})", len, max);
                return self.reject(RejectReason::Oversized, len.to_string());
            }
            Err(e) => {
                warn!("Failed to read configuration line: {}", e);
                return self.reject(RejectReason::ReadFailed, e.to_string());
            }
        };

        let spec = match parse(&line) {
            Ok(ParseOutcome::Configure(spec)) => spec,
            Ok(ParseOutcome::Quit) => {
                debug!("Client asked to quit");
                return Flow::Continue;
            }
            Err(e) => {
                warn!("{}", e);
                return self.reject(RejectReason::BadParameter, line);
            }
        };

        let interface = match self.establisher.establish(&spec) {
            Ok(Establishment::Established(interface)) => interface,
            Ok(Establishment::Refused) => {
                warn!("Revoked!");
                self.host.audit(AuditEvent::EstablishmentRefused {
                    socket: self.socket.to_string(),
                });
                return Flow::Terminate(TerminationCause::Refused);
            }
            Err(e) => {
                error!("Failed to establish interface: {}", e);
                return self.reject(RejectReason::EstablishFailed, e.to_string());
            }
        };
        info!(interface = %interface.name, "New interface: {}", line);

        if let Err(e) = stream.set_read_timeout(None) {
            warn!("Failed to clear read timeout: {}", e);
        }

        match self.host.run(OwnedFd::from(stream), interface, spec.session_name) {
            Ok(SessionOutcome::Finished(status))
                if !status.is_success() && self.options.stop_on_engine_failure =>
            {
                // An engine woken by stop() may still report a stale errno
                if self.host.is_stopping() {
                    Flow::Terminate(TerminationCause::Stopped)
                } else {
                    Flow::Terminate(TerminationCause::EngineFailed(status))
                }
            }
            Ok(_) => Flow::Continue,
            Err(e) => {
                error!("Failed to start forwarding: {}", e);
                Flow::Continue
            }
        }
    }
}
