//! Shutdown coordination for a running listener.
//!
//! The listener thread can be blocked in one of two calls that nothing can
//! interrupt directly:
//!
//! - the forwarding engine, which returns once its control handle becomes
//!   readable, so stop writes a zero byte there and closes it;
//! - `accept` on the control socket. Closing the listening socket from
//!   another thread does not reliably wake a pending accept, so stop connects
//!   to the socket and sends the quit message. The listener accepts it, sees
//!   that a stop is in progress and exits.
//!
//! Both signals are best effort. Their failures are recorded in the
//! [`StopReport`] and logged, and the thread is joined regardless.

use std::io::{self, Write};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::host::{ActiveSession, SessionHost};
use super::state::SessionId;
use crate::control::protocol::QUIT_MESSAGE;
use crate::control::socket::SocketName;

/// Result of signalling the forwarding engine.
#[derive(Debug)]
pub enum SignalOutcome {
    /// No session was active.
    NoSession,
    /// The control byte was written and the handle closed.
    Signalled(SessionId),
    /// Writing the control byte failed; the handle was still closed.
    Failed(SessionId, io::Error),
}

/// Result of waking a blocked accept.
#[derive(Debug)]
pub enum SentinelOutcome {
    /// The quit message was delivered to the control socket.
    Delivered,
    /// Connecting or writing failed (the listener may already be gone).
    Failed(io::Error),
}

/// Result of waiting for the listener thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The thread exited and was joined.
    Joined,
    /// The thread panicked.
    Panicked,
    /// The bounded wait ran out; the thread was left detached.
    TimedOut,
}

/// What `stop()` did.
#[derive(Debug)]
pub enum StopReport {
    /// No listener was running.
    NotRunning,
    /// A listener was shut down.
    Stopped {
        /// Engine signalling step.
        signal: SignalOutcome,
        /// Accept wake-up step.
        sentinel: SentinelOutcome,
        /// Thread join step.
        join: JoinOutcome,
    },
}

impl StopReport {
    /// `true` if no thread is left running.
    pub fn is_joined(&self) -> bool {
        matches!(
            self,
            Self::NotRunning
                | Self::Stopped {
                    join: JoinOutcome::Joined | JoinOutcome::Panicked,
                    ..
                }
        )
    }
}

/// Signal the engine, wake the accept loop, and join the listener thread.
pub(crate) fn shutdown(
    host: &SessionHost,
    socket: &SocketName,
    thread: JoinHandle<()>,
    done: Receiver<()>,
    join_timeout: Option<Duration>,
) -> StopReport {
    let signal = signal_engine(host.begin_stop());
    let sentinel = send_sentinel(socket);
    let join = join_listener(thread, done, join_timeout);

    let report = StopReport::Stopped {
        signal,
        sentinel,
        join,
    };
    log_report(socket, &report);
    report
}

/// Write a zero byte to the session's control handle, then close it.
pub(crate) fn signal_engine(active: Option<ActiveSession>) -> SignalOutcome {
    let Some(mut session) = active else {
        return SignalOutcome::NoSession;
    };
    let id = session.info.id;
    let result = session
        .control
        .write_all(&[0])
        .and_then(|()| session.control.flush());
    // Dropping closes the control handle
    drop(session);

    match result {
        Ok(()) => SignalOutcome::Signalled(id),
        Err(e) => SignalOutcome::Failed(id, e),
    }
}

/// Connect to the control socket and send the quit message.
pub(crate) fn send_sentinel(socket: &SocketName) -> SentinelOutcome {
    let result = socket.connect().and_then(|mut stream| {
        stream.write_all(&QUIT_MESSAGE)?;
        stream.flush()
    });

    match result {
        Ok(()) => SentinelOutcome::Delivered,
        Err(e) => SentinelOutcome::Failed(e),
    }
}

fn join_listener(
    thread: JoinHandle<()>,
    done: Receiver<()>,
    timeout: Option<Duration>,
) -> JoinOutcome {
    if let Some(timeout) = timeout {
        // The sender is dropped as the thread finishes
        if let Err(RecvTimeoutError::Timeout) = done.recv_timeout(timeout) {
            return JoinOutcome::TimedOut;
        }
    }

    match thread.join() {
        Ok(()) => JoinOutcome::Joined,
        Err(_) => JoinOutcome::Panicked,
    }
}

fn log_report(socket: &SocketName, report: &StopReport) {
    let StopReport::Stopped {
        signal,
        sentinel,
        join,
    } = report
    else {
        return;
    };

    match signal {
        SignalOutcome::NoSession => debug!("No active session to signal"),
        SignalOutcome::Signalled(id) => debug!(session = %id, "Signalled forwarding engine"),
        SignalOutcome::Failed(id, e) => {
            debug!(session = %id, "Control write failed (session may be gone): {}", e)
        }
    }
    match sentinel {
        SentinelOutcome::Delivered => debug!("Sent quit message to {}", socket),
        SentinelOutcome::Failed(e) => debug!("Quit message to {} not delivered: {}", socket, e),
    }
    match join {
        JoinOutcome::Joined => info!("Listener on {} stopped", socket),
        JoinOutcome::Panicked => error!("Listener thread on {} panicked", socket),
        JoinOutcome::TimedOut => {
            warn!("Listener on {} did not exit in time; leaving it detached", socket)
        }
    }
}
