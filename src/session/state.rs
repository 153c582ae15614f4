//! Observable listener and session state.

use std::fmt;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::engine::EngineStatus;

/// Identity of one forwarding session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Snapshot of the active session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Session identity.
    pub id: SessionId,
    /// Client-chosen session name, if any.
    pub label: Option<String>,
    /// Interface the session forwards to.
    pub interface: String,
    /// When forwarding started.
    pub started_at: DateTime<Utc>,
}

/// Why a listener stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationCause {
    /// `stop()` was called.
    Stopped,
    /// The platform refused to establish an interface.
    Refused,
    /// The engine exited with a failure and the listener is configured to
    /// stop on engine failures.
    EngineFailed(EngineStatus),
    /// Binding or accepting on the control socket failed.
    ListenerFailed(String),
}

impl TerminationCause {
    /// `true` unless the listener was stopped on request.
    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::Stopped)
    }
}

impl fmt::Display for TerminationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Refused => write!(f, "interface refused"),
            Self::EngineFailed(status) => write!(f, "forwarding failed with status {status}"),
            Self::ListenerFailed(message) => write!(f, "listener failed: {message}"),
        }
    }
}

/// Listener state machine.
///
/// ```text
/// Idle -> Listening -> (ConnectionActive -> Listening)* -> Terminated
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ListenerState {
    /// Nothing started yet.
    #[default]
    Idle,
    /// Bound and waiting for a client.
    Listening,
    /// A forwarding session is running.
    ConnectionActive(SessionId),
    /// The listener thread has exited.
    Terminated(TerminationCause),
}

impl ListenerState {
    /// `true` once the listener has exited.
    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }

    #[test]
    fn test_termination_display() {
        assert_eq!(TerminationCause::Stopped.to_string(), "stopped");
        assert_eq!(TerminationCause::Refused.to_string(), "interface refused");
        assert!(!TerminationCause::Stopped.is_failure());
        assert!(TerminationCause::EngineFailed(EngineStatus(5)).is_failure());
    }

    #[test]
    fn test_state_default() {
        assert_eq!(ListenerState::default(), ListenerState::Idle);
        assert!(ListenerState::Terminated(TerminationCause::Refused).is_terminated());
        assert!(!ListenerState::Listening.is_terminated());
    }
}
