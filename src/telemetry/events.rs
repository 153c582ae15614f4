//! Audit event types for structured logging.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::session::EngineStatus;

/// Audit events for the control listener and its sessions.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Control listener bound and accepting.
    ListenerStart {
        /// Socket name the listener is bound to.
        socket: String,
        /// Process ID of the supervisor.
        pid: u32,
    },

    /// Control listener exited.
    ListenerStop {
        /// Socket name the listener was bound to.
        socket: String,
        /// Why it exited.
        cause: String,
    },

    /// A control connection was closed without starting a session.
    ConnectionRejected {
        /// Rejection category.
        reason: RejectReason,
        /// Offending parameter or error text.
        detail: String,
    },

    /// The platform refused to create an interface; the listener ends.
    EstablishmentRefused {
        /// Socket name of the listener that ended.
        socket: String,
    },

    /// A forwarding session started.
    SessionStart {
        /// Session identity.
        session: Uuid,
        /// Interface being forwarded.
        interface: String,
        /// Client-chosen session name.
        label: Option<String>,
    },

    /// A forwarding session ended.
    SessionEnd {
        /// Session identity.
        session: Uuid,
        /// Engine exit status.
        status: EngineStatus,
        /// Session length in seconds.
        duration_sec: u64,
    },
}

/// Reasons a control connection is rejected.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Declared length above the limit.
    Oversized,
    /// A parameter failed to convert.
    BadParameter,
    /// The configuration line could not be read.
    ReadFailed,
    /// The interface could not be created or configured.
    EstablishFailed,
}

/// Wrapper for serializing events with timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct TimestampedEvent<'a> {
    /// ISO8601 timestamp.
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,

    /// The actual event (flattened into this struct).
    #[serde(flatten)]
    pub event: &'a AuditEvent,
}

impl AuditEvent {
    /// Wrap this event with a timestamp for serialization.
    pub fn with_timestamp(&self) -> TimestampedEvent<'_> {
        TimestampedEvent {
            timestamp: Utc::now(),
            event: self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json(event: &AuditEvent) -> String {
        serde_json::to_string(&event.with_timestamp()).unwrap()
    }

    #[test]
    fn test_session_start_serialization() {
        let id = Uuid::new_v4();
        let out = json(&AuditEvent::SessionStart {
            session: id,
            interface: "tether0".to_string(),
            label: Some("laptop".to_string()),
        });

        assert!(out.contains("\"event\":\"session_start\""));
        assert!(out.contains(&format!("\"session\":\"{id}\"")));
        assert!(out.contains("\"interface\":\"tether0\""));
        assert!(out.contains("\"label\":\"laptop\""));
        assert!(out.contains("\"ts\""));
    }

    #[test]
    fn test_session_end_serialization() {
        let out = json(&AuditEvent::SessionEnd {
            session: Uuid::new_v4(),
            status: EngineStatus(104),
            duration_sec: 42,
        });

        assert!(out.contains("\"event\":\"session_end\""));
        assert!(out.contains("\"status\":104"));
        assert!(out.contains("\"duration_sec\":42"));
    }

    #[test]
    fn test_connection_rejected_serialization() {
        let out = json(&AuditEvent::ConnectionRejected {
            reason: RejectReason::BadParameter,
            detail: "a,bad,24".to_string(),
        });

        assert!(out.contains("\"event\":\"connection_rejected\""));
        assert!(out.contains("\"reason\":\"bad_parameter\""));
        assert!(out.contains("\"detail\":\"a,bad,24\""));
    }

    #[test]
    fn test_listener_stop_serialization() {
        let out = json(&AuditEvent::ListenerStop {
            socket: "@vpntether".to_string(),
            cause: "interface refused".to_string(),
        });

        assert!(out.contains("\"event\":\"listener_stop\""));
        assert!(out.contains("\"cause\":\"interface refused\""));
    }
}
