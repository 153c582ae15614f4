//! Audit telemetry for vpn-tether.
//!
//! Listener and session lifecycle events are written to syslog as JSON with
//! the `VPN_TETHER` tag. This is separate from the `tracing` diagnostics that
//! go to stderr.
//!
//! # Event Format
//!
//! ```json
//! {"ts":"2026-03-02T09:14:11Z","event":"session_start","session":"6f1c...","interface":"tether0","label":"laptop"}
//! ```

mod error;
mod events;
mod syslog;

pub use error::TelemetryError;
pub use events::{AuditEvent, RejectReason};
pub use syslog::{AuditLogger, SYSLOG_TAG};
