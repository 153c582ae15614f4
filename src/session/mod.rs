//! Forwarding sessions and their supervision.
//!
//! - [`engine`]: the forwarding engine boundary ([`ForwardingEngine`]).
//! - [`forwarder`]: the default poll-driven [`PacketForwarder`].
//! - [`supervisor`]: [`Supervisor`], which runs the control listener on its
//!   own thread and owns the single active session.
//! - [`shutdown`]: how `stop()` unblocks the listener thread.

pub mod engine;
pub mod forwarder;
pub(crate) mod host;
pub mod shutdown;
pub mod state;
pub mod supervisor;

pub use engine::{EngineStatus, ForwardingEngine};
pub use forwarder::PacketForwarder;
pub use shutdown::{JoinOutcome, SentinelOutcome, SignalOutcome, StopReport};
pub use state::{ListenerState, SessionId, SessionInfo, TerminationCause};
pub use supervisor::{LISTENER_THREAD_NAME, Supervisor, SupervisorOptions};
