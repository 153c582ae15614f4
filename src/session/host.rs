//! Single-session slot shared by the listener thread and the supervisor.
//!
//! The listener thread installs a session here right before it calls into
//! the forwarding engine and clears it when the engine returns. `stop()`
//! takes the session out from the caller's thread to signal the engine.
//! Both sides go through one mutex, and the `stopping` flag lives under the
//! same lock so a session can never be installed after a stop has begun.

use std::io;
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::engine::{EngineStatus, ForwardingEngine};
use super::state::{ListenerState, SessionId, SessionInfo};
use crate::interface::EstablishedInterface;
use crate::telemetry::{AuditEvent, AuditLogger};

/// The running session and the write end of its control channel.
pub(crate) struct ActiveSession {
    pub(crate) info: SessionInfo,
    pub(crate) control: UnixStream,
}

#[derive(Default)]
struct SessionSlot {
    active: Option<ActiveSession>,
    stopping: bool,
}

/// How a handoff to the engine ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionOutcome {
    /// The engine ran and returned this status.
    Finished(EngineStatus),
    /// A stop was already in progress; the engine was never called.
    Cancelled,
}

pub(crate) struct SessionHost {
    engine: Arc<dyn ForwardingEngine>,
    slot: Mutex<SessionSlot>,
    state: Arc<watch::Sender<ListenerState>>,
    audit: Option<Arc<AuditLogger>>,
}

impl SessionHost {
    pub(crate) fn new(
        engine: Arc<dyn ForwardingEngine>,
        state: Arc<watch::Sender<ListenerState>>,
        audit: Option<Arc<AuditLogger>>,
    ) -> Self {
        Self {
            engine,
            slot: Mutex::new(SessionSlot::default()),
            state,
            audit,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_state(&self, state: ListenerState) {
        self.state.send_replace(state);
    }

    pub(crate) fn audit(&self, event: AuditEvent) {
        if let Some(audit) = &self.audit {
            audit.log(event);
        }
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.lock().stopping
    }

    /// Mark the host as stopping and take the active session, if any.
    pub(crate) fn begin_stop(&self) -> Option<ActiveSession> {
        let mut slot = self.lock();
        slot.stopping = true;
        slot.active.take()
    }

    pub(crate) fn active_session(&self) -> Option<SessionInfo> {
        self.lock().active.as_ref().map(|s| s.info.clone())
    }

    /// Promote an accepted connection to the active session and block in
    /// the engine until it returns.
    pub(crate) fn run(
        &self,
        data: OwnedFd,
        interface: EstablishedInterface,
        label: Option<String>,
    ) -> io::Result<SessionOutcome> {
        let (control, control_engine) = UnixStream::pair()?;
        let info = SessionInfo {
            id: SessionId::new(),
            label,
            interface: interface.name,
            started_at: Utc::now(),
        };
        let id = info.id;

        {
            let mut slot = self.lock();
            if slot.stopping {
                debug!("Stop in progress, dropping session before it starts");
                return Ok(SessionOutcome::Cancelled);
            }
            if let Some(previous) = slot.active.replace(ActiveSession {
                info: info.clone(),
                control,
            }) {
                // Sessions run one at a time on the listener thread
                warn!("Replacing stale session {}", previous.info.id);
            }
        }

        self.set_state(ListenerState::ConnectionActive(id));
        self.audit(AuditEvent::SessionStart {
            session: id.as_uuid(),
            interface: info.interface.clone(),
            label: info.label.clone(),
        });
        info!(session = %id, interface = %info.interface, "Forwarding");

        let started = Instant::now();
        let status = self
            .engine
            .forward(OwnedFd::from(control_engine), data, interface.fd);

        {
            let mut slot = self.lock();
            if slot.active.as_ref().is_some_and(|s| s.info.id == id) {
                slot.active = None;
            }
            if !slot.stopping {
                self.set_state(ListenerState::Listening);
            }
        }

        if status.is_success() {
            info!(session = %id, "Forwarding finished");
        } else {
            warn!(session = %id, "Forwarding exited with status {}", status);
        }
        self.audit(AuditEvent::SessionEnd {
            session: id.as_uuid(),
            status,
            duration_sec: started.elapsed().as_secs(),
        });

        Ok(SessionOutcome::Finished(status))
    }
}
