//! Session supervisor: owns the listener thread and at most one session.
//!
//! `start()` launches the control listener on its own thread and returns as
//! soon as the thread exists. Outcomes that happen later (a refused interface,
//! an engine failure, a bind error) are published as [`ListenerState`]
//! transitions that callers can poll with [`Supervisor::state`] or wait on
//! with [`Supervisor::subscribe`].

use std::io;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::engine::ForwardingEngine;
use super::host::SessionHost;
use super::shutdown::{self, StopReport};
use super::state::{ListenerState, SessionInfo};
use crate::config::Config;
use crate::control::listener::{ControlListener, ListenerOptions};
use crate::control::socket::SocketName;
use crate::interface::Establisher;
use crate::telemetry::{AuditEvent, AuditLogger};

/// Name of the listener thread.
pub const LISTENER_THREAD_NAME: &str = "tether-listener";

/// Supervisor settings.
#[derive(Debug, Clone, Default)]
pub struct SupervisorOptions {
    /// Socket name used when `start` is called without one.
    pub default_socket: SocketName,
    /// Per-connection listener settings.
    pub listener: ListenerOptions,
    /// Upper bound on joining the listener thread in `stop`; `None` waits
    /// until it exits.
    pub join_timeout: Option<Duration>,
}

impl From<&Config> for SupervisorOptions {
    fn from(config: &Config) -> Self {
        Self {
            default_socket: SocketName::parse(config.control.socket_name()),
            listener: ListenerOptions {
                read_timeout: config.control.read_timeout(),
                stop_on_engine_failure: config.engine.stop_on_failure(),
            },
            join_timeout: config.shutdown.join_timeout(),
        }
    }
}

/// A running listener thread and what is needed to stop it.
struct Runner {
    socket: SocketName,
    host: Arc<SessionHost>,
    thread: JoinHandle<()>,
    done: mpsc::Receiver<()>,
}

/// Owns the control listener and the forwarding session it runs.
pub struct Supervisor {
    establisher: Arc<dyn Establisher>,
    engine: Arc<dyn ForwardingEngine>,
    options: SupervisorOptions,
    audit: Option<Arc<AuditLogger>>,
    state: Arc<watch::Sender<ListenerState>>,
    runner: Option<Runner>,
}

impl Supervisor {
    /// Create an idle supervisor.
    pub fn new(
        establisher: Arc<dyn Establisher>,
        engine: Arc<dyn ForwardingEngine>,
        options: SupervisorOptions,
    ) -> Self {
        let (state, _) = watch::channel(ListenerState::Idle);
        Self {
            establisher,
            engine,
            options,
            audit: None,
            state: Arc::new(state),
            runner: None,
        }
    }

    /// Send audit events to the given logger.
    #[must_use]
    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Start listening on `socket_name`, or on the configured default name.
    ///
    /// A listener that is already running is stopped first. Errors only
    /// report a failure to spawn the thread; everything after that shows up
    /// through [`Supervisor::subscribe`].
    pub fn start(&mut self, socket_name: Option<&str>) -> io::Result<()> {
        if self.runner.is_some() {
            debug!("Listener already running, stopping it first");
            self.stop();
        }

        let socket = socket_name
            .map(SocketName::parse)
            .unwrap_or_else(|| self.options.default_socket.clone());
        let host = Arc::new(SessionHost::new(
            Arc::clone(&self.engine),
            Arc::clone(&self.state),
            self.audit.clone(),
        ));
        let listener = ControlListener::new(
            socket.clone(),
            Arc::clone(&self.establisher),
            Arc::clone(&host),
            self.options.listener,
        );

        let (done_tx, done) = mpsc::channel::<()>();
        let thread_host = Arc::clone(&host);
        let thread_socket = socket.clone();
        let thread = thread::Builder::new()
            .name(LISTENER_THREAD_NAME.to_string())
            .spawn(move || {
                let cause = listener.run();
                if cause.is_failure() {
                    warn!("Listener on {} terminated: {}", thread_socket, cause);
                } else {
                    info!("Listener on {} terminated: {}", thread_socket, cause);
                }
                thread_host.audit(AuditEvent::ListenerStop {
                    socket: thread_socket.to_string(),
                    cause: cause.to_string(),
                });
                thread_host.set_state(ListenerState::Terminated(cause));
                drop(done_tx);
            })?;

        info!("Started listener on {}", socket);
        self.runner = Some(Runner {
            socket,
            host,
            thread,
            done,
        });
        Ok(())
    }

    /// Stop the active session and the listener, then join the thread.
    ///
    /// Returns immediately with [`StopReport::NotRunning`] if nothing was
    /// started.
    pub fn stop(&mut self) -> StopReport {
        let Some(runner) = self.runner.take() else {
            return StopReport::NotRunning;
        };
        shutdown::shutdown(
            &runner.host,
            &runner.socket,
            runner.thread,
            runner.done,
            self.options.join_timeout,
        )
    }

    /// Current listener state.
    pub fn state(&self) -> ListenerState {
        self.state.borrow().clone()
    }

    /// Watch listener state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ListenerState> {
        self.state.subscribe()
    }

    /// The session currently forwarding, if any.
    pub fn active_session(&self) -> Option<SessionInfo> {
        self.runner
            .as_ref()
            .and_then(|runner| runner.host.active_session())
    }

    /// `true` while a listener thread is owned by this supervisor. A listener
    /// that terminated on its own still counts until `stop` joins it.
    pub fn is_running(&self) -> bool {
        self.runner.is_some()
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if self.runner.is_some() {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::protocol::InterfaceSpec;
    use crate::interface::{EstablishError, Establishment};
    use crate::session::engine::EngineStatus;
    use crate::session::state::TerminationCause;
    use std::os::fd::OwnedFd;
    use tempfile::tempdir;

    struct RefusingEstablisher;

    impl Establisher for RefusingEstablisher {
        fn establish(&self, _spec: &InterfaceSpec) -> Result<Establishment, EstablishError> {
            Ok(Establishment::Refused)
        }
    }

    fn supervisor() -> Supervisor {
        Supervisor::new(
            Arc::new(RefusingEstablisher),
            Arc::new(|_c: OwnedFd, _d: OwnedFd, _i: OwnedFd| EngineStatus::CLEAN),
            SupervisorOptions::default(),
        )
    }

    fn wait_for(supervisor: &Supervisor, predicate: impl Fn(&ListenerState) -> bool) {
        for _ in 0..500 {
            if predicate(&supervisor.state()) {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("timed out, last state {:?}", supervisor.state());
    }

    #[test]
    fn test_stop_without_start() {
        let mut supervisor = supervisor();
        assert!(matches!(supervisor.stop(), StopReport::NotRunning));
        assert_eq!(supervisor.state(), ListenerState::Idle);
        assert!(supervisor.active_session().is_none());
    }

    #[test]
    fn test_start_then_stop_from_accept() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ctl.sock");
        let mut supervisor = supervisor();

        supervisor.start(path.to_str()).unwrap();
        wait_for(&supervisor, |s| *s == ListenerState::Listening);
        assert!(supervisor.is_running());

        let report = supervisor.stop();
        assert!(report.is_joined());
        assert_eq!(
            supervisor.state(),
            ListenerState::Terminated(TerminationCause::Stopped)
        );
        assert!(!path.exists());
    }

    #[test]
    fn test_bind_failure_is_published() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("ctl.sock");
        let mut supervisor = supervisor();

        supervisor.start(path.to_str()).unwrap();
        wait_for(&supervisor, ListenerState::is_terminated);
        assert!(matches!(
            supervisor.state(),
            ListenerState::Terminated(TerminationCause::ListenerFailed(_))
        ));
        assert!(supervisor.stop().is_joined());
    }

    #[test]
    fn test_options_from_config() {
        let config = Config::default();
        let options = SupervisorOptions::from(&config);
        assert_eq!(options.default_socket, SocketName::default());
        assert_eq!(options.listener.read_timeout, Some(Duration::from_millis(5000)));
        assert!(!options.listener.stop_on_engine_failure);
        assert_eq!(options.join_timeout, None);
    }
}
