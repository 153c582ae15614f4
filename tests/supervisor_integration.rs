//! Integration tests for the supervisor against real Unix sockets.
//!
//! The establisher and engine are fakes: interfaces are socket pairs and the
//! engine blocks on its control handle, recording what it received.

use std::io::{Read, Write};
use std::os::fd::OwnedFd;
use std::os::unix::net::{UnixDatagram, UnixStream};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::{TempDir, tempdir};
use vpn_tether::control::ListenerOptions;
use vpn_tether::control::protocol::{InterfaceSpec, IpPrefix, QUIT_MESSAGE, write_config_line};
use vpn_tether::interface::{EstablishError, EstablishedInterface, Establisher, Establishment};
use vpn_tether::session::{
    EngineStatus, ForwardingEngine, ListenerState, SessionInfo, StopReport, Supervisor,
    SupervisorOptions, TerminationCause,
};

/// Hands out socket pairs as interfaces. A session named `refuse` is refused.
#[derive(Default)]
struct FakeEstablisher {
    specs: Mutex<Vec<InterfaceSpec>>,
}

impl FakeEstablisher {
    fn specs(&self) -> Vec<InterfaceSpec> {
        self.specs.lock().unwrap().clone()
    }
}

impl Establisher for FakeEstablisher {
    fn establish(&self, spec: &InterfaceSpec) -> Result<Establishment, EstablishError> {
        self.specs.lock().unwrap().push(spec.clone());
        if spec.session_name.as_deref() == Some("refuse") {
            return Ok(Establishment::Refused);
        }
        let (tun, _peer) = UnixDatagram::pair().map_err(|source| EstablishError::Open {
            name: "fake0".to_string(),
            source,
        })?;
        Ok(Establishment::Established(EstablishedInterface {
            name: "fake0".to_string(),
            fd: tun.into(),
        }))
    }
}

/// Blocks until the control handle is closed and records every byte read
/// from it.
fn blocking_engine(received: Arc<Mutex<Vec<Vec<u8>>>>) -> Arc<dyn ForwardingEngine> {
    Arc::new(move |control: OwnedFd, _data: OwnedFd, _interface: OwnedFd| {
        let mut control = UnixStream::from(control);
        let mut bytes = Vec::new();
        let _ = control.read_to_end(&mut bytes);
        received.lock().unwrap().push(bytes);
        EngineStatus::CLEAN
    })
}

/// Blocks until the control handle is closed, then reports EAGAIN.
fn stale_errno_engine() -> Arc<dyn ForwardingEngine> {
    Arc::new(|control: OwnedFd, _d: OwnedFd, _i: OwnedFd| {
        let mut control = UnixStream::from(control);
        let _ = control.read_to_end(&mut Vec::new());
        EngineStatus(libc::EAGAIN)
    })
}

/// Fails immediately with EIO-like status 5.
fn failing_engine() -> Arc<dyn ForwardingEngine> {
    Arc::new(|_c: OwnedFd, _d: OwnedFd, _i: OwnedFd| EngineStatus(5))
}

// Fields drop in order: the supervisor must stop before the directory
// holding its socket goes away.
struct Harness {
    supervisor: Supervisor,
    establisher: Arc<FakeEstablisher>,
    received: Arc<Mutex<Vec<Vec<u8>>>>,
    path: PathBuf,
    _dir: TempDir,
}

impl Harness {
    fn new() -> Self {
        Self::with(None, ListenerOptions::default())
    }

    fn with(engine: Option<Arc<dyn ForwardingEngine>>, mut listener: ListenerOptions) -> Self {
        let dir = tempdir().unwrap();
        let path = dir.path().join("control.sock");
        let establisher = Arc::new(FakeEstablisher::default());
        let received = Arc::new(Mutex::new(Vec::new()));
        let engine = engine.unwrap_or_else(|| blocking_engine(Arc::clone(&received)));
        listener.read_timeout = Some(Duration::from_secs(2));

        let supervisor = Supervisor::new(
            establisher.clone(),
            engine,
            SupervisorOptions {
                listener,
                ..Default::default()
            },
        );

        Self {
            supervisor,
            establisher,
            received,
            path,
            _dir: dir,
        }
    }

    fn start(&mut self) {
        let name = self.path.to_str().unwrap().to_string();
        self.supervisor.start(Some(&name)).unwrap();
        self.wait_for(|s| *s == ListenerState::Listening);
    }

    fn wait_for(&self, predicate: impl Fn(&ListenerState) -> bool) {
        for _ in 0..500 {
            if predicate(&self.supervisor.state()) {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("timed out, last state {:?}", self.supervisor.state());
    }

    fn wait_for_session(&self, label: &str) -> SessionInfo {
        for _ in 0..500 {
            if let Some(info) = self.supervisor.active_session()
                && info.label.as_deref() == Some(label)
            {
                return info;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("session {label} never became active");
    }

    fn send(&self, line: &str) -> UnixStream {
        let mut stream = UnixStream::connect(&self.path).unwrap();
        write_config_line(&mut stream, line).unwrap();
        stream
    }

    fn received(&self) -> Vec<Vec<u8>> {
        self.received.lock().unwrap().clone()
    }
}

/// Read until the supervisor closes its end.
fn assert_closed(mut stream: UnixStream) {
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).unwrap();
    assert!(rest.is_empty());
}

fn prefix(address: &str, len: u8) -> IpPrefix {
    IpPrefix::new(address.parse().unwrap(), len).unwrap()
}

#[test]
fn test_stop_without_start_returns_immediately() {
    let mut harness = Harness::new();
    assert!(matches!(harness.supervisor.stop(), StopReport::NotRunning));
    assert_eq!(harness.supervisor.state(), ListenerState::Idle);
}

#[test]
fn test_stop_while_blocked_in_accept() {
    let mut harness = Harness::new();
    harness.start();
    assert!(harness.path.exists());

    let report = harness.supervisor.stop();
    assert!(report.is_joined());
    assert_eq!(
        harness.supervisor.state(),
        ListenerState::Terminated(TerminationCause::Stopped)
    );
    assert!(!harness.path.exists());
    assert!(harness.establisher.specs().is_empty());
}

#[test]
fn test_session_is_established_and_stopped() {
    let mut harness = Harness::new();
    harness.start();

    let client = harness.send("a,10.0.0.2,24 r,0.0.0.0,0 d,8.8.8.8 m,1500 n,sess1");
    let info = harness.wait_for_session("sess1");
    assert_eq!(info.interface, "fake0");
    harness.wait_for(|s| *s == ListenerState::ConnectionActive(info.id));

    let specs = harness.establisher.specs();
    assert_eq!(specs.len(), 1);
    assert_eq!(specs[0].addresses, vec![prefix("10.0.0.2", 24)]);
    assert_eq!(specs[0].routes, vec![prefix("0.0.0.0", 0)]);
    assert_eq!(specs[0].dns_servers, vec!["8.8.8.8".parse::<std::net::IpAddr>().unwrap()]);
    assert_eq!(specs[0].mtu, Some(1500));

    assert!(harness.supervisor.stop().is_joined());
    // The engine saw the zero byte and then the closed handle
    assert_eq!(harness.received(), vec![vec![0u8]]);
    assert!(harness.supervisor.active_session().is_none());
    assert_closed(client);
}

#[test]
fn test_oversized_message_is_rejected_and_listener_continues() {
    let mut harness = Harness::new();
    harness.start();

    let mut stream = UnixStream::connect(&harness.path).unwrap();
    // 513 bytes declared, nothing sent
    stream.write_all(&513u16.to_be_bytes()).unwrap();
    assert_closed(stream);
    assert!(harness.establisher.specs().is_empty());
    assert_eq!(harness.supervisor.state(), ListenerState::Listening);

    let _client = harness.send("a,10.0.0.2,24 n,after");
    harness.wait_for_session("after");
    assert_eq!(harness.establisher.specs().len(), 1);
}

#[test]
fn test_bad_parameter_keeps_listener_alive() {
    let mut harness = Harness::new();
    harness.start();

    assert_closed(harness.send("a,bad,24"));
    assert!(harness.establisher.specs().is_empty());
    assert_eq!(harness.supervisor.state(), ListenerState::Listening);

    let _client = harness.send("n,good");
    harness.wait_for_session("good");
}

#[test]
fn test_quit_message_from_client_is_ignored() {
    let mut harness = Harness::new();
    harness.start();

    let mut stream = UnixStream::connect(&harness.path).unwrap();
    stream.write_all(&QUIT_MESSAGE).unwrap();
    assert_closed(stream);
    assert_closed(harness.send("q a,10.0.0.2,24"));

    assert!(harness.establisher.specs().is_empty());
    assert_eq!(harness.supervisor.state(), ListenerState::Listening);

    let _client = harness.send("n,next");
    harness.wait_for_session("next");
}

#[test]
fn test_refusal_terminates_listener() {
    let mut harness = Harness::new();
    harness.start();

    assert_closed(harness.send("a,10.0.0.2,24 n,refuse"));
    harness.wait_for(ListenerState::is_terminated);
    assert_eq!(
        harness.supervisor.state(),
        ListenerState::Terminated(TerminationCause::Refused)
    );
    assert!(UnixStream::connect(&harness.path).is_err());

    assert!(harness.supervisor.stop().is_joined());
    assert_eq!(
        harness.supervisor.state(),
        ListenerState::Terminated(TerminationCause::Refused)
    );
}

#[test]
fn test_restart_with_same_name() {
    let mut harness = Harness::new();
    harness.start();
    assert!(harness.supervisor.stop().is_joined());

    harness.start();
    let _client = harness.send("n,again");
    harness.wait_for_session("again");
    assert!(harness.supervisor.stop().is_joined());
}

#[test]
fn test_start_while_active_replaces_session() {
    let mut harness = Harness::new();
    harness.start();

    let first_client = harness.send("n,one");
    let first = harness.wait_for_session("one");

    harness.start();
    // The old session was signalled and its client dropped
    assert_eq!(harness.received(), vec![vec![0u8]]);
    assert_closed(first_client);

    let _second_client = harness.send("n,two");
    let second = harness.wait_for_session("two");
    assert_ne!(first.id, second.id);
}

#[test]
fn test_engine_failure_resumes_by_default() {
    let mut harness = Harness::with(Some(failing_engine()), ListenerOptions::default());
    harness.start();

    assert_closed(harness.send("n,first"));
    assert_closed(harness.send("n,second"));

    assert_eq!(harness.establisher.specs().len(), 2);
    harness.wait_for(|s| *s == ListenerState::Listening);
}

#[test]
fn test_engine_failure_terminates_when_configured() {
    let mut harness = Harness::with(
        Some(failing_engine()),
        ListenerOptions {
            stop_on_engine_failure: true,
            ..Default::default()
        },
    );
    harness.start();

    assert_closed(harness.send("n,fails"));
    harness.wait_for(ListenerState::is_terminated);
    assert_eq!(
        harness.supervisor.state(),
        ListenerState::Terminated(TerminationCause::EngineFailed(EngineStatus(5)))
    );
    assert!(harness.supervisor.stop().is_joined());
}

#[test]
fn test_engine_status_after_stop_reports_stopped() {
    let mut harness = Harness::with(
        Some(stale_errno_engine()),
        ListenerOptions {
            stop_on_engine_failure: true,
            ..Default::default()
        },
    );
    harness.start();

    let _client = harness.send("n,held");
    harness.wait_for_session("held");

    assert!(harness.supervisor.stop().is_joined());
    assert_eq!(
        harness.supervisor.state(),
        ListenerState::Terminated(TerminationCause::Stopped)
    );
}
