//! Forwarding engine boundary.

use std::fmt;
use std::io;
use std::os::fd::OwnedFd;

use serde::Serialize;

/// Exit status of a forwarding run: an errno value, `0` for a clean stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct EngineStatus(pub i32);

impl EngineStatus {
    /// Stopped through the control handle or by a clean disconnect.
    pub const CLEAN: Self = Self(0);

    /// Status for an I/O failure.
    pub fn from_io(error: &io::Error) -> Self {
        Self(error.raw_os_error().unwrap_or(libc::EIO))
    }

    /// `true` for a clean exit.
    pub fn is_success(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_success() {
            write!(f, "0 (clean)")
        } else {
            write!(f, "{} ({})", self.0, io::Error::from_raw_os_error(self.0))
        }
    }
}

/// Moves packets between a client stream and an interface.
///
/// `forward` takes ownership of all three handles and must close them before
/// returning. It blocks until `control` becomes readable (a byte was written
/// or the writer closed), or until either data handle fails or closes.
/// Each call serves exactly one session.
pub trait ForwardingEngine: Send + Sync {
    /// Run one session to completion.
    fn forward(&self, control: OwnedFd, data: OwnedFd, interface: OwnedFd) -> EngineStatus;
}

impl<F> ForwardingEngine for F
where
    F: Fn(OwnedFd, OwnedFd, OwnedFd) -> EngineStatus + Send + Sync,
{
    fn forward(&self, control: OwnedFd, data: OwnedFd, interface: OwnedFd) -> EngineStatus {
        self(control, data, interface)
    }
}
