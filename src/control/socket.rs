//! Local socket naming and the listening control socket.
//!
//! Control sockets are addressed by name. A plain name such as `vpntether`
//! lives in the Linux abstract namespace (the namespace `adb forward
//! localabstract:` targets), so nothing is left on disk once the listener is
//! gone. A name containing `/` is a filesystem path; a stale socket file at
//! that path is removed before binding and the file is removed again when the
//! server is dropped.

use std::fmt;
use std::io;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

/// Socket name used when the caller does not supply one.
pub const DEFAULT_SOCKET_NAME: &str = "vpntether";

/// Address of a control socket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SocketName {
    /// Abstract-namespace name (no filesystem entry).
    Abstract(String),
    /// Filesystem path.
    Path(PathBuf),
}

impl SocketName {
    /// Interpret a user-supplied name. Anything containing `/` is a path.
    pub fn parse(name: &str) -> Self {
        if name.contains('/') {
            Self::Path(PathBuf::from(name))
        } else {
            Self::Abstract(name.to_string())
        }
    }

    /// Connect to a server listening on this name.
    pub fn connect(&self) -> io::Result<UnixStream> {
        match self {
            Self::Path(path) => UnixStream::connect(path),
            Self::Abstract(name) => connect_abstract(name),
        }
    }
}

impl Default for SocketName {
    fn default() -> Self {
        Self::Abstract(DEFAULT_SOCKET_NAME.to_string())
    }
}

impl From<&str> for SocketName {
    fn from(name: &str) -> Self {
        Self::parse(name)
    }
}

impl fmt::Display for SocketName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Abstract(name) => write!(f, "@{name}"),
            Self::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

#[cfg(target_os = "linux")]
fn abstract_addr(name: &str) -> io::Result<std::os::unix::net::SocketAddr> {
    use std::os::linux::net::SocketAddrExt;
    std::os::unix::net::SocketAddr::from_abstract_name(name.as_bytes())
}

#[cfg(target_os = "linux")]
fn connect_abstract(name: &str) -> io::Result<UnixStream> {
    UnixStream::connect_addr(&abstract_addr(name)?)
}

#[cfg(target_os = "linux")]
fn bind_abstract(name: &str) -> io::Result<UnixListener> {
    UnixListener::bind_addr(&abstract_addr(name)?)
}

/// Without an abstract namespace, names map to a socket file in the temp dir.
#[cfg(not(target_os = "linux"))]
fn fallback_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{name}.sock"))
}

#[cfg(not(target_os = "linux"))]
fn connect_abstract(name: &str) -> io::Result<UnixStream> {
    UnixStream::connect(fallback_path(name))
}

/// Listening side of a control socket.
///
/// Accepts are blocking. Closing the listener from another thread does not
/// reliably wake a pending `accept`, so shutdown connects to it instead (see
/// [`crate::session::shutdown`]).
pub struct ControlSocketServer {
    listener: UnixListener,
    name: SocketName,
    /// Socket file to remove on drop, if any.
    cleanup: Option<PathBuf>,
}

impl ControlSocketServer {
    /// Bind a server on `name`.
    pub fn bind(name: &SocketName) -> io::Result<Self> {
        let (listener, cleanup) = match name {
            SocketName::Path(path) => (bind_path(path)?, Some(path.clone())),
            #[cfg(target_os = "linux")]
            SocketName::Abstract(n) => (bind_abstract(n)?, None),
            #[cfg(not(target_os = "linux"))]
            SocketName::Abstract(n) => {
                let path = fallback_path(n);
                (bind_path(&path)?, Some(path))
            }
        };

        info!("Control socket listening on {}", name);
        Ok(Self {
            listener,
            name: name.clone(),
            cleanup,
        })
    }

    /// Block until a client connects.
    pub fn accept(&self) -> io::Result<UnixStream> {
        let (stream, _addr) = self.listener.accept()?;
        debug!("Accepted control connection on {}", self.name);
        Ok(stream)
    }
}

fn bind_path(path: &Path) -> io::Result<UnixListener> {
    // Remove a stale socket file left behind by a previous run
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    UnixListener::bind(path)
}

impl Drop for ControlSocketServer {
    fn drop(&mut self) {
        if let Some(path) = &self.cleanup
            && path.exists()
            && let Err(e) = std::fs::remove_file(path)
        {
            warn!("Failed to remove socket file {:?}: {}", path, e);
        }
    }
}
