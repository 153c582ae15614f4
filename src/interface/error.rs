//! Interface establishment errors.

use thiserror::Error;

/// Failures while creating or configuring an interface.
///
/// These end a single connection. A platform refusal is not an error; it
/// is reported as [`super::Establishment::Refused`].
#[derive(Debug, Error)]
pub enum EstablishError {
    /// Failed to open the tun device.
    #[error("Failed to open tun device {name}: {source}")]
    Open {
        /// Requested interface name.
        name: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to spawn a configuration command.
    #[error("Failed to run {program}: {source}")]
    Spawn {
        /// Program that could not be spawned.
        program: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A configuration command exited unsuccessfully.
    #[error("Command `{command}` failed: {stderr}")]
    CommandFailed {
        /// The full command line.
        command: String,
        /// Trimmed standard error output.
        stderr: String,
    },

    /// Virtual interfaces are not supported on this platform.
    #[error("Tun interfaces are not supported on this platform")]
    Unsupported,
}
