//! Virtual interface establishment.
//!
//! The control listener hands every parsed [`InterfaceSpec`] to an
//! [`Establisher`]. The establisher either returns a descriptor for a
//! configured interface, reports that the platform refused (which ends the
//! listener for good), or fails for this connection only.

mod broker;
mod error;
mod tun;

use std::os::fd::OwnedFd;

pub use broker::{NetAdminBroker, PermissionBroker, StaticBroker};
pub use error::EstablishError;
pub use tun::{TunEstablisher, TunSettings, open_tun};

use crate::control::protocol::InterfaceSpec;

/// A configured interface ready to forward packets.
#[derive(Debug)]
pub struct EstablishedInterface {
    /// Interface name as seen by the kernel.
    pub name: String,
    /// Packet descriptor; one read or write is one packet.
    pub fd: OwnedFd,
}

/// Outcome of an establishment attempt that did not fail.
#[derive(Debug)]
pub enum Establishment {
    /// The interface exists and is configured.
    Established(EstablishedInterface),
    /// The platform declined, e.g. because the grant was revoked.
    Refused,
}

/// Creates virtual interfaces from a spec.
pub trait Establisher: Send + Sync {
    /// Create and configure an interface for `spec`.
    fn establish(&self, spec: &InterfaceSpec) -> Result<Establishment, EstablishError>;
}
