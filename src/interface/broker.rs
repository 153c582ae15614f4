//! Permission brokers decide whether this process may create interfaces.
//!
//! The broker is consulted on every establishment, so a grant revoked while
//! the supervisor runs is noticed on the next connection.

use std::fs;

use tracing::debug;

/// Capability number of `CAP_NET_ADMIN`.
const CAP_NET_ADMIN: u32 = 12;

/// Answers whether creating a virtual interface is currently allowed.
pub trait PermissionBroker: Send + Sync {
    /// `true` if the grant is (still) held.
    fn is_granted(&self) -> bool;
}

/// A broker with a fixed answer.
#[derive(Debug, Clone, Copy)]
pub struct StaticBroker(pub bool);

impl PermissionBroker for StaticBroker {
    fn is_granted(&self) -> bool {
        self.0
    }
}

/// Grants when running as root or holding `CAP_NET_ADMIN`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetAdminBroker;

impl PermissionBroker for NetAdminBroker {
    fn is_granted(&self) -> bool {
        if nix::unistd::geteuid().is_root() {
            return true;
        }

        match fs::read_to_string("/proc/self/status") {
            Ok(status) => has_effective_capability(&status, CAP_NET_ADMIN),
            Err(e) => {
                debug!("Cannot read process capabilities: {}", e);
                false
            }
        }
    }
}

/// Check a capability bit in the `CapEff:` line of `/proc/<pid>/status`.
fn has_effective_capability(status: &str, capability: u32) -> bool {
    status
        .lines()
        .find_map(|line| line.strip_prefix("CapEff:"))
        .and_then(|mask| u64::from_str_radix(mask.trim(), 16).ok())
        .is_some_and(|mask| mask & (1u64 << capability) != 0)
}
