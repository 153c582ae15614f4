//! Linux tun establisher.
//!
//! Opens `/dev/net/tun` with `TUNSETIFF` (`IFF_TUN | IFF_NO_PI`, so each read
//! is one bare IP packet) and then applies the requested settings with the `ip`
//! tool. DNS settings go through `resolvectl` and are best effort. The device
//! is not persistent: it disappears once the last descriptor is closed.

use std::io;
use std::os::fd::OwnedFd;
use std::process::Command;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::broker::PermissionBroker;
use super::error::EstablishError;
use super::{EstablishedInterface, Establisher, Establishment};
use crate::config::InterfaceConfig;
use crate::control::protocol::InterfaceSpec;

/// Kernel interface name limit, including the trailing NUL.
const IFNAMSIZ: usize = 16;

/// Settings for [`TunEstablisher`].
#[derive(Debug, Clone)]
pub struct TunSettings {
    /// Interface name to request.
    pub name: String,
    /// Program used for links, addresses and routes.
    pub ip_command: String,
    /// Program used for DNS servers and search domains.
    pub resolvectl_command: String,
    /// Whether DNS settings are applied at all.
    pub apply_dns: bool,
}

impl Default for TunSettings {
    fn default() -> Self {
        Self::from(&InterfaceConfig::default())
    }
}

impl From<&InterfaceConfig> for TunSettings {
    fn from(config: &InterfaceConfig) -> Self {
        Self {
            name: config.name().to_string(),
            ip_command: config.ip_command().to_string(),
            resolvectl_command: config.resolvectl_command().to_string(),
            apply_dns: config.apply_dns(),
        }
    }
}

/// Creates tun interfaces, subject to a [`PermissionBroker`].
pub struct TunEstablisher {
    settings: TunSettings,
    broker: Arc<dyn PermissionBroker>,
}

impl TunEstablisher {
    /// Create an establisher.
    pub fn new(settings: TunSettings, broker: Arc<dyn PermissionBroker>) -> Self {
        Self { settings, broker }
    }

    fn run(&self, program: &str, args: &[String]) -> Result<(), EstablishError> {
        debug!("Running {} {}", program, args.join(" "));
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|source| EstablishError::Spawn {
                program: program.to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(EstablishError::CommandFailed {
                command: format!("{} {}", program, args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

impl Establisher for TunEstablisher {
    fn establish(&self, spec: &InterfaceSpec) -> Result<Establishment, EstablishError> {
        if !self.broker.is_granted() {
            warn!("Interface permission not granted");
            return Ok(Establishment::Refused);
        }

        let name = &self.settings.name;
        let fd = match open_tun(name) {
            Ok(fd) => fd,
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                warn!("Kernel refused tun device {}: {}", name, e);
                return Ok(Establishment::Refused);
            }
            Err(e) if e.kind() == io::ErrorKind::Unsupported => {
                return Err(EstablishError::Unsupported);
            }
            Err(source) => {
                return Err(EstablishError::Open {
                    name: name.clone(),
                    source,
                });
            }
        };

        // Dropping `fd` on error tears the device down again
        for args in link_commands(name, spec) {
            self.run(&self.settings.ip_command, &args)?;
        }

        if self.settings.apply_dns {
            for args in dns_commands(name, spec) {
                if let Err(e) = self.run(&self.settings.resolvectl_command, &args) {
                    warn!("Failed to apply DNS settings to {}: {}", name, e);
                }
            }
        }

        info!(
            interface = %name,
            session = spec.session_name.as_deref().unwrap_or("-"),
            "Interface configured"
        );
        Ok(Establishment::Established(EstablishedInterface {
            name: name.clone(),
            fd,
        }))
    }
}

/// `ip` invocations for a spec, in the order they must run.
///
/// The MTU is set first, then addresses, then the link goes up, then routes
/// (which need the link up and are applied in the order received).
fn link_commands(name: &str, spec: &InterfaceSpec) -> Vec<Vec<String>> {
    let args = |parts: &[&str]| -> Vec<String> { parts.iter().map(|p| p.to_string()).collect() };
    let mut commands = Vec::new();

    if let Some(mtu) = spec.mtu {
        commands.push(args(&["link", "set", "dev", name, "mtu", mtu.to_string().as_str()]));
    }
    for address in &spec.addresses {
        commands.push(args(&["addr", "add", address.to_string().as_str(), "dev", name]));
    }
    commands.push(args(&["link", "set", "dev", name, "up"]));
    for route in &spec.routes {
        commands.push(args(&["route", "add", route.to_string().as_str(), "dev", name]));
    }
    commands
}

/// `resolvectl` invocations for a spec.
fn dns_commands(name: &str, spec: &InterfaceSpec) -> Vec<Vec<String>> {
    let mut commands = Vec::new();
    if !spec.dns_servers.is_empty() {
        let mut args = vec!["dns".to_string(), name.to_string()];
        args.extend(spec.dns_servers.iter().map(ToString::to_string));
        commands.push(args);
    }
    if !spec.search_domains.is_empty() {
        let mut args = vec!["domain".to_string(), name.to_string()];
        args.extend(spec.search_domains.iter().cloned());
        commands.push(args);
    }
    commands
}

/// Layout of `struct ifreq` as used by `TUNSETIFF`.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
#[repr(C)]
struct IfReq {
    name: [u8; IFNAMSIZ],
    flags: libc::c_short,
    _pad: [u8; 22],
}

/// Open (or create) the tun device `name` and return its descriptor.
#[cfg(target_os = "linux")]
pub fn open_tun(name: &str) -> io::Result<OwnedFd> {
    use std::fs::OpenOptions;
    use std::os::fd::AsRawFd;

    const IFF_TUN: libc::c_short = 0x0001;
    const IFF_NO_PI: libc::c_short = 0x1000;
    const TUNSETIFF: libc::c_ulong = 0x400454CA;

    if name.is_empty() || name.len() >= IFNAMSIZ || name.contains(['/', ' ']) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid interface name {name:?}"),
        ));
    }

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/net/tun")?;

    let mut ifr = IfReq {
        name: [0; IFNAMSIZ],
        flags: IFF_TUN | IFF_NO_PI,
        _pad: [0; 22],
    };
    ifr.name[..name.len()].copy_from_slice(name.as_bytes());

    // SAFETY: `ifr` is a valid, initialized ifreq that outlives the call.
    let ret = unsafe { libc::ioctl(file.as_raw_fd(), TUNSETIFF as _, &mut ifr as *mut IfReq) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }

    debug!("Opened tun device {}", name);
    Ok(OwnedFd::from(file))
}

/// Tun devices are only available on Linux.
#[cfg(not(target_os = "linux"))]
pub fn open_tun(_name: &str) -> io::Result<OwnedFd> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "tun devices are only supported on Linux",
    ))
}
