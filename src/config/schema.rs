//! Configuration schema definitions.
//!
//! This module defines the structure of the vpn-tether configuration files.
//! Every value is optional in a file; unset values fall back to the defaults
//! returned by the accessors, so an empty file (or none at all) is valid.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::ConfigError;
use crate::control::socket::DEFAULT_SOCKET_NAME;

/// Default tun interface name.
pub const DEFAULT_INTERFACE_NAME: &str = "tether0";

/// Default per-connection read timeout in milliseconds.
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 5000;

/// Longest interface name the kernel accepts (`IFNAMSIZ - 1`).
pub const MAX_INTERFACE_NAME_LEN: usize = 15;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Control socket settings.
    #[serde(default)]
    pub control: ControlConfig,

    /// Interface establishment settings.
    #[serde(default)]
    pub interface: InterfaceConfig,

    /// Forwarding engine policy.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Shutdown settings.
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

impl Config {
    /// Merge another config into this one. Values set in `other` win.
    pub fn merge(&mut self, other: Config) {
        self.general.merge(other.general);
        self.control.merge(other.control);
        self.interface.merge(other.interface);
        self.engine.merge(other.engine);
        self.shutdown.merge(other.shutdown);
    }

    /// Check values that deserialize fine but cannot be used.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(level) = &self.general.log_level
            && !LOG_LEVELS.contains(&level.as_str())
        {
            return Err(ConfigError::InvalidValue {
                field: "general.log_level".to_string(),
                message: format!("'{}' is not one of {}", level, LOG_LEVELS.join(", ")),
            });
        }

        if self.control.socket_name().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "control.socket_name".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        let name = self.interface.name();
        if name.is_empty() || name.len() > MAX_INTERFACE_NAME_LEN {
            return Err(ConfigError::InvalidValue {
                field: "interface.name".to_string(),
                message: format!("must be 1 to {} bytes", MAX_INTERFACE_NAME_LEN),
            });
        }

        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

impl GeneralConfig {
    fn merge(&mut self, other: GeneralConfig) {
        if other.log_level.is_some() {
            self.log_level = other.log_level;
        }
    }
}

/// Control socket settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ControlConfig {
    /// Socket name; a name containing `/` is a filesystem path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_name: Option<String>,

    /// How long a client may take to send its configuration line.
    /// 0 = no limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_timeout_ms: Option<u64>,
}

impl ControlConfig {
    fn merge(&mut self, other: ControlConfig) {
        if other.socket_name.is_some() {
            self.socket_name = other.socket_name;
        }
        if other.read_timeout_ms.is_some() {
            self.read_timeout_ms = other.read_timeout_ms;
        }
    }

    /// Socket name, or the built-in default.
    pub fn socket_name(&self) -> &str {
        self.socket_name.as_deref().unwrap_or(DEFAULT_SOCKET_NAME)
    }

    /// Read timeout, `None` when disabled.
    pub fn read_timeout(&self) -> Option<Duration> {
        match self.read_timeout_ms.unwrap_or(DEFAULT_READ_TIMEOUT_MS) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

/// Interface establishment settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct InterfaceConfig {
    /// Name of the tun interface to create.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Program used for links, addresses and routes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_command: Option<String>,

    /// Program used for DNS servers and search domains.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolvectl_command: Option<String>,

    /// Whether DNS settings from the client are applied at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apply_dns: Option<bool>,
}

impl InterfaceConfig {
    fn merge(&mut self, other: InterfaceConfig) {
        if other.name.is_some() {
            self.name = other.name;
        }
        if other.ip_command.is_some() {
            self.ip_command = other.ip_command;
        }
        if other.resolvectl_command.is_some() {
            self.resolvectl_command = other.resolvectl_command;
        }
        if other.apply_dns.is_some() {
            self.apply_dns = other.apply_dns;
        }
    }

    /// Interface name (default `tether0`).
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(DEFAULT_INTERFACE_NAME)
    }

    /// `ip` program (default `ip`).
    pub fn ip_command(&self) -> &str {
        self.ip_command.as_deref().unwrap_or("ip")
    }

    /// `resolvectl` program (default `resolvectl`).
    pub fn resolvectl_command(&self) -> &str {
        self.resolvectl_command.as_deref().unwrap_or("resolvectl")
    }

    /// Apply DNS settings (default true).
    pub fn apply_dns(&self) -> bool {
        self.apply_dns.unwrap_or(true)
    }
}

/// Forwarding engine policy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct EngineConfig {
    /// Stop the listener when a session ends with a failure status instead
    /// of accepting the next client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_on_failure: Option<bool>,
}

impl EngineConfig {
    fn merge(&mut self, other: EngineConfig) {
        if other.stop_on_failure.is_some() {
            self.stop_on_failure = other.stop_on_failure;
        }
    }

    /// Default false.
    pub fn stop_on_failure(&self) -> bool {
        self.stop_on_failure.unwrap_or(false)
    }
}

/// Shutdown settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ShutdownConfig {
    /// Longest `stop` waits for the listener thread. 0 = wait until it exits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_timeout_ms: Option<u64>,
}

impl ShutdownConfig {
    fn merge(&mut self, other: ShutdownConfig) {
        if other.join_timeout_ms.is_some() {
            self.join_timeout_ms = other.join_timeout_ms;
        }
    }

    /// Join timeout, `None` when unbounded.
    pub fn join_timeout(&self) -> Option<Duration> {
        match self.join_timeout_ms.unwrap_or(0) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}
