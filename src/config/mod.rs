//! Configuration system for vpn-tether.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. Built-in defaults
//! 2. System config: `/etc/vpn-tether/config.toml`
//! 3. User config: `~/.config/vpn-tether/config.toml`
//! 4. Additional config file (via `--config` flag)
//! 5. CLI flags (highest priority)
//!
//! Missing system and user files are skipped. Every value is a scalar and a
//! later source overrides an earlier one.
//!
//! ```toml
//! [general]
//! log_level = "info"
//!
//! [control]
//! socket_name = "vpntether"
//! read_timeout_ms = 5000
//!
//! [interface]
//! name = "tether0"
//! apply_dns = true
//!
//! [engine]
//! stop_on_failure = false
//!
//! [shutdown]
//! join_timeout_ms = 0
//! ```

mod error;
mod loader;
mod schema;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::{
    Config, ControlConfig, DEFAULT_INTERFACE_NAME, DEFAULT_READ_TIMEOUT_MS, EngineConfig,
    GeneralConfig, InterfaceConfig, MAX_INTERFACE_NAME_LEN, ShutdownConfig,
};
