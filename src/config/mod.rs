//! Configuration module for solid-serial.
//!
//! This module provides TOML-based configuration with environment variable overrides.
//!
//! # Configuration Resolution
//!
//! Configuration is loaded from the following locations (in order of priority):
//!
//! 1. `SOLID_SERIAL_CONFIG` environment variable (explicit path)
//! 2. `./solid-serial.toml` (current directory)
//! 3. `config.toml` in the platform config directory, e.g.
//!    `~/.config/solid-serial/` on Linux or `%APPDATA%\solid-serial\config\` on Windows
//! 4. Built-in defaults (no file required)
//!
//! # Environment Overrides
//!
//! The pattern is: `SOLID_SERIAL_<SECTION>_<KEY>`
//!
//! Examples:
//! - `SOLID_SERIAL_SERIAL_DEFAULT_BAUD=115200`
//! - `SOLID_SERIAL_SERIAL_REPAIR_BEFORE_OPEN=false`
//! - `SOLID_SERIAL_DISCOVERY_MODE=all_ports`
//! - `SOLID_SERIAL_LOGGING_LEVEL=debug`
//!
//! The legacy `TEST_PORT` variable is honoured for the hardware tests.
//!
//! # Example
//!
//! ```rust,no_run
//! use solid_serial::config::ConfigLoader;
//!
//! let loader = ConfigLoader::load()?;
//! let config = loader.config();
//!
//! println!("Default baud: {}", config.serial.default_baud);
//! println!("Discovery: {:?}", config.discovery.mode);
//! # Ok::<(), solid_serial::config::ConfigError>(())
//! ```

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{
    get_default_config_dir, get_default_config_path, resolve_config_path, ConfigLoader,
};
pub use schema::{
    Config, DiscoveryConfig, LogFormat, LoggingConfig, SerialConfig, TestingConfig,
};
