//! Solid Serial Library
//!
//! Serial port sessions that survive USB serial adapters being unplugged.
//!
//! # Modules
//!
//! - `fixer`: Clears the abort-on-error flag of a device before it is opened
//! - `teardown`: Disposes of a session and its event thread safely, even after device removal
//! - `port`: Session layer built on the two above
//! - `discovery`: Candidate port detection by USB identity
//! - `config`: Configuration management with TOML support
//! - `logging`: `tracing` subscriber setup
//! - `error`: Unified error handling for the command-line tool

pub mod config;
pub mod discovery;
pub mod error;
pub mod fixer;
pub mod logging;
pub mod port;
pub mod teardown;

// Re-export commonly used types for convenience
pub use error::{AppError, AppResult};
pub use fixer::{repair, FixerError, PortFixer, RepairReport};
pub use port::{
    DataBits, FlowControl, Parity, PortError, SerialPortAdapter, SerialPortConfig, SerialSession,
    SessionOptions, StopBits,
};
pub use teardown::{safe_teardown, TeardownReport};

// Re-export discovery types
pub use discovery::{DetectionMode, DeviceSelector, PortDetector};

// Re-export config types
pub use config::{Config, ConfigError, ConfigLoader, ConfigResult};
