//! Top-level error type for the command-line tool.
//!
//! Each layer of the library has its own error enum; `AppError` wraps them so
//! the binary can use `?` across layers.

use crate::config::ConfigError;
use crate::discovery::DiscoveryError;
use crate::fixer::FixerError;
use crate::port::PortError;
use thiserror::Error;

/// A specialized `Result` type for the command-line tool.
pub type AppResult<T> = Result<T, AppError>;

/// Unified application error type.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Repair failed: {0}")]
    Repair(#[from] FixerError),

    #[error("Serial session error: {0}")]
    Port(#[from] PortError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("A serialization error occurred: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("An I/O error occurred: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Process exit code for this error.
    ///
    /// Configuration problems map to 2 so scripts can tell them apart from
    /// device failures.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            _ => 1,
        }
    }
}
