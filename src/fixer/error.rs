//! Repair error types.

use super::native::{DeviceType, NativeError, NativeOp};
use std::fmt;
use thiserror::Error;

/// Why a port name or device was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidPortReason {
    /// Empty or blank name.
    Empty,
    /// Name does not follow the platform naming convention.
    NamingConvention,
    /// The opened handle is not a serial-like device.
    NotSerialDevice(DeviceType),
}

impl fmt::Display for InvalidPortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("port name is empty"),
            Self::NamingConvention => f.write_str("not a serial port name on this platform"),
            Self::NotSerialDevice(kind) => write!(f, "device type is {kind}, not a serial device"),
        }
    }
}

/// Errors raised while repairing a port's control block.
#[derive(Debug, Error)]
pub enum FixerError {
    /// Rejected name, or the device is not a serial port.
    #[error("Invalid serial port '{port}': {reason}")]
    InvalidPort {
        port: String,
        reason: InvalidPortReason,
    },

    /// A native call failed.
    #[error("{operation} failed for '{port}': {source}")]
    OsHandle {
        port: String,
        operation: NativeOp,
        #[source]
        source: NativeError,
    },
}

impl FixerError {
    pub fn invalid_port(port: impl Into<String>, reason: InvalidPortReason) -> Self {
        Self::InvalidPort {
            port: port.into(),
            reason,
        }
    }

    pub fn os_handle(port: impl Into<String>, operation: NativeOp, source: NativeError) -> Self {
        Self::OsHandle {
            port: port.into(),
            operation,
            source,
        }
    }

    /// Native error code, when the failure came from the OS.
    pub fn os_code(&self) -> Option<i32> {
        match self {
            Self::OsHandle { source, .. } => Some(source.code),
            Self::InvalidPort { .. } => None,
        }
    }

    pub fn is_invalid_port(&self) -> bool {
        matches!(self, Self::InvalidPort { .. })
    }
}
