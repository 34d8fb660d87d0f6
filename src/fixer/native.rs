//! Native device-control seams.
//!
//! The repair routine talks to the operating system only through the
//! [`CommApi`] trait so that the Win32 and POSIX backends, as well as the
//! scripted [`MockCommApi`](super::mock::MockCommApi), can be swapped in
//! without touching the retry and validation logic.

use std::fmt;

/// Error code and formatted message returned by a failed native call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeError {
    /// Platform error code (`GetLastError()` / `errno`), or `-1` when unknown.
    pub code: i32,
    /// Human-readable message for `code`.
    pub message: String,
}

impl NativeError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Capture the calling thread's last OS error.
    pub fn last_os_error() -> Self {
        std::io::Error::last_os_error().into()
    }

    /// The Win32 HRESULT form of this error (`FACILITY_WIN32`).
    pub fn hresult(&self) -> u32 {
        0x8007_0000 | (self.code as u32 & 0xFFFF)
    }
}

impl From<std::io::Error> for NativeError {
    fn from(err: std::io::Error) -> Self {
        let code = err.raw_os_error().unwrap_or(-1);
        Self {
            code,
            message: err.to_string(),
        }
    }
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message.trim_end(), self.code)
    }
}

impl std::error::Error for NativeError {}

/// The native call that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeOp {
    CreateFile,
    GetFileType,
    ClearCommError,
    GetCommState,
    SetCommState,
}

impl fmt::Display for NativeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CreateFile => "CreateFile",
            Self::GetFileType => "GetFileType",
            Self::ClearCommError => "ClearCommError",
            Self::GetCommState => "GetCommState",
            Self::SetCommState => "SetCommState",
        };
        f.write_str(name)
    }
}

/// Device type reported for an open handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    Unknown,
    Disk,
    Char,
    Pipe,
    Remote,
    Other(u32),
}

impl DeviceType {
    /// Serial ports report as character devices; some virtual COM drivers
    /// report as unknown.
    pub fn is_serial_like(self) -> bool {
        matches!(self, Self::Char | Self::Unknown)
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => f.write_str("unknown"),
            Self::Disk => f.write_str("disk"),
            Self::Char => f.write_str("character"),
            Self::Pipe => f.write_str("pipe"),
            Self::Remote => f.write_str("remote"),
            Self::Other(raw) => write!(f, "other ({raw:#x})"),
        }
    }
}

/// Snapshot returned by clearing the pending communication error state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommStatus {
    /// Bitmask of pending line errors that were cleared.
    pub errors: u32,
    /// Bytes queued in the driver's receive buffer.
    pub in_queue: u32,
    /// Bytes queued in the driver's transmit buffer.
    pub out_queue: u32,
}

/// Platform port naming convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortNaming {
    /// `COM<n>`, opened through the `\\.\` device namespace.
    Windows,
    /// Absolute device node under `/dev/`.
    Posix,
}

impl PortNaming {
    /// The naming convention of the platform this crate was built for.
    pub const fn native() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Posix
        }
    }

    /// Map a port name to the path passed to the open call, or `None` if the
    /// name does not follow this convention.
    pub fn device_path(self, port_name: &str) -> Option<String> {
        match self {
            Self::Windows => {
                let prefix = port_name.get(..3)?;
                if prefix.eq_ignore_ascii_case("COM") {
                    Some(format!(r"\\.\{port_name}"))
                } else {
                    None
                }
            }
            Self::Posix => {
                if port_name.starts_with("/dev/") && port_name.len() > "/dev/".len() {
                    Some(port_name.to_string())
                } else {
                    None
                }
            }
        }
    }
}

/// Platform serial control block (Win32 `DCB`, POSIX `termios`).
///
/// Only the abort-on-error flag is ever touched; every other field must
/// survive the read/write round trip unchanged.
pub trait ControlBlock: Clone + fmt::Debug {
    fn abort_on_error(&self) -> bool;
    fn set_abort_on_error(&mut self, enabled: bool);
}

/// Native device-control calls used by the repair routine.
pub trait CommApi {
    /// Exclusively-owned open device. Dropping it closes the device.
    type Handle;
    /// Control block read from and written back to the device.
    type Block: ControlBlock;

    /// Naming convention accepted by [`CommApi::open`].
    fn naming(&self) -> PortNaming {
        PortNaming::native()
    }

    /// Open `device_path` for exclusive, synchronous read/write access.
    fn open(&self, device_path: &str) -> Result<Self::Handle, NativeError>;

    fn device_type(&self, handle: &Self::Handle) -> Result<DeviceType, NativeError>;

    /// Clear any pending line error and report queue status.
    fn clear_comm_error(&self, handle: &Self::Handle) -> Result<CommStatus, NativeError>;

    fn get_comm_state(&self, handle: &Self::Handle) -> Result<Self::Block, NativeError>;

    fn set_comm_state(&self, handle: &Self::Handle, block: &Self::Block) -> Result<(), NativeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_windows_naming() {
        let naming = PortNaming::Windows;
        assert_eq!(naming.device_path("COM3").as_deref(), Some(r"\\.\COM3"));
        assert_eq!(naming.device_path("com12").as_deref(), Some(r"\\.\com12"));
        assert_eq!(naming.device_path("LPT1"), None);
        assert_eq!(naming.device_path("CO"), None);
        assert_eq!(naming.device_path(""), None);
    }

    #[test]
    fn test_posix_naming() {
        let naming = PortNaming::Posix;
        assert_eq!(
            naming.device_path("/dev/ttyUSB0").as_deref(),
            Some("/dev/ttyUSB0")
        );
        assert_eq!(naming.device_path("/dev/"), None);
        assert_eq!(naming.device_path("ttyUSB0"), None);
    }

    #[test]
    fn test_serial_like_device_types() {
        assert!(DeviceType::Char.is_serial_like());
        assert!(DeviceType::Unknown.is_serial_like());
        assert!(!DeviceType::Disk.is_serial_like());
        assert!(!DeviceType::Pipe.is_serial_like());
        assert!(!DeviceType::Other(0x8000).is_serial_like());
    }

    #[test]
    fn test_hresult() {
        let err = NativeError::new(5, "Access is denied.");
        assert_eq!(err.hresult(), 0x8007_0005);
        assert_eq!(err.to_string(), "Access is denied. (code 5)");
    }

    #[test]
    fn test_from_io_error() {
        let err: NativeError = std::io::Error::from_raw_os_error(2).into();
        assert_eq!(err.code, 2);
        assert!(!err.message.is_empty());

        let err: NativeError = std::io::Error::new(std::io::ErrorKind::Other, "boom").into();
        assert_eq!(err.code, -1);
        assert_eq!(err.message, "boom");
    }
}
