//! Win32 backend.

use super::native::{CommApi, CommStatus, ControlBlock, DeviceType, NativeError, PortNaming};
use std::ffi::OsStr;
use std::fmt;
use std::os::windows::ffi::OsStrExt;
use std::ptr;
use winapi::shared::minwindef::{DWORD, FALSE};
use winapi::um::fileapi::{CreateFileW, GetFileType, OPEN_EXISTING};
use winapi::um::handleapi::{CloseHandle, INVALID_HANDLE_VALUE};
use winapi::um::winbase::{
    ClearCommError, GetCommState, SetCommState, COMSTAT, DCB, FILE_FLAG_OVERLAPPED,
    FILE_TYPE_CHAR, FILE_TYPE_DISK, FILE_TYPE_PIPE, FILE_TYPE_REMOTE, FILE_TYPE_UNKNOWN,
};
use winapi::um::winnt::{GENERIC_READ, GENERIC_WRITE, HANDLE};

/// Owned Win32 file handle, closed on drop.
pub struct Win32Handle(HANDLE);

impl Win32Handle {
    pub fn as_raw(&self) -> HANDLE {
        self.0
    }
}

impl Drop for Win32Handle {
    fn drop(&mut self) {
        // SAFETY: the handle came from a successful CreateFileW and is closed
        // only here.
        unsafe {
            CloseHandle(self.0);
        }
    }
}

impl fmt::Debug for Win32Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Win32Handle").field(&self.0).finish()
    }
}

/// Win32 device control block.
#[derive(Clone, Copy)]
pub struct Dcb(DCB);

impl Dcb {
    fn zeroed() -> Self {
        // SAFETY: DCB is plain data; all-zero is a valid bit pattern.
        let mut dcb: DCB = unsafe { std::mem::zeroed() };
        dcb.DCBlength = std::mem::size_of::<DCB>() as DWORD;
        Self(dcb)
    }

    pub fn baud_rate(&self) -> u32 {
        self.0.BaudRate
    }

    pub fn flags(&self) -> u32 {
        self.0.BitFields
    }
}

impl ControlBlock for Dcb {
    fn abort_on_error(&self) -> bool {
        self.0.fAbortOnError() != 0
    }

    fn set_abort_on_error(&mut self, enabled: bool) {
        self.0.set_fAbortOnError(enabled as DWORD);
    }
}

impl fmt::Debug for Dcb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dcb")
            .field("baud_rate", &self.0.BaudRate)
            .field("flags", &format_args!("{:#010x}", self.0.BitFields))
            .field("byte_size", &self.0.ByteSize)
            .field("parity", &self.0.Parity)
            .field("stop_bits", &self.0.StopBits)
            .finish()
    }
}

/// `kernel32` communications API.
#[derive(Debug, Clone, Copy, Default)]
pub struct Win32Comm;

impl CommApi for Win32Comm {
    type Handle = Win32Handle;
    type Block = Dcb;

    fn naming(&self) -> PortNaming {
        PortNaming::Windows
    }

    fn open(&self, device_path: &str) -> Result<Win32Handle, NativeError> {
        let wide: Vec<u16> = OsStr::new(device_path)
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();

        // SAFETY: `wide` is NUL-terminated and outlives the call; null security
        // attributes and template handle are permitted.
        let raw = unsafe {
            CreateFileW(
                wide.as_ptr(),
                GENERIC_READ | GENERIC_WRITE,
                0,
                ptr::null_mut(),
                OPEN_EXISTING,
                FILE_FLAG_OVERLAPPED,
                ptr::null_mut(),
            )
        };
        if raw == INVALID_HANDLE_VALUE {
            return Err(NativeError::last_os_error());
        }
        Ok(Win32Handle(raw))
    }

    fn device_type(&self, handle: &Win32Handle) -> Result<DeviceType, NativeError> {
        // SAFETY: the handle is open for the lifetime of the borrow.
        let kind = unsafe { GetFileType(handle.as_raw()) };
        Ok(match kind {
            FILE_TYPE_UNKNOWN => DeviceType::Unknown,
            FILE_TYPE_DISK => DeviceType::Disk,
            FILE_TYPE_CHAR => DeviceType::Char,
            FILE_TYPE_PIPE => DeviceType::Pipe,
            FILE_TYPE_REMOTE => DeviceType::Remote,
            other => DeviceType::Other(other),
        })
    }

    fn clear_comm_error(&self, handle: &Win32Handle) -> Result<CommStatus, NativeError> {
        let mut errors: DWORD = 0;
        // SAFETY: COMSTAT is plain data; both out-pointers reference locals.
        let mut stat: COMSTAT = unsafe { std::mem::zeroed() };
        if unsafe { ClearCommError(handle.as_raw(), &mut errors, &mut stat) } == FALSE {
            return Err(NativeError::last_os_error());
        }
        Ok(CommStatus {
            errors,
            in_queue: stat.cbInQue,
            out_queue: stat.cbOutQue,
        })
    }

    fn get_comm_state(&self, handle: &Win32Handle) -> Result<Dcb, NativeError> {
        let mut dcb = Dcb::zeroed();
        // SAFETY: `dcb` has DCBlength set and lives across the call.
        if unsafe { GetCommState(handle.as_raw(), &mut dcb.0) } == FALSE {
            return Err(NativeError::last_os_error());
        }
        Ok(dcb)
    }

    fn set_comm_state(&self, handle: &Win32Handle, block: &Dcb) -> Result<(), NativeError> {
        let mut dcb = *block;
        // SAFETY: `dcb` is a copy of a block filled in by GetCommState.
        if unsafe { SetCommState(handle.as_raw(), &mut dcb.0) } == FALSE {
            return Err(NativeError::last_os_error());
        }
        Ok(())
    }
}
