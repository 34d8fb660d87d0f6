//! POSIX backend.
//!
//! termios has no equivalent of the Win32 abort-on-error flag, so the repair
//! on these platforms validates the device and rewrites its line settings
//! unchanged. The exclusive open and handle checks are identical.

use super::native::{CommApi, CommStatus, ControlBlock, DeviceType, NativeError, PortNaming};
use std::ffi::CString;
use std::fmt;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

/// POSIX line settings.
#[derive(Clone, Copy)]
pub struct Termios(libc::termios);

impl Termios {
    pub fn input_speed(&self) -> libc::speed_t {
        // SAFETY: reads a field of an initialized termios.
        unsafe { libc::cfgetispeed(&self.0) }
    }
}

impl ControlBlock for Termios {
    fn abort_on_error(&self) -> bool {
        false
    }

    fn set_abort_on_error(&mut self, _enabled: bool) {}
}

impl fmt::Debug for Termios {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Termios")
            .field("c_iflag", &format_args!("{:#x}", self.0.c_iflag))
            .field("c_oflag", &format_args!("{:#x}", self.0.c_oflag))
            .field("c_cflag", &format_args!("{:#x}", self.0.c_cflag))
            .field("c_lflag", &format_args!("{:#x}", self.0.c_lflag))
            .field("ispeed", &self.input_speed())
            .finish()
    }
}

/// Open device. A terminal is held in exclusive mode (`TIOCEXCL`) until the
/// handle is dropped, at which point exclusivity is released before the
/// descriptor closes.
#[derive(Debug)]
pub struct PosixHandle {
    fd: OwnedFd,
    exclusive: bool,
}

impl PosixHandle {
    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }
}

impl AsRawFd for PosixHandle {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl Drop for PosixHandle {
    fn drop(&mut self) {
        if self.exclusive {
            // SAFETY: the descriptor is still owned by `self.fd`.
            unsafe { libc::ioctl(self.fd.as_raw_fd(), libc::TIOCNXCL) };
        }
    }
}

fn check(ret: libc::c_int) -> Result<libc::c_int, NativeError> {
    if ret == -1 {
        Err(NativeError::last_os_error())
    } else {
        Ok(ret)
    }
}

fn file_mode(fd: RawFd) -> Result<libc::mode_t, NativeError> {
    // SAFETY: `stat` is plain data and is fully written by a successful fstat.
    let mut stat: libc::stat = unsafe { std::mem::zeroed() };
    // SAFETY: `fd` is open and `stat` is a valid out-pointer.
    check(unsafe { libc::fstat(fd, &mut stat) })?;
    Ok(stat.st_mode & libc::S_IFMT)
}

/// libc terminal API.
#[derive(Debug, Clone, Copy, Default)]
pub struct PosixComm;

impl CommApi for PosixComm {
    type Handle = PosixHandle;
    type Block = Termios;

    fn naming(&self) -> PortNaming {
        PortNaming::Posix
    }

    /// Open `device_path` read/write without becoming its controlling
    /// terminal. Character devices are then locked with `TIOCEXCL`; anything
    /// else is left to the device-type check.
    fn open(&self, device_path: &str) -> Result<PosixHandle, NativeError> {
        let path = CString::new(device_path)
            .map_err(|_| NativeError::new(libc::EINVAL, "device path contains a NUL byte"))?;

        // SAFETY: `path` is NUL-terminated and outlives the call.
        let raw = check(unsafe {
            libc::open(
                path.as_ptr(),
                libc::O_RDWR | libc::O_NOCTTY | libc::O_NONBLOCK | libc::O_CLOEXEC,
            )
        })?;
        // SAFETY: `raw` is a fresh descriptor owned by nobody else.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        if file_mode(fd.as_raw_fd())? != libc::S_IFCHR {
            return Ok(PosixHandle {
                fd,
                exclusive: false,
            });
        }

        // Further opens fail with EBUSY until the handle is dropped.
        // SAFETY: TIOCEXCL takes no argument.
        check(unsafe { libc::ioctl(fd.as_raw_fd(), libc::TIOCEXCL) })?;
        Ok(PosixHandle {
            fd,
            exclusive: true,
        })
    }

    fn device_type(&self, handle: &PosixHandle) -> Result<DeviceType, NativeError> {
        Ok(match file_mode(handle.as_raw_fd())? {
            libc::S_IFCHR => DeviceType::Char,
            libc::S_IFREG | libc::S_IFBLK | libc::S_IFDIR => DeviceType::Disk,
            libc::S_IFIFO => DeviceType::Pipe,
            libc::S_IFSOCK => DeviceType::Remote,
            other => DeviceType::Other(other as u32),
        })
    }

    fn clear_comm_error(&self, handle: &PosixHandle) -> Result<CommStatus, NativeError> {
        let fd = handle.as_raw_fd();
        let mut in_queue: libc::c_int = 0;
        let mut out_queue: libc::c_int = 0;
        // SAFETY: both requests write one c_int through the given pointer.
        check(unsafe { libc::ioctl(fd, libc::FIONREAD, &mut in_queue as *mut libc::c_int) })?;
        check(unsafe { libc::ioctl(fd, libc::TIOCOUTQ, &mut out_queue as *mut libc::c_int) })?;

        Ok(CommStatus {
            errors: 0,
            in_queue: in_queue.max(0) as u32,
            out_queue: out_queue.max(0) as u32,
        })
    }

    fn get_comm_state(&self, handle: &PosixHandle) -> Result<Termios, NativeError> {
        // SAFETY: termios is plain data, filled in by tcgetattr.
        let mut termios: libc::termios = unsafe { std::mem::zeroed() };
        // SAFETY: the descriptor is open and `termios` is a valid out-pointer.
        check(unsafe { libc::tcgetattr(handle.as_raw_fd(), &mut termios) })?;
        Ok(Termios(termios))
    }

    fn set_comm_state(&self, handle: &PosixHandle, block: &Termios) -> Result<(), NativeError> {
        // SAFETY: `block` was produced by tcgetattr.
        check(unsafe { libc::tcsetattr(handle.as_raw_fd(), libc::TCSANOW, &block.0) })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixer::{FixerError, InvalidPortReason, PortFixer};
    use std::ffi::CStr;

    /// Allocate a pseudo-terminal and open its follower side.
    fn open_pty() -> (OwnedFd, OwnedFd, String) {
        unsafe {
            let leader = libc::posix_openpt(libc::O_RDWR | libc::O_NOCTTY);
            assert!(leader >= 0, "posix_openpt: {}", std::io::Error::last_os_error());
            let leader = OwnedFd::from_raw_fd(leader);
            assert_eq!(libc::grantpt(leader.as_raw_fd()), 0);
            assert_eq!(libc::unlockpt(leader.as_raw_fd()), 0);

            let name = CStr::from_ptr(libc::ptsname(leader.as_raw_fd()))
                .to_str()
                .unwrap()
                .to_string();
            let path = CString::new(name.clone()).unwrap();
            let follower = libc::open(path.as_ptr(), libc::O_RDWR | libc::O_NOCTTY);
            assert!(follower >= 0, "open {name}: {}", std::io::Error::last_os_error());

            (leader, OwnedFd::from_raw_fd(follower), name)
        }
    }

    fn termios_of(fd: &OwnedFd) -> libc::termios {
        unsafe {
            let mut termios: libc::termios = std::mem::zeroed();
            assert_eq!(libc::tcgetattr(fd.as_raw_fd(), &mut termios), 0);
            termios
        }
    }

    #[test]
    fn test_open_missing_device() {
        let err = PosixComm.open("/dev/solid_serial_missing_9999").unwrap_err();
        assert_eq!(err.code, libc::ENOENT);
    }

    #[test]
    fn test_null_device_is_not_a_tty() {
        // /dev/null passes the character-device check but is not a terminal,
        // so the exclusive lock is rejected with ENOTTY.
        let err = PosixComm.open("/dev/null").unwrap_err();
        assert_eq!(err.code, libc::ENOTTY);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_regular_file_is_rejected_as_invalid_port() {
        let file = tempfile::Builder::new()
            .prefix("solid_serial")
            .tempfile_in("/dev/shm")
            .unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let handle = PosixComm.open(&path).unwrap();
        assert!(!handle.is_exclusive());
        assert_eq!(PosixComm.device_type(&handle).unwrap(), DeviceType::Disk);
        drop(handle);

        let err = PortFixer::new(PosixComm).repair(&path).unwrap_err();
        assert!(matches!(
            err,
            FixerError::InvalidPort {
                reason: InvalidPortReason::NotSerialDevice(DeviceType::Disk),
                ..
            }
        ));
    }

    #[test]
    fn test_repair_pty_keeps_settings_and_releases_device() {
        let (_leader, follower, name) = open_pty();
        let before = termios_of(&follower);
        let fixer = PortFixer::new(PosixComm);

        let report = fixer.repair(&name).unwrap();
        assert_eq!(report.device_path, name);
        assert!(!report.abort_on_error_was_set);
        assert_eq!((report.read_attempts, report.write_attempts), (1, 1));

        // Exclusive mode ended with the handle, so the port opens again.
        let handle = PosixComm.open(&name).unwrap();
        assert!(handle.is_exclusive());
        drop(handle);
        assert!(fixer.repair(&name).is_ok());

        let after = termios_of(&follower);
        assert_eq!(before.c_iflag, after.c_iflag);
        assert_eq!(before.c_oflag, after.c_oflag);
        assert_eq!(before.c_cflag, after.c_cflag);
        assert_eq!(before.c_lflag, after.c_lflag);
        assert_eq!(before.c_cc, after.c_cc);
        unsafe {
            assert_eq!(libc::cfgetispeed(&before), libc::cfgetispeed(&after));
            assert_eq!(libc::cfgetospeed(&before), libc::cfgetospeed(&after));
        }
    }

    #[test]
    fn test_flag_is_inert() {
        let mut block = Termios(unsafe { std::mem::zeroed() });
        block.set_abort_on_error(true);
        assert!(!block.abort_on_error());
    }
}
