//! Control-block repair performed before a port is opened.
//!
//! Some USB serial drivers leave the "abort on error" flag set in the device
//! control block. With it set, any line error aborts every pending read and
//! write until the error is cleared, which surfaces as spurious I/O failures
//! on noisy links. [`repair`] opens the device exclusively, clears the flag
//! and writes the control block back, then closes the device again. The
//! setting persists in the driver, so the caller opens its own session
//! afterwards.
//!
//! # Example
//!
//! ```no_run
//! let report = solid_serial::fixer::repair("COM3")?;
//! println!("abort-on-error was set: {}", report.abort_on_error_was_set);
//! # Ok::<(), solid_serial::fixer::FixerError>(())
//! ```

mod error;
pub mod mock;
pub mod native;

#[cfg(unix)]
pub mod posix;
#[cfg(windows)]
pub mod windows;

pub use error::{FixerError, InvalidPortReason};
pub use mock::{MockBlock, MockCall, MockCommApi, MockHandle};
pub use native::{
    CommApi, CommStatus, ControlBlock, DeviceType, NativeError, NativeOp, PortNaming,
};

use serde::Serialize;
use tracing::{debug, info};

/// Platform backend used by [`repair`].
#[cfg(windows)]
pub type NativeComm = windows::Win32Comm;
/// Platform backend used by [`repair`].
#[cfg(unix)]
pub type NativeComm = posix::PosixComm;

/// Upper bound on clear-then-get (or clear-then-set) attempts.
pub const COMM_STATE_RETRIES: u32 = 10;

/// Outcome of a successful repair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    pub port_name: String,
    pub device_path: String,
    /// Whether the flag was set before the repair cleared it.
    pub abort_on_error_was_set: bool,
    /// Attempts needed to read the control block.
    pub read_attempts: u32,
    /// Attempts needed to write the control block back.
    pub write_attempts: u32,
}

/// Repair `port_name` with the platform backend.
pub fn repair(port_name: &str) -> Result<RepairReport, FixerError> {
    PortFixer::new(NativeComm::default()).repair(port_name)
}

/// Runs the repair sequence against any [`CommApi`] backend.
#[derive(Debug, Clone, Default)]
pub struct PortFixer<A> {
    api: A,
}

impl<A: CommApi> PortFixer<A> {
    pub fn new(api: A) -> Self {
        Self { api }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Clear the abort-on-error flag of `port_name`.
    ///
    /// The device handle is closed before this returns, on success and on
    /// every error path.
    pub fn repair(&self, port_name: &str) -> Result<RepairReport, FixerError> {
        if port_name.trim().is_empty() {
            return Err(FixerError::invalid_port(port_name, InvalidPortReason::Empty));
        }
        let device_path = self.api.naming().device_path(port_name).ok_or_else(|| {
            FixerError::invalid_port(port_name, InvalidPortReason::NamingConvention)
        })?;

        let handle = self
            .api
            .open(&device_path)
            .map_err(|e| FixerError::os_handle(port_name, NativeOp::CreateFile, e))?;

        let kind = self
            .api
            .device_type(&handle)
            .map_err(|e| FixerError::os_handle(port_name, NativeOp::GetFileType, e))?;
        if !kind.is_serial_like() {
            return Err(FixerError::invalid_port(
                port_name,
                InvalidPortReason::NotSerialDevice(kind),
            ));
        }

        let (mut block, read_attempts) =
            self.with_comm_retries(port_name, &handle, NativeOp::GetCommState, |api, h| {
                api.get_comm_state(h)
            })?;

        let abort_on_error_was_set = block.abort_on_error();
        block.set_abort_on_error(false);

        let ((), write_attempts) =
            self.with_comm_retries(port_name, &handle, NativeOp::SetCommState, |api, h| {
                api.set_comm_state(h, &block)
            })?;

        drop(handle);

        info!(
            port = port_name,
            abort_on_error_was_set, read_attempts, write_attempts, "Control block repaired"
        );

        Ok(RepairReport {
            port_name: port_name.to_string(),
            device_path,
            abort_on_error_was_set,
            read_attempts,
            write_attempts,
        })
    }

    /// Clear pending errors, then run `op`, up to [`COMM_STATE_RETRIES`] times.
    ///
    /// A failed clear aborts at once; only `op` failures are retried.
    fn with_comm_retries<T>(
        &self,
        port_name: &str,
        handle: &A::Handle,
        operation: NativeOp,
        mut op: impl FnMut(&A, &A::Handle) -> Result<T, NativeError>,
    ) -> Result<(T, u32), FixerError> {
        let mut attempt = 1;
        loop {
            let status = self
                .api
                .clear_comm_error(handle)
                .map_err(|e| FixerError::os_handle(port_name, NativeOp::ClearCommError, e))?;
            if status.errors != 0 {
                debug!(
                    port = port_name,
                    errors = status.errors,
                    in_queue = status.in_queue,
                    out_queue = status.out_queue,
                    "Cleared pending communication errors"
                );
            }

            match op(&self.api, handle) {
                Ok(value) => return Ok((value, attempt)),
                Err(e) if attempt >= COMM_STATE_RETRIES => {
                    return Err(FixerError::os_handle(port_name, operation, e));
                }
                Err(e) => {
                    debug!(port = port_name, %operation, attempt, error = %e, "Retrying");
                    attempt += 1;
                }
            }
        }
    }
}
