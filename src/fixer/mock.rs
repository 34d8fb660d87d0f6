//! Scripted in-memory backend for exercising the repair routine.
//!
//! `MockCommApi` models a single serial device: a persistent control block,
//! an exclusive-open rule, and configurable failures for each native call.
//! Every call is recorded so tests can assert on ordering.
//!
//! # Example
//! ```
//! use solid_serial::fixer::{MockBlock, MockCommApi, PortFixer};
//!
//! let api = MockCommApi::new().with_flags(MockBlock::ABORT_ON_ERROR);
//! PortFixer::new(api.clone()).repair("COM3").unwrap();
//!
//! assert!(!api.current_block().abort_on_error_set());
//! assert_eq!(api.open_handles(), 0);
//! ```

use super::native::{CommApi, CommStatus, ControlBlock, DeviceType, NativeError, PortNaming};
use parking_lot::Mutex;
use std::sync::Arc;

/// Win32 `ERROR_ACCESS_DENIED`, returned when the device is already open.
const ACCESS_DENIED: i32 = 5;
/// Win32 `ERROR_GEN_FAILURE`, used for scripted get/set failures.
const GEN_FAILURE: i32 = 31;

fn gen_failure() -> NativeError {
    NativeError::new(
        GEN_FAILURE,
        "A device attached to the system is not functioning.",
    )
}

/// Control block with the same field set as the Win32 `DCB`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockBlock {
    pub baud_rate: u32,
    pub flags: u32,
    pub xon_lim: u16,
    pub xoff_lim: u16,
    pub byte_size: u8,
    pub parity: u8,
    pub stop_bits: u8,
    pub xon_char: u8,
    pub xoff_char: u8,
    pub error_char: u8,
    pub eof_char: u8,
    pub evt_char: u8,
}

impl MockBlock {
    /// Bit 14 of the `DCB` flag word.
    pub const ABORT_ON_ERROR: u32 = 1 << 14;

    pub fn abort_on_error_set(&self) -> bool {
        self.flags & Self::ABORT_ON_ERROR != 0
    }
}

impl Default for MockBlock {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            flags: 0x0001,
            xon_lim: 2048,
            xoff_lim: 512,
            byte_size: 8,
            parity: 0,
            stop_bits: 0,
            xon_char: 0x11,
            xoff_char: 0x13,
            error_char: 0,
            eof_char: 0,
            evt_char: 0,
        }
    }
}

impl ControlBlock for MockBlock {
    fn abort_on_error(&self) -> bool {
        self.abort_on_error_set()
    }

    fn set_abort_on_error(&mut self, enabled: bool) {
        if enabled {
            self.flags |= Self::ABORT_ON_ERROR;
        } else {
            self.flags &= !Self::ABORT_ON_ERROR;
        }
    }
}

/// A native call observed by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Open(String),
    DeviceType,
    ClearCommError,
    GetCommState,
    SetCommState,
    Close,
}

#[derive(Debug)]
struct MockDeviceState {
    naming: PortNaming,
    open_error: Option<NativeError>,
    device_type: DeviceType,
    /// Fail the n-th clear call (1-based) and every clear after it.
    clear_fails_from: Option<usize>,
    get_failures: u32,
    set_failures: u32,
    pending_errors: u32,
    block: MockBlock,
    open_handles: usize,
    clear_count: usize,
    calls: Vec<MockCall>,
}

impl Default for MockDeviceState {
    fn default() -> Self {
        Self {
            naming: PortNaming::Windows,
            open_error: None,
            device_type: DeviceType::Char,
            clear_fails_from: None,
            get_failures: 0,
            set_failures: 0,
            pending_errors: 0,
            block: MockBlock::default(),
            open_handles: 0,
            clear_count: 0,
            calls: Vec::new(),
        }
    }
}

/// Scripted [`CommApi`] backend. Clones share the same device.
#[derive(Debug, Clone, Default)]
pub struct MockCommApi {
    state: Arc<Mutex<MockDeviceState>>,
}

/// Handle returned by [`MockCommApi::open`]. Dropping it closes the device.
#[derive(Debug)]
pub struct MockHandle {
    state: Arc<Mutex<MockDeviceState>>,
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.open_handles = state.open_handles.saturating_sub(1);
        state.calls.push(MockCall::Close);
    }
}

impl MockCommApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_naming(self, naming: PortNaming) -> Self {
        self.state.lock().naming = naming;
        self
    }

    pub fn with_open_error(self, error: NativeError) -> Self {
        self.state.lock().open_error = Some(error);
        self
    }

    pub fn with_device_type(self, device_type: DeviceType) -> Self {
        self.state.lock().device_type = device_type;
        self
    }

    pub fn with_flags(self, flags: u32) -> Self {
        self.state.lock().block.flags = flags;
        self
    }

    pub fn with_block(self, block: MockBlock) -> Self {
        self.state.lock().block = block;
        self
    }

    /// Fail the first `n` `GetCommState` calls.
    pub fn with_get_failures(self, n: u32) -> Self {
        self.state.lock().get_failures = n;
        self
    }

    /// Fail the first `n` `SetCommState` calls.
    pub fn with_set_failures(self, n: u32) -> Self {
        self.state.lock().set_failures = n;
        self
    }

    /// Fail the `nth` `ClearCommError` call (1-based) and all later ones.
    pub fn with_clear_failure_at(self, nth: usize) -> Self {
        self.state.lock().clear_fails_from = Some(nth);
        self
    }

    /// Pending line errors reported (and cleared) by the next clear call.
    pub fn with_pending_errors(self, errors: u32) -> Self {
        self.state.lock().pending_errors = errors;
        self
    }

    /// Control block currently stored in the device.
    pub fn current_block(&self) -> MockBlock {
        self.state.lock().block.clone()
    }

    /// Number of handles currently open.
    pub fn open_handles(&self) -> usize {
        self.state.lock().open_handles
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().calls.clone()
    }

    pub fn count(&self, call: MockCall) -> usize {
        self.state.lock().calls.iter().filter(|c| **c == call).count()
    }
}

impl CommApi for MockCommApi {
    type Handle = MockHandle;
    type Block = MockBlock;

    fn naming(&self) -> PortNaming {
        self.state.lock().naming
    }

    fn open(&self, device_path: &str) -> Result<MockHandle, NativeError> {
        let mut state = self.state.lock();
        state.calls.push(MockCall::Open(device_path.to_string()));
        if let Some(err) = state.open_error.clone() {
            return Err(err);
        }
        if state.open_handles > 0 {
            return Err(NativeError::new(ACCESS_DENIED, "Access is denied."));
        }
        state.open_handles += 1;
        Ok(MockHandle {
            state: Arc::clone(&self.state),
        })
    }

    fn device_type(&self, _handle: &MockHandle) -> Result<DeviceType, NativeError> {
        let mut state = self.state.lock();
        state.calls.push(MockCall::DeviceType);
        Ok(state.device_type)
    }

    fn clear_comm_error(&self, _handle: &MockHandle) -> Result<CommStatus, NativeError> {
        let mut state = self.state.lock();
        state.calls.push(MockCall::ClearCommError);
        state.clear_count += 1;
        let clear_count = state.clear_count;
        if state.clear_fails_from.is_some_and(|nth| clear_count >= nth) {
            return Err(gen_failure());
        }
        let errors = std::mem::take(&mut state.pending_errors);
        Ok(CommStatus {
            errors,
            in_queue: 0,
            out_queue: 0,
        })
    }

    fn get_comm_state(&self, _handle: &MockHandle) -> Result<MockBlock, NativeError> {
        let mut state = self.state.lock();
        state.calls.push(MockCall::GetCommState);
        if state.get_failures > 0 {
            state.get_failures -= 1;
            return Err(gen_failure());
        }
        Ok(state.block.clone())
    }

    fn set_comm_state(&self, _handle: &MockHandle, block: &MockBlock) -> Result<(), NativeError> {
        let mut state = self.state.lock();
        state.calls.push(MockCall::SetCommState);
        if state.set_failures > 0 {
            state.set_failures -= 1;
            return Err(gen_failure());
        }
        state.block = block.clone();
        Ok(())
    }
}
