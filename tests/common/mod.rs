//! Shared test utilities for solid-serial tests.
//!
//! This module provides:
//! - `FakeSerialPort`, an in-memory `serialport::SerialPort` that can be "unplugged"
//! - Builders for mock devices used by the repair tests
//! - Hardware test configuration from the environment

#![allow(dead_code)]

use parking_lot::Mutex;
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use solid_serial::fixer::{MockBlock, MockCommApi};
use solid_serial::port::{SerialPortConfig, SerialStream};
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct FakeState {
    read_queue: VecDeque<u8>,
    written: Vec<u8>,
    cts: bool,
    dsr: bool,
    ri: bool,
    cd: bool,
    dtr: Option<bool>,
    rts: Option<bool>,
    clears: usize,
    /// Last timeout set through any handle.
    timeout: Option<Duration>,
    removed: bool,
    clone_fails: bool,
    /// Live handles, including clones held by event threads.
    open_handles: usize,
}

/// In-memory serial port. Clones made through `try_clone` share state.
#[derive(Debug)]
pub struct FakeSerialPort {
    state: Arc<Mutex<FakeState>>,
    timeout: Duration,
}

/// Test-side view of a `FakeSerialPort`.
#[derive(Debug, Clone)]
pub struct FakeDevice {
    state: Arc<Mutex<FakeState>>,
}

impl FakeSerialPort {
    pub fn new() -> (Self, FakeDevice) {
        let state = Arc::new(Mutex::new(FakeState::default()));
        state.lock().open_handles = 1;
        let device = FakeDevice {
            state: Arc::clone(&state),
        };
        (
            Self {
                state,
                timeout: Duration::from_millis(50),
            },
            device,
        )
    }

    fn check(&self) -> serialport::Result<()> {
        if self.state.lock().removed {
            Err(serialport::Error::new(
                serialport::ErrorKind::NoDevice,
                "device removed",
            ))
        } else {
            Ok(())
        }
    }
}

impl Drop for FakeSerialPort {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.open_handles = state.open_handles.saturating_sub(1);
    }
}

impl FakeDevice {
    pub fn enqueue_read(&self, data: &[u8]) {
        self.state.lock().read_queue.extend(data);
    }

    pub fn written(&self) -> Vec<u8> {
        self.state.lock().written.clone()
    }

    pub fn set_cts(&self, level: bool) {
        self.state.lock().cts = level;
    }

    pub fn dtr(&self) -> Option<bool> {
        self.state.lock().dtr
    }

    pub fn rts(&self) -> Option<bool> {
        self.state.lock().rts
    }

    pub fn clears(&self) -> usize {
        self.state.lock().clears
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.state.lock().timeout
    }

    /// Every later call on any handle fails as on a detached adapter.
    pub fn unplug(&self) {
        self.state.lock().removed = true;
    }

    pub fn refuse_clones(&self) {
        self.state.lock().clone_fails = true;
    }

    pub fn open_handles(&self) -> usize {
        self.state.lock().open_handles
    }
}

impl io::Read for FakeSerialPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        if state.removed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device removed"));
        }
        if state.read_queue.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "Operation timed out"));
        }
        let n = buf.len().min(state.read_queue.len());
        for (slot, byte) in buf.iter_mut().zip(state.read_queue.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl io::Write for FakeSerialPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        if state.removed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device removed"));
        }
        state.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SerialPort for FakeSerialPort {
    fn name(&self) -> Option<String> {
        Some("FAKE0".to_string())
    }

    fn baud_rate(&self) -> serialport::Result<u32> {
        Ok(9600)
    }

    fn data_bits(&self) -> serialport::Result<DataBits> {
        Ok(DataBits::Eight)
    }

    fn flow_control(&self) -> serialport::Result<FlowControl> {
        Ok(FlowControl::None)
    }

    fn parity(&self) -> serialport::Result<Parity> {
        Ok(Parity::None)
    }

    fn stop_bits(&self) -> serialport::Result<StopBits> {
        Ok(StopBits::One)
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_baud_rate(&mut self, _baud_rate: u32) -> serialport::Result<()> {
        self.check()
    }

    fn set_data_bits(&mut self, _data_bits: DataBits) -> serialport::Result<()> {
        self.check()
    }

    fn set_flow_control(&mut self, _flow_control: FlowControl) -> serialport::Result<()> {
        self.check()
    }

    fn set_parity(&mut self, _parity: Parity) -> serialport::Result<()> {
        self.check()
    }

    fn set_stop_bits(&mut self, _stop_bits: StopBits) -> serialport::Result<()> {
        self.check()
    }

    fn set_timeout(&mut self, timeout: Duration) -> serialport::Result<()> {
        self.check()?;
        self.timeout = timeout;
        self.state.lock().timeout = Some(timeout);
        Ok(())
    }

    fn write_request_to_send(&mut self, level: bool) -> serialport::Result<()> {
        self.check()?;
        self.state.lock().rts = Some(level);
        Ok(())
    }

    fn write_data_terminal_ready(&mut self, level: bool) -> serialport::Result<()> {
        self.check()?;
        self.state.lock().dtr = Some(level);
        Ok(())
    }

    fn read_clear_to_send(&mut self) -> serialport::Result<bool> {
        self.check()?;
        Ok(self.state.lock().cts)
    }

    fn read_data_set_ready(&mut self) -> serialport::Result<bool> {
        self.check()?;
        Ok(self.state.lock().dsr)
    }

    fn read_ring_indicator(&mut self) -> serialport::Result<bool> {
        self.check()?;
        Ok(self.state.lock().ri)
    }

    fn read_carrier_detect(&mut self) -> serialport::Result<bool> {
        self.check()?;
        Ok(self.state.lock().cd)
    }

    fn bytes_to_read(&self) -> serialport::Result<u32> {
        self.check()?;
        Ok(self.state.lock().read_queue.len() as u32)
    }

    fn bytes_to_write(&self) -> serialport::Result<u32> {
        self.check()?;
        Ok(0)
    }

    fn clear(&self, buffer_to_clear: ClearBuffer) -> serialport::Result<()> {
        self.check()?;
        let mut state = self.state.lock();
        if matches!(buffer_to_clear, ClearBuffer::Input | ClearBuffer::All) {
            state.read_queue.clear();
        }
        state.clears += 1;
        Ok(())
    }

    fn try_clone(&self) -> serialport::Result<Box<dyn SerialPort>> {
        let mut state = self.state.lock();
        if state.clone_fails {
            return Err(serialport::Error::new(
                serialport::ErrorKind::Unknown,
                "handle duplication refused",
            ));
        }
        state.open_handles += 1;
        Ok(Box::new(FakeSerialPort {
            state: Arc::clone(&self.state),
            timeout: self.timeout,
        }))
    }

    fn set_break(&self) -> serialport::Result<()> {
        self.check()
    }

    fn clear_break(&self) -> serialport::Result<()> {
        self.check()
    }
}

/// A stream over a fresh fake port with a fast-polling event loop.
pub fn fake_stream(name: &str) -> (SerialStream, FakeDevice) {
    let (port, device) = FakeSerialPort::new();
    let stream = SerialStream::new(name, Box::new(port), Duration::from_millis(5));
    (stream, device)
}

/// Session settings with short timeouts for the fake port.
pub fn fake_config(name: &str) -> SerialPortConfig {
    SerialPortConfig::with_defaults(name, 9600)
        .unwrap()
        .with_timeouts(Duration::from_millis(50), Duration::from_millis(50))
}

/// A mock device whose driver left abort-on-error set.
pub fn abort_flagged_device() -> MockCommApi {
    MockCommApi::new().with_flags(MockBlock::ABORT_ON_ERROR | 0x0001)
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Test port configuration from environment.
pub struct TestPortConfig {
    pub port_name: String,
    pub baud_rate: u32,
}

impl TestPortConfig {
    /// Read `TEST_PORT` and optional `TEST_BAUD`.
    pub fn from_env() -> Option<Self> {
        let port_name = std::env::var("TEST_PORT").ok()?;
        let baud_rate = std::env::var("TEST_BAUD")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(9600);
        Some(Self {
            port_name,
            baud_rate,
        })
    }
}
