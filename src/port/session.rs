//! High-level serial session: repair, open, byte I/O and safe disposal.

use super::error::PortError;
use super::stream::SerialStream;
use super::traits::{SerialPortAdapter, SerialPortConfig};
use crate::fixer;
use crate::teardown::{
    self, Disposable, LineEvent, LineState, TeardownReport, DEFAULT_POLL_INTERVAL,
};
use std::io::{Read, Write};
use std::sync::mpsc::Receiver;
use std::time::Duration;
use tracing::{debug, warn};

/// Behaviour switches for [`SerialSession::open_with`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Clear the abort-on-error flag before opening.
    pub repair_before_open: bool,
    /// Interval between status-line polls on the event thread.
    pub line_poll_interval: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            repair_before_open: true,
            line_poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// An open serial port that survives its device being unplugged.
///
/// Opening repairs the device's control block first; closing (explicitly or
/// on drop) goes through [`teardown::safe_teardown`].
///
/// # Example
/// ```no_run
/// use solid_serial::port::{SerialPortConfig, SerialSession};
///
/// let config = SerialPortConfig::with_defaults("COM3", 115200)?;
/// let mut session = SerialSession::open(config)?;
/// session.write(b"AT\r")?;
/// let reply = session.read_byte()?;
/// session.close();
/// # let _ = reply;
/// # Ok::<(), solid_serial::port::PortError>(())
/// ```
pub struct SerialSession {
    config: SerialPortConfig,
    stream: Option<SerialStream>,
    open: bool,
    finalize_on_drop: bool,
    applied_timeout: Duration,
}

impl SerialSession {
    /// Repair and open the port described by `config`.
    pub fn open(config: SerialPortConfig) -> Result<Self, PortError> {
        Self::open_with(config, &SessionOptions::default())
    }

    pub fn open_with(
        config: SerialPortConfig,
        options: &SessionOptions,
    ) -> Result<Self, PortError> {
        if options.repair_before_open {
            fixer::repair(config.name())?;
        }

        let port = serialport::new(config.name(), config.baud_rate)
            .data_bits(config.data_bits.into())
            .flow_control(config.flow_control.into())
            .parity(config.parity.into())
            .stop_bits(config.stop_bits.into())
            .timeout(config.read_timeout)
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => PortError::not_found(config.name()),
                serialport::ErrorKind::InvalidInput => PortError::config(e.to_string()),
                _ => PortError::Serial(e),
            })?;

        let stream = SerialStream::new(config.name(), port, options.line_poll_interval);
        Self::from_stream(config, stream)
    }

    /// Build a session around an already-open stream, applying the line
    /// settings and discarding stale buffered data.
    ///
    /// On failure the stream is torn down before the error is returned.
    pub fn from_stream(config: SerialPortConfig, stream: SerialStream) -> Result<Self, PortError> {
        let applied_timeout = config.read_timeout;
        let mut session = Self {
            config,
            stream: Some(stream),
            open: true,
            finalize_on_drop: true,
            applied_timeout,
        };

        if let Err(e) = session.prepare() {
            warn!(port = %session.config.name(), error = %e, "Session setup failed, tearing down");
            session.close();
            return Err(e);
        }

        debug!(config = %session.config, "Serial session open");
        Ok(session)
    }

    fn prepare(&mut self) -> Result<(), PortError> {
        let dtr = self.config.dtr_enable;
        let rts = self.config.rts_enable;
        let port = self.stream_mut()?.port_mut()?;
        port.write_data_terminal_ready(dtr)?;
        port.write_request_to_send(rts)?;
        port.clear(serialport::ClearBuffer::All)?;
        Ok(())
    }

    pub fn config(&self) -> &SerialPortConfig {
        &self.config
    }

    pub fn port_name(&self) -> &str {
        self.config.name()
    }

    pub fn is_open(&self) -> bool {
        self.open && self.stream.as_ref().is_some_and(SerialStream::is_open)
    }

    pub fn read_timeout(&self) -> Duration {
        self.config.read_timeout
    }

    pub fn set_read_timeout(&mut self, timeout: Duration) {
        self.config.read_timeout = timeout;
    }

    pub fn write_timeout(&self) -> Duration {
        self.config.write_timeout
    }

    pub fn set_write_timeout(&mut self, timeout: Duration) {
        self.config.write_timeout = timeout;
    }

    /// Status-line changes published by the stream's event thread.
    pub fn line_events(&self) -> Option<&Receiver<LineEvent>> {
        self.stream.as_ref().and_then(SerialStream::line_events)
    }

    /// Current levels of the modem status lines.
    pub fn line_state(&mut self) -> Result<LineState, PortError> {
        let port = self.stream_mut()?.port_mut()?;
        Ok(LineState {
            cts: port.read_clear_to_send()?,
            dsr: port.read_data_set_ready()?,
            ri: port.read_ring_indicator()?,
            cd: port.read_carrier_detect()?,
        })
    }

    /// Read a single byte, waiting up to the read timeout.
    pub fn read_byte(&mut self) -> Result<u8, PortError> {
        let mut byte = [0u8; 1];
        match self.read_bytes(&mut byte)? {
            0 => Err(PortError::timeout(self.config.read_timeout)),
            _ => Ok(byte[0]),
        }
    }

    /// Write all of `buffer`, waiting up to the write timeout.
    pub fn write(&mut self, buffer: &[u8]) -> Result<(), PortError> {
        let timeout = self.config.write_timeout;
        self.apply_timeout(timeout)?;
        self.stream_mut()?
            .port_mut()?
            .write_all(buffer)
            .map_err(|e| io_error(e, timeout))
    }

    /// Close the session. Safe to call more than once.
    pub fn close(&mut self) -> TeardownReport {
        match self.stream.take() {
            Some(mut stream) => teardown::safe_teardown(self, &mut stream),
            None => {
                self.open = false;
                self.finalize_on_drop = false;
                TeardownReport::default()
            }
        }
    }

    fn stream_mut(&mut self) -> Result<&mut SerialStream, PortError> {
        if !self.open {
            return Err(PortError::NotOpen);
        }
        self.stream.as_mut().ok_or(PortError::NotOpen)
    }

    fn apply_timeout(&mut self, timeout: Duration) -> Result<(), PortError> {
        if self.applied_timeout != timeout {
            self.stream_mut()?.port_mut()?.set_timeout(timeout)?;
            self.applied_timeout = timeout;
        }
        Ok(())
    }
}

fn io_error(err: std::io::Error, timeout: Duration) -> PortError {
    if err.kind() == std::io::ErrorKind::TimedOut {
        PortError::timeout(timeout)
    } else {
        PortError::Io(err)
    }
}

impl Disposable for SerialSession {
    fn suppress_finalizer(&mut self) {
        self.finalize_on_drop = false;
    }

    fn close(&mut self) -> Result<(), PortError> {
        if !self.open {
            return Err(PortError::NotOpen);
        }
        self.open = false;
        debug!(port = %self.config.name(), "Serial session closed");
        Ok(())
    }
}

impl SerialPortAdapter for SerialSession {
    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, PortError> {
        let timeout = self.config.write_timeout;
        self.apply_timeout(timeout)?;
        self.stream_mut()?
            .port_mut()?
            .write(data)
            .map_err(|e| io_error(e, timeout))
    }

    fn read_bytes(&mut self, buffer: &mut [u8]) -> Result<usize, PortError> {
        let timeout = self.config.read_timeout;
        self.apply_timeout(timeout)?;
        self.stream_mut()?
            .port_mut()?
            .read(buffer)
            .map_err(|e| io_error(e, timeout))
    }

    fn name(&self) -> &str {
        self.config.name()
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), PortError> {
        self.config.read_timeout = timeout;
        self.config.write_timeout = timeout;
        self.apply_timeout(timeout)
    }

    fn clear_buffers(&mut self) -> Result<(), PortError> {
        self.stream_mut()?
            .port_mut()?
            .clear(serialport::ClearBuffer::All)
            .map_err(PortError::Serial)
    }

    fn bytes_to_read(&self) -> Option<usize> {
        let port = self.stream.as_ref()?.port().ok()?;
        port.bytes_to_read().ok().map(|n| n as usize)
    }

    fn bytes_to_write(&self) -> Option<usize> {
        let port = self.stream.as_ref()?.port().ok()?;
        port.bytes_to_write().ok().map(|n| n as usize)
    }
}

impl Drop for SerialSession {
    fn drop(&mut self) {
        if self.finalize_on_drop {
            self.close();
        }
    }
}

impl std::fmt::Debug for SerialSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialSession")
            .field("config", &self.config)
            .field("open", &self.is_open())
            .field("stream", &self.stream)
            .finish()
    }
}
