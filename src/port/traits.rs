//! Port settings and the byte-level adapter trait.
//!
//! [`SerialPortConfig`] is the value object a caller fills in before opening
//! a [`SerialSession`](super::SerialSession); [`SerialPortAdapter`] is the
//! byte I/O surface the session exposes.

use super::error::PortError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default read and write timeout applied to new sessions.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_millis(5000);

/// Settings for opening a serial session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialPortConfig {
    name: String,

    /// Baud rate (bits per second).
    pub baud_rate: u32,

    /// Number of data bits (5, 6, 7, or 8).
    pub data_bits: DataBits,

    /// Number of stop bits.
    pub stop_bits: StopBits,

    /// Parity checking mode.
    pub parity: Parity,

    /// Flow control mode.
    pub flow_control: FlowControl,

    /// Assert DTR once the port is open.
    pub dtr_enable: bool,

    /// Assert RTS once the port is open.
    pub rts_enable: bool,

    pub read_timeout: Duration,

    pub write_timeout: Duration,
}

impl SerialPortConfig {
    /// Create settings for `name`. The name must not be blank.
    pub fn new(
        name: impl Into<String>,
        baud_rate: u32,
        data_bits: DataBits,
        stop_bits: StopBits,
        parity: Parity,
        dtr_enable: bool,
        rts_enable: bool,
    ) -> Result<Self, PortError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(PortError::config("port name must not be empty"));
        }
        Ok(Self {
            name,
            baud_rate,
            data_bits,
            stop_bits,
            parity,
            flow_control: FlowControl::None,
            dtr_enable,
            rts_enable,
            read_timeout: DEFAULT_IO_TIMEOUT,
            write_timeout: DEFAULT_IO_TIMEOUT,
        })
    }

    /// 8N1 at `baud_rate`, no flow control, DTR and RTS off.
    pub fn with_defaults(name: impl Into<String>, baud_rate: u32) -> Result<Self, PortError> {
        Self::new(
            name,
            baud_rate,
            DataBits::Eight,
            StopBits::One,
            Parity::None,
            false,
            false,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn with_timeouts(mut self, read: Duration, write: Duration) -> Self {
        self.read_timeout = read;
        self.write_timeout = write;
        self
    }

    pub fn with_flow_control(mut self, flow_control: FlowControl) -> Self {
        self.flow_control = flow_control;
        self
    }
}

impl fmt::Display for SerialPortConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Baud: {}/DataBits: {}/Parity: {}/StopBits: {}/{})",
            self.name,
            self.baud_rate,
            self.data_bits,
            self.parity,
            self.stop_bits,
            if self.rts_enable { "RTS" } else { "No RTS" }
        )
    }
}

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

impl DataBits {
    pub fn from_count(bits: u8) -> Option<Self> {
        match bits {
            5 => Some(Self::Five),
            6 => Some(Self::Six),
            7 => Some(Self::Seven),
            8 => Some(Self::Eight),
            _ => None,
        }
    }

    pub fn count(self) -> u8 {
        match self {
            Self::Five => 5,
            Self::Six => 6,
            Self::Seven => 7,
            Self::Eight => 8,
        }
    }
}

impl fmt::Display for DataBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.count())
    }
}

impl From<DataBits> for serialport::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => serialport::DataBits::Five,
            DataBits::Six => serialport::DataBits::Six,
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        }
    }
}

/// Flow control modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowControl {
    None,
    Software,
    Hardware,
}

impl From<FlowControl> for serialport::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => serialport::FlowControl::None,
            FlowControl::Software => serialport::FlowControl::Software,
            FlowControl::Hardware => serialport::FlowControl::Hardware,
        }
    }
}

/// Parity checking modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopBits {
    One,
    Two,
}

impl fmt::Display for StopBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl From<StopBits> for serialport::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        }
    }
}

/// Byte-level serial I/O.
pub trait SerialPortAdapter: Send + std::fmt::Debug {
    /// Write bytes to the serial port.
    ///
    /// Returns the number of bytes actually written.
    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, PortError>;

    /// Read bytes from the serial port into the provided buffer.
    ///
    /// Returns the number of bytes actually read.
    fn read_bytes(&mut self, buffer: &mut [u8]) -> Result<usize, PortError>;

    /// Get the name/path of this serial port.
    fn name(&self) -> &str;

    /// Set both the read and the write timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<(), PortError>;

    /// Discard unread input and unsent output.
    fn clear_buffers(&mut self) -> Result<(), PortError>;

    /// Bytes waiting in the receive buffer, if the driver reports it.
    fn bytes_to_read(&self) -> Option<usize> {
        None
    }

    /// Bytes waiting in the transmit buffer, if the driver reports it.
    fn bytes_to_write(&self) -> Option<usize> {
        None
    }
}
