//! Configuration schema definitions.
//!
//! Every section carries `#[serde(default)]`, so a file only needs the keys
//! it changes.

use super::error::{ConfigError, ConfigResult};
use crate::discovery::{DetectionMode, DeviceSelector};
use crate::port::{DataBits, Parity, PortError, SerialPortConfig, StopBits};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Defaults for new serial sessions
    pub serial: SerialConfig,
    /// Candidate port discovery
    pub discovery: DiscoveryConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Hardware testing configuration
    pub testing: TestingConfig,
}

impl Config {
    /// Reject values that would make every session fail.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.serial.default_baud == 0 {
            return Err(ConfigError::validation(
                "serial.default_baud",
                "must be greater than zero",
            ));
        }
        if DataBits::from_count(self.serial.data_bits).is_none() {
            return Err(ConfigError::validation(
                "serial.data_bits",
                "must be 5, 6, 7 or 8",
            ));
        }
        if self.serial.read_timeout_ms == 0 {
            return Err(ConfigError::validation(
                "serial.read_timeout_ms",
                "must be greater than zero",
            ));
        }
        if self.serial.write_timeout_ms == 0 {
            return Err(ConfigError::validation(
                "serial.write_timeout_ms",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Session defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Default baud rate for new sessions
    pub default_baud: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub dtr_enable: bool,
    pub rts_enable: bool,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    /// Clear the abort-on-error flag before opening
    pub repair_before_open: bool,
    /// Port aliases for convenience
    #[serde(default)]
    pub port_aliases: HashMap<String, String>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            default_baud: 9600,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: StopBits::One,
            dtr_enable: false,
            rts_enable: false,
            read_timeout_ms: 5000,
            write_timeout_ms: 5000,
            repair_before_open: true,
            port_aliases: HashMap::new(),
        }
    }
}

impl SerialConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Resolve a port name through aliases
    pub fn resolve_port(&self, name: &str) -> String {
        self.port_aliases
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    /// Session settings for `port` (alias-resolved) with these defaults.
    pub fn session_config(&self, port: &str, baud: Option<u32>) -> Result<SerialPortConfig, PortError> {
        let data_bits = DataBits::from_count(self.data_bits)
            .ok_or_else(|| PortError::config(format!("unsupported data bits: {}", self.data_bits)))?;
        let config = SerialPortConfig::new(
            self.resolve_port(port),
            baud.unwrap_or(self.default_baud),
            data_bits,
            self.stop_bits,
            self.parity,
            self.dtr_enable,
            self.rts_enable,
        )?;
        Ok(config.with_timeouts(self.read_timeout(), self.write_timeout()))
    }
}

/// Candidate port discovery section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub mode: DetectionMode,
    /// USB vendor ID of the target device
    pub vid: u16,
    /// USB product ID of the target device
    pub pid: u16,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        let selector = DeviceSelector::TI_CC2540;
        Self {
            mode: DetectionMode::UsbIdentity,
            vid: selector.vid,
            pid: selector.pid,
        }
    }
}

impl DiscoveryConfig {
    pub fn selector(&self) -> DeviceSelector {
        let builtin = DeviceSelector::TI_CC2540;
        if builtin.vid == self.vid && builtin.pid == self.pid {
            builtin
        } else {
            DeviceSelector::custom(self.vid, self.pid)
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Log format: "json", "pretty", "compact"
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format
    Json,
    /// Pretty format with colors
    #[default]
    Pretty,
    /// Compact format
    Compact,
}

/// Hardware testing configuration section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestingConfig {
    /// Port used by the ignored hardware tests
    pub port: Option<String>,
}
