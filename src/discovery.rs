//! Candidate port discovery.
//!
//! Finds the serial ports that belong to a known USB device by matching the
//! vendor and product IDs reported by the OS. Some systems fail to enumerate
//! USB identities (a broken WMI provider on Windows, for example); the
//! detector then downgrades itself to listing every port and leaves the
//! choice to the user.

use serde::{Deserialize, Serialize};
use serialport::{SerialPortInfo, SerialPortType, UsbPortInfo};
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors returned by [`PortDetector`].
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Failed to enumerate serial ports: {0}")]
    Enumeration(#[from] serialport::Error),
}

/// A USB device identified by vendor and product ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSelector {
    pub name: &'static str,
    pub vid: u16,
    pub pid: u16,
}

impl DeviceSelector {
    /// Texas Instruments CC2540 Bluetooth LE USB dongle.
    pub const TI_CC2540: DeviceSelector = DeviceSelector {
        name: "TI_CC2540",
        vid: 0x0451,
        pid: 0x16AA,
    };

    pub const fn custom(vid: u16, pid: u16) -> Self {
        Self {
            name: "custom",
            vid,
            pid,
        }
    }

    pub fn matches(&self, usb: &UsbPortInfo) -> bool {
        usb.vid == self.vid && usb.pid == self.pid
    }

    /// Windows PnP hardware ID fragment, e.g. `USB\VID_0451&PID_16AA`.
    pub fn pnp_id(&self) -> String {
        format!("USB\\VID_{:04X}&PID_{:04X}", self.vid, self.pid)
    }
}

impl Default for DeviceSelector {
    fn default() -> Self {
        Self::TI_CC2540
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.pnp_id())
    }
}

/// How [`PortDetector`] chooses ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMode {
    /// Only ports whose USB identity matches the selector.
    #[default]
    UsbIdentity,
    /// Every port on the system.
    AllPorts,
}

/// Source of port listings.
pub trait PortEnumerator {
    fn ports(&self) -> serialport::Result<Vec<SerialPortInfo>>;
}

/// Enumerates through `serialport::available_ports`, with USB metadata.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPorts;

impl PortEnumerator for SystemPorts {
    fn ports(&self) -> serialport::Result<Vec<SerialPortInfo>> {
        serialport::available_ports()
    }
}

/// Lists serial device nodes by name only.
///
/// Used in [`DetectionMode::AllPorts`]. It does not depend on the device
/// metadata providers that [`SystemPorts`] needs, so it keeps working when
/// those are broken.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceNodes;

impl PortEnumerator for DeviceNodes {
    fn ports(&self) -> serialport::Result<Vec<SerialPortInfo>> {
        Ok(device_node_names()?
            .into_iter()
            .map(|port_name| SerialPortInfo {
                port_name,
                port_type: SerialPortType::Unknown,
            })
            .collect())
    }
}

#[cfg(target_os = "macos")]
const NODE_PREFIXES: &[&str] = &["cu.", "tty."];
#[cfg(all(unix, not(target_os = "macos")))]
const NODE_PREFIXES: &[&str] = &["ttyS", "ttyUSB", "ttyACM", "ttyAMA", "rfcomm"];

#[cfg(unix)]
fn device_node_names() -> serialport::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir("/dev")? {
        let file_name = entry?.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        if NODE_PREFIXES.iter().any(|prefix| name.starts_with(prefix)) {
            names.push(format!("/dev/{name}"));
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(windows)]
fn device_node_names() -> serialport::Result<Vec<String>> {
    use winapi::um::fileapi::QueryDosDeviceW;

    let mut target = [0u16; 512];
    Ok((1..=255)
        .map(|n| format!("COM{n}"))
        .filter(|name| {
            let wide: Vec<u16> = name.encode_utf16().chain(std::iter::once(0)).collect();
            // SAFETY: `wide` is NUL-terminated and `target` is writable for
            // its full length.
            unsafe { QueryDosDeviceW(wide.as_ptr(), target.as_mut_ptr(), target.len() as u32) != 0 }
        })
        .collect())
}

impl<F> PortEnumerator for F
where
    F: Fn() -> serialport::Result<Vec<SerialPortInfo>>,
{
    fn ports(&self) -> serialport::Result<Vec<SerialPortInfo>> {
        self()
    }
}

/// Finds candidate ports for a [`DeviceSelector`].
///
/// `E` supplies USB identities; `F` lists plain port names in
/// [`DetectionMode::AllPorts`].
#[derive(Debug, Clone)]
pub struct PortDetector<E = SystemPorts, F = DeviceNodes> {
    mode: DetectionMode,
    enumerator: E,
    fallback: F,
}

impl PortDetector {
    pub fn new(mode: DetectionMode) -> Self {
        Self::with_enumerator(mode, SystemPorts)
    }
}

impl Default for PortDetector {
    fn default() -> Self {
        Self::new(DetectionMode::default())
    }
}

impl<E: PortEnumerator> PortDetector<E> {
    pub fn with_enumerator(mode: DetectionMode, enumerator: E) -> Self {
        Self {
            mode,
            enumerator,
            fallback: DeviceNodes,
        }
    }
}

impl<E: PortEnumerator, F: PortEnumerator> PortDetector<E, F> {
    /// Replace the enumerator used in [`DetectionMode::AllPorts`].
    pub fn with_fallback<G: PortEnumerator>(self, fallback: G) -> PortDetector<E, G> {
        PortDetector {
            mode: self.mode,
            enumerator: self.enumerator,
            fallback,
        }
    }

    pub fn mode(&self) -> DetectionMode {
        self.mode
    }

    /// Port names that may belong to `selector`.
    ///
    /// In [`DetectionMode::UsbIdentity`] a provider failure downgrades the
    /// detector to [`DetectionMode::AllPorts`] for this and every later call,
    /// and the ports are listed through the fallback enumerator.
    pub fn detect_candidate_ports(
        &mut self,
        selector: &DeviceSelector,
    ) -> Result<Vec<String>, DiscoveryError> {
        match self.mode {
            DetectionMode::UsbIdentity => match self.enumerator.ports() {
                Ok(ports) => {
                    let names: Vec<String> = ports
                        .into_iter()
                        .filter(|p| match &p.port_type {
                            SerialPortType::UsbPort(usb) => selector.matches(usb),
                            _ => false,
                        })
                        .map(|p| p.port_name)
                        .collect();
                    debug!(selector = %selector, found = names.len(), "USB identity scan complete");
                    Ok(names)
                }
                Err(e) if is_provider_failure(&e) => {
                    warn!(error = %e, "USB identity enumeration failed, listing all ports instead");
                    self.mode = DetectionMode::AllPorts;
                    self.detect_candidate_ports(selector)
                }
                Err(e) => Err(e.into()),
            },
            DetectionMode::AllPorts => {
                let ports = self.fallback.ports()?;
                Ok(ports.into_iter().map(|p| p.port_name).collect())
            }
        }
    }
}

fn is_provider_failure(err: &serialport::Error) -> bool {
    matches!(
        err.kind(),
        serialport::ErrorKind::Unknown | serialport::ErrorKind::Io(_)
    )
}
