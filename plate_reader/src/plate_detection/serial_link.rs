use crate::error::PlateError;
use crate::utils::pause_ms;

use log::debug;
use log::info;
use log::warn;

use serde::Deserialize;
use serde::Serialize;

use serialport::SerialPort;
use serialport::SerialPortInfo;
use serialport::SerialPortType;

use std::io::Write;
use std::time::Duration;

pub const DEFAULT_BAUD_RATE: u32 = 9600;
pub const DEFAULT_VENDOR: &str = "arduino";

#[cfg(windows)]
pub const DEFAULT_PORT: &str = "COM3";
#[cfg(not(windows))]
pub const DEFAULT_PORT: &str = "/dev/ttyACM0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "strategy")]
pub enum PortSelection {
    /// Open exactly this device.
    Fixed { port: String },
    /// First port whose description contains `vendor`, ignoring case.
    AutoDetect { vendor: String },
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub selection: PortSelection,
    pub baud_rate: u32,
    pub timeout_ms: u64,
    /// Wait after opening, while the board resets.
    pub settle_ms: u64,
    /// Wait after every write so the board can process the line.
    pub pacing_ms: u64,
}

impl SerialConfig {
    pub fn auto_detect() -> Self {
        Self {
            selection: PortSelection::AutoDetect {
                vendor: DEFAULT_VENDOR.to_string(),
            },
            baud_rate: DEFAULT_BAUD_RATE,
            timeout_ms: 1000,
            settle_ms: 0,
            pacing_ms: 1000,
        }
    }

    pub fn fixed_port() -> Self {
        Self {
            selection: PortSelection::Fixed {
                port: DEFAULT_PORT.to_string(),
            },
            baud_rate: DEFAULT_BAUD_RATE,
            timeout_ms: 1000,
            settle_ms: 2000,
            pacing_ms: 0,
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self::auto_detect()
    }
}

/// Where recognized plates are delivered.
pub trait PlateSink {
    fn send(&mut self, payload: &[u8]) -> Result<(), PlateError>;
}

pub struct SerialLink {
    port: Box<dyn SerialPort>,
    name: String,
    pacing: Duration,
}

impl SerialLink {
    pub fn open(name: &str, config: &SerialConfig) -> Result<Self, PlateError> {
        let port = serialport::new(name, config.baud_rate)
            .timeout(Duration::from_millis(config.timeout_ms))
            .open()?;
        pause_ms(config.settle_ms);
        info!("Connected to {} at {} baud", name, config.baud_rate);

        Ok(Self {
            port,
            name: name.to_string(),
            pacing: Duration::from_millis(config.pacing_ms),
        })
    }
}

impl PlateSink for SerialLink {
    fn send(&mut self, payload: &[u8]) -> Result<(), PlateError> {
        self.port.write_all(payload)?;
        self.port.flush()?;
        debug!("Wrote {} bytes to {}", payload.len(), self.name);
        if !self.pacing.is_zero() {
            spin_sleep::sleep(self.pacing);
        }
        Ok(())
    }
}

/// Human readable description of a port, the way port listings show it.
pub fn describe(info: &SerialPortInfo) -> Option<String> {
    match &info.port_type {
        SerialPortType::UsbPort(usb) => {
            let parts: Vec<&str> = [usb.product.as_deref(), usb.manufacturer.as_deref()]
                .into_iter()
                .flatten()
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(" "))
            }
        }
        _ => None,
    }
}

pub fn select_port(ports: &[SerialPortInfo], vendor: &str) -> Option<String> {
    let vendor = vendor.to_lowercase();
    let mut ports: Vec<&SerialPortInfo> = ports.iter().collect();
    ports.sort_by(|a, b| a.port_name.cmp(&b.port_name));

    ports
        .into_iter()
        .find(|info| {
            describe(info)
                .map(|description| description.to_lowercase().contains(&vendor))
                .unwrap_or(false)
        })
        .map(|info| info.port_name.clone())
}

pub fn discover_port(vendor: &str) -> Result<String, PlateError> {
    let ports = serialport::available_ports()?;
    select_port(&ports, vendor).ok_or_else(|| PlateError::DeviceNotFound(vendor.to_string()))
}

/// Resolves the configured port and opens it.
///
/// A discovery miss is returned as an error and stops startup. A port that is
/// present but cannot be opened only yields `None`: the pipeline keeps
/// detecting plates and skips every send.
pub fn connect(config: &SerialConfig) -> Result<Option<SerialLink>, PlateError> {
    let name = match &config.selection {
        PortSelection::Disabled => {
            info!("Serial output disabled, running in detect-only mode");
            return Ok(None);
        }
        PortSelection::Fixed { port } => port.clone(),
        PortSelection::AutoDetect { vendor } => discover_port(vendor)?,
    };

    match SerialLink::open(&name, config) {
        Ok(link) => Ok(Some(link)),
        Err(e) => {
            warn!(
                "Could not open serial port {}: {}. Plates will be detected but not sent",
                name, e
            );
            Ok(None)
        }
    }
}
