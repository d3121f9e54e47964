//! Serial port access
//!
//! Enumerates candidate device ports and opens them as a split
//! reader/writer pair so the RX and TX workers can each own one half.

use polarprint_core::{ConnectionError, Error, Result};
use std::io::{Read, Write};
use std::time::Duration;

/// Reader half handed to the RX worker
pub type PortReader = Box<dyn Read + Send>;

/// Writer half handed to the TX worker
pub type PortWriter = Box<dyn Write + Send>;

/// Parameters for opening the device port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialParams {
    /// Port name, e.g. `/dev/ttyACM0` or `COM3`
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Read timeout; keeps the RX worker responsive to cancellation
    pub read_timeout: Duration,
}

impl SerialParams {
    /// Parameters with the default read timeout
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            read_timeout: Duration::from_millis(10),
        }
    }
}

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct SerialPortInfo {
    /// Port name (e.g., "/dev/ttyACM0", "COM3")
    pub port_name: String,

    /// Port description (e.g., "USB Serial Port")
    pub description: String,

    /// USB vendor ID if applicable
    pub vid: Option<u16>,

    /// USB product ID if applicable
    pub pid: Option<u16>,
}

impl SerialPortInfo {
    /// Create a new port info
    pub fn new(port_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            description: description.into(),
            vid: None,
            pid: None,
        }
    }

    /// Set USB IDs
    pub fn with_usb_ids(mut self, vid: u16, pid: u16) -> Self {
        self.vid = Some(vid);
        self.pid = Some(pid);
        self
    }
}

/// List serial ports that could host the printer's microcontroller
///
/// Filters to USB/ACM device patterns:
/// - Windows: COM*
/// - Linux: /dev/ttyUSB*, /dev/ttyACM*
/// - macOS: /dev/cu.usbserial-*, /dev/cu.usbmodem*
pub fn list_ports() -> Result<Vec<SerialPortInfo>> {
    let ports = serialport::available_ports().map_err(|e| {
        tracing::error!("Failed to enumerate serial ports: {}", e);
        Error::other(format!("Failed to enumerate ports: {}", e))
    })?;

    Ok(ports
        .iter()
        .filter(|port| is_candidate_port(&port.port_name))
        .map(|port| {
            let info = SerialPortInfo::new(&port.port_name, port_description(port));
            match &port.port_type {
                serialport::SerialPortType::UsbPort(usb) => info.with_usb_ids(usb.vid, usb.pid),
                _ => info,
            }
        })
        .collect())
}

/// Check if a port name matches the device port patterns
pub fn is_candidate_port(port_name: &str) -> bool {
    if let Some(digits) = port_name.strip_prefix("COM") {
        return !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit());
    }

    port_name.starts_with("/dev/ttyUSB")
        || port_name.starts_with("/dev/ttyACM")
        || port_name.starts_with("/dev/cu.usbserial-")
        || port_name.starts_with("/dev/cu.usbmodem")
}

fn port_description(port: &serialport::SerialPortInfo) -> String {
    match &port.port_type {
        serialport::SerialPortType::UsbPort(usb) => format!(
            "USB {} {}",
            usb.manufacturer.as_deref().unwrap_or("Device"),
            usb.product.as_deref().unwrap_or("Serial Port")
        ),
        serialport::SerialPortType::BluetoothPort => "Bluetooth Serial".to_string(),
        serialport::SerialPortType::PciPort => "PCI Serial".to_string(),
        _ => "Serial Port".to_string(),
    }
}

/// Opens device ports; abstracted so discovery can run against simulators
pub trait PortOpener: Send + Sync {
    /// Open `port` and return independent reader and writer halves
    fn open(&self, port: &str) -> Result<(PortReader, PortWriter)>;

    /// Ports worth probing when no port is configured
    fn candidates(&self) -> Result<Vec<String>> {
        Ok(list_ports()?.into_iter().map(|p| p.port_name).collect())
    }
}

/// Opens real serial ports through the `serialport` crate
#[derive(Debug, Clone)]
pub struct SerialOpener {
    baud_rate: u32,
    read_timeout: Duration,
}

impl SerialOpener {
    /// Opener using `baud_rate` and a short read timeout
    pub fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            read_timeout: Duration::from_millis(10),
        }
    }
}

impl PortOpener for SerialOpener {
    fn open(&self, port: &str) -> Result<(PortReader, PortWriter)> {
        open_port(&SerialParams {
            port: port.to_string(),
            baud_rate: self.baud_rate,
            read_timeout: self.read_timeout,
        })
    }
}

/// Open a port 8N1 without flow control and split it
pub fn open_port(params: &SerialParams) -> Result<(PortReader, PortWriter)> {
    if params.baud_rate == 0 {
        return Err(ConnectionError::InvalidParameters {
            reason: "baud rate must be > 0".to_string(),
        }
        .into());
    }

    let failed = |e: serialport::Error| {
        tracing::warn!("Failed to open serial port {}: {}", params.port, e);
        Error::from(ConnectionError::FailedToOpen {
            port: params.port.clone(),
            reason: e.to_string(),
        })
    };

    let port = serialport::new(&params.port, params.baud_rate)
        .timeout(params.read_timeout)
        .data_bits(serialport::DataBits::Eight)
        .stop_bits(serialport::StopBits::One)
        .parity(serialport::Parity::None)
        .flow_control(serialport::FlowControl::None)
        .open()
        .map_err(failed)?;
    let reader = port.try_clone().map_err(failed)?;

    tracing::info!("Opened {} at {} baud", params.port, params.baud_rate);
    Ok((Box::new(reader), Box::new(port)))
}
