//! serialport-based transport implementation.

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serialport::{DataBits, FlowControl, Parity, SerialPort, SerialPortType, StopBits};
use tracing::{debug, info, instrument};

use super::traits::{SerialTransport, TransportError};

/// A serial device as reported by the OS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub name: String,
    pub description: String,
}

/// List serial ports present on this machine.
pub fn list_ports() -> Result<Vec<PortInfo>, TransportError> {
    let ports = serialport::available_ports()
        .map_err(|e| TransportError::PortNotFound(e.to_string()))?;

    Ok(ports
        .into_iter()
        .map(|p| {
            let description = match p.port_type {
                SerialPortType::UsbPort(usb) => format!(
                    "USB {:04X}:{:04X} {}",
                    usb.vid,
                    usb.pid,
                    usb.product.unwrap_or_default()
                ),
                SerialPortType::PciPort => "PCI".to_string(),
                SerialPortType::BluetoothPort => "Bluetooth".to_string(),
                SerialPortType::Unknown => "Unknown".to_string(),
            };
            PortInfo {
                name: p.port_name,
                description: description.trim_end().to_string(),
            }
        })
        .collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineParity {
    None,
    Odd,
    Even,
}

/// Character framing on the line. The FX programming port runs 7E1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineSettings {
    pub data_bits: u8,
    pub parity: LineParity,
    pub stop_bits: u8,
}

impl Default for LineSettings {
    fn default() -> Self {
        Self {
            data_bits: 7,
            parity: LineParity::Even,
            stop_bits: 1,
        }
    }
}

impl LineSettings {
    fn data_bits(&self) -> Option<DataBits> {
        match self.data_bits {
            5 => Some(DataBits::Five),
            6 => Some(DataBits::Six),
            7 => Some(DataBits::Seven),
            8 => Some(DataBits::Eight),
            _ => None,
        }
    }

    fn stop_bits(&self) -> Option<StopBits> {
        match self.stop_bits {
            1 => Some(StopBits::One),
            2 => Some(StopBits::Two),
            _ => None,
        }
    }

    fn parity(&self) -> Parity {
        match self.parity {
            LineParity::None => Parity::None,
            LineParity::Odd => Parity::Odd,
            LineParity::Even => Parity::Even,
        }
    }
}

/// Programming-port link over a real serial device. The port closes when
/// this is dropped.
pub struct SerialPortTransport {
    port: Box<dyn SerialPort>,
    name: String,
    timeout: Duration,
}

impl SerialPortTransport {
    /// Open `path` with the default 7E1 framing.
    pub fn open(path: &str, baud_rate: u32) -> Result<Self, TransportError> {
        Self::open_with(path, baud_rate, LineSettings::default())
    }

    #[instrument(level = "info")]
    pub fn open_with(
        path: &str,
        baud_rate: u32,
        line: LineSettings,
    ) -> Result<Self, TransportError> {
        let invalid = |what: &str| TransportError::ConfigureFailed {
            port: path.to_string(),
            message: format!("unsupported {}", what),
        };
        let data_bits = line.data_bits().ok_or_else(|| invalid("data bits"))?;
        let stop_bits = line.stop_bits().ok_or_else(|| invalid("stop bits"))?;

        let timeout = Duration::from_millis(100);
        let port = serialport::new(path, baud_rate)
            .data_bits(data_bits)
            .parity(line.parity())
            .stop_bits(stop_bits)
            .flow_control(FlowControl::None)
            .timeout(timeout)
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => TransportError::PortNotFound(path.to_string()),
                serialport::ErrorKind::InvalidInput => TransportError::ConfigureFailed {
                    port: path.to_string(),
                    message: e.to_string(),
                },
                _ => TransportError::OpenFailed {
                    port: path.to_string(),
                    message: e.to_string(),
                },
            })?;

        info!(port = path, baud_rate, ?line, "Serial port opened");

        Ok(Self {
            port,
            name: path.to_string(),
            timeout,
        })
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), TransportError> {
        if timeout != self.timeout {
            self.port
                .set_timeout(timeout)
                .map_err(|e| TransportError::ConfigureFailed {
                    port: self.name.clone(),
                    message: e.to_string(),
                })?;
            self.timeout = timeout;
        }
        Ok(())
    }
}

impl SerialTransport for SerialPortTransport {
    #[instrument(skip(self, data), fields(len = data.len()))]
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        self.port
            .write_all(data)
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
        self.port
            .flush()
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;

        debug!(bytes_written = data.len(), "Write complete");
        Ok(data.len())
    }

    fn read_byte(&mut self, timeout: Duration) -> Result<Option<u8>, TransportError> {
        self.set_timeout(timeout)?;
        let mut buf = [0u8; 1];
        match self.port.read(&mut buf) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(buf[0])),
            Err(e) if e.kind() == ErrorKind::TimedOut => Ok(None),
            Err(e) if e.kind() == ErrorKind::BrokenPipe => Err(TransportError::Disconnected),
            Err(e) => Err(TransportError::ReadFailed(e.to_string())),
        }
    }

    fn port_name(&self) -> String {
        self.name.clone()
    }
}

impl Drop for SerialPortTransport {
    fn drop(&mut self) {
        debug!(port = %self.name, "Serial port closed");
    }
}
