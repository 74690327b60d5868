//! Serial transport layer abstraction.
//!
//! Defines the `SerialTransport` trait for byte-level link I/O,
//! allowing different implementations (serialport, mock, etc.).

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Serial port not found: {0}")]
    PortNotFound(String),

    #[error("Failed to open {port}: {message}")]
    OpenFailed { port: String, message: String },

    #[error("Failed to configure {port}: {message}")]
    ConfigureFailed { port: String, message: String },

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Device disconnected")]
    Disconnected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Abstract serial transport interface.
///
/// Implementations own the device handle exclusively; dropping the
/// transport releases it.
pub trait SerialTransport: Send {
    /// Write raw bytes to the link.
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Read one byte, waiting at most `timeout`. `Ok(None)` means nothing
    /// arrived in time.
    fn read_byte(&mut self, timeout: Duration) -> Result<Option<u8>, TransportError>;

    /// Name of the underlying port, for logs.
    fn port_name(&self) -> String;
}

impl<T: SerialTransport + ?Sized> SerialTransport for Box<T> {
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        (**self).write(data)
    }

    fn read_byte(&mut self, timeout: Duration) -> Result<Option<u8>, TransportError> {
        (**self).read_byte(timeout)
    }

    fn port_name(&self) -> String {
        (**self).port_name()
    }
}
