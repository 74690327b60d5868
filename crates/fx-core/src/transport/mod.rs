//! Transport layer module.

pub mod mock;
pub mod serial;
pub mod traits;

pub use mock::MockTransport;
pub use serial::{LineParity, LineSettings, PortInfo, SerialPortTransport, list_ports};
pub use traits::{SerialTransport, TransportError};
