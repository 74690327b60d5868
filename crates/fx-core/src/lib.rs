//! FX-Core: Mitsubishi FX programming-port protocol in Rust.
//!
//! This crate talks to FX-series PLCs over the serial programming port,
//! rebuilds logical messages from passive captures of that link, and
//! disassembles ladder program memory.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Control bytes, ASCII-hex framing, checksum, command codec
//! - **Transport**: Serial link abstraction (serialport, mock)
//! - **State**: Link state machine
//! - **Events**: Observer pattern for UI decoupling
//! - **Session**: Handshake and request/response orchestrator
//! - **Program**: Header and body transfer on top of the session
//! - **Capture**: Passive session reconstructor
//! - **Disasm**: Program word disassembler
//!
//! # Example
//!
//! ```no_run
//! use fx_core::session::{PlcSession, SessionConfig};
//! use fx_core::transport::SerialPortTransport;
//!
//! let config = SessionConfig::default();
//! let transport = SerialPortTransport::open("/dev/ttyUSB0", config.baud_rate)?;
//! let mut session = PlcSession::new(transport, config);
//! let words = session.read_memory(0x1000, 4)?;
//! println!("{:04X?}", words);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod capture;
pub mod disasm;
pub mod events;
pub mod program;
pub mod protocol;
pub mod session;
pub mod state;
pub mod transport;

// Re-exports for convenience
pub use capture::{CaptureRecord, Direction, MessageRecord, SessionReconstructor, reconstruct};
pub use disasm::{DecodeIssue, DecodedInstruction, Disassembler, disassemble};
pub use events::{LogLevel, NullObserver, PlcEvent, PlcObserver, TracingObserver};
pub use program::{ProgramError, ProgramHeader};
pub use protocol::{Command, MessageKind, build_frame, parse_frame};
pub use session::{AckStatus, PlcSession, SessionConfig, SessionError};
pub use state::LinkState;
pub use transport::{MockTransport, SerialPortTransport, SerialTransport, TransportError};
