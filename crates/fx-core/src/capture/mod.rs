//! Capture module - rebuilds protocol messages from recorded traffic.

pub mod reconstructor;
pub mod record;

pub use reconstructor::{MessageRecord, SessionReconstructor, SessionState, reconstruct};
pub use record::{CaptureError, CaptureRecord, Direction, decode_hex};
