//! Protocol module - FX programming-port wire format.

pub mod codec;
pub mod constants;
pub mod frame;
pub mod kind;

pub use codec::{Command, CodecError, RequestFields, decode_request, decode_words};
pub use constants::*;
pub use frame::{Frame, FramingError, build_frame, checksum, hex_nibble, parse_frame};
pub use kind::MessageKind;
