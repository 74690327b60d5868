//! Message kinds seen on the link.
//!
//! Every classified message, live or captured, carries one of these. The
//! short tags (`PR`, `BS`, `U_xx`, ...) are what capture output prints.

use std::fmt;

use serde::{Serialize, Serializer};

#[derive(Clone, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Enq,
    Ack,
    ParamRead,
    ParamWrite,
    FlashRead,
    FlashWrite,
    MemoryRead,
    MemoryWrite,
    BitSet,
    BitClear,
    FlashLock,
    TypeQuery,
    VersionQuery,
    /// Unclassified; holds the two chars after `U_`.
    Unknown(String),
}

impl MessageKind {
    /// Unknown kind tagged with the first two chars of `text`, padded with '0'.
    pub fn unknown_from_text(text: &str) -> Self {
        let mut tag: String = text.chars().take(2).collect();
        while tag.chars().count() < 2 {
            tag.push('0');
        }
        MessageKind::Unknown(tag)
    }

    /// Unknown single raw byte.
    pub fn unknown_byte(byte: u8) -> Self {
        MessageKind::Unknown(format!("{:02X}", byte))
    }

    /// Short tag.
    pub fn tag(&self) -> String {
        match self {
            MessageKind::Unknown(t) => format!("U_{}", t),
            other => other.fixed_tag().to_string(),
        }
    }

    fn fixed_tag(&self) -> &'static str {
        match self {
            MessageKind::Enq => "ENQ",
            MessageKind::Ack => "ACK",
            MessageKind::ParamRead => "PR",
            MessageKind::ParamWrite => "PW",
            MessageKind::FlashRead => "FR",
            MessageKind::FlashWrite => "FW",
            MessageKind::MemoryRead => "MR",
            MessageKind::MemoryWrite => "MW",
            MessageKind::BitSet => "BS",
            MessageKind::BitClear => "BC",
            MessageKind::FlashLock => "FL",
            MessageKind::TypeQuery => "TYP",
            MessageKind::VersionQuery => "VER",
            MessageKind::Unknown(_) => "U",
        }
    }

    /// Host requests that carry a command (everything but ENQ/ACK/unknown).
    pub fn is_request(&self) -> bool {
        !matches!(
            self,
            MessageKind::Enq | MessageKind::Ack | MessageKind::Unknown(_)
        )
    }

    /// Requests answered by a framed data response.
    pub fn is_read(&self) -> bool {
        matches!(
            self,
            MessageKind::ParamRead
                | MessageKind::FlashRead
                | MessageKind::MemoryRead
                | MessageKind::TypeQuery
                | MessageKind::VersionQuery
        )
    }

    /// Requests answered by a bare ACK byte.
    pub fn is_ack_answered(&self) -> bool {
        matches!(
            self,
            MessageKind::ParamWrite
                | MessageKind::FlashWrite
                | MessageKind::MemoryWrite
                | MessageKind::BitSet
                | MessageKind::BitClear
                | MessageKind::FlashLock
        )
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, MessageKind::Unknown(_))
    }
}

impl fmt::Debug for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageKind({})", self.tag())
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Unknown(t) => write!(f, "U_{}", t),
            other => f.write_str(other.fixed_tag()),
        }
    }
}

impl Serialize for MessageKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags() {
        assert_eq!(MessageKind::BitSet.to_string(), "BS");
        assert_eq!(MessageKind::TypeQuery.to_string(), "TYP");
        assert_eq!(MessageKind::unknown_byte(0x15).to_string(), "U_15");
        assert_eq!(MessageKind::unknown_from_text("Z").tag(), "U_Z0");
        assert_eq!(MessageKind::unknown_from_text("QRS").tag(), "U_QR");
    }

    #[test]
    fn test_request_classes() {
        assert!(MessageKind::ParamRead.is_read());
        assert!(!MessageKind::ParamRead.is_ack_answered());
        assert!(MessageKind::BitClear.is_ack_answered());
        assert!(MessageKind::FlashLock.is_request());
        assert!(!MessageKind::Ack.is_request());
        assert!(!MessageKind::unknown_byte(0).is_request());
    }

    #[test]
    fn test_serialize_as_tag() {
        let json = serde_json::to_string(&MessageKind::FlashWrite).unwrap();
        assert_eq!(json, "\"FW\"");
    }
}
