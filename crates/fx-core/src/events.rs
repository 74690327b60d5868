//! Event system for UI decoupling.
//!
//! Allows the CLI (or any other front end) to follow a session without
//! tight coupling to the core logic.

use std::fmt;

use crate::protocol::MessageKind;
use crate::state::LinkState;

/// Log level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Events emitted by a PLC session.
#[derive(Debug, Clone)]
pub enum PlcEvent {
    /// Link state changed.
    StateChanged { from: LinkState, to: LinkState },
    /// Bytes went over the link.
    Frame {
        direction: FrameDirection,
        kind: Option<MessageKind>,
        length: usize,
        data: Vec<u8>,
    },
    /// ACK-answered command finished.
    AckResult { kind: MessageKind, acked: bool },
    /// Progress over a multi-chunk operation.
    Progress {
        operation: String,
        current: u64,
        total: u64,
    },
    /// Log message.
    Log { level: LogLevel, message: String },
    /// Operation failed.
    Error { message: String },
}

/// Frame direction on the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDirection {
    Tx, // Host -> PLC
    Rx, // PLC -> Host
}

impl fmt::Display for FrameDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameDirection::Tx => write!(f, "TX"),
            FrameDirection::Rx => write!(f, "RX"),
        }
    }
}

/// Observer trait for receiving session events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait PlcObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &PlcEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl PlcObserver for NullObserver {
    fn on_event(&self, _event: &PlcEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl PlcObserver for TracingObserver {
    fn on_event(&self, event: &PlcEvent) {
        match event {
            PlcEvent::StateChanged { from, to } => {
                tracing::trace!(from = %from, to = %to, "Link state changed");
            }
            PlcEvent::Frame {
                direction,
                kind,
                length,
                data,
            } => {
                let kind = kind.as_ref().map(|k| k.tag()).unwrap_or_default();
                tracing::debug!(
                    dir = %direction,
                    kind = %kind,
                    len = length,
                    bytes = %crate::protocol::frame::hex_dump(data),
                    "Frame"
                );
            }
            PlcEvent::AckResult { kind, acked } => {
                if *acked {
                    tracing::debug!(kind = %kind, "ACK received");
                } else {
                    tracing::warn!(kind = %kind, "Command not acknowledged");
                }
            }
            PlcEvent::Progress {
                operation,
                current,
                total,
            } => {
                let pct = if *total > 0 {
                    (*current * 100) / *total
                } else {
                    0
                };
                tracing::debug!(operation = %operation, progress = %format!("{}%", pct), "Progress");
            }
            PlcEvent::Log { level, message } => match level {
                LogLevel::Trace => tracing::trace!("{}", message),
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
            PlcEvent::Error { message } => {
                tracing::error!("Error: {}", message);
            }
        }
    }
}
