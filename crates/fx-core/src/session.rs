//! PLC session - handshake, framed exchange and the command operations.
//!
//! Every operation runs one full cycle on the link:
//! `ENQ -> ACK -> STX payload ETX sum -> response`, where the response is
//! either a framed payload (reads, info queries) or a single ACK byte
//! (writes, bit operations, flash lock). Nothing is retried here; callers
//! decide what to do with a failed cycle.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::events::{FrameDirection, LogLevel, PlcEvent, PlcObserver, TracingObserver};
use crate::protocol::codec::{CodecError, Command, decode_words};
use crate::protocol::constants::{
    ACK, DEFAULT_ACK_TIMEOUT_MS, DEFAULT_BAUD_RATE, DEFAULT_RESPONSE_TIMEOUT_MS, ENQ, ETX,
};
use crate::protocol::frame::{Frame, FramingError, build_frame};
use crate::protocol::kind::MessageKind;
use crate::state::{LinkState, LinkStateMachine};
use crate::transport::{LineSettings, SerialTransport, TransportError};

/// Configuration for a PLC session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Serial device path (e.g. `/dev/ttyUSB0`, `COM3`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    pub baud_rate: u32,
    #[serde(flatten)]
    pub line: LineSettings,
    /// Wait for the ACK after ENQ or after an ACK-answered command.
    pub ack_timeout_ms: u64,
    /// Wait for a complete framed response.
    pub response_timeout_ms: u64,
    /// Encode everything, send nothing.
    pub dry_run: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            line: LineSettings::default(),
            ack_timeout_ms: DEFAULT_ACK_TIMEOUT_MS,
            response_timeout_ms: DEFAULT_RESPONSE_TIMEOUT_MS,
            dry_run: false,
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

fn describe_byte(byte: &Option<u8>) -> String {
    match byte {
        Some(b) => format!("got 0x{:02X}", b),
        None => "no response".to_string(),
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("Checksum mismatch: frame carries '{received}', payload sums to '{expected}'")]
    Checksum { expected: String, received: String },

    #[error("Handshake failed: {}", describe_byte(.received))]
    HandshakeFailed { received: Option<u8> },

    #[error("No complete response within {timeout_ms} ms ({received} bytes received)")]
    ResponseTimeout { timeout_ms: u64, received: usize },

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Outcome of an ACK-answered command. Not an error: the caller decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    Acked,
    /// Device answered with something other than ACK (usually NAK 0x15).
    Rejected(u8),
    NoResponse,
    /// Nothing was sent.
    DryRun,
}

impl AckStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, AckStatus::Acked | AckStatus::DryRun)
    }
}

impl std::fmt::Display for AckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AckStatus::Acked => write!(f, "ACK"),
            AckStatus::Rejected(b) => write!(f, "rejected (0x{:02X})", b),
            AckStatus::NoResponse => write!(f, "no response"),
            AckStatus::DryRun => write!(f, "dry run"),
        }
    }
}

/// One connection to a PLC programming port.
pub struct PlcSession<T: SerialTransport, O: PlcObserver = TracingObserver> {
    transport: T,
    config: SessionConfig,
    observer: Arc<O>,
    link: LinkStateMachine,
    last_request: Option<Vec<u8>>,
}

impl<T: SerialTransport> PlcSession<T, TracingObserver> {
    /// Create a new session with default tracing observer.
    pub fn new(transport: T, config: SessionConfig) -> Self {
        Self::with_observer(transport, config, Arc::new(TracingObserver))
    }
}

impl<T: SerialTransport, O: PlcObserver> PlcSession<T, O> {
    /// Create a new session with a custom observer.
    pub fn with_observer(transport: T, config: SessionConfig, observer: Arc<O>) -> Self {
        Self {
            transport,
            config,
            observer,
            link: LinkStateMachine::new(),
            last_request: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn link_state(&self) -> LinkState {
        self.link.state
    }

    pub fn is_dry_run(&self) -> bool {
        self.config.dry_run
    }

    /// Full frame of the most recent command, sent or (in dry run) not.
    pub fn last_request(&self) -> Option<&[u8]> {
        self.last_request.as_deref()
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// Give the transport back, closing nothing.
    pub fn into_transport(self) -> T {
        self.transport
    }

    fn goto(&mut self, state: LinkState) {
        let from = self.link.state;
        self.link.goto_state(state);
        if from != state {
            self.observer
                .on_event(&PlcEvent::StateChanged { from, to: state });
        }
    }

    fn fail<E: Into<SessionError>>(&mut self, err: E) -> SessionError {
        let err = err.into();
        self.link.fail();
        self.observer.on_event(&PlcEvent::Error {
            message: err.to_string(),
        });
        err
    }

    /// ENQ, then wait for ACK.
    #[instrument(skip(self))]
    pub fn start_communication(&mut self) -> Result<(), SessionError> {
        self.goto(LinkState::AwaitingAck);

        if self.config.dry_run {
            debug!("Dry run: skipping handshake");
            self.goto(LinkState::Ready);
            return Ok(());
        }

        if let Err(e) = self.transport.write(&[ENQ]) {
            return Err(self.fail(e));
        }
        self.emit_frame(FrameDirection::Tx, Some(MessageKind::Enq), &[ENQ]);

        let timeout = self.config.ack_timeout();
        let received = match self.transport.read_byte(timeout) {
            Ok(b) => b,
            Err(e) => return Err(self.fail(e)),
        };

        if received == Some(ACK) {
            self.emit_frame(FrameDirection::Rx, Some(MessageKind::Ack), &[ACK]);
            self.goto(LinkState::Ready);
            Ok(())
        } else {
            warn!(port = %self.transport.port_name(), "{}", describe_byte(&received));
            Err(self.fail(SessionError::HandshakeFailed { received }))
        }
    }

    fn emit_frame(&self, direction: FrameDirection, kind: Option<MessageKind>, data: &[u8]) {
        self.observer.on_event(&PlcEvent::Frame {
            direction,
            kind,
            length: data.len(),
            data: data.to_vec(),
        });
    }

    /// Frame and transmit a command. Returns false when nothing went out
    /// (dry run).
    fn transmit(&mut self, command: &Command) -> Result<bool, SessionError> {
        let payload = command.encode().map_err(|e| self.fail(e))?;
        let frame = build_frame(&payload);
        debug!(
            kind = %command.kind(),
            payload = %String::from_utf8_lossy(&payload),
            "Sending command"
        );
        self.last_request = Some(frame.clone());

        if self.config.dry_run {
            self.observer.on_event(&PlcEvent::Log {
                level: LogLevel::Info,
                message: format!(
                    "Dry run: {} not sent: {}",
                    command.kind(),
                    crate::protocol::frame::hex_dump(&frame)
                ),
            });
            self.goto(LinkState::AwaitingResponse);
            return Ok(false);
        }

        if let Err(e) = self.transport.write(&frame) {
            return Err(self.fail(e));
        }
        self.emit_frame(FrameDirection::Tx, Some(command.kind()), &frame);
        self.goto(LinkState::AwaitingResponse);
        Ok(true)
    }

    /// Send a command answered by a framed response and return its payload.
    ///
    /// In dry run the payload is empty.
    pub fn send_command(&mut self, command: &Command) -> Result<Vec<u8>, SessionError> {
        if !self.transmit(command)? {
            self.goto(LinkState::Idle);
            return Ok(Vec::new());
        }

        let raw = self.read_response()?;
        self.emit_frame(FrameDirection::Rx, Some(command.kind()), &raw);

        let frame = Frame::parse(&raw).map_err(|e| self.fail(e))?;
        if !frame.is_valid() {
            let err = SessionError::Checksum {
                expected: String::from_utf8_lossy(&frame.expected_checksum()).into_owned(),
                received: String::from_utf8_lossy(frame.checksum()).into_owned(),
            };
            return Err(self.fail(err));
        }

        self.goto(LinkState::Idle);
        Ok(frame.into_payload())
    }

    /// Send a command answered by a single byte.
    pub fn send_command_expect_ack(&mut self, command: &Command) -> Result<AckStatus, SessionError> {
        if !self.transmit(command)? {
            self.goto(LinkState::Idle);
            return Ok(AckStatus::DryRun);
        }

        let timeout = self.config.ack_timeout();
        let received = self
            .transport
            .read_byte(timeout)
            .map_err(|e| self.fail(e))?;

        let status = match received {
            Some(ACK) => AckStatus::Acked,
            Some(other) => AckStatus::Rejected(other),
            None => AckStatus::NoResponse,
        };
        if let Some(b) = received {
            self.emit_frame(FrameDirection::Rx, None, &[b]);
        }
        self.observer.on_event(&PlcEvent::AckResult {
            kind: command.kind(),
            acked: status == AckStatus::Acked,
        });

        self.goto(LinkState::Idle);
        Ok(status)
    }

    /// Accumulate bytes until `ETX sum_hi sum_lo` has just arrived.
    fn read_response(&mut self) -> Result<Vec<u8>, SessionError> {
        let timeout = self.config.response_timeout();
        let deadline = Instant::now() + timeout;
        let mut buf = Vec::new();

        loop {
            let len = buf.len();
            if len >= 3 && buf[len - 3] == ETX {
                return Ok(buf);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                let err = SessionError::ResponseTimeout {
                    timeout_ms: self.config.response_timeout_ms,
                    received: len,
                };
                return Err(self.fail(err));
            }

            match self.transport.read_byte(remaining) {
                Ok(Some(b)) => buf.push(b),
                Ok(None) => {}
                Err(e) => return Err(self.fail(e)),
            }
        }
    }

    fn read_words(&mut self, command: Command) -> Result<Vec<u16>, SessionError> {
        self.start_communication()?;
        let payload = self.send_command(&command)?;
        if self.config.dry_run {
            return Ok(Vec::new());
        }
        let words = decode_words(&payload)?;
        if let Some(expected) = command.expected_words()
            && words.len() < expected
        {
            return Err(CodecError::ShortResponse {
                expected,
                actual: words.len(),
            }
            .into());
        }
        Ok(words)
    }

    fn acked(&mut self, command: Command) -> Result<AckStatus, SessionError> {
        self.start_communication()?;
        self.send_command_expect_ack(&command)
    }

    /// Read `words` words of device memory.
    #[instrument(skip(self), fields(address = %format!("{:04X}", address)))]
    pub fn read_memory(&mut self, address: u16, words: u8) -> Result<Vec<u16>, SessionError> {
        self.read_words(Command::MemoryRead { address, words })
    }

    #[instrument(skip(self, values), fields(address = %format!("{:04X}", address), words = values.len()))]
    pub fn write_memory(&mut self, address: u16, values: &[u16]) -> Result<AckStatus, SessionError> {
        self.acked(Command::MemoryWrite {
            address,
            values: values.to_vec(),
        })
    }

    /// Read `words` words of the parameter area.
    #[instrument(skip(self), fields(address = %format!("{:04X}", address)))]
    pub fn read_params(&mut self, address: u16, words: u8) -> Result<Vec<u16>, SessionError> {
        self.read_words(Command::ParamRead { address, words })
    }

    #[instrument(skip(self, values), fields(address = %format!("{:04X}", address), words = values.len()))]
    pub fn write_params(&mut self, address: u16, values: &[u16]) -> Result<AckStatus, SessionError> {
        self.acked(Command::ParamWrite {
            address,
            values: values.to_vec(),
        })
    }

    /// Read `words` words of program flash.
    #[instrument(skip(self), fields(address = %format!("{:04X}", address)))]
    pub fn read_flash(&mut self, address: u16, words: u8) -> Result<Vec<u16>, SessionError> {
        self.read_words(Command::FlashRead { address, words })
    }

    #[instrument(skip(self, values), fields(address = %format!("{:04X}", address), words = values.len()))]
    pub fn write_flash(&mut self, address: u16, values: &[u16]) -> Result<AckStatus, SessionError> {
        self.acked(Command::FlashWrite {
            address,
            values: values.to_vec(),
        })
    }

    #[instrument(skip(self), fields(address = %format!("{:04X}", address)))]
    pub fn set_bit(&mut self, address: u16) -> Result<AckStatus, SessionError> {
        self.acked(Command::BitSet { address })
    }

    #[instrument(skip(self), fields(address = %format!("{:04X}", address)))]
    pub fn clear_bit(&mut self, address: u16) -> Result<AckStatus, SessionError> {
        self.acked(Command::BitClear { address })
    }

    #[instrument(skip(self))]
    pub fn lock_flash(&mut self) -> Result<AckStatus, SessionError> {
        self.acked(Command::FlashLock)
    }

    /// PLC type code, `None` in dry run.
    #[instrument(skip(self))]
    pub fn query_type(&mut self) -> Result<Option<u16>, SessionError> {
        Ok(self.read_words(Command::TypeQuery)?.first().copied())
    }

    /// Firmware version code, `None` in dry run.
    #[instrument(skip(self))]
    pub fn query_version(&mut self) -> Result<Option<u16>, SessionError> {
        Ok(self.read_words(Command::VersionQuery)?.first().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullObserver;
    use crate::transport::MockTransport;

    fn session(mock: &MockTransport) -> PlcSession<MockTransport, NullObserver> {
        let config = SessionConfig {
            response_timeout_ms: 20,
            ack_timeout_ms: 5,
            ..SessionConfig::default()
        };
        PlcSession::with_observer(mock.clone(), config, Arc::new(NullObserver))
    }

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.baud_rate, 38400);
        assert_eq!(config.line, LineSettings::default());
        assert_eq!(config.ack_timeout(), Duration::from_secs(1));
        assert_eq!(config.response_timeout(), Duration::from_secs(2));
        assert!(!config.dry_run);
    }

    #[test]
    fn test_config_toml_round_trip() {
        let config = SessionConfig {
            port: Some("/dev/ttyUSB0".to_string()),
            baud_rate: 9600,
            dry_run: true,
            ..SessionConfig::default()
        };
        let path = std::env::temp_dir().join(format!("fx-session-{}.toml", std::process::id()));
        config.save_to_file(&path).unwrap();
        let loaded = SessionConfig::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: SessionConfig = toml::from_str("port = \"COM3\"\nparity = \"none\"\n").unwrap();
        assert_eq!(config.port.as_deref(), Some("COM3"));
        assert_eq!(config.baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(config.line.parity, crate::transport::LineParity::None);
        assert_eq!(config.line.data_bits, 7);
    }

    #[test]
    fn test_handshake_ok() {
        let mock = MockTransport::new();
        mock.queue_ack();
        let mut s = session(&mock);
        s.start_communication().unwrap();
        assert_eq!(s.link_state(), LinkState::Ready);
        assert_eq!(mock.get_writes(), vec![vec![ENQ]]);
    }

    #[test]
    fn test_handshake_without_ack_fails() {
        let mock = MockTransport::new();
        let mut s = session(&mock);
        let err = s.read_memory(0x0100, 1).unwrap_err();
        assert!(matches!(err, SessionError::HandshakeFailed { received: None }));
        assert_eq!(s.link_state(), LinkState::Idle);
        // Only the ENQ went out
        assert_eq!(mock.get_writes().len(), 1);
    }

    #[test]
    fn test_handshake_wrong_byte_fails() {
        let mock = MockTransport::new();
        mock.queue_bytes(&[0x15]);
        let mut s = session(&mock);
        let err = s.set_bit(0x0500).unwrap_err();
        assert!(matches!(
            err,
            SessionError::HandshakeFailed {
                received: Some(0x15)
            }
        ));
    }

    #[test]
    fn test_read_params() {
        let mock = MockTransport::with_auto_handshake();
        mock.queue_frame(b"3412CDAB");
        let mut s = session(&mock);

        let words = s.read_params(0x0000, 2).unwrap();
        assert_eq!(words, vec![0x1234, 0xABCD]);

        let writes = mock.get_writes();
        assert_eq!(writes[0], vec![ENQ]);
        assert_eq!(writes[1], build_frame(b"E00000002"));
        assert_eq!(s.last_request(), Some(build_frame(b"E00000002").as_slice()));
        assert_eq!(s.link_state(), LinkState::Idle);
    }

    #[test]
    fn test_read_memory_short_response() {
        let mock = MockTransport::with_auto_handshake();
        mock.queue_frame(b"3412");
        let mut s = session(&mock);
        let err = s.read_memory(0x0100, 2).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Codec(CodecError::ShortResponse {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_bad_checksum_is_reported() {
        let mock = MockTransport::with_auto_handshake();
        let mut bad = build_frame(b"3412");
        let last = bad.len() - 1;
        bad[last] = b'0';
        mock.queue_bytes(&bad);
        let mut s = session(&mock);
        let err = s.read_flash(0x0000, 1).unwrap_err();
        assert!(matches!(err, SessionError::Checksum { .. }));
        assert_eq!(s.link_state(), LinkState::Idle);
    }

    #[test]
    fn test_response_without_stx_is_framing_error() {
        let mock = MockTransport::with_auto_handshake();
        mock.queue_bytes(b"12\x0300");
        let mut s = session(&mock);
        let err = s.read_memory(0x0000, 1).unwrap_err();
        assert!(matches!(err, SessionError::Framing(FramingError::MissingStx { .. })));
    }

    #[test]
    fn test_response_timeout() {
        let mock = MockTransport::with_auto_handshake();
        mock.queue_bytes(&[0x02, b'1', b'2']);
        let mut s = session(&mock);
        let err = s.read_memory(0x0000, 1).unwrap_err();
        assert!(matches!(
            err,
            SessionError::ResponseTimeout {
                timeout_ms: 20,
                received: 3
            }
        ));
    }

    #[test]
    fn test_set_bit_acked() {
        let mock = MockTransport::with_auto_handshake();
        mock.queue_ack();
        let mut s = session(&mock);
        assert_eq!(s.set_bit(0x1234).unwrap(), AckStatus::Acked);
        assert_eq!(mock.get_writes()[1], build_frame(b"E73412"));
    }

    #[test]
    fn test_write_rejected_and_missing_ack() {
        let mock = MockTransport::with_auto_handshake();
        mock.queue_bytes(&[0x15]);
        let mut s = session(&mock);
        let status = s.write_memory(0x0100, &[0xABCD]).unwrap();
        assert_eq!(status, AckStatus::Rejected(0x15));
        assert!(!status.is_ok());
        assert_eq!(mock.get_writes()[1], build_frame(b"1010002CDAB"));

        assert_eq!(s.clear_bit(0x0001).unwrap(), AckStatus::NoResponse);
        assert_eq!(mock.get_writes()[3], build_frame(b"E80100"));
    }

    #[test]
    fn test_lock_flash() {
        let mock = MockTransport::with_auto_handshake();
        mock.queue_ack();
        let mut s = session(&mock);
        assert_eq!(s.lock_flash().unwrap(), AckStatus::Acked);
        assert_eq!(mock.get_writes()[1], build_frame(b"B"));
    }

    #[test]
    fn test_query_type_and_version() {
        let mock = MockTransport::with_auto_handshake();
        mock.queue_frame(b"5E000000");
        mock.queue_frame(b"10020000");
        let mut s = session(&mock);
        assert_eq!(s.query_type().unwrap(), Some(0x005E));
        assert_eq!(mock.get_writes()[1], build_frame(b"00E0202"));
        assert_eq!(s.query_version().unwrap(), Some(0x0210));
        assert_eq!(mock.get_writes()[3], build_frame(b"00ECA02"));
    }

    #[test]
    fn test_dry_run_sends_nothing() {
        let mock = MockTransport::new();
        let config = SessionConfig {
            dry_run: true,
            ..SessionConfig::default()
        };
        let mut s = PlcSession::with_observer(mock.clone(), config, Arc::new(NullObserver));

        assert_eq!(s.write_params(0x0000, &[0x1234]).unwrap(), AckStatus::DryRun);
        assert_eq!(s.last_request(), Some(build_frame(b"E10000023412").as_slice()));

        assert!(s.read_flash(0x805C, 64).unwrap().is_empty());
        assert_eq!(s.last_request(), Some(build_frame(b"E01805C40").as_slice()));
        assert_eq!(s.query_type().unwrap(), None);

        assert!(mock.get_writes().is_empty());
    }

    #[derive(Default)]
    struct RecordingObserver {
        events: std::sync::Mutex<Vec<PlcEvent>>,
    }

    impl PlcObserver for RecordingObserver {
        fn on_event(&self, event: &PlcEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn test_dry_run_reports_frame_to_observer() {
        let observer = Arc::new(RecordingObserver::default());
        let config = SessionConfig {
            dry_run: true,
            ..SessionConfig::default()
        };
        let mut s = PlcSession::with_observer(MockTransport::new(), config, observer.clone());
        s.set_bit(0x0500).unwrap();

        let events = observer.events.lock().unwrap();
        let logs: Vec<&String> = events
            .iter()
            .filter_map(|e| match e {
                PlcEvent::Log {
                    level: LogLevel::Info,
                    message,
                } => Some(message),
                _ => None,
            })
            .collect();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].starts_with("Dry run: BS not sent"));
        assert!(logs[0].contains("0x02 0x45 0x37"));
    }

    #[test]
    fn test_oversized_write_is_codec_error() {
        let mock = MockTransport::with_auto_handshake();
        let mut s = session(&mock);
        let values = vec![0u16; 200];
        let err = s.write_flash(0x805C, &values).unwrap_err();
        assert!(matches!(err, SessionError::Codec(CodecError::WriteTooLarge { .. })));
    }

    #[test]
    fn test_disconnected_transport() {
        let mock = MockTransport::new();
        mock.disconnect();
        let mut s = session(&mock);
        let err = s.start_communication().unwrap_err();
        assert!(matches!(
            err,
            SessionError::Transport(TransportError::Disconnected)
        ));
    }
}
