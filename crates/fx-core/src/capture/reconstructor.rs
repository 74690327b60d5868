//! Passive session reconstruction from captured traffic.
//!
//! Frames may be split over several transfers; each direction keeps at most
//! one partial frame until `ETX` and both checksum chars have arrived.
//! Device replies are labelled from the last host request when the payload
//! alone does not say what they are.

use serde::{Serialize, Serializer};
use tracing::{debug, trace};

use super::record::{CaptureRecord, Direction, encode_hex};
use crate::protocol::codec::{decode_request, decode_words_lossy};
use crate::protocol::constants::{ACK, ENQ, ETX, STX};
use crate::protocol::frame::Frame;
use crate::protocol::kind::MessageKind;

/// Protocol state carried across records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub last_host_request: Option<MessageKind>,
}

/// One reconstructed message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageRecord {
    #[serde(rename = "who")]
    pub direction: Direction,
    #[serde(rename = "what")]
    pub kind: MessageKind,
    #[serde(serialize_with = "hex_address")]
    pub address: Option<u16>,
    /// Size field as sent: a word count for reads, a byte count for writes.
    pub size: Option<u8>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<u16>,
    /// Payload text between STX and ETX.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Checksum chars as captured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sum: Option<String>,
    #[serde(serialize_with = "hex_capdata")]
    pub capdata: Vec<u8>,
}

fn hex_address<S: Serializer>(address: &Option<u16>, s: S) -> Result<S::Ok, S::Error> {
    match address {
        Some(a) => s.serialize_str(&format!("{:04X}", a)),
        None => s.serialize_none(),
    }
}

fn hex_capdata<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&encode_hex(bytes))
}

impl MessageRecord {
    fn bare(direction: Direction, kind: MessageKind, raw: Vec<u8>) -> Self {
        Self {
            direction,
            kind,
            address: None,
            size: None,
            values: Vec::new(),
            data: None,
            sum: None,
            capdata: raw,
        }
    }
}

/// Position of the first ETX after a leading STX, if the checksum chars
/// following it have arrived too.
fn complete_frame_end(buf: &[u8]) -> Option<usize> {
    if buf.first() != Some(&STX) {
        return None;
    }
    let etx = buf.iter().skip(1).position(|&b| b == ETX)? + 1;
    (etx + 3 <= buf.len()).then_some(etx + 3)
}

#[derive(Debug, Default)]
pub struct SessionReconstructor {
    host_pending: Option<Vec<u8>>,
    device_pending: Option<Vec<u8>>,
    state: SessionState,
}

impl SessionReconstructor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_pending(&self, direction: Direction) -> bool {
        match direction {
            Direction::Host => self.host_pending.is_some(),
            Direction::Device => self.device_pending.is_some(),
        }
    }

    fn pending_slot(&mut self, direction: Direction) -> &mut Option<Vec<u8>> {
        match direction {
            Direction::Host => &mut self.host_pending,
            Direction::Device => &mut self.device_pending,
        }
    }

    /// Feed one captured chunk. Returns every message it completes, in
    /// order; a chunk may carry several frames and control bytes.
    pub fn feed(&mut self, record: &CaptureRecord) -> Vec<MessageRecord> {
        let direction = record.direction;
        let mut buf = match self.pending_slot(direction).take() {
            Some(mut pending) => {
                pending.extend_from_slice(&record.bytes);
                pending
            }
            None => record.bytes.clone(),
        };

        let mut messages = Vec::new();
        while !buf.is_empty() {
            let end = match buf[0] {
                STX => match complete_frame_end(&buf) {
                    Some(end) => end,
                    None => {
                        trace!(who = %direction, len = buf.len(), "Partial frame held");
                        *self.pending_slot(direction) = Some(buf);
                        break;
                    }
                },
                ENQ | ACK => 1,
                // Anything else runs up to the next STX
                _ => buf
                    .iter()
                    .skip(1)
                    .position(|&b| b == STX)
                    .map_or(buf.len(), |i| i + 1),
            };
            let rest = buf.split_off(end);
            messages.push(self.emit(direction, buf));
            buf = rest;
        }
        messages
    }

    fn emit(&mut self, direction: Direction, raw: Vec<u8>) -> MessageRecord {
        let message = self.classify(direction, raw);
        if direction == Direction::Host && message.kind.is_request() {
            self.state.last_host_request = Some(message.kind.clone());
        }
        debug!(who = %direction, what = %message.kind, "Message");
        message
    }

    /// Flush partial frames left at end of input as unclassified records.
    pub fn finish(&mut self) -> Vec<MessageRecord> {
        [Direction::Host, Direction::Device]
            .into_iter()
            .filter_map(|direction| {
                let raw = self.pending_slot(direction).take()?;
                let text = String::from_utf8_lossy(&raw[1..]).into_owned();
                debug!(who = %direction, len = raw.len(), "Incomplete frame at end of capture");
                Some(MessageRecord::bare(
                    direction,
                    MessageKind::unknown_from_text(&text),
                    raw,
                ))
            })
            .collect()
    }

    fn classify(&self, direction: Direction, raw: Vec<u8>) -> MessageRecord {
        let last = self.state.last_host_request.as_ref();

        if raw.len() == 1 {
            let kind = match raw[0] {
                ENQ => MessageKind::Enq,
                ACK => match last {
                    Some(k) if direction == Direction::Device && k.is_ack_answered() => k.clone(),
                    _ => MessageKind::Ack,
                },
                other => MessageKind::unknown_byte(other),
            };
            return MessageRecord::bare(direction, kind, raw);
        }

        let frame = match Frame::parse(&raw) {
            Ok(frame) => frame,
            Err(_) => {
                let body = raw.strip_prefix(&[STX]).unwrap_or(&raw);
                let text = String::from_utf8_lossy(body).into_owned();
                return MessageRecord::bare(direction, MessageKind::unknown_from_text(&text), raw);
            }
        };

        let payload = frame.payload();
        let device_reply_to = last.filter(|_| direction == Direction::Device);

        let (kind, address, size, values) = match device_reply_to {
            Some(request) if request.is_read() => {
                (request.clone(), None, None, decode_words_lossy(payload))
            }
            _ => {
                let fields = decode_request(payload);
                match device_reply_to {
                    Some(request) if fields.kind.is_unknown() => {
                        (request.clone(), None, None, decode_words_lossy(payload))
                    }
                    _ => (fields.kind, fields.address, fields.size, fields.values),
                }
            }
        };

        MessageRecord {
            direction,
            kind,
            address,
            size,
            values,
            data: Some(String::from_utf8_lossy(payload).into_owned()),
            sum: Some(String::from_utf8_lossy(frame.checksum()).into_owned()),
            capdata: raw,
        }
    }
}

/// Reconstruct a whole capture, flushing partial frames at the end.
pub fn reconstruct<'a, I>(records: I) -> Vec<MessageRecord>
where
    I: IntoIterator<Item = &'a CaptureRecord>,
{
    let mut reconstructor = SessionReconstructor::new();
    let mut messages: Vec<MessageRecord> = records
        .into_iter()
        .flat_map(|record| reconstructor.feed(record))
        .collect();
    messages.extend(reconstructor.finish());
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::build_frame;

    fn host(bytes: &[u8]) -> CaptureRecord {
        CaptureRecord::new(Direction::Host, bytes)
    }

    fn plc(bytes: &[u8]) -> CaptureRecord {
        CaptureRecord::new(Direction::Device, bytes)
    }

    fn one(mut messages: Vec<MessageRecord>) -> MessageRecord {
        assert_eq!(messages.len(), 1, "{:?}", messages);
        messages.remove(0)
    }

    #[test]
    fn test_two_frames_in_one_chunk() {
        let mut chunk = build_frame(b"E73412");
        chunk.extend(build_frame(b"E83412"));
        let messages = reconstruct(&[host(&chunk)]);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].kind, MessageKind::BitSet);
        assert_eq!(messages[0].capdata, build_frame(b"E73412"));
        assert_eq!(messages[1].kind, MessageKind::BitClear);
        assert_eq!(messages[1].data.as_deref(), Some("E83412"));
    }

    #[test]
    fn test_frame_then_ack_in_one_chunk() {
        let mut r = SessionReconstructor::new();
        one(r.feed(&host(&build_frame(b"0010002"))));

        let mut chunk = build_frame(b"3412");
        chunk.push(ACK);
        let messages = r.feed(&plc(&chunk));
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].kind, MessageKind::MemoryRead);
        assert_eq!(messages[0].values, vec![0x1234]);
        assert_eq!(messages[1].kind, MessageKind::Ack);
        assert_eq!(messages[1].capdata, vec![ACK]);
    }

    #[test]
    fn test_trailing_partial_frame_is_held() {
        let frame = build_frame(b"E00000002");
        let mut chunk = vec![ENQ];
        chunk.extend_from_slice(&frame[..5]);
        let mut r = SessionReconstructor::new();

        let enq = one(r.feed(&host(&chunk)));
        assert_eq!(enq.kind, MessageKind::Enq);
        assert!(r.is_pending(Direction::Host));

        let req = one(r.feed(&host(&frame[5..])));
        assert_eq!(req.kind, MessageKind::ParamRead);
        assert_eq!(req.capdata, frame);
    }

    #[test]
    fn test_junk_before_frame_is_its_own_record() {
        let mut chunk = b"QX".to_vec();
        chunk.extend(build_frame(b"E73412"));
        let messages = reconstruct(&[host(&chunk)]);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].kind.tag(), "U_QX");
        assert_eq!(messages[1].kind, MessageKind::BitSet);
    }

    #[test]
    fn test_split_device_frame_emits_once() {
        let frame = build_frame(b"3412CDAB");
        let (a, b) = frame.split_at(4);
        let mut r = SessionReconstructor::new();

        assert!(r.feed(&plc(a)).is_empty());
        assert!(r.is_pending(Direction::Device));

        let msg = one(r.feed(&plc(b)));
        assert!(!r.is_pending(Direction::Device));
        assert_eq!(msg.capdata, frame);
        assert_eq!(msg.data.as_deref(), Some("3412CDAB"));
        assert!(r.finish().is_empty());
    }

    #[test]
    fn test_checksum_in_next_chunk() {
        let frame = build_frame(b"E00000002");
        let sum_at = frame.len() - 2;
        let mut r = SessionReconstructor::new();
        // Ends right after ETX
        assert!(r.feed(&host(&frame[..sum_at])).is_empty());
        assert!(r.feed(&host(&frame[sum_at..sum_at + 1])).is_empty());
        let msg = one(r.feed(&host(&frame[sum_at + 1..])));
        assert_eq!(msg.kind, MessageKind::ParamRead);
        assert_eq!(msg.sum.as_deref(), Some(std::str::from_utf8(&frame[sum_at..]).unwrap()));
    }

    #[test]
    fn test_ack_after_bit_set_is_labelled() {
        let mut r = SessionReconstructor::new();
        let enq = one(r.feed(&host(&[ENQ])));
        assert_eq!(enq.kind, MessageKind::Enq);
        let ack = one(r.feed(&plc(&[ACK])));
        assert_eq!(ack.kind, MessageKind::Ack);

        let bs = one(r.feed(&host(&build_frame(b"E73412"))));
        assert_eq!(bs.kind, MessageKind::BitSet);
        assert_eq!(bs.address, Some(0x1234));

        let reply = one(r.feed(&plc(&[ACK])));
        assert_eq!(reply.kind, MessageKind::BitSet);
        assert_eq!(reply.kind.tag(), "BS");
    }

    #[test]
    fn test_host_ack_never_relabelled() {
        let mut r = SessionReconstructor::new();
        r.feed(&host(&build_frame(b"E80100")));
        let ack = one(r.feed(&host(&[ACK])));
        assert_eq!(ack.kind, MessageKind::Ack);
        assert_eq!(r.state().last_host_request, Some(MessageKind::BitClear));
    }

    #[test]
    fn test_read_response_takes_request_kind() {
        let mut r = SessionReconstructor::new();
        let req = one(r.feed(&host(&build_frame(b"E00000002"))));
        assert_eq!(req.address, Some(0x0000));
        assert_eq!(req.size, Some(2));

        let resp = one(r.feed(&plc(&build_frame(b"3412CDAB"))));
        assert_eq!(resp.kind, MessageKind::ParamRead);
        assert_eq!(resp.values, vec![0x1234, 0xABCD]);
        assert_eq!(resp.address, None);
    }

    #[test]
    fn test_info_queries() {
        let mut r = SessionReconstructor::new();
        let typ = one(r.feed(&host(&build_frame(b"00E0202"))));
        assert_eq!(typ.kind, MessageKind::TypeQuery);
        assert_eq!(typ.address, Some(0x0E02));
        assert_eq!(typ.size, Some(2));

        let resp = one(r.feed(&plc(&build_frame(b"5E000000"))));
        assert_eq!(resp.kind, MessageKind::TypeQuery);
        assert_eq!(resp.values, vec![0x005E, 0x0000]);

        let ver = one(r.feed(&host(&build_frame(b"00ECA02"))));
        assert_eq!(ver.kind, MessageKind::VersionQuery);
        assert_eq!(ver.address, Some(0x0ECA));
    }

    #[test]
    fn test_write_request_fields() {
        let mut r = SessionReconstructor::new();
        let msg = one(r.feed(&host(&build_frame(b"E11805C043412FF00"))));
        assert_eq!(msg.kind, MessageKind::FlashWrite);
        assert_eq!(msg.address, Some(0x805C));
        assert_eq!(msg.size, Some(4));
        assert_eq!(msg.values, vec![0x1234, 0x00FF]);

        let lock = one(r.feed(&host(&build_frame(b"B"))));
        assert_eq!(lock.kind, MessageKind::FlashLock);
        let ack = one(r.feed(&plc(&[ACK])));
        assert_eq!(ack.kind, MessageKind::FlashLock);
    }

    #[test]
    fn test_unknown_messages_are_kept() {
        let mut r = SessionReconstructor::new();
        let nak = one(r.feed(&plc(&[0x15])));
        assert_eq!(nak.kind.tag(), "U_15");

        let odd = one(r.feed(&host(&build_frame(b"ZZ12"))));
        assert_eq!(odd.kind.tag(), "U_ZZ");
        assert_eq!(odd.data.as_deref(), Some("ZZ12"));

        let junk = one(r.feed(&host(b"QX")));
        assert_eq!(junk.kind.tag(), "U_QX");
        // Unknown host messages do not become the last request
        assert_eq!(r.state().last_host_request, None);
    }

    #[test]
    fn test_unknown_device_frame_falls_back_to_last_request() {
        let mut r = SessionReconstructor::new();
        r.feed(&host(&build_frame(b"1010002CDAB")));
        let msg = one(r.feed(&plc(&build_frame(b"ZZ"))));
        assert_eq!(msg.kind, MessageKind::MemoryWrite);
    }

    #[test]
    fn test_finish_flushes_partial_frames() {
        let mut r = SessionReconstructor::new();
        assert!(r.feed(&host(b"\x02E0")).is_empty());
        assert!(r.feed(&plc(b"\x023412")).is_empty());
        let rest = r.finish();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].direction, Direction::Host);
        assert_eq!(rest[0].kind.tag(), "U_E0");
        assert_eq!(rest[1].kind.tag(), "U_34");
        assert!(!r.is_pending(Direction::Host));
        assert!(!r.is_pending(Direction::Device));
    }

    #[test]
    fn test_reconstruct_whole_capture() {
        let records = vec![
            host(&[ENQ]),
            plc(&[ACK]),
            host(&build_frame(b"0010002")),
            plc(&build_frame(b"0100")[..3]),
            plc(&build_frame(b"0100")[3..]),
        ];
        let messages = reconstruct(&records);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[2].kind, MessageKind::MemoryRead);
        assert_eq!(messages[2].address, Some(0x0100));
        assert_eq!(messages[3].kind, MessageKind::MemoryRead);
        assert_eq!(messages[3].values, vec![0x0001]);
    }

    #[test]
    fn test_json_record_shape() {
        let mut r = SessionReconstructor::new();
        let msg = one(r.feed(&host(&build_frame(b"E73412"))));
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["who"], "host");
        assert_eq!(json["what"], "BS");
        assert_eq!(json["address"], "1234");
        assert_eq!(json["data"], "E73412");
        assert!(json.get("values").is_none());
        assert_eq!(json["capdata"], encode_hex(&build_frame(b"E73412")));

        let ack = one(r.feed(&plc(&[ACK])));
        let json = serde_json::to_value(&ack).unwrap();
        assert_eq!(json["who"], "plc");
        assert!(json["address"].is_null());
        assert_eq!(json["capdata"], "06");
    }
}
