//! lib0-compatible variable-length primitive codec and the server's message
//! framing. `yrs`'s own lib0 encoder is update/state-vector specific, not
//! exposed as a standalone primitive codec, so this one is hand-rolled.

use crate::error::{Error, Result};

/// Writes `value` as an unsigned varint: 7 payload bits per byte, MSB set
/// on every byte but the last, least-significant group first.
pub fn write_var_uint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

pub fn read_var_uint(bytes: &[u8], pos: &mut usize) -> Result<u64> {
    let mut value: u64 = 0;
    let mut shift: u32 = 0;
    loop {
        let byte = *bytes
            .get(*pos)
            .ok_or_else(|| Error::InvalidFraming("truncated varint".into()))?;
        *pos += 1;
        value |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift >= 64 {
            return Err(Error::InvalidFraming("varint too long".into()));
        }
    }
}

pub fn write_var_string(out: &mut Vec<u8>, s: &str) {
    write_var_uint(out, s.len() as u64);
    out.extend_from_slice(s.as_bytes());
}

pub fn read_var_string(bytes: &[u8], pos: &mut usize) -> Result<String> {
    let len = read_var_uint(bytes, pos)? as usize;
    let end = pos
        .checked_add(len)
        .filter(|&e| e <= bytes.len())
        .ok_or_else(|| Error::InvalidFraming("truncated string".into()))?;
    let s = std::str::from_utf8(&bytes[*pos..end])
        .map_err(|_| Error::InvalidFraming("string is not valid utf-8".into()))?
        .to_string();
    *pos = end;
    Ok(s)
}

/// One of the nine message types carried by the `[docName][type][payload]`
/// wire frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Sync = 0,
    Awareness = 1,
    Auth = 2,
    QueryAwareness = 3,
    SyncReply = 4,
    Stateless = 5,
    BroadcastStateless = 6,
    Close = 7,
    SyncStatus = 8,
}

impl MessageType {
    pub fn from_code(code: u64) -> Result<Self> {
        Ok(match code {
            0 => MessageType::Sync,
            1 => MessageType::Awareness,
            2 => MessageType::Auth,
            3 => MessageType::QueryAwareness,
            4 => MessageType::SyncReply,
            5 => MessageType::Stateless,
            6 => MessageType::BroadcastStateless,
            7 => MessageType::Close,
            8 => MessageType::SyncStatus,
            other => return Err(Error::InvalidFraming(format!("unknown message type {other}"))),
        })
    }

    pub fn code(self) -> u64 {
        self as u64
    }
}

/// The three sync sub-messages carried inside a SYNC/SYNC_REPLY envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncKind {
    Step1 = 0,
    Step2 = 1,
    Update = 2,
}

impl SyncKind {
    pub fn from_code(code: u64) -> Result<Self> {
        Ok(match code {
            0 => SyncKind::Step1,
            1 => SyncKind::Step2,
            2 => SyncKind::Update,
            other => return Err(Error::InvalidFraming(format!("unknown sync sub-type {other}"))),
        })
    }
}

/// A decoded `[subType][payload]` SYNC body.
#[derive(Debug, Clone)]
pub enum SyncMessage {
    /// State vector of the sender, requesting everything it's missing.
    Step1(Vec<u8>),
    /// Update bytes answering a peer's `Step1`.
    Step2(Vec<u8>),
    /// Unsolicited update bytes.
    Update(Vec<u8>),
}

impl SyncMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let (kind, payload) = match self {
            SyncMessage::Step1(sv) => (SyncKind::Step1, sv),
            SyncMessage::Step2(update) => (SyncKind::Step2, update),
            SyncMessage::Update(update) => (SyncKind::Update, update),
        };
        write_var_uint(&mut out, kind as u64);
        out.extend_from_slice(payload);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut pos = 0;
        let kind = SyncKind::from_code(read_var_uint(bytes, &mut pos)?)?;
        let payload = bytes[pos..].to_vec();
        Ok(match kind {
            SyncKind::Step1 => SyncMessage::Step1(payload),
            SyncKind::Step2 => SyncMessage::Step2(payload),
            SyncKind::Update => SyncMessage::Update(payload),
        })
    }

    /// `true` for sync messages that carry content mutating the document
    /// (as opposed to `Step1`, which only carries a state vector) — used by
    /// `DocumentConnection`'s read-only enforcement.
    pub fn carries_changes(&self) -> bool {
        !matches!(self, SyncMessage::Step1(_))
    }
}

/// A decoded `[docName][type][payload]` wire frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub doc_name: String,
    pub message_type: MessageType,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(doc_name: impl Into<String>, message_type: MessageType, payload: Vec<u8>) -> Self {
        Frame { doc_name: doc_name.into(), message_type, payload }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.doc_name.len() + self.payload.len() + 8);
        write_var_string(&mut out, &self.doc_name);
        write_var_uint(&mut out, self.message_type.code());
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut pos = 0;
        let doc_name = read_var_string(bytes, &mut pos)?;
        let message_type = MessageType::from_code(read_var_uint(bytes, &mut pos)?)?;
        let payload = bytes[pos..].to_vec();
        Ok(Frame { doc_name, message_type, payload })
    }
}

/// Encodes a `CLOSE` payload: `[code][reason]`.
pub fn encode_close_payload(code: u16, reason: &str) -> Vec<u8> {
    let mut out = Vec::new();
    write_var_uint(&mut out, code as u64);
    write_var_string(&mut out, reason);
    out
}

/// Encodes a `SYNC_STATUS` payload: `[boolean]`.
pub fn encode_sync_status_payload(synced: bool) -> Vec<u8> {
    let mut out = Vec::new();
    write_var_uint(&mut out, if synced { 1 } else { 0 });
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn var_uint_roundtrips_across_byte_boundaries() {
        for value in [0u64, 1, 127, 128, 300, 16384, u32::MAX as u64, u64::MAX] {
            let mut buf = Vec::new();
            write_var_uint(&mut buf, value);
            let mut pos = 0;
            assert_eq!(read_var_uint(&buf, &mut pos).unwrap(), value);
            assert_eq!(pos, buf.len());
        }
    }

    #[test]
    fn var_string_roundtrips_utf8() {
        let mut buf = Vec::new();
        write_var_string(&mut buf, "héllo wörld");
        let mut pos = 0;
        assert_eq!(read_var_string(&buf, &mut pos).unwrap(), "héllo wörld");
    }

    #[test]
    fn frame_roundtrips() {
        let frame = Frame::new("room-1", MessageType::Sync, vec![1, 2, 3]);
        let encoded = frame.encode();
        let decoded = Frame::decode(&encoded).unwrap();
        assert_eq!(decoded.doc_name, "room-1");
        assert_eq!(decoded.message_type, MessageType::Sync);
        assert_eq!(decoded.payload, vec![1, 2, 3]);
    }

    #[test]
    fn sync_message_roundtrips_each_subtype() {
        for msg in [
            SyncMessage::Step1(vec![1]),
            SyncMessage::Step2(vec![1, 2]),
            SyncMessage::Update(vec![1, 2, 3]),
        ] {
            let encoded = msg.encode();
            let decoded = SyncMessage::decode(&encoded).unwrap();
            match (&msg, &decoded) {
                (SyncMessage::Step1(a), SyncMessage::Step1(b)) => assert_eq!(a, b),
                (SyncMessage::Step2(a), SyncMessage::Step2(b)) => assert_eq!(a, b),
                (SyncMessage::Update(a), SyncMessage::Update(b)) => assert_eq!(a, b),
                _ => panic!("sub-type changed across roundtrip"),
            }
        }
    }

    #[test]
    fn truncated_frame_is_invalid_framing() {
        let err = Frame::decode(&[0x05]).unwrap_err();
        assert!(matches!(err, Error::InvalidFraming(_)));
    }
}
