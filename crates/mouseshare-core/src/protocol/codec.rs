//! Binary codec for encoding and decoding MouseShare protocol frames.
//!
//! Wire format:
//! ```text
//! [magic:2 = "MS"][version:1][type:1][payload_len:4][timestamp_ms:8][payload:N]
//! ```
//! Total header size: 16 bytes. All multi-byte integers are **little-endian**.
//!
//! Strings are encoded as a 4-byte little-endian length prefix followed by
//! UTF-8 bytes.
//!
//! # Reading a frame from a stream
//!
//! A caller first reads the 16-byte header, asks [`frame_total_len`] how many
//! bytes the whole frame occupies, reads the remainder, and only then calls
//! [`decode_frame`]. Every failure mode is local to the offending connection;
//! the caller closes it and moves on.

use thiserror::Error;

use crate::geometry::Edge;
use crate::identity::MachineId;
use crate::protocol::messages::{
    ClipboardContentType, ClipboardMessage, CursorTransferMessage, ErrorMessage,
    HandshakeAckMessage, HandshakeMessage, KeyEventType, KeyboardMessage, MessageType,
    MouseEventType, MouseMessage, WireMessage, FRAME_MAGIC, HEADER_SIZE, MAX_PAYLOAD_LEN,
    PROTOCOL_VERSION,
};

/// Errors that can occur during frame encoding or decoding.
#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
    /// The first two bytes are not the `"MS"` magic.
    #[error("invalid frame magic: 0x{0:02X} 0x{1:02X}")]
    InvalidMagic(u8, u8),

    /// The version byte in the header is not supported.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// The message type byte is not a recognized value.
    #[error("unknown message type: 0x{0:02X}")]
    UnknownType(u8),

    /// Fewer bytes are available than the header or payload requires.
    #[error("truncated payload: need {needed} bytes, got {available}")]
    TruncatedPayload { needed: usize, available: usize },

    /// The declared payload length is negative or exceeds the 16 MiB cap.
    #[error("payload too large: {declared} bytes")]
    PayloadTooLarge { declared: i64 },

    /// The payload bytes could not be parsed (field out of range, bad UTF-8).
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

/// Parsed frame header fields.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameHeader {
    pub message_type: MessageType,
    pub payload_len: usize,
    /// Sender's clock, milliseconds since the Unix epoch.
    pub timestamp_millis: i64,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`WireMessage`] into a byte vector including the 16-byte header.
///
/// `timestamp_millis` is the sender's wall clock at transmission time.
///
/// # Errors
///
/// Returns [`CodecError::PayloadTooLarge`] if the payload (a clipboard blob,
/// in practice) exceeds the 16 MiB frame cap.
pub fn encode_frame(msg: &WireMessage, timestamp_millis: i64) -> Result<Vec<u8>, CodecError> {
    let payload = encode_payload(msg);
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(CodecError::PayloadTooLarge {
            declared: payload.len() as i64,
        });
    }

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&FRAME_MAGIC);
    buf.push(PROTOCOL_VERSION);
    buf.push(msg.message_type() as u8);
    buf.extend_from_slice(&(payload.len() as i32).to_le_bytes());
    buf.extend_from_slice(&timestamp_millis.to_le_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Returns the total frame length (header + payload) declared by a header.
///
/// Only the first 8 header bytes are inspected, so a caller that has read the
/// fixed prefix of a frame can size its read buffer before the rest arrives.
///
/// # Errors
///
/// Returns [`CodecError`] if the prefix is too short, the magic or version is
/// wrong, or the declared length is out of range.
pub fn frame_total_len(header: &[u8]) -> Result<usize, CodecError> {
    if header.len() < 8 {
        return Err(CodecError::TruncatedPayload {
            needed: 8,
            available: header.len(),
        });
    }
    if header[0] != FRAME_MAGIC[0] || header[1] != FRAME_MAGIC[1] {
        return Err(CodecError::InvalidMagic(header[0], header[1]));
    }
    if header[2] != PROTOCOL_VERSION {
        return Err(CodecError::UnsupportedVersion(header[2]));
    }
    let declared = i32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if declared < 0 || declared as usize > MAX_PAYLOAD_LEN {
        return Err(CodecError::PayloadTooLarge {
            declared: declared as i64,
        });
    }
    Ok(HEADER_SIZE + declared as usize)
}

/// Parses a full 16-byte header.
///
/// # Errors
///
/// Returns [`CodecError`] for a short buffer, bad magic/version, an unknown
/// message type, or an out-of-range payload length.
pub fn parse_header(header: &[u8]) -> Result<FrameHeader, CodecError> {
    let total = frame_total_len(header)?;
    if header.len() < HEADER_SIZE {
        return Err(CodecError::TruncatedPayload {
            needed: HEADER_SIZE,
            available: header.len(),
        });
    }
    let message_type =
        MessageType::try_from(header[3]).map_err(|_| CodecError::UnknownType(header[3]))?;
    let timestamp_millis = i64::from_le_bytes(header[8..16].try_into().expect("8 bytes"));
    Ok(FrameHeader {
        message_type,
        payload_len: total - HEADER_SIZE,
        timestamp_millis,
    })
}

/// Decodes one [`WireMessage`] from the beginning of `bytes`.
///
/// Returns the decoded message and the total number of bytes consumed
/// (header + payload), so the caller can advance its read cursor.
///
/// # Errors
///
/// Returns [`CodecError`] if the bytes are malformed.
pub fn decode_frame(bytes: &[u8]) -> Result<(WireMessage, usize), CodecError> {
    if bytes.len() < HEADER_SIZE {
        return Err(CodecError::TruncatedPayload {
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }
    let header = parse_header(&bytes[..HEADER_SIZE])?;

    let total = HEADER_SIZE + header.payload_len;
    if bytes.len() < total {
        return Err(CodecError::TruncatedPayload {
            needed: total,
            available: bytes.len(),
        });
    }

    let payload = &bytes[HEADER_SIZE..total];
    let msg = decode_payload(header.message_type, payload)?;
    Ok((msg, total))
}

// ── Payload encoding ──────────────────────────────────────────────────────────

fn encode_payload(msg: &WireMessage) -> Vec<u8> {
    let mut buf = Vec::new();
    match msg {
        WireMessage::Handshake(m) => encode_handshake(&mut buf, m),
        WireMessage::HandshakeAck(m) => encode_handshake_ack(&mut buf, m),
        WireMessage::Mouse(m) => encode_mouse(&mut buf, m),
        WireMessage::Keyboard(m) => encode_keyboard(&mut buf, m),
        WireMessage::CursorEnter(m) | WireMessage::CursorLeave(m) => {
            encode_cursor_transfer(&mut buf, m)
        }
        WireMessage::Clipboard(m) => encode_clipboard(&mut buf, m),
        // Empty payloads.
        WireMessage::ClipboardRequest
        | WireMessage::Ping
        | WireMessage::Pong
        | WireMessage::Disconnect => {}
        WireMessage::Error(m) => encode_error(&mut buf, m),
    }
    buf
}

fn encode_handshake(buf: &mut Vec<u8>, m: &HandshakeMessage) {
    write_string(buf, &m.machine_id.to_string());
    write_string(buf, &m.machine_name);
    buf.extend_from_slice(&m.screen_width.to_le_bytes());
    buf.extend_from_slice(&m.screen_height.to_le_bytes());
    buf.push(m.supports_clipboard as u8);
}

fn encode_handshake_ack(buf: &mut Vec<u8>, m: &HandshakeAckMessage) {
    buf.push(m.accepted as u8);
    write_string(buf, &m.machine_id.to_string());
    write_string(buf, &m.machine_name);
    buf.extend_from_slice(&m.screen_width.to_le_bytes());
    buf.extend_from_slice(&m.screen_height.to_le_bytes());
    write_string(buf, &m.reject_reason);
}

fn encode_mouse(buf: &mut Vec<u8>, m: &MouseMessage) {
    buf.extend_from_slice(&m.x.to_le_bytes());
    buf.extend_from_slice(&m.y.to_le_bytes());
    buf.push(m.event_type as u8);
    buf.extend_from_slice(&m.wheel_delta.to_le_bytes());
    if let Some((vx, vy)) = m.velocity {
        buf.extend_from_slice(&vx.to_le_bytes());
        buf.extend_from_slice(&vy.to_le_bytes());
    }
}

fn encode_keyboard(buf: &mut Vec<u8>, m: &KeyboardMessage) {
    buf.extend_from_slice(&m.key_code.to_le_bytes());
    buf.extend_from_slice(&m.scan_code.to_le_bytes());
    buf.push(m.event_type as u8);
    buf.push(m.is_extended as u8);
}

fn encode_cursor_transfer(buf: &mut Vec<u8>, m: &CursorTransferMessage) {
    buf.extend_from_slice(&m.x.to_le_bytes());
    buf.extend_from_slice(&m.y.to_le_bytes());
    buf.push(m.edge as u8);
}

fn encode_clipboard(buf: &mut Vec<u8>, m: &ClipboardMessage) {
    buf.push(m.content_type as u8);
    write_string(buf, &m.format_hint);
    buf.extend_from_slice(&(m.data.len() as u32).to_le_bytes());
    buf.extend_from_slice(&m.data);
}

fn encode_error(buf: &mut Vec<u8>, m: &ErrorMessage) {
    buf.extend_from_slice(&m.code.to_le_bytes());
    write_string(buf, &m.description);
}

// ── Payload decoding ──────────────────────────────────────────────────────────

fn decode_payload(msg_type: MessageType, payload: &[u8]) -> Result<WireMessage, CodecError> {
    match msg_type {
        MessageType::Handshake => decode_handshake(payload).map(WireMessage::Handshake),
        MessageType::HandshakeAck => decode_handshake_ack(payload).map(WireMessage::HandshakeAck),
        MessageType::Mouse => decode_mouse(payload).map(WireMessage::Mouse),
        MessageType::Keyboard => decode_keyboard(payload).map(WireMessage::Keyboard),
        MessageType::CursorEnter => decode_cursor_transfer(payload).map(WireMessage::CursorEnter),
        MessageType::CursorLeave => decode_cursor_transfer(payload).map(WireMessage::CursorLeave),
        MessageType::Clipboard => decode_clipboard(payload).map(WireMessage::Clipboard),
        MessageType::ClipboardRequest => Ok(WireMessage::ClipboardRequest),
        MessageType::Ping => Ok(WireMessage::Ping),
        MessageType::Pong => Ok(WireMessage::Pong),
        MessageType::Disconnect => Ok(WireMessage::Disconnect),
        MessageType::Error => decode_error(payload).map(WireMessage::Error),
    }
}

fn decode_handshake(p: &[u8]) -> Result<HandshakeMessage, CodecError> {
    let (machine_id, off) = read_machine_id(p, 0)?;
    let (machine_name, off) = read_string(p, off)?;
    require_len(p, off + 9, "Handshake")?;
    let screen_width = read_i32(p, off);
    let screen_height = read_i32(p, off + 4);
    let supports_clipboard = p[off + 8] != 0;
    Ok(HandshakeMessage {
        machine_id,
        machine_name,
        screen_width,
        screen_height,
        supports_clipboard,
    })
}

fn decode_handshake_ack(p: &[u8]) -> Result<HandshakeAckMessage, CodecError> {
    require_len(p, 1, "HandshakeAck")?;
    let accepted = p[0] != 0;
    let (machine_id, off) = read_machine_id(p, 1)?;
    let (machine_name, off) = read_string(p, off)?;
    require_len(p, off + 8, "HandshakeAck")?;
    let screen_width = read_i32(p, off);
    let screen_height = read_i32(p, off + 4);
    let (reject_reason, _) = read_string(p, off + 8)?;
    Ok(HandshakeAckMessage {
        accepted,
        machine_id,
        machine_name,
        screen_width,
        screen_height,
        reject_reason,
    })
}

fn decode_mouse(p: &[u8]) -> Result<MouseMessage, CodecError> {
    // Base form is 13 bytes; the extended form appends two f32 velocity
    // components for 21. Both are valid on the wire.
    require_len(p, 13, "Mouse")?;
    let x = read_i32(p, 0);
    let y = read_i32(p, 4);
    let event_type = MouseEventType::try_from(p[8])
        .map_err(|_| CodecError::MalformedPayload(format!("unknown mouse event type: {}", p[8])))?;
    let wheel_delta = read_i32(p, 9);
    let velocity = if p.len() >= 21 {
        let vx = f32::from_le_bytes([p[13], p[14], p[15], p[16]]);
        let vy = f32::from_le_bytes([p[17], p[18], p[19], p[20]]);
        Some((vx, vy))
    } else {
        None
    };
    Ok(MouseMessage {
        x,
        y,
        event_type,
        wheel_delta,
        velocity,
    })
}

fn decode_keyboard(p: &[u8]) -> Result<KeyboardMessage, CodecError> {
    require_len(p, 10, "Keyboard")?;
    let key_code = read_i32(p, 0);
    let scan_code = u32::from_le_bytes([p[4], p[5], p[6], p[7]]);
    let event_type = KeyEventType::try_from(p[8])
        .map_err(|_| CodecError::MalformedPayload(format!("unknown key event type: {}", p[8])))?;
    let is_extended = p[9] != 0;
    Ok(KeyboardMessage {
        key_code,
        scan_code,
        event_type,
        is_extended,
    })
}

fn decode_cursor_transfer(p: &[u8]) -> Result<CursorTransferMessage, CodecError> {
    require_len(p, 9, "CursorTransfer")?;
    let x = f32::from_le_bytes([p[0], p[1], p[2], p[3]]);
    let y = f32::from_le_bytes([p[4], p[5], p[6], p[7]]);
    let edge = Edge::try_from(p[8])
        .map_err(|_| CodecError::MalformedPayload(format!("unknown edge: {}", p[8])))?;
    Ok(CursorTransferMessage { x, y, edge })
}

fn decode_clipboard(p: &[u8]) -> Result<ClipboardMessage, CodecError> {
    require_len(p, 1, "Clipboard")?;
    let content_type = ClipboardContentType::try_from(p[0]).map_err(|_| {
        CodecError::MalformedPayload(format!("unknown clipboard content type: {}", p[0]))
    })?;
    let (format_hint, off) = read_string(p, 1)?;
    require_len(p, off + 4, "Clipboard.data")?;
    let data_len = u32::from_le_bytes([p[off], p[off + 1], p[off + 2], p[off + 3]]) as usize;
    require_len(p, off + 4 + data_len, "Clipboard.data")?;
    let data = p[off + 4..off + 4 + data_len].to_vec();
    Ok(ClipboardMessage {
        content_type,
        format_hint,
        data,
    })
}

fn decode_error(p: &[u8]) -> Result<ErrorMessage, CodecError> {
    require_len(p, 4, "Error")?;
    let code = read_i32(p, 0);
    let (description, _) = read_string(p, 4)?;
    Ok(ErrorMessage { code, description })
}

// ── Utility helpers ───────────────────────────────────────────────────────────

fn require_len(buf: &[u8], needed: usize, context: &str) -> Result<(), CodecError> {
    if buf.len() < needed {
        Err(CodecError::MalformedPayload(format!(
            "{context}: need {needed} bytes, got {}",
            buf.len()
        )))
    } else {
        Ok(())
    }
}

fn read_i32(buf: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

/// Writes a 4-byte little-endian length prefix followed by UTF-8 bytes.
fn write_string(buf: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

/// Reads a 4-byte length prefix and then that many UTF-8 bytes.
/// Returns the string and the offset of the byte after it.
fn read_string(buf: &[u8], offset: usize) -> Result<(String, usize), CodecError> {
    if buf.len() < offset + 4 {
        return Err(CodecError::MalformedPayload(format!(
            "need 4 bytes for string length at offset {offset}"
        )));
    }
    let len = u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
        as usize;
    let start = offset + 4;
    if buf.len() < start + len {
        return Err(CodecError::MalformedPayload(format!(
            "string of length {len} at offset {start} exceeds buffer"
        )));
    }
    let s = std::str::from_utf8(&buf[start..start + len])
        .map_err(|e| CodecError::MalformedPayload(format!("invalid UTF-8: {e}")))?
        .to_string();
    Ok((s, start + len))
}

fn read_machine_id(buf: &[u8], offset: usize) -> Result<(MachineId, usize), CodecError> {
    let (s, end) = read_string(buf, offset)?;
    let id = s
        .parse()
        .map_err(|e| CodecError::MalformedPayload(format!("bad machine id: {e}")))?;
    Ok((id, end))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::*;

    fn round_trip(msg: &WireMessage) -> WireMessage {
        let encoded = encode_frame(msg, 0).expect("encode failed");
        let (decoded, consumed) = decode_frame(&encoded).expect("decode failed");
        assert_eq!(consumed, encoded.len(), "consumed must equal encoded size");
        decoded
    }

    #[test]
    fn test_header_layout_matches_wire_format() {
        let bytes = encode_frame(&WireMessage::Ping, 0x0102_0304_0506_0708).unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(&bytes[0..2], &FRAME_MAGIC);
        assert_eq!(bytes[2], PROTOCOL_VERSION);
        assert_eq!(bytes[3], MessageType::Ping as u8);
        assert_eq!(&bytes[4..8], &0i32.to_le_bytes());
        assert_eq!(&bytes[8..16], &0x0102_0304_0506_0708i64.to_le_bytes());
    }

    #[test]
    fn test_frame_total_len_matches_encoded_length() {
        let msg = WireMessage::Keyboard(KeyboardMessage {
            key_code: 0x41,
            scan_code: 0x1E,
            event_type: KeyEventType::KeyDown,
            is_extended: false,
        });
        let bytes = encode_frame(&msg, 42).unwrap();
        assert_eq!(frame_total_len(&bytes[..8]).unwrap(), bytes.len());
    }

    #[test]
    fn test_mouse_base_form_is_13_byte_payload() {
        let msg = WireMessage::Mouse(MouseMessage {
            x: 100,
            y: 200,
            event_type: MouseEventType::Move,
            wheel_delta: 0,
            velocity: None,
        });
        let bytes = encode_frame(&msg, 0).unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE + 13);
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_mouse_extended_form_is_21_byte_payload() {
        let msg = WireMessage::Mouse(MouseMessage {
            x: -5,
            y: 9,
            event_type: MouseEventType::Move,
            wheel_delta: 0,
            velocity: Some((340.5, -120.25)),
        });
        let bytes = encode_frame(&msg, 0).unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE + 21);
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_mouse_wheel_round_trip() {
        let msg = WireMessage::Mouse(MouseMessage {
            x: 640,
            y: 480,
            event_type: MouseEventType::Wheel,
            wheel_delta: 120,
            velocity: None,
        });
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_mouse_every_event_type_survives_round_trip() {
        for raw in 0x00u8..=0x0C {
            let event_type = MouseEventType::try_from(raw).expect("valid event type");
            let msg = WireMessage::Mouse(MouseMessage {
                x: 1,
                y: 2,
                event_type,
                wheel_delta: 0,
                velocity: None,
            });
            assert_eq!(round_trip(&msg), msg);
        }
    }

    #[test]
    fn test_handshake_round_trip() {
        let msg = WireMessage::Handshake(HandshakeMessage {
            machine_id: MachineId::generate(),
            machine_name: "dev-alpha".to_string(),
            screen_width: 1920,
            screen_height: 1080,
            supports_clipboard: true,
        });
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_handshake_ack_accepted_round_trip() {
        let msg = WireMessage::HandshakeAck(HandshakeAckMessage {
            accepted: true,
            machine_id: MachineId::generate(),
            machine_name: "dev-beta".to_string(),
            screen_width: 2560,
            screen_height: 1440,
            reject_reason: String::new(),
        });
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_handshake_ack_rejected_round_trip() {
        let msg = WireMessage::HandshakeAck(HandshakeAckMessage {
            accepted: false,
            machine_id: MachineId::nil(),
            machine_name: String::new(),
            screen_width: 0,
            screen_height: 0,
            reject_reason: "duplicate machine id".to_string(),
        });
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_keyboard_round_trip_preserves_extended_bit() {
        let msg = WireMessage::Keyboard(KeyboardMessage {
            key_code: 0x0D,
            scan_code: 0xE01C,
            event_type: KeyEventType::KeyUp,
            is_extended: true,
        });
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_cursor_enter_round_trip() {
        let msg = WireMessage::CursorEnter(CursorTransferMessage {
            x: 0.0,
            y: 0.5,
            edge: Edge::Left,
        });
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_cursor_leave_round_trip() {
        let msg = WireMessage::CursorLeave(CursorTransferMessage {
            x: 1.0,
            y: 0.25,
            edge: Edge::Right,
        });
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_clipboard_round_trip() {
        let msg = WireMessage::Clipboard(ClipboardMessage {
            content_type: ClipboardContentType::Text,
            format_hint: "text/plain".to_string(),
            data: b"hello from the other machine".to_vec(),
        });
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_clipboard_empty_data_round_trip() {
        let msg = WireMessage::Clipboard(ClipboardMessage {
            content_type: ClipboardContentType::Image,
            format_hint: String::new(),
            data: vec![],
        });
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_empty_payload_messages_round_trip() {
        for msg in [
            WireMessage::ClipboardRequest,
            WireMessage::Ping,
            WireMessage::Pong,
            WireMessage::Disconnect,
        ] {
            assert_eq!(round_trip(&msg), msg);
        }
    }

    #[test]
    fn test_error_round_trip() {
        let msg = WireMessage::Error(ErrorMessage {
            code: 7,
            description: "unexpected handshake".to_string(),
        });
        assert_eq!(round_trip(&msg), msg);
    }

    // ── Error conditions ──────────────────────────────────────────────────────

    #[test]
    fn test_zero_magic_decodes_to_invalid_magic() {
        let mut bytes = encode_frame(&WireMessage::Ping, 0).unwrap();
        bytes[0] = 0x00;
        bytes[1] = 0x00;
        assert_eq!(
            decode_frame(&bytes),
            Err(CodecError::InvalidMagic(0x00, 0x00))
        );
    }

    #[test]
    fn test_wrong_version_decodes_to_unsupported_version() {
        let mut bytes = encode_frame(&WireMessage::Ping, 0).unwrap();
        bytes[2] = 0x7F;
        assert_eq!(decode_frame(&bytes), Err(CodecError::UnsupportedVersion(0x7F)));
    }

    #[test]
    fn test_unknown_type_byte_is_rejected() {
        let mut bytes = encode_frame(&WireMessage::Ping, 0).unwrap();
        bytes[3] = 0x99;
        assert_eq!(decode_frame(&bytes), Err(CodecError::UnknownType(0x99)));
    }

    #[test]
    fn test_short_buffer_decodes_to_truncated_payload() {
        let bytes = encode_frame(&WireMessage::Ping, 0).unwrap();
        assert!(matches!(
            decode_frame(&bytes[..5]),
            Err(CodecError::TruncatedPayload { .. })
        ));
    }

    #[test]
    fn test_declared_payload_longer_than_buffer_is_truncated() {
        let mut bytes = encode_frame(&WireMessage::Ping, 0).unwrap();
        bytes[4..8].copy_from_slice(&100i32.to_le_bytes());
        assert_eq!(
            decode_frame(&bytes),
            Err(CodecError::TruncatedPayload {
                needed: HEADER_SIZE + 100,
                available: HEADER_SIZE,
            })
        );
    }

    #[test]
    fn test_payload_over_16_mib_is_rejected() {
        let mut bytes = encode_frame(&WireMessage::Ping, 0).unwrap();
        let declared = (MAX_PAYLOAD_LEN + 1) as i32;
        bytes[4..8].copy_from_slice(&declared.to_le_bytes());
        assert_eq!(
            frame_total_len(&bytes[..8]),
            Err(CodecError::PayloadTooLarge {
                declared: declared as i64,
            })
        );
    }

    #[test]
    fn test_negative_payload_length_is_rejected() {
        let mut bytes = encode_frame(&WireMessage::Ping, 0).unwrap();
        bytes[4..8].copy_from_slice(&(-1i32).to_le_bytes());
        assert!(matches!(
            frame_total_len(&bytes[..8]),
            Err(CodecError::PayloadTooLarge { declared: -1 })
        ));
    }

    #[test]
    fn test_mouse_with_invalid_event_type_is_malformed() {
        let msg = WireMessage::Mouse(MouseMessage {
            x: 0,
            y: 0,
            event_type: MouseEventType::Move,
            wheel_delta: 0,
            velocity: None,
        });
        let mut bytes = encode_frame(&msg, 0).unwrap();
        bytes[HEADER_SIZE + 8] = 0xEE;
        assert!(matches!(
            decode_frame(&bytes),
            Err(CodecError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_handshake_with_invalid_utf8_name_is_malformed() {
        let msg = WireMessage::Handshake(HandshakeMessage {
            machine_id: MachineId::generate(),
            machine_name: "ok".to_string(),
            screen_width: 1,
            screen_height: 1,
            supports_clipboard: false,
        });
        let mut bytes = encode_frame(&msg, 0).unwrap();
        // The name starts after the 36-byte id string field (4-byte length + 32
        // hex chars) and its own 4-byte length prefix.
        let name_start = HEADER_SIZE + 4 + 32 + 4;
        bytes[name_start] = 0xFF;
        assert!(matches!(
            decode_frame(&bytes),
            Err(CodecError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_parse_header_exposes_timestamp() {
        let bytes = encode_frame(&WireMessage::Pong, 1_700_000_000_123).unwrap();
        let header = parse_header(&bytes[..HEADER_SIZE]).unwrap();
        assert_eq!(header.message_type, MessageType::Pong);
        assert_eq!(header.payload_len, 0);
        assert_eq!(header.timestamp_millis, 1_700_000_000_123);
    }
}
