//! Discovery datagram codec.
//!
//! Presence announcements are tiny UDP datagrams, distinct from the framed
//! stream protocol: ASCII `"MSDISC"`, a version byte, then the sender's
//! identity, listen port, and screen size. Peers that hear an announcement
//! know everything they need to dial the sender.

use crate::identity::MachineId;
use crate::protocol::codec::CodecError;
use crate::protocol::messages::PROTOCOL_VERSION;

/// Magic prefix of every discovery datagram.
pub const DISCOVERY_MAGIC: &[u8; 6] = b"MSDISC";

/// One presence broadcast.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceAnnouncement {
    pub machine_id: MachineId,
    pub machine_name: String,
    /// TCP port the sender accepts peer connections on.
    pub listen_port: i32,
    pub screen_width: i32,
    pub screen_height: i32,
}

/// Encodes an announcement into datagram bytes.
pub fn encode_announcement(a: &PresenceAnnouncement) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(DISCOVERY_MAGIC);
    buf.push(PROTOCOL_VERSION);
    write_string(&mut buf, &a.machine_id.to_string());
    write_string(&mut buf, &a.machine_name);
    buf.extend_from_slice(&a.listen_port.to_le_bytes());
    buf.extend_from_slice(&a.screen_width.to_le_bytes());
    buf.extend_from_slice(&a.screen_height.to_le_bytes());
    buf
}

/// Decodes a datagram back into a [`PresenceAnnouncement`].
///
/// # Errors
///
/// Returns [`CodecError`] for a bad magic, wrong version, or truncated or
/// malformed fields. Discovery drops such datagrams silently.
pub fn decode_announcement(bytes: &[u8]) -> Result<PresenceAnnouncement, CodecError> {
    if bytes.len() < DISCOVERY_MAGIC.len() + 1 {
        return Err(CodecError::TruncatedPayload {
            needed: DISCOVERY_MAGIC.len() + 1,
            available: bytes.len(),
        });
    }
    if &bytes[..6] != DISCOVERY_MAGIC {
        return Err(CodecError::InvalidMagic(bytes[0], bytes[1]));
    }
    if bytes[6] != PROTOCOL_VERSION {
        return Err(CodecError::UnsupportedVersion(bytes[6]));
    }

    let (id_str, off) = read_string(bytes, 7)?;
    let machine_id = id_str
        .parse()
        .map_err(|e| CodecError::MalformedPayload(format!("bad machine id: {e}")))?;
    let (machine_name, off) = read_string(bytes, off)?;
    if bytes.len() < off + 12 {
        return Err(CodecError::TruncatedPayload {
            needed: off + 12,
            available: bytes.len(),
        });
    }
    let listen_port = i32::from_le_bytes(bytes[off..off + 4].try_into().expect("4 bytes"));
    let screen_width = i32::from_le_bytes(bytes[off + 4..off + 8].try_into().expect("4 bytes"));
    let screen_height = i32::from_le_bytes(bytes[off + 8..off + 12].try_into().expect("4 bytes"));
    Ok(PresenceAnnouncement {
        machine_id,
        machine_name,
        listen_port,
        screen_width,
        screen_height,
    })
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

fn read_string(buf: &[u8], offset: usize) -> Result<(String, usize), CodecError> {
    if buf.len() < offset + 4 {
        return Err(CodecError::MalformedPayload(format!(
            "need 4 bytes for string length at offset {offset}"
        )));
    }
    let len = u32::from_le_bytes(buf[offset..offset + 4].try_into().expect("4 bytes")) as usize;
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

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PresenceAnnouncement {
        PresenceAnnouncement {
            machine_id: MachineId::generate(),
            machine_name: "den-desktop".to_string(),
            listen_port: 24800,
            screen_width: 2560,
            screen_height: 1440,
        }
    }

    #[test]
    fn test_announcement_round_trip() {
        let a = sample();
        let bytes = encode_announcement(&a);
        assert_eq!(decode_announcement(&bytes).unwrap(), a);
    }

    #[test]
    fn test_datagram_starts_with_discovery_magic_and_version() {
        let bytes = encode_announcement(&sample());
        assert_eq!(&bytes[..6], b"MSDISC");
        assert_eq!(bytes[6], PROTOCOL_VERSION);
    }

    #[test]
    fn test_empty_machine_name_round_trips() {
        let mut a = sample();
        a.machine_name = String::new();
        let bytes = encode_announcement(&a);
        assert_eq!(decode_announcement(&bytes).unwrap(), a);
    }

    #[test]
    fn test_wrong_magic_is_rejected() {
        let mut bytes = encode_announcement(&sample());
        bytes[0] = b'X';
        assert!(matches!(
            decode_announcement(&bytes),
            Err(CodecError::InvalidMagic(..))
        ));
    }

    #[test]
    fn test_wrong_version_is_rejected() {
        let mut bytes = encode_announcement(&sample());
        bytes[6] = 0x42;
        assert_eq!(
            decode_announcement(&bytes),
            Err(CodecError::UnsupportedVersion(0x42))
        );
    }

    #[test]
    fn test_truncated_datagram_is_rejected() {
        let bytes = encode_announcement(&sample());
        assert!(decode_announcement(&bytes[..bytes.len() - 3]).is_err());
        assert!(decode_announcement(&bytes[..4]).is_err());
    }

    #[test]
    fn test_frame_traffic_does_not_parse_as_announcement() {
        // A stream frame starts with "MS" but not "MSDISC".
        let frame = crate::protocol::codec::encode_frame(&crate::WireMessage::Ping, 0).unwrap();
        assert!(decode_announcement(&frame).is_err());
    }
}
