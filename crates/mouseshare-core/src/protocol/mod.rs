//! The MouseShare peer protocol.
//!
//! Two message families share this module:
//!
//! - **Framed stream messages** ([`messages`], [`codec`]) carried over the
//!   per-peer TCP connection: handshake, input events, cursor enter/leave,
//!   clipboard, and liveness.
//! - **Discovery datagrams** ([`announce`]) broadcast over UDP so peers can
//!   find each other without configuration.

pub mod announce;
pub mod codec;
pub mod messages;

pub use announce::{decode_announcement, encode_announcement, PresenceAnnouncement};
pub use codec::{decode_frame, encode_frame, frame_total_len, parse_header, CodecError, FrameHeader};
pub use messages::{
    ClipboardContentType, ClipboardMessage, CursorTransferMessage, ErrorMessage,
    HandshakeAckMessage, HandshakeMessage, KeyEventType, KeyboardMessage, MessageType,
    MouseEventType, MouseMessage, WireMessage,
};
