//! All MouseShare protocol message types.
//!
//! Messages follow the framed wire format implemented in
//! [`codec`](crate::protocol::codec): a 16-byte header followed by a
//! type-specific payload. All multi-byte integers are little-endian.

use serde::{Deserialize, Serialize};

use crate::geometry::Edge;
use crate::identity::MachineId;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Frame magic: ASCII `"MS"`.
pub const FRAME_MAGIC: [u8; 2] = [0x4D, 0x53];

/// Current protocol version byte.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Total size of the frame header in bytes.
pub const HEADER_SIZE: usize = 16;

/// Upper bound on a single frame's payload. Anything larger is treated as a
/// protocol violation and closes the connection.
pub const MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

// ── Message type codes ────────────────────────────────────────────────────────

/// All message type codes of the peer protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    Handshake = 0x01,
    HandshakeAck = 0x02,
    Mouse = 0x10,
    Keyboard = 0x11,
    CursorEnter = 0x20,
    CursorLeave = 0x21,
    Clipboard = 0x30,
    ClipboardRequest = 0x31,
    Ping = 0x40,
    Pong = 0x41,
    Disconnect = 0xF0,
    Error = 0xFF,
}

impl TryFrom<u8> for MessageType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(MessageType::Handshake),
            0x02 => Ok(MessageType::HandshakeAck),
            0x10 => Ok(MessageType::Mouse),
            0x11 => Ok(MessageType::Keyboard),
            0x20 => Ok(MessageType::CursorEnter),
            0x21 => Ok(MessageType::CursorLeave),
            0x30 => Ok(MessageType::Clipboard),
            0x31 => Ok(MessageType::ClipboardRequest),
            0x40 => Ok(MessageType::Ping),
            0x41 => Ok(MessageType::Pong),
            0xF0 => Ok(MessageType::Disconnect),
            0xFF => Ok(MessageType::Error),
            _ => Err(()),
        }
    }
}

// ── Input event types ─────────────────────────────────────────────────────────

/// Mouse event discriminant carried in [`MouseMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MouseEventType {
    Move = 0x00,
    LeftDown = 0x01,
    LeftUp = 0x02,
    RightDown = 0x03,
    RightUp = 0x04,
    MiddleDown = 0x05,
    MiddleUp = 0x06,
    Wheel = 0x07,
    HWheel = 0x08,
    XButton1Down = 0x09,
    XButton1Up = 0x0A,
    XButton2Down = 0x0B,
    XButton2Up = 0x0C,
}

impl MouseEventType {
    pub fn is_move(self) -> bool {
        self == MouseEventType::Move
    }
}

impl TryFrom<u8> for MouseEventType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x00 => Ok(MouseEventType::Move),
            0x01 => Ok(MouseEventType::LeftDown),
            0x02 => Ok(MouseEventType::LeftUp),
            0x03 => Ok(MouseEventType::RightDown),
            0x04 => Ok(MouseEventType::RightUp),
            0x05 => Ok(MouseEventType::MiddleDown),
            0x06 => Ok(MouseEventType::MiddleUp),
            0x07 => Ok(MouseEventType::Wheel),
            0x08 => Ok(MouseEventType::HWheel),
            0x09 => Ok(MouseEventType::XButton1Down),
            0x0A => Ok(MouseEventType::XButton1Up),
            0x0B => Ok(MouseEventType::XButton2Down),
            0x0C => Ok(MouseEventType::XButton2Up),
            _ => Err(()),
        }
    }
}

/// Keyboard event discriminant carried in [`KeyboardMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum KeyEventType {
    KeyDown = 0x00,
    KeyUp = 0x01,
}

impl TryFrom<u8> for KeyEventType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x00 => Ok(KeyEventType::KeyDown),
            0x01 => Ok(KeyEventType::KeyUp),
            _ => Err(()),
        }
    }
}

// ── Per-message payload structs ───────────────────────────────────────────────

/// Handshake (0x01): sent by the initiating side immediately after connect.
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeMessage {
    /// Stable identity of the sender.
    pub machine_id: MachineId,
    /// Human-readable machine name.
    pub machine_name: String,
    /// Sender's primary screen width in pixels.
    pub screen_width: i32,
    /// Sender's primary screen height in pixels.
    pub screen_height: i32,
    /// Whether the sender participates in clipboard sync.
    pub supports_clipboard: bool,
}

/// HandshakeAck (0x02): the accepting side's reply.
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeAckMessage {
    /// Whether the connection was accepted.
    pub accepted: bool,
    pub machine_id: MachineId,
    pub machine_name: String,
    pub screen_width: i32,
    pub screen_height: i32,
    /// Reason text when `accepted` is false; empty otherwise.
    pub reject_reason: String,
}

/// Mouse (0x10): one pointer event in the receiver's pixel space.
///
/// The base form is 13 bytes. An extended 21-byte form appends a smoothed
/// velocity hint; decoders accept both and treat a missing hint as zero.
#[derive(Debug, Clone, PartialEq)]
pub struct MouseMessage {
    pub x: i32,
    pub y: i32,
    pub event_type: MouseEventType,
    /// Wheel movement in OS wheel-notch units (positive = up/right); zero for
    /// non-wheel events.
    pub wheel_delta: i32,
    /// Optional smoothed pointer velocity in px/s.
    pub velocity: Option<(f32, f32)>,
}

/// Keyboard (0x11): one key event.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyboardMessage {
    /// Platform virtual-key code.
    pub key_code: i32,
    /// Hardware scan code.
    pub scan_code: u32,
    pub event_type: KeyEventType,
    /// The extended-key bit (right-side modifiers, numpad Enter, ...).
    pub is_extended: bool,
}

/// CursorEnter (0x20) / CursorLeave (0x21): cursor ownership transfer.
///
/// `x`/`y` are normalized `[0, 1]` coordinates; `edge` is expressed in the
/// receiver's frame.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorTransferMessage {
    pub x: f32,
    pub y: f32,
    pub edge: Edge,
}

/// Clipboard content kind carried in [`ClipboardMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ClipboardContentType {
    Text = 0x01,
    Html = 0x02,
    Image = 0x03,
}

impl TryFrom<u8> for ClipboardContentType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(ClipboardContentType::Text),
            0x02 => Ok(ClipboardContentType::Html),
            0x03 => Ok(ClipboardContentType::Image),
            _ => Err(()),
        }
    }
}

/// Clipboard (0x30): clipboard content pushed to peers.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipboardMessage {
    pub content_type: ClipboardContentType,
    /// Free-form format detail (e.g. a MIME type for images).
    pub format_hint: String,
    /// Raw clipboard bytes.
    pub data: Vec<u8>,
}

/// Error (0xFF): error notification from either side.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorMessage {
    pub code: i32,
    /// Human-readable description, for logging only.
    pub description: String,
}

// ── Top-level message enum ────────────────────────────────────────────────────

/// All valid MouseShare messages, discriminated by type.
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    Handshake(HandshakeMessage),
    HandshakeAck(HandshakeAckMessage),
    Mouse(MouseMessage),
    Keyboard(KeyboardMessage),
    CursorEnter(CursorTransferMessage),
    CursorLeave(CursorTransferMessage),
    Clipboard(ClipboardMessage),
    ClipboardRequest,
    Ping,
    Pong,
    Disconnect,
    Error(ErrorMessage),
}

impl WireMessage {
    /// Returns the [`MessageType`] discriminant for this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            WireMessage::Handshake(_) => MessageType::Handshake,
            WireMessage::HandshakeAck(_) => MessageType::HandshakeAck,
            WireMessage::Mouse(_) => MessageType::Mouse,
            WireMessage::Keyboard(_) => MessageType::Keyboard,
            WireMessage::CursorEnter(_) => MessageType::CursorEnter,
            WireMessage::CursorLeave(_) => MessageType::CursorLeave,
            WireMessage::Clipboard(_) => MessageType::Clipboard,
            WireMessage::ClipboardRequest => MessageType::ClipboardRequest,
            WireMessage::Ping => MessageType::Ping,
            WireMessage::Pong => MessageType::Pong,
            WireMessage::Disconnect => MessageType::Disconnect,
            WireMessage::Error(_) => MessageType::Error,
        }
    }
}
