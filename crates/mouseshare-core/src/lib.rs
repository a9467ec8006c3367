//! # mouseshare-core
//!
//! Shared library for MouseShare containing the network protocol codec,
//! screen geometry, and machine identity types.
//!
//! This crate is used by every MouseShare peer process. It has zero
//! dependencies on OS APIs, UI frameworks, or network sockets.
//!
//! # Architecture overview
//!
//! MouseShare is a software KVM: two or more computers on the same LAN share
//! one mouse and keyboard. When the cursor reaches the edge of one machine's
//! screen, control switches seamlessly to the neighbouring machine.
//!
//! This crate is the shared foundation. It defines:
//!
//! - **`protocol`** – how bytes travel over the network. Messages are encoded
//!   into a compact binary format (16-byte header + payload) and decoded back
//!   into typed Rust structs on the other end. The discovery datagram format
//!   lives here too.
//!
//! - **`geometry`** – pure screen arithmetic with no OS dependencies: the
//!   primary display rectangle, edge classification of a point, and the
//!   [`Edge`] type shared between geometry and the wire format.
//!
//! - **`identity`** – the stable [`MachineId`] each host is assigned on first
//!   run and advertises in every handshake and discovery datagram.

pub mod geometry;
pub mod identity;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `mouseshare_core::WireMessage` instead of the full module path.
pub use geometry::{edge_at, Edge, EdgeHit, Rect};
pub use identity::{IdentityError, MachineId};
pub use protocol::codec::{decode_frame, encode_frame, frame_total_len, CodecError};
pub use protocol::messages::WireMessage;
