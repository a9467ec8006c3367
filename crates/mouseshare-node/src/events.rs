//! Node event stream.
//!
//! Everything the surrounding application might want to surface (tray icon
//! state, peer list, error toasts) is published on one `tokio::sync::broadcast`
//! channel. The engine and network layers only ever push; they never call
//! back into subscribers, which keeps reentrancy out of the hook and receive
//! paths.

use std::net::SocketAddr;

use mouseshare_core::MachineId;
use tokio::sync::broadcast;

use crate::engine::ControlState;

/// Why a peer connection went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The peer sent `Disconnect` and the stream closed cleanly.
    Graceful,
    /// Nothing was read for the liveness window.
    ReadTimeout,
    /// The peer violated the protocol; the detail is the codec error text.
    Protocol(String),
    /// The underlying transport failed.
    Transport(String),
    /// A newer connection from the same machine replaced this one.
    Replaced,
    /// Local shutdown tore the connection down.
    Shutdown,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::Graceful => write!(f, "closed by peer"),
            DisconnectReason::ReadTimeout => write!(f, "read timeout"),
            DisconnectReason::Protocol(detail) => write!(f, "protocol error: {detail}"),
            DisconnectReason::Transport(detail) => write!(f, "transport error: {detail}"),
            DisconnectReason::Replaced => write!(f, "replaced by a newer connection"),
            DisconnectReason::Shutdown => write!(f, "local shutdown"),
        }
    }
}

/// Events published to node observers.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// A presence datagram from a previously unknown machine arrived.
    PeerDiscovered { id: MachineId, name: String, addr: SocketAddr },
    /// A discovered machine stopped announcing and its record was evicted.
    PeerLost { id: MachineId },
    /// A connection handshake completed (either direction).
    PeerConnected { id: MachineId, name: String },
    /// A live connection went away.
    PeerDisconnected { id: MachineId, reason: DisconnectReason },
    /// The control state machine moved.
    ControlStateChanged { state: ControlState },
    /// Remote clipboard content was written locally.
    ClipboardApplied { from: MachineId },
    /// A non-fatal engine or capability failure, for surfacing in the UI.
    EngineError { detail: String },
}

/// Creates the node event channel.
///
/// Capacity is generous; events are low-rate and subscribers that lag simply
/// observe a `Lagged` gap.
pub fn channel() -> (broadcast::Sender<NodeEvent>, broadcast::Receiver<NodeEvent>) {
    broadcast::channel(256)
}
