//! One reliable, ordered byte stream to one peer.
//!
//! A connection's life has two phases:
//!
//! 1. **Handshake** ([`connect`] for the dialing side, [`accept`] for the
//!    listening side). Each side sends/reads exactly one message under a
//!    caller-supplied deadline; anything unexpected drops the stream.
//! 2. **Steady state** ([`spawn_io`]): one reader task and one writer task.
//!    The writer is the sole owner of the write half, so frames can never
//!    interleave; everything the process wants to send is enqueued on the
//!    link's outbound queue and written in order, flushed per frame.
//!
//! `TCP_NODELAY` is set on every stream so individual input events are not
//! coalesced by Nagle's algorithm — a 30-byte mouse frame held back 40 ms is
//! a visibly laggy cursor.
//!
//! Liveness is handled here: `Ping` is answered with `Pong` without surfacing
//! either to the engine, and a reader that sees nothing for 30 seconds closes
//! the connection with a timeout.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use mouseshare_core::protocol::codec::{self, CodecError};
use mouseshare_core::protocol::messages::{
    HandshakeAckMessage, HandshakeMessage, HEADER_SIZE,
};
use mouseshare_core::{MachineId, WireMessage};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::events::DisconnectReason;

use super::{next_link_serial, ConnectionRegistry, PeerLink, PeerMessageSink};

/// Default handshake deadline.
pub const HANDSHAKE_DEADLINE: Duration = Duration::from_secs(10);

/// Close the connection when nothing has been read for this long.
pub const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// How often the engine schedules a `Ping` per connection.
pub const PING_INTERVAL: Duration = Duration::from_secs(10);

/// Errors surfaced by connection setup and teardown.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The TCP connect itself failed.
    #[error("could not connect to {addr}: {source}")]
    ConnectFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The handshake did not complete within the deadline.
    #[error("handshake timed out")]
    HandshakeTimeout,

    /// The peer answered the handshake with an explicit rejection.
    #[error("peer rejected the handshake: {0}")]
    PeerRejected(String),

    /// The peer sent something other than the expected handshake message, or
    /// bytes that do not decode at all.
    #[error("handshake protocol error: {0}")]
    ProtocolViolation(String),

    /// The stream closed before the exchange finished.
    #[error("connection closed by peer")]
    ClosedByPeer,

    /// An I/O error on the established stream.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}

/// What this node advertises about itself in handshakes.
#[derive(Debug, Clone)]
pub struct LocalHello {
    pub machine_id: MachineId,
    pub machine_name: String,
    pub screen_width: i32,
    pub screen_height: i32,
    pub supports_clipboard: bool,
}

impl LocalHello {
    fn handshake(&self) -> HandshakeMessage {
        HandshakeMessage {
            machine_id: self.machine_id,
            machine_name: self.machine_name.clone(),
            screen_width: self.screen_width,
            screen_height: self.screen_height,
            supports_clipboard: self.supports_clipboard,
        }
    }

    fn ack(&self, accepted: bool, reject_reason: &str) -> HandshakeAckMessage {
        HandshakeAckMessage {
            accepted,
            machine_id: self.machine_id,
            machine_name: self.machine_name.clone(),
            screen_width: self.screen_width,
            screen_height: self.screen_height,
            reject_reason: reject_reason.to_string(),
        }
    }
}

/// The peer's identity and screen as learned during the handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerGreeting {
    pub id: MachineId,
    pub name: String,
    pub screen_width: u32,
    pub screen_height: u32,
    pub supports_clipboard: bool,
}

/// A stream with a completed handshake, ready for [`spawn_io`].
#[derive(Debug)]
pub struct EstablishedConnection {
    pub peer: PeerGreeting,
    stream: TcpStream,
}

// ── Handshake ─────────────────────────────────────────────────────────────────

/// Dials `addr` and runs the initiator side of the handshake.
///
/// # Errors
///
/// Returns [`ConnectionError`] on connect failure, deadline expiry, peer
/// rejection, or a malformed reply.
pub async fn connect(
    addr: SocketAddr,
    hello: &LocalHello,
    deadline: Duration,
) -> Result<EstablishedConnection, ConnectionError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|source| ConnectionError::ConnectFailed { addr, source })?;
    stream.set_nodelay(true)?;

    let mut stream = stream;
    let exchange = async {
        write_frame(&mut stream, &WireMessage::Handshake(hello.handshake())).await?;
        read_frame(&mut stream).await
    };
    let reply = tokio::time::timeout(deadline, exchange)
        .await
        .map_err(|_| ConnectionError::HandshakeTimeout)??;

    match reply {
        WireMessage::HandshakeAck(ack) if ack.accepted => Ok(EstablishedConnection {
            peer: PeerGreeting {
                id: ack.machine_id,
                name: ack.machine_name,
                screen_width: ack.screen_width.max(0) as u32,
                screen_height: ack.screen_height.max(0) as u32,
                supports_clipboard: true,
            },
            stream,
        }),
        WireMessage::HandshakeAck(ack) => Err(ConnectionError::PeerRejected(ack.reject_reason)),
        other => Err(ConnectionError::ProtocolViolation(format!(
            "expected HandshakeAck, got {:?}",
            other.message_type()
        ))),
    }
}

/// Runs the acceptor side of the handshake on an inbound stream.
///
/// # Errors
///
/// Returns [`ConnectionError`] when the first message is not a `Handshake`,
/// the deadline expires, or the peer presents this node's own machine id
/// (which gets an explicit rejection before the error).
pub async fn accept(
    stream: TcpStream,
    hello: &LocalHello,
    deadline: Duration,
) -> Result<EstablishedConnection, ConnectionError> {
    stream.set_nodelay(true)?;

    let mut stream = stream;
    let first = tokio::time::timeout(deadline, read_frame(&mut stream))
        .await
        .map_err(|_| ConnectionError::HandshakeTimeout)??;

    let hs = match first {
        WireMessage::Handshake(hs) => hs,
        other => {
            return Err(ConnectionError::ProtocolViolation(format!(
                "expected Handshake, got {:?}",
                other.message_type()
            )))
        }
    };

    if hs.machine_id == hello.machine_id {
        let ack = hello.ack(false, "peer presented this machine's own id");
        let _ = write_frame(&mut stream, &WireMessage::HandshakeAck(ack)).await;
        return Err(ConnectionError::ProtocolViolation(
            "peer presented this machine's own id".to_string(),
        ));
    }

    write_frame(&mut stream, &WireMessage::HandshakeAck(hello.ack(true, ""))).await?;

    Ok(EstablishedConnection {
        peer: PeerGreeting {
            id: hs.machine_id,
            name: hs.machine_name,
            screen_width: hs.screen_width.max(0) as u32,
            screen_height: hs.screen_height.max(0) as u32,
            supports_clipboard: hs.supports_clipboard,
        },
        stream,
    })
}

// ── Steady state ──────────────────────────────────────────────────────────────

/// Registers the connection and starts its reader and writer tasks.
///
/// The returned id identifies the peer; the connection itself is reachable
/// through the registry from now on. If a link for the same peer already
/// existed, it is closed as replaced.
pub fn spawn_io(
    conn: EstablishedConnection,
    registry: Arc<ConnectionRegistry>,
    sink: Arc<dyn PeerMessageSink>,
    node_shutdown: watch::Receiver<bool>,
) -> MachineId {
    let peer = conn.peer.clone();
    let peer_id = peer.id;
    let serial = next_link_serial();

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (close_tx, close_rx) = watch::channel(None);

    let link = PeerLink {
        id: peer.id,
        name: peer.name.clone(),
        screen_width: peer.screen_width,
        screen_height: peer.screen_height,
        supports_clipboard: peer.supports_clipboard,
        serial,
        outbound: outbound_tx,
        close: close_tx,
    };

    if let Some(older) = registry.insert(link) {
        debug!("replacing existing connection to {peer_id}");
        older.close(DisconnectReason::Replaced);
    }

    sink.on_peer_connected(&peer);

    let (read_half, write_half) = conn.stream.into_split();
    tokio::spawn(writer_loop(
        write_half,
        outbound_rx,
        close_rx.clone(),
        node_shutdown.clone(),
    ));
    tokio::spawn(reader_loop(
        read_half,
        peer_id,
        serial,
        registry,
        sink,
        close_rx,
        node_shutdown,
    ));

    peer_id
}

/// Drains the outbound queue onto the write half, one whole frame at a time.
async fn writer_loop(
    mut write_half: tokio::net::tcp::OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<WireMessage>,
    mut close: watch::Receiver<Option<DisconnectReason>>,
    mut node_shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            msg = outbound.recv() => {
                let Some(msg) = msg else { break };
                if let Err(e) = write_frame(&mut write_half, &msg).await {
                    debug!("write failed: {e}");
                    break;
                }
            }
            _ = close.changed() => {
                // Best-effort goodbye; the peer may already be gone.
                let _ = write_frame(&mut write_half, &WireMessage::Disconnect).await;
                break;
            }
            _ = node_shutdown.changed() => {
                let _ = write_frame(&mut write_half, &WireMessage::Disconnect).await;
                break;
            }
        }
    }
}

/// Reads frames until the peer goes away, answering liveness traffic inline
/// and forwarding everything else to the sink.
async fn reader_loop(
    mut read_half: tokio::net::tcp::OwnedReadHalf,
    peer_id: MachineId,
    serial: u64,
    registry: Arc<ConnectionRegistry>,
    sink: Arc<dyn PeerMessageSink>,
    mut close: watch::Receiver<Option<DisconnectReason>>,
    mut node_shutdown: watch::Receiver<bool>,
) {
    let reason = loop {
        let frame = tokio::select! {
            result = tokio::time::timeout(READ_TIMEOUT, read_frame(&mut read_half)) => result,
            _ = close.changed() => {
                break close.borrow().clone().unwrap_or(DisconnectReason::Shutdown);
            }
            _ = node_shutdown.changed() => break DisconnectReason::Shutdown,
        };

        let msg = match frame {
            Err(_elapsed) => break DisconnectReason::ReadTimeout,
            Ok(Err(ConnectionError::ClosedByPeer)) => break DisconnectReason::Graceful,
            Ok(Err(ConnectionError::ProtocolViolation(detail))) => {
                break DisconnectReason::Protocol(detail)
            }
            Ok(Err(e)) => break DisconnectReason::Transport(e.to_string()),
            Ok(Ok(msg)) => msg,
        };

        match msg {
            WireMessage::Ping => {
                // Answered here so liveness works even when the engine stalls.
                registry.send_to(peer_id, WireMessage::Pong);
            }
            WireMessage::Pong => {}
            WireMessage::Disconnect => break DisconnectReason::Graceful,
            WireMessage::Handshake(_) | WireMessage::HandshakeAck(_) => {
                break DisconnectReason::Protocol("unexpected handshake".to_string());
            }
            other => sink.on_peer_message(peer_id, other),
        }
    };

    // Only the link we own may be removed; a replacement stays registered.
    let was_current = registry.remove_if_serial(peer_id, serial).is_some();
    if was_current {
        sink.on_peer_disconnected(peer_id, reason.clone());
    }
    debug!("receive loop for {peer_id} ended: {reason}");
}

// ── Frame I/O ─────────────────────────────────────────────────────────────────

/// Writes one whole frame and flushes it.
pub(crate) async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    msg: &WireMessage,
) -> Result<(), ConnectionError> {
    let bytes = codec::encode_frame(msg, now_millis())
        .map_err(|e| ConnectionError::ProtocolViolation(e.to_string()))?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads exactly one frame: the 16-byte header, then the declared payload.
pub(crate) async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<WireMessage, ConnectionError> {
    let mut header = [0u8; HEADER_SIZE];
    read_exact_or_closed(reader, &mut header).await?;

    let total = codec::frame_total_len(&header[..8]).map_err(protocol_violation)?;

    let mut frame = vec![0u8; total];
    frame[..HEADER_SIZE].copy_from_slice(&header);
    if total > HEADER_SIZE {
        read_exact_or_closed(reader, &mut frame[HEADER_SIZE..]).await?;
    }

    let (msg, _) = codec::decode_frame(&frame).map_err(protocol_violation)?;
    Ok(msg)
}

async fn read_exact_or_closed<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
) -> Result<(), ConnectionError> {
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(ConnectionError::ClosedByPeer)
        }
        Err(e) => Err(ConnectionError::Transport(e)),
    }
}

fn protocol_violation(e: CodecError) -> ConnectionError {
    warn!("protocol error on connection: {e}");
    ConnectionError::ProtocolViolation(e.to_string())
}

/// Milliseconds since the Unix epoch, for frame timestamps.
pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
