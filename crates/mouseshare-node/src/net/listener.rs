//! Inbound peer listener.
//!
//! Binds the TCP service port and runs the acceptor-side handshake for every
//! inbound stream. A completed handshake is registered and handed to the
//! engine through the sink; a failed one is logged and forgotten. Only the
//! initial bind failure is fatal.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::connection::{self, LocalHello, HANDSHAKE_DEADLINE};
use super::{ConnectionRegistry, PeerMessageSink};

/// Error type for listener startup.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The service port could not be bound.
    #[error("failed to bind listener on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Binds `port` and starts the accept loop.
///
/// Returns the actual bound address (useful with port 0 in tests) and the
/// accept task handle, which exits when `shutdown` fires.
///
/// # Errors
///
/// Returns [`ListenerError::BindFailed`] when the port is unavailable.
pub async fn start_listener(
    port: u16,
    hello: LocalHello,
    registry: Arc<ConnectionRegistry>,
    sink: Arc<dyn PeerMessageSink>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(SocketAddr, JoinHandle<()>), ListenerError> {
    let addr: SocketAddr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ListenerError::BindFailed { addr, source })?;
    let bound = listener.local_addr().map_err(|source| ListenerError::BindFailed { addr, source })?;
    info!("listening for peers on {bound}");

    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer_addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            // Transient accept failures must not stop the listener.
                            warn!("accept failed: {e}");
                            continue;
                        }
                    };
                    debug!("inbound stream from {peer_addr}");

                    let hello = hello.clone();
                    let registry = Arc::clone(&registry);
                    let sink = Arc::clone(&sink);
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        match connection::accept(stream, &hello, HANDSHAKE_DEADLINE).await {
                            Ok(conn) => {
                                let peer = conn.peer.id;
                                connection::spawn_io(conn, registry, sink, shutdown);
                                info!("accepted peer {peer} from {peer_addr}");
                            }
                            Err(e) => {
                                warn!("handshake with {peer_addr} failed: {e}");
                            }
                        }
                    });
                }
                _ = shutdown.changed() => {
                    info!("listener on {bound} stopping");
                    break;
                }
            }
        }
    });

    Ok((bound, handle))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
