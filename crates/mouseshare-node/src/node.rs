//! Node runtime: wires the engine and network services together.
//!
//! ```text
//! Node::start()
//!  ├─ ControlEngine::start()   -- input hooks + clipboard subscription
//!  ├─ net::listener            -- accept inbound peers (TCP)
//!  ├─ net::discovery           -- presence broadcasts (UDP)
//!  └─ ping scheduler           -- liveness probes on every connection
//! ```
//!
//! Shutdown flips one watch signal that every task selects on, sends a
//! best-effort `Disconnect` to each peer, and then awaits every task handle
//! so sockets are closed before `shutdown()` returns.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use mouseshare_core::protocol::PresenceAnnouncement;
use mouseshare_core::MachineId;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::capabilities::{
    CapabilityError, ClipboardAccess, GlobalInputHook, InputSynthesis, NetworkInterfaces,
    ScreenMetrics,
};
use crate::config::Settings;
use crate::engine::ControlEngine;
use crate::events::{DisconnectReason, NodeEvent};
use crate::net::connection::{self, LocalHello, ConnectionError, HANDSHAKE_DEADLINE, PING_INTERVAL};
use crate::net::discovery::{self, DiscoveryError};
use crate::net::listener::{self, ListenerError};
use crate::net::{ConnectionRegistry, PeerMessageSink};
use crate::peers::PeerDirectory;

/// The platform adapters a node runs on.
pub struct NodeCapabilities {
    pub hook: Arc<dyn GlobalInputHook>,
    pub synthesis: Arc<dyn InputSynthesis>,
    pub screen: Arc<dyn ScreenMetrics>,
    pub clipboard: Arc<dyn ClipboardAccess>,
    pub interfaces: Arc<dyn NetworkInterfaces>,
}

/// Error type for node startup.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error(transparent)]
    Capability(#[from] CapabilityError),
}

/// One MouseShare peer process.
pub struct Node {
    settings: Settings,
    engine: Arc<ControlEngine>,
    registry: Arc<ConnectionRegistry>,
    peers: Arc<Mutex<PeerDirectory>>,
    events: broadcast::Sender<NodeEvent>,
    interfaces: Arc<dyn NetworkInterfaces>,
    screen: Arc<dyn ScreenMetrics>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Actual listener address, known once started (port 0 in tests).
    bound: Mutex<Option<SocketAddr>>,
}

impl Node {
    pub fn new(settings: Settings, caps: NodeCapabilities) -> Arc<Self> {
        let registry = Arc::new(ConnectionRegistry::new());
        let peers = Arc::new(Mutex::new(PeerDirectory::from_config(&settings.peers)));
        let (events, _) = crate::events::channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let engine = ControlEngine::new(
            &settings,
            caps.hook,
            caps.synthesis,
            Arc::clone(&caps.screen),
            caps.clipboard,
            Arc::clone(&registry),
            Arc::clone(&peers),
            events.clone(),
        );

        Arc::new(Self {
            settings,
            engine,
            registry,
            peers,
            events,
            interfaces: caps.interfaces,
            screen: caps.screen,
            shutdown_tx,
            shutdown_rx,
            tasks: Mutex::new(Vec::new()),
            bound: Mutex::new(None),
        })
    }

    pub fn engine(&self) -> &Arc<ControlEngine> {
        &self.engine
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn peers(&self) -> &Arc<Mutex<PeerDirectory>> {
        &self.peers
    }

    pub fn machine_id(&self) -> MachineId {
        self.settings.machine_id
    }

    /// Subscribes to the node's event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    /// The listener's bound address, once [`start`](Self::start) returned.
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        *self.bound.lock().expect("lock poisoned")
    }

    fn hello(&self) -> LocalHello {
        let bounds = self.screen.primary_bounds();
        LocalHello {
            machine_id: self.settings.machine_id,
            machine_name: self.settings.machine_name.clone(),
            screen_width: bounds.width,
            screen_height: bounds.height,
            supports_clipboard: self.settings.clipboard.enabled,
        }
    }

    /// Starts the engine, listener, discovery, and ping scheduler.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError`] when the hooks cannot be installed or either
    /// socket cannot be bound. All are fatal at startup.
    pub async fn start(&self) -> Result<SocketAddr, NodeError> {
        self.engine.start()?;

        let (bound, listener_task) = listener::start_listener(
            self.settings.local_port,
            self.hello(),
            Arc::clone(&self.registry),
            Arc::clone(&self.engine) as Arc<dyn PeerMessageSink>,
            self.shutdown_rx.clone(),
        )
        .await?;
        *self.bound.lock().expect("lock poisoned") = Some(bound);

        let bounds = self.screen.primary_bounds();
        let discovery_task = discovery::start_discovery(
            self.settings.discovery_port,
            PresenceAnnouncement {
                machine_id: self.settings.machine_id,
                machine_name: self.settings.machine_name.clone(),
                listen_port: bound.port() as i32,
                screen_width: bounds.width,
                screen_height: bounds.height,
            },
            Arc::clone(&self.interfaces),
            Arc::clone(&self.peers),
            self.events.clone(),
            self.shutdown_rx.clone(),
        )
        .await?;

        let ping_task = {
            let registry = Arc::clone(&self.registry);
            let mut shutdown = self.shutdown_rx.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(PING_INTERVAL);
                // The first tick fires immediately; skip it so a fresh
                // connection is not pinged before its handshake settles.
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            registry.broadcast(&mouseshare_core::WireMessage::Ping);
                        }
                        _ = shutdown.changed() => break,
                    }
                }
            })
        };

        let mut tasks = self.tasks.lock().expect("lock poisoned");
        tasks.push(listener_task);
        tasks.push(discovery_task);
        tasks.push(ping_task);

        info!(
            "node {} ({}) up on {bound}",
            self.settings.machine_name, self.settings.machine_id
        );
        Ok(bound)
    }

    /// Dials one peer and registers the connection on success.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`]; the node never retries by itself.
    pub async fn connect_peer(&self, addr: SocketAddr) -> Result<MachineId, ConnectionError> {
        let conn = connection::connect(addr, &self.hello(), HANDSHAKE_DEADLINE).await?;
        Ok(connection::spawn_io(
            conn,
            Arc::clone(&self.registry),
            Arc::clone(&self.engine) as Arc<dyn PeerMessageSink>,
            self.shutdown_rx.clone(),
        ))
    }

    /// Dials every configured peer that has an address. Failures are logged
    /// and surfaced as events; connecting later (or being dialed by the peer)
    /// is always possible.
    pub async fn connect_configured_peers(&self) {
        let targets: Vec<(MachineId, SocketAddr)> = {
            let peers = self.peers.lock().expect("lock poisoned");
            peers
                .all()
                .filter_map(|record| record.socket_addr().map(|addr| (record.id, addr)))
                .collect()
        };
        for (id, addr) in targets {
            if self.registry.contains(id) {
                continue;
            }
            match self.connect_peer(addr).await {
                Ok(peer) => info!("connected to configured peer {peer} at {addr}"),
                Err(e) => {
                    warn!("could not reach configured peer {id} at {addr}: {e}");
                    let _ = self.events.send(NodeEvent::EngineError {
                        detail: format!("dial {addr}: {e}"),
                    });
                }
            }
        }
    }

    /// Graceful shutdown: ends any control episode, says goodbye to every
    /// peer, stops all tasks, and waits for them.
    pub async fn shutdown(&self) {
        info!("shutting down");
        self.engine.reset();
        self.registry.close_all(DisconnectReason::Shutdown);
        let _ = self.shutdown_tx.send(true);

        let tasks: Vec<JoinHandle<()>> =
            std::mem::take(&mut *self.tasks.lock().expect("lock poisoned"));
        for task in tasks {
            if let Err(e) = task.await {
                warn!("task ended abnormally during shutdown: {e}");
            }
        }
        info!("node stopped");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::mock::{
        FixedScreenMetrics, MockClipboard, MockInputHook, RecordingSynthesis, StaticInterfaces,
    };
    use mouseshare_core::Rect;

    fn test_capabilities() -> NodeCapabilities {
        NodeCapabilities {
            hook: Arc::new(MockInputHook::new()),
            synthesis: Arc::new(RecordingSynthesis::new()),
            screen: Arc::new(FixedScreenMetrics::new(Rect::new(0, 0, 1920, 1080))),
            clipboard: Arc::new(MockClipboard::new()),
            interfaces: Arc::new(StaticInterfaces::none()),
        }
    }

    fn test_settings() -> Settings {
        let mut settings = Settings::generate("node-under-test");
        // Ephemeral ports so parallel tests never collide.
        settings.local_port = 0;
        settings.discovery_port = 0;
        settings
    }

    #[tokio::test]
    async fn test_node_starts_and_shuts_down_cleanly() {
        let node = Node::new(test_settings(), test_capabilities());
        let bound = node.start().await.expect("start");
        assert_ne!(bound.port(), 0);
        assert_eq!(node.listen_addr(), Some(bound));
        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_two_nodes_connect_over_loopback() {
        let a = Node::new(test_settings(), test_capabilities());
        let b = Node::new(test_settings(), test_capabilities());
        let _ = a.start().await.expect("start a");
        let b_addr = b.start().await.expect("start b");

        let target = SocketAddr::from(([127, 0, 0, 1], b_addr.port()));
        let peer = a.connect_peer(target).await.expect("dial b");
        assert_eq!(peer, b.machine_id());
        assert!(a.registry().contains(b.machine_id()));

        // B registers A's inbound connection asynchronously.
        for _ in 0..50 {
            if b.registry().contains(a.machine_id()) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(b.registry().contains(a.machine_id()));

        a.shutdown().await;
        b.shutdown().await;
    }

    #[tokio::test]
    async fn test_connect_peer_failure_is_surfaced_not_retried() {
        let node = Node::new(test_settings(), test_capabilities());
        node.start().await.expect("start");

        let dead: SocketAddr = "127.0.0.1:1".parse().unwrap();
        assert!(node.connect_peer(dead).await.is_err());
        assert!(node.registry().is_empty());
        node.shutdown().await;
    }
}
