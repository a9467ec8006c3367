//! Peer networking: connections, the listener, and discovery.
//!
//! Each live peer connection is represented in the process by a [`PeerLink`]
//! held in the [`ConnectionRegistry`]. The registry is the one map shared by
//! every task in the process: it is guarded by a single mutex, mutated only
//! on dial success, accept, and disconnect, and **no I/O ever happens under
//! the lock** — sending through a link only enqueues onto the connection's
//! unbounded outbound queue, which the writer task drains.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use mouseshare_core::{MachineId, WireMessage};
use tokio::sync::{mpsc, watch};

use crate::events::DisconnectReason;

pub mod connection;
pub mod discovery;
pub mod listener;

pub use connection::{accept, connect, ConnectionError, EstablishedConnection, PeerGreeting};

/// Receives decoded peer traffic and lifecycle notifications. Implemented by
/// the control engine.
pub trait PeerMessageSink: Send + Sync {
    /// A handshake completed and the connection is registered.
    fn on_peer_connected(&self, peer: &PeerGreeting);

    /// A post-handshake message arrived from `peer`. Liveness traffic
    /// (`Ping`/`Pong`/`Disconnect`) is consumed by the connection layer and
    /// never reaches this method.
    fn on_peer_message(&self, peer: MachineId, msg: WireMessage);

    /// The connection's receive loop exited and the link was removed.
    fn on_peer_disconnected(&self, peer: MachineId, reason: DisconnectReason);
}

/// Monotonic serial distinguishing successive connections to the same peer.
static LINK_SERIAL: AtomicU64 = AtomicU64::new(0);

fn next_link_serial() -> u64 {
    LINK_SERIAL.fetch_add(1, Ordering::Relaxed)
}

/// A handle to one live peer connection.
#[derive(Debug)]
pub struct PeerLink {
    pub id: MachineId,
    pub name: String,
    /// The peer's primary screen size as reported in its handshake.
    pub screen_width: u32,
    pub screen_height: u32,
    pub supports_clipboard: bool,
    serial: u64,
    outbound: mpsc::UnboundedSender<WireMessage>,
    close: watch::Sender<Option<DisconnectReason>>,
}

impl PeerLink {
    pub(crate) fn new(
        id: MachineId,
        name: String,
        screen_width: u32,
        screen_height: u32,
        supports_clipboard: bool,
        outbound: mpsc::UnboundedSender<WireMessage>,
        close: watch::Sender<Option<DisconnectReason>>,
    ) -> Self {
        Self {
            id,
            name,
            screen_width,
            screen_height,
            supports_clipboard,
            serial: next_link_serial(),
            outbound,
            close,
        }
    }

    /// Enqueues a message for the writer task. Returns `false` if the
    /// connection is already torn down.
    pub fn send(&self, msg: WireMessage) -> bool {
        self.outbound.send(msg).is_ok()
    }

    /// Signals the connection's tasks to stop with the given reason.
    pub fn close(&self, reason: DisconnectReason) {
        let _ = self.close.send(Some(reason));
    }
}

/// All live connections, keyed by peer machine id.
///
/// Invariant: at most one link per id. Inserting a duplicate displaces the
/// older link, which the caller tears down outside the lock.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: Mutex<HashMap<MachineId, PeerLink>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a link, returning any displaced link for the same peer.
    pub fn insert(&self, link: PeerLink) -> Option<PeerLink> {
        self.inner
            .lock()
            .expect("lock poisoned")
            .insert(link.id, link)
    }

    /// Removes the link for `id` only if it is still the one identified by
    /// `serial`. Prevents an exiting receive loop from removing the fresh
    /// connection that just replaced it.
    pub fn remove_if_serial(&self, id: MachineId, serial: u64) -> Option<PeerLink> {
        let mut map = self.inner.lock().expect("lock poisoned");
        match map.get(&id) {
            Some(link) if link.serial == serial => map.remove(&id),
            _ => None,
        }
    }

    pub fn contains(&self, id: MachineId) -> bool {
        self.inner.lock().expect("lock poisoned").contains_key(&id)
    }

    /// The peer's handshake-reported screen size, when connected.
    pub fn screen_of(&self, id: MachineId) -> Option<(u32, u32)> {
        self.inner
            .lock()
            .expect("lock poisoned")
            .get(&id)
            .map(|l| (l.screen_width, l.screen_height))
    }

    /// Enqueues a message to one peer. Returns `false` when no live link
    /// exists or the connection is shutting down.
    pub fn send_to(&self, id: MachineId, msg: WireMessage) -> bool {
        let map = self.inner.lock().expect("lock poisoned");
        map.get(&id).map(|l| l.send(msg)).unwrap_or(false)
    }

    /// Enqueues a message to every live peer. Returns how many links took it.
    pub fn broadcast(&self, msg: &WireMessage) -> usize {
        let map = self.inner.lock().expect("lock poisoned");
        map.values().filter(|l| l.send(msg.clone())).count()
    }

    pub fn ids(&self) -> Vec<MachineId> {
        self.inner.lock().expect("lock poisoned").keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().expect("lock poisoned").is_empty()
    }

    /// Signals every connection to close. Used at shutdown after the
    /// best-effort `Disconnect` broadcast.
    pub fn close_all(&self, reason: DisconnectReason) {
        let map = self.inner.lock().expect("lock poisoned");
        for link in map.values() {
            link.close(reason.clone());
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn make_link(id: MachineId) -> (PeerLink, mpsc::UnboundedReceiver<WireMessage>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let (close, _) = watch::channel(None);
        (
            PeerLink::new(id, "test-peer".to_string(), 1920, 1080, true, outbound, close),
            rx,
        )
    }

    #[test]
    fn test_send_to_enqueues_on_the_link_queue() {
        let registry = ConnectionRegistry::new();
        let id = MachineId::generate();
        let (link, mut rx) = make_link(id);
        registry.insert(link);

        assert!(registry.send_to(id, WireMessage::Ping));
        assert_eq!(rx.try_recv().expect("queued message"), WireMessage::Ping);
    }

    #[test]
    fn test_send_to_unknown_peer_returns_false() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.send_to(MachineId::generate(), WireMessage::Ping));
    }

    #[test]
    fn test_insert_duplicate_displaces_older_link() {
        let registry = ConnectionRegistry::new();
        let id = MachineId::generate();
        let (first, _rx1) = make_link(id);
        let first_serial = first.serial;
        let (second, mut rx2) = make_link(id);

        assert!(registry.insert(first).is_none());
        let displaced = registry.insert(second).expect("older link displaced");
        assert_eq!(displaced.serial, first_serial);
        assert_eq!(registry.len(), 1);

        // Traffic now lands on the new link.
        registry.send_to(id, WireMessage::Pong);
        assert_eq!(rx2.try_recv().expect("queued"), WireMessage::Pong);
    }

    #[test]
    fn test_remove_if_serial_spares_a_replacement() {
        let registry = ConnectionRegistry::new();
        let id = MachineId::generate();
        let (old, _rx1) = make_link(id);
        let old_serial = old.serial;
        let (new, _rx2) = make_link(id);
        let new_serial = new.serial;

        registry.insert(old);
        registry.insert(new);

        // The exiting old receive loop must not remove the fresh link.
        assert!(registry.remove_if_serial(id, old_serial).is_none());
        assert!(registry.contains(id));

        assert!(registry.remove_if_serial(id, new_serial).is_some());
        assert!(!registry.contains(id));
    }

    #[test]
    fn test_broadcast_reaches_every_link() {
        let registry = ConnectionRegistry::new();
        let (a, mut rx_a) = make_link(MachineId::generate());
        let (b, mut rx_b) = make_link(MachineId::generate());
        registry.insert(a);
        registry.insert(b);

        assert_eq!(registry.broadcast(&WireMessage::Ping), 2);
        assert_eq!(rx_a.try_recv().expect("a"), WireMessage::Ping);
        assert_eq!(rx_b.try_recv().expect("b"), WireMessage::Ping);
    }

    #[test]
    fn test_screen_of_reports_handshake_dimensions() {
        let registry = ConnectionRegistry::new();
        let id = MachineId::generate();
        let (link, _rx) = make_link(id);
        registry.insert(link);
        assert_eq!(registry.screen_of(id), Some((1920, 1080)));
        assert_eq!(registry.screen_of(MachineId::generate()), None);
    }
}
