//! Peer directory: every machine this node knows about.
//!
//! Records come from two places: the settings file (configured peers, which
//! carry a screen-edge position) and discovery datagrams (which carry a fresh
//! address and screen size). A configured record is permanent; a purely
//! discovered one is evicted after 30 seconds of silence.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use mouseshare_core::protocol::PresenceAnnouncement;
use mouseshare_core::{Edge, MachineId};
use tracing::warn;

use crate::config::PeerEntry;

/// How long a discovered record survives without hearing another datagram.
pub const STALE_AFTER: Duration = Duration::from_secs(30);

/// Where a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerOrigin {
    Configured,
    Discovered,
}

/// One known peer.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub id: MachineId,
    pub display_name: String,
    /// Last known address. Configured records start from the settings entry;
    /// discovery refreshes it.
    pub address: Option<IpAddr>,
    pub port: u16,
    /// Which side of the local screen this peer sits on. Only configured
    /// records can hold a position.
    pub position: Option<Edge>,
    /// Alignment offsets, reserved for non-aligned layouts.
    pub offset_x: i32,
    pub offset_y: i32,
    /// Last reported screen size; refreshed at handshake and by discovery.
    pub screen_width: u32,
    pub screen_height: u32,
    /// When the last presence datagram arrived. `None` for configured records
    /// never seen on the discovery port.
    pub last_seen: Option<Instant>,
    pub origin: PeerOrigin,
}

impl PeerRecord {
    /// The socket address to dial, when an address is known.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.address.map(|ip| SocketAddr::new(ip, self.port))
    }
}

/// In-memory registry of all known peers.
#[derive(Debug, Default)]
pub struct PeerDirectory {
    records: HashMap<MachineId, PeerRecord>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a directory from configured peer entries.
    ///
    /// At most one peer may occupy each edge; the first configured entry at
    /// an edge wins and later claimants are kept without a position.
    pub fn from_config(entries: &[PeerEntry]) -> Self {
        let mut dir = Self::new();
        let mut taken: HashMap<Edge, MachineId> = HashMap::new();
        for entry in entries {
            let position = match taken.get(&entry.position) {
                Some(holder) => {
                    warn!(
                        "peer {} also configured at edge {}; {} keeps it",
                        entry.id, entry.position, holder
                    );
                    None
                }
                None => {
                    taken.insert(entry.position, entry.id);
                    Some(entry.position)
                }
            };
            dir.records.insert(
                entry.id,
                PeerRecord {
                    id: entry.id,
                    display_name: entry.name.clone(),
                    address: entry.address.parse().ok(),
                    port: entry.port,
                    position,
                    offset_x: entry.offset_x,
                    offset_y: entry.offset_y,
                    screen_width: 0,
                    screen_height: 0,
                    last_seen: None,
                    origin: PeerOrigin::Configured,
                },
            );
        }
        dir
    }

    /// Records a presence datagram. Returns `true` when the machine was not
    /// known before (a `PeerDiscovered` moment).
    pub fn upsert_discovered(
        &mut self,
        announcement: &PresenceAnnouncement,
        from: SocketAddr,
        now: Instant,
    ) -> bool {
        match self.records.get_mut(&announcement.machine_id) {
            Some(record) => {
                record.display_name = announcement.machine_name.clone();
                record.address = Some(from.ip());
                record.port = announcement.listen_port as u16;
                record.screen_width = announcement.screen_width.max(0) as u32;
                record.screen_height = announcement.screen_height.max(0) as u32;
                record.last_seen = Some(now);
                false
            }
            None => {
                self.records.insert(
                    announcement.machine_id,
                    PeerRecord {
                        id: announcement.machine_id,
                        display_name: announcement.machine_name.clone(),
                        address: Some(from.ip()),
                        port: announcement.listen_port as u16,
                        position: None,
                        offset_x: 0,
                        offset_y: 0,
                        screen_width: announcement.screen_width.max(0) as u32,
                        screen_height: announcement.screen_height.max(0) as u32,
                        last_seen: Some(now),
                        origin: PeerOrigin::Discovered,
                    },
                );
                true
            }
        }
    }

    /// Evicts purely discovered records that have gone silent. Returns the
    /// evicted ids; each id is returned at most once across calls because the
    /// record is removed.
    pub fn evict_stale(&mut self, now: Instant) -> Vec<MachineId> {
        let stale: Vec<MachineId> = self
            .records
            .values()
            .filter(|r| r.origin == PeerOrigin::Discovered)
            .filter(|r| {
                r.last_seen
                    .map(|seen| now.duration_since(seen) > STALE_AFTER)
                    .unwrap_or(true)
            })
            .map(|r| r.id)
            .collect();
        for id in &stale {
            self.records.remove(id);
        }
        stale
    }

    /// The configured peer sitting at `edge`, if any.
    pub fn peer_at(&self, edge: Edge) -> Option<&PeerRecord> {
        self.records
            .values()
            .find(|r| r.position == Some(edge))
    }

    /// Stores the screen size a peer reported during its handshake.
    pub fn record_screen(&mut self, id: MachineId, width: u32, height: u32) {
        if let Some(record) = self.records.get_mut(&id) {
            record.screen_width = width;
            record.screen_height = height;
        }
    }

    pub fn get(&self, id: MachineId) -> Option<&PeerRecord> {
        self.records.get(&id)
    }

    pub fn remove(&mut self, id: MachineId) -> Option<PeerRecord> {
        self.records.remove(&id)
    }

    pub fn all(&self) -> impl Iterator<Item = &PeerRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
