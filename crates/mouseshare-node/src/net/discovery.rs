//! UDP broadcast peer discovery.
//!
//! One socket, two jobs. Every 5 seconds the service broadcasts a presence
//! datagram to each interface's broadcast address; between ticks it receives
//! the datagrams other machines broadcast and keeps the peer directory fresh.
//!
//! # How UDP discovery works
//!
//! UDP is connectionless: a datagram sent to a broadcast address (for example
//! `192.168.1.255` on a /24 network) is delivered to every machine on that
//! segment. Each MouseShare node announces itself this way and listens on the
//! same port, so peers find each other with zero configuration:
//!
//! 1. Node A broadcasts `MSDISC` + its identity, listen port, and screen size.
//! 2. Node B hears it, upserts its peer directory, and emits `PeerDiscovered`.
//! 3. When A stops broadcasting (shut down, unplugged), B's next tick notices
//!    the record is over 30 seconds old, evicts it, and emits `PeerLost`.
//!
//! Datagrams that fail to parse are dropped; send errors are logged and the
//! next tick simply tries again.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use mouseshare_core::protocol::announce::{
    decode_announcement, encode_announcement, PresenceAnnouncement,
};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::capabilities::{InterfaceIpv4, NetworkInterfaces};
use crate::events::NodeEvent;
use crate::peers::PeerDirectory;

/// Interval between presence broadcasts.
pub const BROADCAST_INTERVAL: Duration = Duration::from_secs(5);

/// Error type for discovery startup.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The discovery socket could not be bound.
    #[error("failed to bind discovery socket on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Binds the discovery socket and starts the broadcast/receive loop.
///
/// `announcement` is what this node advertises about itself; datagrams that
/// carry the same machine id are our own reflections and are ignored.
///
/// # Errors
///
/// Returns [`DiscoveryError::BindFailed`] if the port cannot be bound.
pub async fn start_discovery(
    port: u16,
    announcement: PresenceAnnouncement,
    interfaces: Arc<dyn NetworkInterfaces>,
    peers: Arc<Mutex<PeerDirectory>>,
    events: broadcast::Sender<NodeEvent>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<JoinHandle<()>, DiscoveryError> {
    let addr: SocketAddr = SocketAddr::from(([0, 0, 0, 0], port));
    let socket = UdpSocket::bind(addr)
        .await
        .map_err(|source| DiscoveryError::BindFailed { addr, source })?;
    socket
        .set_broadcast(true)
        .map_err(|source| DiscoveryError::BindFailed { addr, source })?;
    info!("discovery on UDP {addr}, announcing every {BROADCAST_INTERVAL:?}");

    let handle = tokio::spawn(async move {
        let datagram = encode_announcement(&announcement);
        let own_id = announcement.machine_id;
        let mut ticker = tokio::time::interval(BROADCAST_INTERVAL);
        let mut buf = vec![0u8; 2048];

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    evict_stale(&peers, &events);

                    let targets = broadcast_targets(&interfaces.ipv4_addresses());
                    for target in targets {
                        if let Err(e) = socket.send_to(&datagram, (target, port)).await {
                            // Logged and retried next tick.
                            warn!("presence broadcast to {target} failed: {e}");
                        }
                    }
                }
                received = socket.recv_from(&mut buf) => {
                    let (len, from) = match received {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!("discovery recv error: {e}");
                            continue;
                        }
                    };
                    match decode_announcement(&buf[..len]) {
                        Ok(heard) if heard.machine_id == own_id => {
                            // Our own broadcast reflected back.
                        }
                        Ok(heard) => {
                            let is_new = peers
                                .lock()
                                .expect("lock poisoned")
                                .upsert_discovered(&heard, from, Instant::now());
                            if is_new {
                                info!("discovered peer {} ({}) at {from}", heard.machine_name, heard.machine_id);
                                let _ = events.send(NodeEvent::PeerDiscovered {
                                    id: heard.machine_id,
                                    name: heard.machine_name,
                                    addr: from,
                                });
                            }
                        }
                        Err(e) => {
                            debug!("undecodable discovery datagram from {from}: {e}");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!("discovery stopping");
                    break;
                }
            }
        }
    });

    Ok(handle)
}

fn evict_stale(peers: &Arc<Mutex<PeerDirectory>>, events: &broadcast::Sender<NodeEvent>) {
    let evicted = peers
        .lock()
        .expect("lock poisoned")
        .evict_stale(Instant::now());
    for id in evicted {
        info!("peer {id} went silent; evicting");
        let _ = events.send(NodeEvent::PeerLost { id });
    }
}

/// Computes the broadcast address for every usable interface.
///
/// The broadcast address of an interface is its address with all host bits
/// set (`addr | !netmask`). Loopback and duplicate results are dropped; when
/// nothing usable remains the limited broadcast address 255.255.255.255 is
/// the fallback.
pub fn broadcast_targets(addresses: &[InterfaceIpv4]) -> Vec<Ipv4Addr> {
    let mut targets: Vec<Ipv4Addr> = Vec::new();
    for iface in addresses {
        if iface.addr.is_loopback() {
            continue;
        }
        let addr = u32::from(iface.addr);
        let mask = u32::from(iface.netmask);
        let broadcast = Ipv4Addr::from(addr | !mask);
        if !targets.contains(&broadcast) {
            targets.push(broadcast);
        }
    }
    if targets.is_empty() {
        targets.push(Ipv4Addr::BROADCAST);
    }
    targets
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use mouseshare_core::MachineId;

    #[test]
    fn test_broadcast_targets_computes_directed_broadcast() {
        let targets = broadcast_targets(&[InterfaceIpv4 {
            addr: Ipv4Addr::new(192, 168, 1, 10),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
        }]);
        assert_eq!(targets, vec![Ipv4Addr::new(192, 168, 1, 255)]);
    }

    #[test]
    fn test_broadcast_targets_handles_wider_masks() {
        let targets = broadcast_targets(&[InterfaceIpv4 {
            addr: Ipv4Addr::new(10, 2, 3, 4),
            netmask: Ipv4Addr::new(255, 0, 0, 0),
        }]);
        assert_eq!(targets, vec![Ipv4Addr::new(10, 255, 255, 255)]);
    }

    #[test]
    fn test_broadcast_targets_deduplicates_shared_segments() {
        let segment = |host: u8| InterfaceIpv4 {
            addr: Ipv4Addr::new(192, 168, 1, host),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
        };
        let targets = broadcast_targets(&[segment(10), segment(20)]);
        assert_eq!(targets.len(), 1);
    }

    #[test]
    fn test_broadcast_targets_skips_loopback() {
        let targets = broadcast_targets(&[InterfaceIpv4 {
            addr: Ipv4Addr::new(127, 0, 0, 1),
            netmask: Ipv4Addr::new(255, 0, 0, 0),
        }]);
        assert_eq!(targets, vec![Ipv4Addr::BROADCAST]);
    }

    #[test]
    fn test_broadcast_targets_falls_back_to_limited_broadcast() {
        assert_eq!(broadcast_targets(&[]), vec![Ipv4Addr::BROADCAST]);
    }

    #[tokio::test]
    async fn test_start_discovery_binds_and_stops_on_shutdown() {
        // Bind an ephemeral probe socket first to find a free port.
        let probe = UdpSocket::bind("0.0.0.0:0").await.expect("probe bind");
        let port = probe.local_addr().expect("addr").port();
        drop(probe);

        let announcement = PresenceAnnouncement {
            machine_id: MachineId::generate(),
            machine_name: "discovery-test".to_string(),
            listen_port: 24800,
            screen_width: 1920,
            screen_height: 1080,
        };
        let (events, _rx) = crate::events::channel();
        let (tx, rx) = watch::channel(false);

        let handle = start_discovery(
            port,
            announcement,
            Arc::new(crate::capabilities::mock::StaticInterfaces::none()),
            Arc::new(Mutex::new(PeerDirectory::new())),
            events,
            rx,
        )
        .await
        .expect("discovery must bind");

        tx.send(true).expect("signal shutdown");
        handle.await.expect("join");
    }

    #[tokio::test]
    async fn test_foreign_datagram_upserts_directory_and_emits_event() {
        let probe = UdpSocket::bind("0.0.0.0:0").await.expect("probe bind");
        let port = probe.local_addr().expect("addr").port();
        drop(probe);

        let own = PresenceAnnouncement {
            machine_id: MachineId::generate(),
            machine_name: "listener".to_string(),
            listen_port: 24800,
            screen_width: 1920,
            screen_height: 1080,
        };
        let peers = Arc::new(Mutex::new(PeerDirectory::new()));
        let (events, mut events_rx) = crate::events::channel();
        let (_tx, rx) = watch::channel(false);

        let _handle = start_discovery(
            port,
            own,
            Arc::new(crate::capabilities::mock::StaticInterfaces::none()),
            Arc::clone(&peers),
            events,
            rx,
        )
        .await
        .expect("discovery must bind");

        // A second machine announces itself straight at the discovery port.
        let foreign = PresenceAnnouncement {
            machine_id: MachineId::generate(),
            machine_name: "newcomer".to_string(),
            listen_port: 24800,
            screen_width: 2560,
            screen_height: 1440,
        };
        let sender = UdpSocket::bind("127.0.0.1:0").await.expect("sender bind");
        sender
            .send_to(&encode_announcement(&foreign), ("127.0.0.1", port))
            .await
            .expect("send datagram");

        let event = tokio::time::timeout(Duration::from_secs(5), events_rx.recv())
            .await
            .expect("event within deadline")
            .expect("channel open");
        match event {
            NodeEvent::PeerDiscovered { id, name, .. } => {
                assert_eq!(id, foreign.machine_id);
                assert_eq!(name, "newcomer");
            }
            other => panic!("expected PeerDiscovered, got {other:?}"),
        }
        assert!(peers.lock().unwrap().get(foreign.machine_id).is_some());
    }

    #[tokio::test]
    async fn test_own_reflection_is_ignored() {
        let probe = UdpSocket::bind("0.0.0.0:0").await.expect("probe bind");
        let port = probe.local_addr().expect("addr").port();
        drop(probe);

        let own = PresenceAnnouncement {
            machine_id: MachineId::generate(),
            machine_name: "myself".to_string(),
            listen_port: 24800,
            screen_width: 1920,
            screen_height: 1080,
        };
        let peers = Arc::new(Mutex::new(PeerDirectory::new()));
        let (events, _events_rx) = crate::events::channel();
        let (_tx, rx) = watch::channel(false);

        let _handle = start_discovery(
            port,
            own.clone(),
            Arc::new(crate::capabilities::mock::StaticInterfaces::none()),
            Arc::clone(&peers),
            events,
            rx,
        )
        .await
        .expect("discovery must bind");

        let sender = UdpSocket::bind("127.0.0.1:0").await.expect("sender bind");
        sender
            .send_to(&encode_announcement(&own), ("127.0.0.1", port))
            .await
            .expect("send datagram");

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(peers.lock().unwrap().is_empty(), "own id must not be recorded");
    }
}
