//! Passive LAN discovery.
//!
//! A [`DiscoveryBus`] owns one background worker shared by every client
//! registered with it. Each tick the worker forgets servers that stopped
//! answering and broadcasts a ping on behalf of each client; pongs come
//! back on the client's own socket and are routed here by its driver.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock, Weak};
use std::time::Instant;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tracing::{debug, trace};

use crate::listener::ClientListener;
use crate::protocol::{
    constants::{BROADCAST_INTERVAL, DEFAULT_UNCONNECTED_MAGIC, SERVER_TIMEOUT},
    packet::{RaknetPacket, UnconnectedPing, UnconnectedPingOpenConnections, UnconnectedPong},
    types::RaknetTime,
};

/// How broadcast pings are issued for a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DiscoveryMode {
    /// No pings are broadcast; existing entries still expire.
    None = 0,
    /// Ping every server on the local network.
    AllConnections = 1,
    /// Ping only servers that still accept connections.
    OpenConnectionsOnly = 2,
}

impl DiscoveryMode {
    fn from_u8(raw: u8) -> DiscoveryMode {
        match raw {
            1 => DiscoveryMode::AllConnections,
            2 => DiscoveryMode::OpenConnectionsOnly,
            _ => DiscoveryMode::None,
        }
    }
}

/// A server seen on the local network within the last [`SERVER_TIMEOUT`].
#[derive(Debug, Clone)]
pub struct DiscoveredServer {
    pub addr: SocketAddr,
    pub last_seen: Instant,
    /// Opaque identifier bytes from the server's pong.
    pub identifier: Bytes,
}

/// Per-client discovery state, shared between the client driver (pong
/// routing) and the bus worker (eviction and broadcasting).
pub(crate) struct DiscoveryState {
    guid: u64,
    port: u16,
    epoch: Instant,
    mode: AtomicU8,
    socket: Arc<UdpSocket>,
    listener: Arc<RwLock<Option<Arc<dyn ClientListener>>>>,
    discovered: Mutex<HashMap<SocketAddr, DiscoveredServer>>,
}

impl DiscoveryState {
    pub fn new(
        guid: u64,
        port: u16,
        epoch: Instant,
        mode: DiscoveryMode,
        socket: Arc<UdpSocket>,
        listener: Arc<RwLock<Option<Arc<dyn ClientListener>>>>,
    ) -> Self {
        Self {
            guid,
            port,
            epoch,
            mode: AtomicU8::new(mode as u8),
            socket,
            listener,
            discovered: Mutex::new(HashMap::new()),
        }
    }

    pub fn guid(&self) -> u64 {
        self.guid
    }

    pub fn mode(&self) -> DiscoveryMode {
        DiscoveryMode::from_u8(self.mode.load(Ordering::Relaxed))
    }

    pub fn set_mode(&self, mode: DiscoveryMode) {
        self.mode.store(mode as u8, Ordering::Relaxed);
    }

    fn listener(&self) -> Option<Arc<dyn ClientListener>> {
        self.listener
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn snapshot(&self) -> Vec<DiscoveredServer> {
        self.discovered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    /// Record a pong: insert a new server or refresh a known one,
    /// surfacing identifier changes to the listener.
    pub fn handle_pong(&self, sender: SocketAddr, pong: UnconnectedPong) {
        enum Change {
            Discovered,
            IdentifierUpdate,
            Refreshed,
        }

        let identifier = pong.advertisement.0.unwrap_or_default();
        let change = {
            let mut discovered = self.discovered.lock().unwrap_or_else(|e| e.into_inner());
            match discovered.entry(sender) {
                Entry::Occupied(mut entry) => {
                    let server = entry.get_mut();
                    server.last_seen = Instant::now();
                    if server.identifier != identifier {
                        server.identifier = identifier.clone();
                        Change::IdentifierUpdate
                    } else {
                        Change::Refreshed
                    }
                }
                Entry::Vacant(entry) => {
                    entry.insert(DiscoveredServer {
                        addr: sender,
                        last_seen: Instant::now(),
                        identifier: identifier.clone(),
                    });
                    Change::Discovered
                }
            }
        };

        // Callbacks run without the map lock held.
        match change {
            Change::Discovered => {
                debug!(%sender, "server discovered");
                if let Some(listener) = self.listener() {
                    listener.on_server_discovered(sender, &identifier);
                }
            }
            Change::IdentifierUpdate => {
                debug!(%sender, "server identifier changed");
                if let Some(listener) = self.listener() {
                    listener.on_server_identifier_update(sender, &identifier);
                }
            }
            Change::Refreshed => trace!(%sender, "server refreshed"),
        }
    }

    /// Forget servers that have been silent past the timeout.
    pub fn sweep(&self, now: Instant) {
        let expired: Vec<SocketAddr> = {
            let mut discovered = self.discovered.lock().unwrap_or_else(|e| e.into_inner());
            let expired: Vec<SocketAddr> = discovered
                .iter()
                .filter(|(_, server)| now.duration_since(server.last_seen) >= SERVER_TIMEOUT)
                .map(|(&addr, _)| addr)
                .collect();
            for addr in &expired {
                discovered.remove(addr);
            }
            expired
        };

        for addr in expired {
            debug!(%addr, "server forgotten");
            if let Some(listener) = self.listener() {
                listener.on_server_forgotten(addr);
            }
        }
    }

    /// Broadcast one ping to the discovery port, shaped by the mode.
    pub async fn broadcast(&self) {
        let mode = self.mode();
        if mode == DiscoveryMode::None {
            return;
        }

        let ping_time = RaknetTime(self.epoch.elapsed().as_millis() as u64);
        let packet = match mode {
            DiscoveryMode::OpenConnectionsOnly => {
                RaknetPacket::from(UnconnectedPingOpenConnections {
                    ping_time,
                    magic: DEFAULT_UNCONNECTED_MAGIC,
                    client_guid: self.guid,
                })
            }
            _ => RaknetPacket::from(UnconnectedPing {
                ping_time,
                magic: DEFAULT_UNCONNECTED_MAGIC,
                client_guid: self.guid,
            }),
        };

        let target = SocketAddr::from((Ipv4Addr::BROADCAST, self.port));
        if let Err(e) = self.socket.send_to(&packet.to_bytes(), target).await {
            debug!(error = %e, "broadcast ping failed");
        }
    }
}

struct BusInner {
    clients: Mutex<HashMap<u64, Arc<DiscoveryState>>>,
}

/// Shared discovery worker. Construct one explicitly, or use
/// [`DiscoveryBus::global`] for a process-wide default. The worker task
/// stops once every handle to the bus is dropped.
#[derive(Clone)]
pub struct DiscoveryBus {
    inner: Arc<BusInner>,
}

impl DiscoveryBus {
    /// Create a bus and spawn its worker on the current tokio runtime.
    pub fn new() -> Self {
        let inner = Arc::new(BusInner {
            clients: Mutex::new(HashMap::new()),
        });
        tokio::spawn(run_worker(Arc::downgrade(&inner)));
        Self { inner }
    }

    /// Lazily initialised process-wide bus.
    pub fn global() -> &'static DiscoveryBus {
        static GLOBAL: OnceLock<DiscoveryBus> = OnceLock::new();
        GLOBAL.get_or_init(DiscoveryBus::new)
    }

    pub(crate) fn register(&self, state: Arc<DiscoveryState>) {
        self.inner
            .clients
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(state.guid(), state);
    }

    pub(crate) fn unregister(&self, guid: u64) {
        self.inner
            .clients
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&guid);
    }
}

impl Default for DiscoveryBus {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_worker(inner: Weak<BusInner>) {
    let mut tick = tokio::time::interval(BROADCAST_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tick.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let clients: Vec<Arc<DiscoveryState>> = inner
            .clients
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        drop(inner);

        let now = Instant::now();
        for state in clients {
            state.sweep(now);
            state.broadcast().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::Advertisement;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingListener {
        events: Mutex<Vec<String>>,
    }

    impl RecordingListener {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl ClientListener for RecordingListener {
        fn on_server_discovered(&self, addr: SocketAddr, identifier: &Bytes) {
            self.events
                .lock()
                .unwrap()
                .push(format!("discovered {addr} {identifier:?}"));
        }
        fn on_server_forgotten(&self, addr: SocketAddr) {
            self.events.lock().unwrap().push(format!("forgotten {addr}"));
        }
        fn on_server_identifier_update(&self, addr: SocketAddr, identifier: &Bytes) {
            self.events
                .lock()
                .unwrap()
                .push(format!("updated {addr} {identifier:?}"));
        }
    }

    fn pong(identifier: &'static [u8]) -> UnconnectedPong {
        UnconnectedPong {
            ping_time: RaknetTime(0),
            server_guid: 1,
            magic: DEFAULT_UNCONNECTED_MAGIC,
            advertisement: Advertisement(Some(Bytes::from_static(identifier))),
        }
    }

    async fn state_with_listener() -> (DiscoveryState, Arc<RecordingListener>) {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let listener = Arc::new(RecordingListener::default());
        let slot: Arc<RwLock<Option<Arc<dyn ClientListener>>>> =
            Arc::new(RwLock::new(Some(listener.clone())));
        let state = DiscoveryState::new(
            7,
            19132,
            Instant::now(),
            DiscoveryMode::AllConnections,
            socket,
            slot,
        );
        (state, listener)
    }

    #[tokio::test]
    async fn discovery_lifecycle() {
        let (state, listener) = state_with_listener().await;
        let server: SocketAddr = "10.0.0.5:19132".parse().unwrap();

        state.handle_pong(server, pong(b"A"));
        assert_eq!(state.snapshot().len(), 1);

        // Same identifier refreshes silently.
        state.handle_pong(server, pong(b"A"));
        // Changed identifier is surfaced.
        state.handle_pong(server, pong(b"B"));

        // Six seconds of silence forgets the server.
        state.sweep(Instant::now() + SERVER_TIMEOUT + Duration::from_secs(1));
        assert!(state.snapshot().is_empty());

        let events = listener.events();
        assert_eq!(events.len(), 3);
        assert!(events[0].starts_with("discovered 10.0.0.5:19132"));
        assert!(events[1].starts_with("updated 10.0.0.5:19132"));
        assert!(events[2].starts_with("forgotten 10.0.0.5:19132"));
    }

    #[tokio::test(start_paused = true)]
    async fn bus_worker_sweeps_registered_clients() {
        let bus = DiscoveryBus::new();
        let (state, listener) = state_with_listener().await;
        let state = Arc::new(state);
        // Mode None keeps the worker off the network; expiry still runs.
        state.set_mode(DiscoveryMode::None);

        let server: SocketAddr = "10.0.0.7:19132".parse().unwrap();
        state.handle_pong(server, pong(b"A"));
        bus.register(state.clone());

        tokio::time::sleep(SERVER_TIMEOUT + BROADCAST_INTERVAL * 2).await;

        assert!(state.snapshot().is_empty());
        assert!(listener
            .events()
            .iter()
            .any(|event| event.starts_with("forgotten 10.0.0.7:19132")));

        bus.unregister(state.guid());
    }

    #[tokio::test]
    async fn mode_none_suppresses_broadcast_but_not_expiry() {
        let (state, listener) = state_with_listener().await;
        state.set_mode(DiscoveryMode::None);
        assert_eq!(state.mode(), DiscoveryMode::None);

        let server: SocketAddr = "10.0.0.6:19132".parse().unwrap();
        state.handle_pong(server, pong(b"A"));
        state.sweep(Instant::now() + SERVER_TIMEOUT + Duration::from_secs(1));

        assert!(state.snapshot().is_empty());
        assert_eq!(listener.events().len(), 2);
        // Broadcasting under mode None is a no-op.
        state.broadcast().await;
    }
}
