use std::fmt::{Debug, Formatter};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::events::{NetEvent, NetEventNotifier, PeerConnectedData, PeerDisconnectedData};

/// Stable integer identifier for a connected peer. Ids are allocated monotonically by the
///  endpoint that accepts the handshake and are never reused while the peer is connected.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PeerId(pub u32);

impl PeerId {
    /// The accepting side of a handshake is registered under this well-known id by its
    ///  clients; regular allocation starts at 1.
    pub const SERVER: PeerId = PeerId(0);
}

impl Debug for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

struct PeerEntry {
    id: PeerId,
    last_heartbeat: Instant,
}

struct RegistryState {
    next_id: u32,
    local_id: Option<PeerId>,
    by_addr: FxHashMap<SocketAddr, PeerEntry>,
    by_id: FxHashMap<PeerId, SocketAddr>,
}

/// Maps peer network addresses to stable peer ids and tracks per-peer liveness. The registry
///  only detects timed-out peers ([SessionRegistry::timed_out_peers] is a pure query); eviction
///  is the caller's decision, so detection never mutates during iteration.
///
/// All methods take `&self` and are safe to call from the receive path while the liveness tick
///  queries - the interior is behind a single coarse lock.
pub struct SessionRegistry {
    events: Arc<NetEventNotifier>,
    state: Mutex<RegistryState>,
}

impl SessionRegistry {
    pub fn new(events: Arc<NetEventNotifier>) -> SessionRegistry {
        SessionRegistry {
            events,
            state: Mutex::new(RegistryState {
                next_id: 1,
                local_id: None,
                by_addr: FxHashMap::default(),
                by_id: FxHashMap::default(),
            }),
        }
    }

    /// Register a peer, allocating the next id. Idempotent: a known address keeps its id, and
    ///  the connected notification fires only on first registration.
    pub async fn add_peer(&self, addr: SocketAddr) -> PeerId {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.by_addr.get(&addr) {
            return entry.id;
        }

        let id = PeerId(state.next_id);
        state.next_id += 1;
        Self::insert(&mut state, addr, id);
        drop(state);

        info!("{:?} connected from {}", id, addr);
        self.events.send_event(NetEvent::PeerConnected(PeerConnectedData { peer: id, addr }));
        id
    }

    /// Register a peer under an id assigned elsewhere (applying a handshake roster). Keeps the
    ///  local allocator ahead of every id seen so far.
    pub async fn add_peer_with_id(&self, addr: SocketAddr, id: PeerId) -> PeerId {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.by_addr.get(&addr) {
            if entry.id != id {
                warn!("{} is already registered as {:?} - ignoring assignment {:?}", addr, entry.id, id);
            }
            return entry.id;
        }
        if let Some(existing) = state.by_id.get(&id) {
            warn!("{:?} is already registered for {} - ignoring roster entry for {}", id, existing, addr);
            return id;
        }

        state.next_id = state.next_id.max(id.0 + 1);
        Self::insert(&mut state, addr, id);
        drop(state);

        info!("{:?} connected from {}", id, addr);
        self.events.send_event(NetEvent::PeerConnected(PeerConnectedData { peer: id, addr }));
        id
    }

    fn insert(state: &mut RegistryState, addr: SocketAddr, id: PeerId) {
        state.by_addr.insert(addr, PeerEntry {
            id,
            last_heartbeat: Instant::now(),
        });
        state.by_id.insert(id, addr);
    }

    /// Remove all registry entries for an address, raising the disconnected notification.
    ///  Returns false if the address is unknown.
    pub async fn remove_peer(&self, addr: SocketAddr) -> bool {
        let mut state = self.state.lock().await;
        let Some(entry) = state.by_addr.remove(&addr) else {
            return false;
        };
        state.by_id.remove(&entry.id);
        drop(state);

        info!("{:?} at {} disconnected", entry.id, addr);
        self.events.send_event(NetEvent::PeerDisconnected(PeerDisconnectedData { peer: entry.id, addr }));
        true
    }

    /// stamp the current time as the peer's last heartbeat; false if the address is unknown
    pub async fn update_heartbeat(&self, addr: SocketAddr) -> bool {
        match self.state.lock().await.by_addr.get_mut(&addr) {
            Some(entry) => {
                entry.last_heartbeat = Instant::now();
                true
            }
            None => false,
        }
    }

    /// every peer whose last heartbeat is older than `timeout` - detection only, the caller
    ///  decides whether and when to evict
    pub async fn timed_out_peers(&self, timeout: Duration) -> Vec<(PeerId, SocketAddr)> {
        let now = Instant::now();
        self.state.lock().await.by_addr.iter()
            .filter(|(_, entry)| now.duration_since(entry.last_heartbeat) > timeout)
            .map(|(addr, entry)| (entry.id, *addr))
            .collect()
    }

    pub async fn contains(&self, addr: SocketAddr) -> bool {
        self.state.lock().await.by_addr.contains_key(&addr)
    }

    pub async fn peer_id(&self, addr: SocketAddr) -> Option<PeerId> {
        self.state.lock().await.by_addr.get(&addr).map(|entry| entry.id)
    }

    pub async fn addr_of(&self, id: PeerId) -> Option<SocketAddr> {
        self.state.lock().await.by_id.get(&id).copied()
    }

    pub async fn peers(&self) -> Vec<(PeerId, SocketAddr)> {
        self.state.lock().await.by_addr.iter()
            .map(|(addr, entry)| (entry.id, *addr))
            .collect()
    }

    /// the id this endpoint was assigned by a remote handshake, if any
    pub async fn local_id(&self) -> Option<PeerId> {
        self.state.lock().await.local_id
    }

    pub async fn set_local_id(&self, id: PeerId) {
        self.state.lock().await.local_id = Some(id);
    }
}
