use std::net::SocketAddr;
use std::time::Duration;

use anyhow::bail;
use rustc_hash::FxHashSet;

use crate::wire::header::FrameHeader;
use crate::wire::message_kind::MessageKind;

#[derive(Debug, Clone)]
pub struct NetConfig {
    pub bind_addr: SocketAddr,

    /// Secret shared by all endpoints, used to derive the key for critical message bodies.
    ///  This is symmetric 'keep casual eavesdroppers out' protection for a trusted peer group,
    ///  not a substitute for per-peer key exchange.
    pub shared_secret: Vec<u8>,

    /// Message kinds whose bodies are encrypted on the wire. Both sides must agree on this
    ///  set since criticality is not carried in the header.
    pub critical_kinds: FxHashSet<MessageKind>,

    /// Size of the receive buffer and the implied upper bound for outbound frames. Datagrams
    ///  larger than this are truncated by the socket and fail checksum verification.
    pub max_datagram_size: usize,

    /// how long an unacknowledged important message waits before it is retransmitted
    pub resend_interval: Duration,
    /// how often the retry sweep scans the pending set
    pub sweep_interval: Duration,
    /// retransmissions per important message before delivery is abandoned
    pub max_retries: u32,

    /// Upper bound for each per-(peer, kind) recently-seen sequence number set. The set is
    ///  cleared wholesale when it grows past this, trading exactness for bounded memory.
    pub recently_seen_cap: usize,

    pub heartbeat_interval: Duration,
    /// a peer whose last heartbeat is older than this is evicted
    pub peer_timeout: Duration,
}

impl NetConfig {
    pub fn new(bind_addr: SocketAddr) -> NetConfig {
        NetConfig {
            bind_addr,
            shared_secret: b"no secret".to_vec(),
            critical_kinds: FxHashSet::default(),
            max_datagram_size: 1472,
            resend_interval: Duration::from_secs(1),
            sweep_interval: Duration::from_millis(100),
            max_retries: 5,
            recently_seen_cap: 10_000,
            heartbeat_interval: Duration::from_secs(5),
            peer_timeout: Duration::from_secs(30),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_datagram_size < FrameHeader::SERIALIZED_LEN + 64 {
            bail!("max datagram size is too small");
        }
        if self.peer_timeout <= self.heartbeat_interval {
            bail!("peer timeout must exceed the heartbeat interval");
        }
        if !self.critical_kinds.is_empty() && self.shared_secret.is_empty() {
            bail!("critical message kinds are configured but the shared secret is empty");
        }
        Ok(())
    }
}
