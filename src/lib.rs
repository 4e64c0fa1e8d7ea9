//! A reliable messaging layer over plain UDP, built for synchronizing authoritative state
//!  between a server and its remote peers in real time: small, frequent, mostly idempotent
//!  messages (positions, inputs, console lines) rather than bulk transfer.
//!
//! ## What it provides on top of the datagram socket
//!
//! * fixed-layout framing with a header checksum verified before any other field is trusted,
//!   and a body digest over the transmitted bytes
//! * per-kind sequence numbering, acknowledgment-driven redelivery for messages marked
//!   *important*, and per-(peer, kind) duplicate suppression so redelivery stays idempotent
//! * optional body encryption for message kinds marked *critical*, independent of importance
//! * a session registry mapping peer addresses to stable ids, with heartbeat-based liveness
//!   and timeout eviction
//! * handler-table dispatch that acknowledges before invoking the handler, so slow handlers
//!   cannot suppress delivery confirmation
//!
//! Explicitly *not* provided: congestion control, stream multiplexing, message fragmentation,
//!  or any ordering guarantee beyond what sequence-number deduplication gives - a message that
//!  is delivered is delivered once, but delivery itself is only guaranteed for important
//!  messages up to the retry ceiling.
//!
//! ## Header
//!
//! All numbers in network byte order (BE):
//!
//! ```ascii
//! 0:  message kind: i32 - negative values are reserved for control messages
//!     (-1 acknowledgment, -2 heartbeat, -3 handshake)
//! 4:  sequence number: u32, monotonically increasing per kind
//! 8:  importance flag: u8 - 1 requests acknowledgment and redelivery
//! 9:  header checksum: u16 - CRC-16 over the header with both checksum fields zeroed
//! 11: body checksum: u32 - truncated SHA-256 over the body as transmitted
//! ```
//!
//! The body follows immediately; its length is the datagram length minus the header size.
//!  Critical bodies are encrypted (AES-256-GCM, random nonce transmitted in front of the
//!  ciphertext) before the checksums are computed, so tampering is detected without
//!  decrypting.
//!
//! ## Threading
//!
//! One background task receives datagrams into a queue; [endpoint::Endpoint::tick] drains it
//!  and is the only place application handlers run. A second background task sweeps pending
//!  important messages for retransmission, a third exchanges heartbeats and evicts silent
//!  peers. Shared state sits behind coarse per-collection locks - update rates are tens of
//!  messages per second per peer, not thousands.

pub mod config;
pub mod control;
pub mod dispatch;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod reliability;
pub mod send_pipeline;
pub mod session;
pub mod transport;
pub mod wire;
