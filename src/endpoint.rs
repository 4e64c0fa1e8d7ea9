use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::anyhow;
use bytes::BytesMut;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, warn};

use crate::config::NetConfig;
use crate::control::Handshake;
use crate::dispatch::{DispatchEngine, MessageHandler};
use crate::events::{NetEvent, NetEventNotifier};
use crate::reliability::ReliabilityManager;
use crate::send_pipeline::SendPipeline;
use crate::session::{PeerId, SessionRegistry};
use crate::transport::{Transport, UdpTransport};
use crate::wire::codec::WireCodec;
use crate::wire::crypto::AesGcmCrypto;
use crate::wire::message_kind::MessageKind;

/// One messaging endpoint: a bound datagram socket plus the reliability, session and dispatch
///  machinery around it. All collaborators are constructed here and passed down explicitly -
///  there is no process-global state, and two endpoints in one process stay fully independent
///  (which is also how the tests run a server and a client side by side).
///
/// Background work is limited to the socket receive task, the retry sweep and the liveness
///  tick; decoded messages reach application handlers only from [Endpoint::tick], on the
///  caller's task.
pub struct Endpoint {
    transport: Arc<UdpTransport>,
    pipeline: Arc<SendPipeline>,
    reliability: Arc<ReliabilityManager>,
    sessions: Arc<SessionRegistry>,
    dispatch: Arc<DispatchEngine>,
    events: Arc<NetEventNotifier>,
    retry_task: JoinHandle<()>,
    liveness_task: JoinHandle<()>,
}

impl Endpoint {
    pub async fn bind(config: NetConfig) -> anyhow::Result<Endpoint> {
        config.validate()?;
        let config = Arc::new(config);

        let events = Arc::new(NetEventNotifier::new());
        let transport = Arc::new(UdpTransport::bind(config.bind_addr, config.max_datagram_size).await?);
        let codec = Arc::new(WireCodec::new(
            Arc::new(AesGcmCrypto::from_secret(&config.shared_secret)),
            config.critical_kinds.clone(),
        ));
        let reliability = Arc::new(ReliabilityManager::new(config.clone()));
        let sessions = Arc::new(SessionRegistry::new(events.clone()));
        let pipeline = Arc::new(SendPipeline::new(codec.clone(), reliability.clone(), transport.clone()));
        let dispatch = Arc::new(DispatchEngine::new(codec, pipeline.clone(), reliability.clone(), sessions.clone()));

        let retry_task = tokio::spawn(Self::retry_loop(
            config.clone(),
            reliability.clone(),
            transport.clone(),
            events.clone(),
        ));
        let liveness_task = tokio::spawn(Self::liveness_loop(
            config,
            sessions.clone(),
            reliability.clone(),
            pipeline.clone(),
        ));

        Ok(Endpoint {
            transport,
            pipeline,
            reliability,
            sessions,
            dispatch,
            events,
            retry_task,
            liveness_task,
        })
    }

    /// periodic retry sweep: retransmit overdue important messages, surface abandoned ones
    async fn retry_loop(
        config: Arc<NetConfig>,
        reliability: Arc<ReliabilityManager>,
        transport: Arc<UdpTransport>,
        events: Arc<NetEventNotifier>,
    ) {
        let mut ticker = interval(config.sweep_interval);
        loop {
            ticker.tick().await;

            let outcome = reliability.sweep().await;
            for (to, frame) in outcome.resend {
                transport.send(to, &frame).await;
            }
            for abandoned in outcome.abandoned {
                events.send_event(NetEvent::DeliveryAbandoned(abandoned));
            }
        }
    }

    /// periodic heartbeats to every registered peer, and eviction of peers that went silent
    async fn liveness_loop(
        config: Arc<NetConfig>,
        sessions: Arc<SessionRegistry>,
        reliability: Arc<ReliabilityManager>,
        pipeline: Arc<SendPipeline>,
    ) {
        let mut ticker = interval(config.heartbeat_interval);
        loop {
            ticker.tick().await;

            for (_, addr) in sessions.peers().await {
                if let Err(e) = pipeline.send_to(addr, MessageKind::HEARTBEAT, &[], false).await {
                    warn!("error sending heartbeat to {}: {}", addr, e);
                }
            }

            for (id, addr) in sessions.timed_out_peers(config.peer_timeout).await {
                warn!("{:?} at {} exceeded the heartbeat timeout - evicting", id, addr);
                reliability.drop_peer(addr).await;
                sessions.remove_peer(addr).await;
            }
        }
    }

    pub async fn register_handler(&self, kind: MessageKind, handler: Arc<dyn MessageHandler>) -> anyhow::Result<()> {
        self.dispatch.register_handler(kind, handler).await
    }

    /// Join a remote endpoint: sends an important handshake request, so joining rides on the
    ///  regular retry machinery until the remote acknowledges. The assigned id and roster
    ///  arrive with the accept and are visible via [Endpoint::local_peer_id] /
    ///  [Endpoint::peers] after subsequent ticks.
    pub async fn connect(&self, remote: SocketAddr) -> anyhow::Result<()> {
        debug!("connecting to {}", remote);
        let mut body = BytesMut::new();
        Handshake::Request.ser(&mut body);
        self.pipeline.send_to(remote, MessageKind::HANDSHAKE, &body, true).await
    }

    pub async fn send_to(&self, to: SocketAddr, kind: MessageKind, body: &[u8], important: bool) -> anyhow::Result<()> {
        if kind.is_control() {
            return Err(anyhow!("cannot send reserved control kind {:?} directly", kind));
        }
        self.pipeline.send_to(to, kind, body, important).await
    }

    pub async fn broadcast(&self, kind: MessageKind, body: &[u8], important: bool) -> anyhow::Result<()> {
        if kind.is_control() {
            return Err(anyhow!("cannot send reserved control kind {:?} directly", kind));
        }
        let targets = self.sessions.peers().await.into_iter()
            .map(|(_, addr)| addr)
            .collect::<Vec<_>>();
        self.pipeline.send_to_all(&targets, kind, body, important).await
    }

    /// Drain the receive queue and dispatch every queued datagram. This is the only place
    ///  handler callbacks run, so however many sends race in from elsewhere, handlers execute
    ///  on the single task driving the tick.
    pub async fn tick(&self) {
        while let Some((datagram, from)) = self.transport.poll_datagram().await {
            self.dispatch.dispatch(&datagram, from).await;
        }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<NetEvent> {
        self.events.subscribe()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    /// the id assigned by the remote side's handshake accept, once connected
    pub async fn local_peer_id(&self) -> Option<PeerId> {
        self.sessions.local_id().await
    }

    pub async fn peers(&self) -> Vec<(PeerId, SocketAddr)> {
        self.sessions.peers().await
    }

    pub async fn pending_deliveries(&self) -> usize {
        self.reliability.pending_count().await
    }

    /// explicit disconnect: drops the peer's reliability state and raises the disconnected
    ///  notification; false if the address is unknown
    pub async fn disconnect_peer(&self, addr: SocketAddr) -> bool {
        self.reliability.drop_peer(addr).await;
        self.sessions.remove_peer(addr).await
    }

    /// Stop the background tasks and the receive loop. Pending important messages are
    ///  abandoned without further notification; peers time out on the remote side.
    pub fn shutdown(&self) {
        self.retry_task.abort();
        self.liveness_task.abort();
        self.transport.shutdown();
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.shutdown();
    }
}
