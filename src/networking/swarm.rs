// Copyright (c) 2026 Marketmesh
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

//! The libp2p swarm: transport, gossipsub, identify, ping, Kademlia, mDNS,
//! and the `/authority/1.0.0` request-response protocol, all driven by one
//! event loop. Application components never touch the swarm directly; they
//! talk to a [`SwarmHandle`] and read [`AppEvent`]s.

use crate::core::types::MessageType;
use crate::monitoring::metrics::Metrics;
use futures::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use libp2p::{
    core::upgrade,
    futures::StreamExt,
    gossipsub::{self, IdentTopic, MessageAuthenticity},
    identify, identity, kad, mdns, noise,
    request_response::{self, OutboundRequestId, ResponseChannel},
    swarm::{NetworkBehaviour, Swarm, SwarmEvent},
    tcp, yamux, Multiaddr, PeerId, Transport,
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::Path, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

/// Errors that prevent the swarm from starting.
#[derive(Debug, Error)]
pub enum SwarmError {
    /// Could not create the identity data directory.
    #[error("io")]
    Io,
    /// Listen or bootstrap address failed to parse or bind.
    #[error("bad address")]
    Address,
    /// Transport or behaviour construction failed.
    #[error("transport setup")]
    Transport,
}

/// Startup configuration for [`spawn_swarm`].
#[derive(Clone, Debug)]
pub struct SwarmConfig {
    /// Multiaddr to listen on, e.g. `/ip4/0.0.0.0/tcp/9000`.
    pub listen_addr: String,
    /// Directory holding the persistent identity keypair.
    pub data_dir: String,
    /// Bootstrap peer multiaddrs dialed at startup.
    pub bootstrap: Vec<String>,
    /// Kademlia namespace (content-identifier prefix) for provider records.
    pub kad_namespace: String,
}

/// Authority protocol request, carried as the JSON payload of a
/// [`MessageType::ValidationRequest`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthorityRequest(pub Vec<u8>);

/// Authority protocol response, carrying an encoded `ValidationResponse` or
/// `ErrorPayload` envelope.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthorityResponse(pub Vec<u8>);

const MAX_AUTHORITY_FRAME: usize = 16 * 1024 * 1024;

async fn read_length_prefixed<T: AsyncRead + Unpin + Send>(
    io: &mut T,
    max_len: usize,
) -> std::io::Result<Vec<u8>> {
    let mut len_bytes = [0u8; 4];
    io.read_exact(&mut len_bytes).await?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > max_len {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "frame too large"));
    }
    let mut buf = vec![0u8; len];
    io.read_exact(&mut buf).await?;
    Ok(buf)
}

async fn write_length_prefixed<T: AsyncWrite + Unpin + Send>(
    io: &mut T,
    data: &[u8],
) -> std::io::Result<()> {
    io.write_all(&(data.len() as u32).to_be_bytes()).await?;
    io.write_all(data).await?;
    io.flush().await
}

/// `request_response::Codec` for `/authority/1.0.0`: length-prefixed JSON.
#[derive(Clone, Debug, Default)]
pub struct AuthorityCodec;

#[async_trait::async_trait]
impl request_response::Codec for AuthorityCodec {
    type Protocol = String;
    type Request = AuthorityRequest;
    type Response = AuthorityResponse;

    async fn read_request<T: AsyncRead + Unpin + Send>(
        &mut self,
        _: &Self::Protocol,
        io: &mut T,
    ) -> std::io::Result<Self::Request> {
        Ok(AuthorityRequest(read_length_prefixed(io, MAX_AUTHORITY_FRAME).await?))
    }

    async fn read_response<T: AsyncRead + Unpin + Send>(
        &mut self,
        _: &Self::Protocol,
        io: &mut T,
    ) -> std::io::Result<Self::Response> {
        Ok(AuthorityResponse(read_length_prefixed(io, MAX_AUTHORITY_FRAME).await?))
    }

    async fn write_request<T: AsyncWrite + Unpin + Send>(
        &mut self,
        _: &Self::Protocol,
        io: &mut T,
        req: Self::Request,
    ) -> std::io::Result<()> {
        write_length_prefixed(io, &req.0).await
    }

    async fn write_response<T: AsyncWrite + Unpin + Send>(
        &mut self,
        _: &Self::Protocol,
        io: &mut T,
        res: Self::Response,
    ) -> std::io::Result<()> {
        write_length_prefixed(io, &res.0).await
    }
}

#[derive(Debug)]
enum InnerEvent {
    Gossipsub(gossipsub::Event),
    Identify(identify::Event),
    Ping(ping_event_placeholder::Event),
    Kad(kad::Event),
    Mdns(mdns::Event),
    Authority(request_response::Event<AuthorityRequest, AuthorityResponse>),
}

// `libp2p::ping::Event` re-exported under a local name to keep the `From`
// impls below readable without repeating `libp2p::ping::Event` everywhere.
mod ping_event_placeholder {
    pub use libp2p::ping::Event;
}

impl From<gossipsub::Event> for InnerEvent {
    fn from(e: gossipsub::Event) -> Self {
        Self::Gossipsub(e)
    }
}
impl From<identify::Event> for InnerEvent {
    fn from(e: identify::Event) -> Self {
        Self::Identify(e)
    }
}
impl From<libp2p::ping::Event> for InnerEvent {
    fn from(e: libp2p::ping::Event) -> Self {
        Self::Ping(e)
    }
}
impl From<kad::Event> for InnerEvent {
    fn from(e: kad::Event) -> Self {
        Self::Kad(e)
    }
}
impl From<mdns::Event> for InnerEvent {
    fn from(e: mdns::Event) -> Self {
        Self::Mdns(e)
    }
}
impl From<request_response::Event<AuthorityRequest, AuthorityResponse>> for InnerEvent {
    fn from(e: request_response::Event<AuthorityRequest, AuthorityResponse>) -> Self {
        Self::Authority(e)
    }
}

#[derive(NetworkBehaviour)]
#[behaviour(to_swarm = "InnerEvent")]
struct Behaviour {
    gossipsub: gossipsub::Behaviour,
    identify: identify::Behaviour,
    ping: libp2p::ping::Behaviour,
    kad: kad::Behaviour<kad::store::MemoryStore>,
    mdns: mdns::tokio::Behaviour,
    authority: request_response::Behaviour<AuthorityCodec>,
}

/// Commands accepted by the running swarm task.
pub enum SwarmCommand {
    /// Publish raw bytes on a gossipsub topic.
    Publish { topic: String, data: Vec<u8> },
    /// Dial an authority peer with a request, awaiting the matching response.
    AuthorityRequest { peer: PeerId, request: AuthorityRequest, reply: oneshot::Sender<Option<AuthorityResponse>> },
    /// Answer a previously received authority request.
    AuthorityRespond { channel: ResponseChannel<AuthorityResponse>, response: AuthorityResponse },
    /// Announce this node as a provider for a Kademlia record key.
    StartProviding { key: Vec<u8> },
    /// Look up providers for a Kademlia record key.
    GetProviders { key: Vec<u8>, reply: oneshot::Sender<Vec<PeerId>> },
    /// Dial an explicit multiaddr (bootstrap retry, manual connect).
    Dial(Multiaddr),
}

/// Application-facing events surfaced out of the swarm event loop.
#[derive(Debug)]
pub enum AppEvent {
    /// A gossipsub message arrived on `topic`.
    GossipMessage { topic: String, source: Option<PeerId>, data: Vec<u8> },
    /// A connection was established.
    PeerConnected(PeerId),
    /// A connection closed.
    PeerDisconnected(PeerId),
    /// mDNS discovered a peer at `addr`.
    PeerDiscovered(PeerId, Multiaddr),
    /// An inbound authority request; answer via `SwarmCommand::AuthorityRespond`.
    AuthorityRequest { peer: PeerId, request: AuthorityRequest, channel: ResponseChannel<AuthorityResponse> },
}

/// Handle used by application components to drive the swarm.
#[derive(Clone)]
pub struct SwarmHandle {
    commands: mpsc::Sender<SwarmCommand>,
    pub local_peer_id: PeerId,
}

impl SwarmHandle {
    /// Build a handle backed by a fresh, unconsumed command channel, for
    /// unit tests of components that hold a `SwarmHandle` but don't need a
    /// live swarm behind it.
    #[cfg(test)]
    pub(crate) fn new_for_test(local_peer_id: PeerId) -> (Self, mpsc::Receiver<SwarmCommand>) {
        let (tx, rx) = mpsc::channel(8);
        (Self { commands: tx, local_peer_id }, rx)
    }

    /// Publish `data` (already envelope-encoded) on `topic`.
    pub async fn publish(&self, topic: &str, data: Vec<u8>) {
        let _ = self.commands.send(SwarmCommand::Publish { topic: topic.to_string(), data }).await;
    }

    /// Send an authority request to `peer`, waiting for its response or
    /// `None` if the peer never replies (dial failure, timeout upstream).
    pub async fn authority_request(&self, peer: PeerId, request: AuthorityRequest) -> Option<AuthorityResponse> {
        let (tx, rx) = oneshot::channel();
        let _ = self.commands.send(SwarmCommand::AuthorityRequest { peer, request, reply: tx }).await;
        rx.await.ok().flatten()
    }

    /// Answer an inbound authority request.
    pub async fn authority_respond(&self, channel: ResponseChannel<AuthorityResponse>, response: AuthorityResponse) {
        let _ = self.commands.send(SwarmCommand::AuthorityRespond { channel, response }).await;
    }

    /// Advertise this node under `key` in the DHT.
    pub async fn start_providing(&self, key: Vec<u8>) {
        let _ = self.commands.send(SwarmCommand::StartProviding { key }).await;
    }

    /// Query the DHT for providers of `key`.
    pub async fn get_providers(&self, key: Vec<u8>) -> Vec<PeerId> {
        let (tx, rx) = oneshot::channel();
        let _ = self.commands.send(SwarmCommand::GetProviders { key, reply: tx }).await;
        rx.await.unwrap_or_default()
    }

    /// Dial an explicit address.
    pub async fn dial(&self, addr: Multiaddr) {
        let _ = self.commands.send(SwarmCommand::Dial(addr)).await;
    }
}

/// Topic tag for [`MessageType::MarketData`] broadcast.
pub const TOPIC_MARKET_DATA: &str = "market-data";
/// Topic tag for vote requests and votes.
pub const TOPIC_VALIDATION: &str = "validation";
/// Topic tag for peer announcements.
pub const TOPIC_PEER_DISCOVERY: &str = "peer-discovery";

fn ensure_dir(path: &str) -> Result<(), SwarmError> {
    let p = Path::new(path);
    if !p.exists() {
        std::fs::create_dir_all(p).map_err(|_| SwarmError::Io)?;
    }
    Ok(())
}

/// Build the transport, behaviours, and event loop, returning a handle plus
/// the application event stream. The returned `JoinHandle` runs until the
/// command channel is dropped or a fatal transport error occurs.
pub fn spawn_swarm(
    cfg: SwarmConfig,
    metrics: Arc<Metrics>,
) -> Result<(SwarmHandle, mpsc::Receiver<AppEvent>, tokio::task::JoinHandle<()>), SwarmError> {
    ensure_dir(&cfg.data_dir)?;
    let (local_peer_id, keypair) =
        super::p2p_identity::load_or_create_identity(&cfg.data_dir).map_err(|_| SwarmError::Io)?;

    let (cmd_tx, mut cmd_rx) = mpsc::channel::<SwarmCommand>(1024);
    let (ev_tx, ev_rx) = mpsc::channel::<AppEvent>(1024);

    let handle = SwarmHandle { commands: cmd_tx, local_peer_id };

    let join = tokio::spawn(async move {
        if let Err(e) = run(cfg, keypair, local_peer_id, metrics, &mut cmd_rx, ev_tx).await {
            warn!(?e, "swarm loop exited");
        }
    });

    Ok((handle, ev_rx, join))
}

async fn run(
    cfg: SwarmConfig,
    keypair: identity::Keypair,
    local_peer_id: PeerId,
    metrics: Arc<Metrics>,
    cmd_rx: &mut mpsc::Receiver<SwarmCommand>,
    ev_tx: mpsc::Sender<AppEvent>,
) -> Result<(), SwarmError> {
    let noise_keys = noise::Config::new(&keypair).map_err(|_| SwarmError::Transport)?;
    let transport = tcp::tokio::Transport::new(tcp::Config::default().nodelay(true))
        .upgrade(upgrade::Version::V1)
        .authenticate(noise_keys)
        .multiplex(yamux::Config::default())
        .boxed();

    let gcfg = gossipsub::ConfigBuilder::default()
        .validation_mode(gossipsub::ValidationMode::Strict)
        .heartbeat_interval(Duration::from_secs(1))
        .build()
        .map_err(|_| SwarmError::Transport)?;
    let mut gossipsub = gossipsub::Behaviour::new(MessageAuthenticity::Signed(keypair.clone()), gcfg)
        .map_err(|_| SwarmError::Transport)?;
    for topic in [TOPIC_MARKET_DATA, TOPIC_VALIDATION, TOPIC_PEER_DISCOVERY] {
        if let Err(e) = gossipsub.subscribe(&IdentTopic::new(topic)) {
            warn!(?e, topic, "gossipsub subscribe failed");
        }
    }

    let identify = identify::Behaviour::new(identify::Config::new("marketmesh/1.0.0".to_string(), keypair.public()));
    let ping = libp2p::ping::Behaviour::new(
        libp2p::ping::Config::new().with_interval(Duration::from_secs(10)).with_timeout(Duration::from_secs(20)),
    );
    let mut kad = kad::Behaviour::new(local_peer_id, kad::store::MemoryStore::new(local_peer_id));
    kad.set_mode(Some(kad::Mode::Server));
    let mdns = mdns::tokio::Behaviour::new(mdns::Config::default(), local_peer_id).map_err(|_| SwarmError::Transport)?;
    let authority = request_response::Behaviour::new(
        [("/authority/1.0.0".to_string(), request_response::ProtocolSupport::Full)],
        request_response::Config::default(),
    );

    let behaviour = Behaviour { gossipsub, identify, ping, kad, mdns, authority };
    let mut swarm = Swarm::new(transport, behaviour, local_peer_id, libp2p::swarm::Config::with_tokio_executor());

    let listen: Multiaddr = cfg.listen_addr.parse().map_err(|_| SwarmError::Address)?;
    swarm.listen_on(listen).map_err(|_| SwarmError::Address)?;

    for addr in cfg.bootstrap.iter().filter(|s| !s.is_empty()) {
        match addr.parse::<Multiaddr>() {
            Ok(ma) => {
                if let Err(e) = swarm.dial(ma) {
                    warn!(boot = %addr, ?e, "bootstrap dial failed");
                }
            }
            Err(_) => warn!(boot = %addr, "bad bootstrap multiaddr"),
        }
    }

    info!(%local_peer_id, addr = %cfg.listen_addr, "swarm started");
    metrics.peer_count.set(0);

    let mut pending_authority: HashMap<OutboundRequestId, oneshot::Sender<Option<AuthorityResponse>>> = HashMap::new();
    let mut pending_providers: HashMap<kad::QueryId, oneshot::Sender<Vec<PeerId>>> = HashMap::new();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    None => break,
                    Some(SwarmCommand::Publish { topic, data }) => {
                        if let Err(e) = swarm.behaviour_mut().gossipsub.publish(IdentTopic::new(topic), data) {
                            warn!(?e, "gossipsub publish failed");
                            metrics.pubsub_publish_errors.inc();
                        }
                    }
                    Some(SwarmCommand::AuthorityRequest { peer, request, reply }) => {
                        let id = swarm.behaviour_mut().authority.send_request(&peer, request);
                        pending_authority.insert(id, reply);
                    }
                    Some(SwarmCommand::AuthorityRespond { channel, response }) => {
                        let _ = swarm.behaviour_mut().authority.send_response(channel, response);
                    }
                    Some(SwarmCommand::StartProviding { key }) => {
                        let _ = swarm.behaviour_mut().kad.start_providing(kad::RecordKey::new(&key));
                    }
                    Some(SwarmCommand::GetProviders { key, reply }) => {
                        let qid = swarm.behaviour_mut().kad.get_providers(kad::RecordKey::new(&key));
                        pending_providers.insert(qid, reply);
                    }
                    Some(SwarmCommand::Dial(addr)) => {
                        if let Err(e) = swarm.dial(addr) {
                            warn!(?e, "manual dial failed");
                        }
                    }
                }
            }

            ev = swarm.select_next_some() => {
                match ev {
                    SwarmEvent::NewListenAddr { address, .. } => info!(%address, "listening"),
                    SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                        metrics.peer_count.inc();
                        let _ = ev_tx.send(AppEvent::PeerConnected(peer_id)).await;
                    }
                    SwarmEvent::ConnectionClosed { peer_id, .. } => {
                        metrics.peer_count.dec();
                        let _ = ev_tx.send(AppEvent::PeerDisconnected(peer_id)).await;
                    }
                    SwarmEvent::Behaviour(InnerEvent::Gossipsub(gossipsub::Event::Message { propagation_source, message, .. })) => {
                        let topic = message.topic.into_string();
                        let _ = ev_tx
                            .send(AppEvent::GossipMessage { topic, source: Some(propagation_source), data: message.data })
                            .await;
                    }
                    SwarmEvent::Behaviour(InnerEvent::Mdns(mdns::Event::Discovered(list))) => {
                        for (peer_id, addr) in list {
                            let _ = swarm.dial(addr.clone());
                            let _ = ev_tx.send(AppEvent::PeerDiscovered(peer_id, addr)).await;
                        }
                    }
                    SwarmEvent::Behaviour(InnerEvent::Kad(kad::Event::OutboundQueryProgressed {
                        id,
                        result: kad::QueryResult::GetProviders(Ok(kad::GetProvidersOk::FoundProviders { providers, .. })),
                        ..
                    })) => {
                        if let Some(reply) = pending_providers.remove(&id) {
                            let _ = reply.send(providers.into_iter().collect());
                        }
                    }
                    SwarmEvent::Behaviour(InnerEvent::Authority(request_response::Event::Message { peer, message })) => {
                        match message {
                            request_response::Message::Request { request, channel, .. } => {
                                let _ = ev_tx.send(AppEvent::AuthorityRequest { peer, request, channel }).await;
                            }
                            request_response::Message::Response { request_id, response } => {
                                if let Some(reply) = pending_authority.remove(&request_id) {
                                    let _ = reply.send(Some(response));
                                }
                            }
                        }
                    }
                    SwarmEvent::Behaviour(InnerEvent::Authority(request_response::Event::OutboundFailure { request_id, .. })) => {
                        if let Some(reply) = pending_authority.remove(&request_id) {
                            let _ = reply.send(None);
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    Ok(())
}

/// Resolve a wire topic string to the [`MessageType`]s expected on it, used
/// by the pub/sub dispatch worker to route decoded envelopes.
pub fn expected_types_for_topic(topic: &str) -> &'static [MessageType] {
    match topic {
        TOPIC_MARKET_DATA => &[MessageType::MarketData],
        TOPIC_VALIDATION => &[MessageType::Vote, MessageType::ValidationRequest, MessageType::ValidationResult],
        TOPIC_PEER_DISCOVERY => &[MessageType::PeerDiscovery],
        _ => &[],
    }
}
