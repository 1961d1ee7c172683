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
#![warn(missing_docs)]

//! Host supervisor: wires every component together in dependency order,
//! owns the shutdown broadcast, and exposes the one entry point the
//! transport-agnostic parts of the host use to inject a new record.

use crate::config::NodeConfig;
use crate::core::codec::decode_payload;
use crate::core::reputation::ReputationManager;
use crate::core::security::keystore::{FileEd25519Backend, Keystore, KeystoreError};
use crate::core::types::{MarketDataRecord, MessageType, PeerInfo, Vote};
use crate::monitoring::metrics::{Metrics, MetricsError};
use crate::monitoring::server::{spawn_http_server, HealthStatus};
use crate::networking::authority::{AuthorityConfig, AuthorityService};
use crate::networking::discovery::{BootstrapDiscovery, DhtDiscovery, Discovery, LocalDiscovery};
use crate::networking::lifecycle::LifecycleManager;
use crate::networking::peer_store::PeerStore;
use crate::networking::pubsub;
use crate::networking::swarm::{spawn_swarm, AppEvent, SwarmConfig, SwarmError, SwarmHandle, TOPIC_PEER_DISCOVERY};
use crate::repository::{InMemoryRepository, Repository};
use crate::voting::engine::{VotingEngine, VotingEngineConfig};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Bound on any single startup or shutdown step.
const STEP_TIMEOUT: Duration = Duration::from_secs(10);
/// Cadence of the voting-session deadline sweep.
const VOTING_SWEEP_INTERVAL: Duration = Duration::from_secs(5);
/// Cadence of the reputation inactivity sweep.
const REPUTATION_INACTIVITY_INTERVAL: Duration = Duration::from_secs(3600);
/// Cadence of the reputation adaptive-threshold sweep.
const REPUTATION_TUNE_INTERVAL: Duration = Duration::from_secs(86_400);
/// Cadence of the authority lease sweep.
const AUTHORITY_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Fatal supervisor errors; any of these aborts startup.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Configuration failed validation.
    #[error("config: {0}")]
    Config(#[from] crate::config::ConfigError),
    /// The identity keystore could not be opened.
    #[error("keystore: {0}")]
    Keystore(#[from] KeystoreError),
    /// The swarm failed to start.
    #[error("swarm: {0}")]
    Swarm(#[from] SwarmError),
    /// Metrics registration failed.
    #[error("metrics: {0}")]
    Metrics(#[from] MetricsError),
    /// The peer store failed to hydrate from the repository.
    #[error("peer store hydration failed")]
    PeerStoreHydration,
    /// The monitoring HTTP listener failed to bind.
    #[error("monitoring server failed to bind")]
    MonitoringBind,
    /// A startup or shutdown step did not complete within its bound.
    #[error("step '{0}' timed out")]
    StepTimeout(&'static str),
    /// Broadcasting a record over the pub/sub plane failed.
    #[error("pubsub: {0}")]
    Pubsub(#[from] crate::networking::pubsub::PubsubError),
    /// Opening a voting session for a shared record failed.
    #[error("voting: {0}")]
    Voting(#[from] crate::voting::engine::VotingError),
}

fn version_info() -> String {
    format!(
        "{}-{}",
        option_env!("VERGEN_GIT_SHA").unwrap_or("unknown"),
        option_env!("VERGEN_CARGO_TARGET_TRIPLE").unwrap_or("unknown"),
    )
}

async fn bounded<F, T>(step: &'static str, fut: F) -> Result<T, SupervisorError>
where
    F: std::future::Future<Output = T>,
{
    match tokio::time::timeout(STEP_TIMEOUT, fut).await {
        Ok(v) => Ok(v),
        Err(_) => {
            warn!(step, "startup/shutdown step exceeded its time bound");
            Err(SupervisorError::StepTimeout(step))
        }
    }
}

/// Everything the host needs to run one node, wired in dependency order.
pub struct Supervisor {
    config: NodeConfig,
    keystore: Arc<Keystore<FileEd25519Backend>>,
    peer_store: Arc<PeerStore>,
    reputation: Arc<ReputationManager>,
    metrics: Arc<Metrics>,
    voting: Arc<VotingEngine>,
    authority: Arc<AuthorityService>,
    lifecycle: Arc<LifecycleManager>,
    swarm: SwarmHandle,
    bootstrap_discovery: Arc<BootstrapDiscovery>,
    dht_discovery: Arc<DhtDiscovery>,
    local_discovery: Arc<LocalDiscovery>,
    health: Arc<RwLock<HealthStatus>>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Supervisor {
    /// Construct every component in dependency order: keystore, peer store,
    /// transport/pub-sub, the message plane, the peer lifecycle manager,
    /// the reputation manager, the voting engine, and the authority
    /// service. Nothing is running yet; call [`Supervisor::run`] to start
    /// the background tasks.
    pub async fn bootstrap(config: NodeConfig) -> Result<Arc<Self>, SupervisorError> {
        config.validate()?;
        let now = Utc::now();

        let keystore_dir = std::path::Path::new(&config.security.key_file)
            .parent()
            .map(|p| p.to_string_lossy().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| config.data_dir.clone());
        let keystore = Arc::new(bounded("keystore", async { Keystore::open(&keystore_dir) }).await??);

        let repository: Arc<dyn Repository> = Arc::new(InMemoryRepository::new());
        let peer_store = Arc::new(PeerStore::new(repository.clone()));
        bounded("peer store hydration", peer_store.hydrate()).await?.map_err(|_| SupervisorError::PeerStoreHydration)?;

        let metrics = Arc::new(Metrics::new()?);

        let swarm_cfg = SwarmConfig {
            listen_addr: format!("/ip4/0.0.0.0/tcp/{}", config.p2p.port),
            data_dir: config.data_dir.clone(),
            bootstrap: config.p2p.bootstrap_peers.clone(),
            kad_namespace: "marketmesh".to_string(),
        };
        let (swarm, swarm_events, swarm_join) =
            bounded("transport & pub/sub", async { spawn_swarm(swarm_cfg, metrics.clone()) }).await??;

        let reputation = Arc::new(ReputationManager::new(config.security.min_reputation));

        let lifecycle = Arc::new(LifecycleManager::new(
            peer_store.clone(),
            reputation.clone(),
            metrics.clone(),
            config.p2p.min_peers,
            config.p2p.max_peers,
        ));

        let voting = Arc::new(VotingEngine::new(
            VotingEngineConfig {
                min_voters: config.p2p.min_voters,
                quorum: config.p2p.validation_quorum,
                voting_timeout: chrono::Duration::seconds(config.p2p.voting_timeout as i64),
            },
            reputation.clone(),
            metrics.clone(),
        ));

        let authority = Arc::new(AuthorityService::new(
            peer_store.clone(),
            swarm.clone(),
            metrics.clone(),
            AuthorityConfig { min_reputation: config.security.min_reputation, max_penalty: config.security.max_penalty },
        ));

        let bootstrap_discovery = Arc::new(BootstrapDiscovery::new(swarm.clone(), &config.p2p.bootstrap_peers));
        let dht_discovery = Arc::new(DhtDiscovery::new(swarm.clone(), "marketmesh".to_string()));
        let local_discovery = Arc::new(LocalDiscovery::new());

        let health = Arc::new(RwLock::new(HealthStatus::starting(now, version_info())));
        let (shutdown_tx, _) = broadcast::channel(8);

        let supervisor = Arc::new(Self {
            config,
            keystore,
            peer_store,
            reputation,
            metrics,
            voting,
            authority,
            lifecycle,
            swarm,
            bootstrap_discovery,
            dht_discovery,
            local_discovery,
            health,
            shutdown_tx,
            tasks: Mutex::new(vec![swarm_join]),
        });

        supervisor.run(swarm_events).await?;
        Ok(supervisor)
    }

    async fn run(self: &Arc<Self>, swarm_events: mpsc::Receiver<AppEvent>) -> Result<(), SupervisorError> {
        let mut tasks = self.tasks.lock().await;

        let addr: std::net::SocketAddr =
            self.config.http_addr.parse().map_err(|_| SupervisorError::MonitoringBind)?;
        let http_join = bounded("monitoring http server", spawn_http_server(addr, self.metrics.clone(), self.health.clone()))
            .await?
            .map_err(|_| SupervisorError::MonitoringBind)?;
        tasks.push(http_join);

        bounded("bootstrap discovery start", self.bootstrap_discovery.start()).await?;
        bounded("dht discovery start", self.dht_discovery.start()).await?;
        bounded("local discovery start", self.local_discovery.start()).await?;

        let me = self.clone();
        tasks.push(tokio::spawn(async move { me.run_message_plane(swarm_events, me.shutdown_tx.subscribe()).await }));

        let lifecycle = self.lifecycle.clone();
        let bootstrap_discovery = self.bootstrap_discovery.clone();
        let lifecycle_shutdown = self.shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            lifecycle
                .run(lifecycle_shutdown, move |shortfall| {
                    info!(shortfall, "below minPeers, nudging bootstrap discovery");
                    let bd = bootstrap_discovery.clone();
                    tokio::spawn(async move { bd.start().await });
                })
                .await
        }));

        let me = self.clone();
        let mut voting_shutdown = self.shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(VOTING_SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => me.voting.sweep_deadlines(Utc::now()).await,
                    _ = voting_shutdown.recv() => break,
                }
            }
        }));

        let reputation = self.reputation.clone();
        let metrics = self.metrics.clone();
        let mut reputation_shutdown = self.shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            let mut inactivity = tokio::time::interval(REPUTATION_INACTIVITY_INTERVAL);
            let mut tune = tokio::time::interval(REPUTATION_TUNE_INTERVAL);
            loop {
                tokio::select! {
                    _ = inactivity.tick() => {
                        reputation.sweep_inactivity(Utc::now());
                    }
                    _ = tune.tick() => {
                        if let Some(threshold) = reputation.adaptive_tune() {
                            metrics.reputation_min_threshold.set(threshold);
                        }
                    }
                    _ = reputation_shutdown.recv() => break,
                }
            }
        }));

        let authority = self.authority.clone();
        let mut authority_shutdown = self.shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(AUTHORITY_SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => { authority.sweep_expired(Utc::now()).await; }
                    _ = authority_shutdown.recv() => break,
                }
            }
        }));

        self.health.write().await.ready = true;
        info!(peer_id = %self.swarm.local_peer_id, "supervisor ready");
        Ok(())
    }

    async fn run_message_plane(
        self: Arc<Self>,
        mut swarm_events: mpsc::Receiver<AppEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                event = swarm_events.recv() => {
                    let Some(event) = event else { break };
                    self.handle_swarm_event(event).await;
                }
                _ = shutdown.recv() => break,
            }
        }
    }

    async fn handle_swarm_event(&self, event: AppEvent) {
        match event {
            AppEvent::GossipMessage { topic, data, .. } if topic == TOPIC_PEER_DISCOVERY => {
                self.handle_announcement(data).await;
            }
            AppEvent::GossipMessage { topic, data, .. } => {
                let Some(msg) = pubsub::verify_inbound(&self.peer_store, &self.metrics, &topic, data).await else {
                    return;
                };
                match msg.msg_type {
                    MessageType::Vote => {
                        if let Ok(vote) = decode_payload::<Vote>(&msg.data) {
                            if let Err(e) = self.voting.submit_vote(vote).await {
                                warn!(?e, "vote rejected");
                            }
                        }
                    }
                    MessageType::MarketData => {
                        if let Ok(record) = decode_payload::<MarketDataRecord>(&msg.data) {
                            if let Err(e) = self.voting.start_voting(record).await {
                                warn!(?e, "could not open voting session for received record");
                            }
                        }
                    }
                    _ => {}
                }
            }
            AppEvent::PeerDiscovered(peer_id, _addr) => {
                if self.local_discovery.note_announcement(peer_id, Utc::now()).await {
                    self.metrics.peers_discovered_total.inc();
                }
            }
            AppEvent::PeerConnected(peer_id) => {
                self.bootstrap_discovery.note_connected(peer_id).await;
                self.announce_self().await;
            }
            AppEvent::PeerDisconnected(peer_id) => {
                self.bootstrap_discovery.note_disconnected(&peer_id).await;
            }
            AppEvent::AuthorityRequest { peer, request, channel } => {
                self.authority.serve(peer, request, channel).await;
            }
        }
    }

    /// Verify a `PeerDiscovery` announcement against its own embedded key
    /// and register the sender, since it can't yet be looked up in the
    /// peer store the way [`pubsub::verify_inbound`] requires.
    async fn handle_announcement(&self, data: Vec<u8>) {
        let Some(info) = pubsub::verify_announcement(&self.metrics, data).await else {
            return;
        };
        let peer_id = info.peer_id.clone();
        if let Err(e) =
            self.peer_store.register_announced(info.peer_id, info.address, info.public_key, info.alg).await
        {
            warn!(?e, peer_id, "failed to register announced peer");
            return;
        }
        self.metrics.peers_discovered_total.inc();
    }

    /// Broadcast a self-signed announcement of this node's own identity, so
    /// newly connected peers can register it in their peer store without
    /// needing to be pre-seeded.
    async fn announce_self(&self) {
        let info = PeerInfo {
            peer_id: self.swarm.local_peer_id.to_string(),
            address: format!("/ip4/0.0.0.0/tcp/{}", self.config.p2p.port),
            public_key: self.keystore.public_key().to_vec(),
            alg: crate::core::types::SigAlg::Ed25519,
        };
        if let Err(e) = pubsub::publish(
            &self.swarm,
            &self.keystore,
            &self.swarm.local_peer_id.to_string(),
            TOPIC_PEER_DISCOVERY,
            MessageType::PeerDiscovery,
            &info,
        )
        .await
        {
            warn!(?e, "failed to broadcast self announcement");
        }
    }

    /// Entry point for injecting a new record into the network: sign and
    /// broadcast it, and open a local voting session so this node's own
    /// cooperative-validation outcome can be observed.
    pub async fn share_data(
        &self,
        record: MarketDataRecord,
    ) -> Result<tokio::sync::oneshot::Receiver<crate::voting::session::VoteResult>, SupervisorError> {
        pubsub::publish(
            &self.swarm,
            &self.keystore,
            &self.swarm.local_peer_id.to_string(),
            crate::networking::swarm::TOPIC_MARKET_DATA,
            MessageType::MarketData,
            &record,
        )
        .await?;

        Ok(self.voting.start_voting(record).await?)
    }

    /// Whether startup has completed and the supervisor has not recorded a
    /// fatal error since.
    pub async fn is_running(&self) -> bool {
        self.health.read().await.ready
    }

    /// Snapshot of the current `/healthz` status.
    pub async fn status(&self) -> HealthStatus {
        self.health.read().await.clone()
    }

    /// Stop every background task in reverse startup order, broadcasting
    /// the shutdown signal first so long-lived loops exit on their own.
    pub async fn shutdown(&self) {
        info!("supervisor shutting down");
        self.health.write().await.ready = false;
        let _ = self.shutdown_tx.send(());

        self.bootstrap_discovery.stop().await;
        self.dht_discovery.stop().await;
        self.local_discovery.stop().await;

        let mut tasks = self.tasks.lock().await;
        while let Some(task) = tasks.pop() {
            if bounded("task shutdown", task).await.is_err() {
                warn!("a background task did not exit within its shutdown bound");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bootstrap_brings_up_a_ready_node_on_an_ephemeral_port() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = NodeConfig::default();
        config.data_dir = dir.path().to_str().unwrap().to_string();
        config.security.key_file = dir.path().join("identity.key").to_str().unwrap().to_string();
        config.http_addr = "127.0.0.1:0".to_string();
        config.p2p.port = 0;

        let supervisor = Supervisor::bootstrap(config).await.unwrap();
        assert!(supervisor.is_running().await);
        supervisor.shutdown().await;
    }
}
