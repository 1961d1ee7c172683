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

//! Peer lifecycle manager: connectivity bounds, the periodic connection
//! check, and the health predicate that drives pruning.

use super::peer_store::PeerStore;
use crate::core::reputation::ReputationManager;
use crate::core::types::{Peer, PeerStatus};
use crate::monitoring::metrics::Metrics;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Minimum connected-peer count before discovery is invoked for more.
pub const MIN_PEERS: usize = 5;
/// Maximum connected-peer count before the pruning pass kicks in.
pub const MAX_PEERS: usize = 50;
/// How often the connection-check loop runs.
pub const CONNECTION_CHECK_INTERVAL: Duration = Duration::from_secs(30);
/// Age past which a peer's last activity marks it unhealthy.
pub const PEER_TIMEOUT: ChronoDuration = ChronoDuration::seconds(30);

/// `true` when `peer` should be disconnected on the next pruning pass.
pub fn is_unhealthy(peer: &Peer, min_reputation: f64, now: DateTime<Utc>) -> bool {
    peer.status != PeerStatus::Active
        || now - peer.last_seen > PEER_TIMEOUT
        || peer.reputation < min_reputation
}

/// Choose which peers to prune when above `MAX_PEERS`: the
/// `count - MAX_PEERS` oldest by `last_seen`.
pub fn select_prune_candidates(peers: &[Peer], max_peers: usize) -> Vec<String> {
    if peers.len() <= max_peers {
        return Vec::new();
    }
    let mut sorted: Vec<&Peer> = peers.iter().collect();
    sorted.sort_by_key(|p| p.last_seen);
    sorted.into_iter().take(peers.len() - max_peers).map(|p| p.id.clone()).collect()
}

/// Owns connectivity bounds and the background connection-check loop.
pub struct LifecycleManager {
    peer_store: Arc<PeerStore>,
    reputation: Arc<ReputationManager>,
    metrics: Arc<Metrics>,
    min_peers: usize,
    max_peers: usize,
}

impl LifecycleManager {
    /// Build a manager with the configured bounds.
    pub fn new(
        peer_store: Arc<PeerStore>,
        reputation: Arc<ReputationManager>,
        metrics: Arc<Metrics>,
        min_peers: usize,
        max_peers: usize,
    ) -> Self {
        Self { peer_store, reputation, metrics, min_peers, max_peers }
    }

    /// Run one connection-check pass: prune unhealthy/excess peers, and
    /// report how many more are needed to reach `min_peers` (the caller
    /// feeds that count to the discovery variants).
    pub async fn check_once(&self, now: DateTime<Utc>) -> usize {
        let all = self.peer_store.list().await;
        let min_reputation = self.reputation.min_reputation();

        let unhealthy: Vec<String> =
            all.iter().filter(|p| is_unhealthy(p, min_reputation, now)).map(|p| p.id.clone()).collect();
        for id in &unhealthy {
            if let Err(e) = self.peer_store.remove(id).await {
                warn!(peer = %id, ?e, "failed to prune unhealthy peer");
            } else {
                self.metrics.peers_pruned_total.inc();
            }
        }

        let active: Vec<Peer> = all.into_iter().filter(|p| !unhealthy.contains(&p.id)).collect();
        let prune_excess = select_prune_candidates(&active, self.max_peers);
        for id in &prune_excess {
            if let Err(e) = self.peer_store.remove(id).await {
                warn!(peer = %id, ?e, "failed to prune excess peer");
            } else {
                self.metrics.peers_pruned_total.inc();
            }
        }

        let remaining = active.len() - prune_excess.len();
        self.metrics.peer_count.set(remaining as i64);
        self.min_peers.saturating_sub(remaining)
    }

    /// Run the connection-check loop every [`CONNECTION_CHECK_INTERVAL`]
    /// until `shutdown` fires. `on_need_more` is invoked with the shortfall
    /// below `min_peers` so the caller can kick discovery for candidates.
    pub async fn run(
        self: Arc<Self>,
        mut shutdown: broadcast::Receiver<()>,
        on_need_more: impl Fn(usize) + Send + Sync + 'static,
    ) {
        let mut ticker = tokio::time::interval(CONNECTION_CHECK_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let shortfall = self.check_once(Utc::now()).await;
                    if shortfall > 0 {
                        on_need_more(shortfall);
                    }
                }
                _ = shutdown.recv() => {
                    info!("lifecycle manager shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::SigAlg;
    use crate::repository::InMemoryRepository;

    fn peer_at(id: &str, last_seen: DateTime<Utc>, reputation: f64) -> Peer {
        let mut p = Peer::new(id.to_string(), "/ip4/127.0.0.1/tcp/9000".into(), vec![1u8; 32], SigAlg::Ed25519);
        p.last_seen = last_seen;
        p.reputation = reputation;
        p
    }

    #[test]
    fn unhealthy_on_stale_activity() {
        let now = Utc::now();
        let peer = peer_at("p1", now - ChronoDuration::seconds(31), 0.5);
        assert!(is_unhealthy(&peer, 0.2, now));
    }

    #[test]
    fn unhealthy_on_low_reputation() {
        let now = Utc::now();
        let peer = peer_at("p1", now, 0.1);
        assert!(is_unhealthy(&peer, 0.2, now));
    }

    #[test]
    fn prune_prefers_oldest_activity() {
        let now = Utc::now();
        let peers: Vec<Peer> = (0..7)
            .map(|i| peer_at(&format!("p{i}"), now - ChronoDuration::seconds(i), 0.5))
            .collect();
        let doomed = select_prune_candidates(&peers, 5);
        assert_eq!(doomed.len(), 2);
        assert!(doomed.contains(&"p5".to_string()));
        assert!(doomed.contains(&"p6".to_string()));
    }

    #[tokio::test]
    async fn check_once_reports_shortfall_when_under_min() {
        let store = Arc::new(PeerStore::new(Arc::new(InMemoryRepository::new())));
        let reputation = Arc::new(ReputationManager::new(0.2));
        let metrics = Arc::new(Metrics::new().unwrap());
        let manager = LifecycleManager::new(store.clone(), reputation, metrics, MIN_PEERS, MAX_PEERS);
        let shortfall = manager.check_once(Utc::now()).await;
        assert_eq!(shortfall, MIN_PEERS);
    }
}
