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

//! Per-component counters and gauges, grouped on one struct and registered
//! against one [`Registry`]. No process-wide statics: every component holds
//! its slice of this struct as an owned field.

use prometheus::{Gauge, IntCounter, IntGauge, Registry};
use thiserror::Error;

/// Metrics errors.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// A metric name collided, or prometheus rejected a value.
    #[error("prometheus registration failed")]
    Prom,
}

/// All process metrics, grouped by owning component.
#[derive(Clone)]
pub struct Metrics {
    /// Backing registry, scraped by the `/metrics` HTTP endpoint.
    pub registry: Registry,

    // -- peer lifecycle / swarm --
    /// Currently connected peers.
    pub peer_count: IntGauge,
    /// Peers disconnected by the pruning pass.
    pub peers_pruned_total: IntCounter,
    /// Peers newly discovered (any discovery variant).
    pub peers_discovered_total: IntCounter,

    // -- pub/sub plane --
    /// Envelopes accepted and dispatched by a subscription worker.
    pub pubsub_messages_received_total: IntCounter,
    /// Envelopes dropped (decode failure, unknown sender, bad signature).
    pub pubsub_messages_dropped_total: IntCounter,
    /// Gossipsub publish calls that returned an error.
    pub pubsub_publish_errors: IntCounter,

    // -- voting engine --
    /// Sessions currently `Active`.
    pub voting_sessions_active: IntGauge,
    /// Sessions that concluded with `accepted = true`.
    pub voting_sessions_accepted_total: IntCounter,
    /// Sessions that concluded with `accepted = false` (rejection or timeout).
    pub voting_sessions_rejected_total: IntCounter,
    /// `startVoting` calls that failed with `DuplicateSession`.
    pub voting_duplicate_session_total: IntCounter,
    /// Votes dropped for a missing or reaped session (`SessionNotFound`).
    pub voting_late_votes_total: IntCounter,

    // -- reputation manager --
    /// Network-average reputation score at the last adaptive sweep.
    pub reputation_avg_score: Gauge,
    /// Current `minReputation` threshold.
    pub reputation_min_threshold: Gauge,
    /// Peers penalized by the hourly inactivity sweep.
    pub reputation_inactivity_penalties_total: IntCounter,

    // -- authority service --
    /// Validation RPCs served.
    pub authority_requests_total: IntCounter,
    /// Validation RPCs that failed (peer verification, internal error).
    pub authority_requests_failed_total: IntCounter,
    /// Currently valid `VerifiedPeer` leases.
    pub authority_leases_active: IntGauge,
}

macro_rules! register {
    ($registry:expr, $ty:ty, $name:expr, $help:expr) => {{
        let metric = <$ty>::new($name, $help).map_err(|_| MetricsError::Prom)?;
        $registry.register(Box::new(metric.clone())).map_err(|_| MetricsError::Prom)?;
        metric
    }};
}

impl Metrics {
    /// Construct and register every metric against a fresh registry.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let peer_count = register!(registry, IntGauge, "marketmesh_peer_count", "Currently connected peers");
        let peers_pruned_total =
            register!(registry, IntCounter, "marketmesh_peers_pruned_total", "Peers disconnected by pruning");
        let peers_discovered_total = register!(
            registry,
            IntCounter,
            "marketmesh_peers_discovered_total",
            "Peers newly discovered across all discovery variants"
        );

        let pubsub_messages_received_total = register!(
            registry,
            IntCounter,
            "marketmesh_pubsub_messages_received_total",
            "Envelopes accepted and dispatched"
        );
        let pubsub_messages_dropped_total = register!(
            registry,
            IntCounter,
            "marketmesh_pubsub_messages_dropped_total",
            "Envelopes dropped at decode or verify"
        );
        let pubsub_publish_errors =
            register!(registry, IntCounter, "marketmesh_pubsub_publish_errors_total", "Gossipsub publish failures");

        let voting_sessions_active =
            register!(registry, IntGauge, "marketmesh_voting_sessions_active", "Currently active voting sessions");
        let voting_sessions_accepted_total = register!(
            registry,
            IntCounter,
            "marketmesh_voting_sessions_accepted_total",
            "Sessions concluded accepted"
        );
        let voting_sessions_rejected_total = register!(
            registry,
            IntCounter,
            "marketmesh_voting_sessions_rejected_total",
            "Sessions concluded rejected or timed out"
        );
        let voting_duplicate_session_total = register!(
            registry,
            IntCounter,
            "marketmesh_voting_duplicate_session_total",
            "startVoting calls rejected as duplicates"
        );
        let voting_late_votes_total = register!(
            registry,
            IntCounter,
            "marketmesh_voting_late_votes_total",
            "Votes dropped for a missing or reaped session"
        );

        let reputation_avg_score =
            register!(registry, Gauge, "marketmesh_reputation_avg_score", "Network-average reputation score");
        let reputation_min_threshold =
            register!(registry, Gauge, "marketmesh_reputation_min_threshold", "Current minReputation threshold");
        let reputation_inactivity_penalties_total = register!(
            registry,
            IntCounter,
            "marketmesh_reputation_inactivity_penalties_total",
            "Peers penalized by the inactivity sweep"
        );

        let authority_requests_total =
            register!(registry, IntCounter, "marketmesh_authority_requests_total", "Validation RPCs served");
        let authority_requests_failed_total = register!(
            registry,
            IntCounter,
            "marketmesh_authority_requests_failed_total",
            "Validation RPCs that failed"
        );
        let authority_leases_active = register!(
            registry,
            IntGauge,
            "marketmesh_authority_leases_active",
            "Currently valid verified-peer leases"
        );

        Ok(Self {
            registry,
            peer_count,
            peers_pruned_total,
            peers_discovered_total,
            pubsub_messages_received_total,
            pubsub_messages_dropped_total,
            pubsub_publish_errors,
            voting_sessions_active,
            voting_sessions_accepted_total,
            voting_sessions_rejected_total,
            voting_duplicate_session_total,
            voting_late_votes_total,
            reputation_avg_score,
            reputation_min_threshold,
            reputation_inactivity_penalties_total,
            authority_requests_total,
            authority_requests_failed_total,
            authority_leases_active,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_registers_every_metric_once() {
        let metrics = Metrics::new().unwrap();
        assert!(!metrics.registry.gather().is_empty());
    }
}
