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

//! Authority/validation service: the `/authority/1.0.0` request handler,
//! peer-verification lease cache, and the default structural validator.

use super::peer_store::PeerStore;
use super::swarm::{AuthorityRequest, AuthorityResponse, SwarmHandle};
use crate::core::codec::{decode_payload, encode_payload};
use crate::core::types::{
    ErrorPayload, MarketDataRecord, RecordPayload, ValidationRequest, ValidationResponse, ValidationResult,
    VerifiedPeer,
};
use crate::monitoring::metrics::Metrics;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::join_all;
use libp2p::{request_response::ResponseChannel, PeerId};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::warn;

/// Lease lifetime for a successful peer verification.
pub const LEASE_DURATION: ChronoDuration = ChronoDuration::hours(24);

/// Authority service errors.
#[derive(Debug, Error)]
pub enum AuthorityError {
    /// The remote peer's public key is not in the peer store.
    #[error("peer not found: {0}")]
    PeerNotFound(String),
    /// The lease is missing, expired, or lacks the requested permission.
    #[error("peer not authorized for {0}")]
    NotAuthorized(String),
    /// Request payload failed to decode.
    #[error("bad request")]
    BadRequest,
}

fn confidence_on_success(min_reputation: f64, max_penalty: f64) -> f64 {
    min_reputation + (1.0 - min_reputation) * (1.0 - max_penalty)
}

fn confidence_on_failure(min_reputation: f64, max_penalty: f64) -> f64 {
    min_reputation * max_penalty
}

/// Default structural validator: `price > 0`, `volume >= 0`, a present
/// timestamp. Implementations may plug in richer checks without changing
/// the protocol, by constructing their own `fn(&MarketDataRecord) -> bool`.
pub fn default_validate(record: &MarketDataRecord, min_reputation: f64, max_penalty: f64) -> ValidationResult {
    let structurally_valid = record.timestamp.timestamp_millis() != 0
        && match &record.payload {
            RecordPayload::Eod { open, high, low, close, volume, .. } => {
                *open > 0.0 && *high > 0.0 && *low > 0.0 && *close > 0.0 && *volume <= u64::MAX
            }
            RecordPayload::Dividend { amount, .. } => *amount > 0.0,
            RecordPayload::Split { ratio_from, ratio_to } => *ratio_from > 0 && *ratio_to > 0,
            RecordPayload::InsiderTrade { shares, price, .. } => *shares <= u64::MAX && *price > 0.0,
        };

    if structurally_valid {
        ValidationResult {
            record_id: record.id.clone(),
            is_valid: true,
            confidence: confidence_on_success(min_reputation, max_penalty),
            error_msg: None,
        }
    } else {
        ValidationResult {
            record_id: record.id.clone(),
            is_valid: false,
            confidence: confidence_on_failure(min_reputation, max_penalty),
            error_msg: Some("structural invariant violated".to_string()),
        }
    }
}

/// Tunable parameters for the default validator's confidence formula.
#[derive(Clone, Copy, Debug)]
pub struct AuthorityConfig {
    /// Current `minReputation` threshold, read from the reputation manager.
    pub min_reputation: f64,
    /// Maximum confidence penalty applied on a failed validation.
    pub max_penalty: f64,
}

/// Runs the `/authority/1.0.0` protocol: verifies callers, validates
/// records, and answers requests received from the swarm.
pub struct AuthorityService {
    peer_store: Arc<PeerStore>,
    swarm: SwarmHandle,
    metrics: Arc<Metrics>,
    leases: RwLock<BTreeMap<String, VerifiedPeer>>,
    config: AuthorityConfig,
}

impl AuthorityService {
    /// Build a service over `peer_store`, able to answer via `swarm`.
    pub fn new(peer_store: Arc<PeerStore>, swarm: SwarmHandle, metrics: Arc<Metrics>, config: AuthorityConfig) -> Self {
        Self { peer_store, swarm, metrics, leases: RwLock::new(BTreeMap::new()), config }
    }

    /// Verify `peer_id` against the peer store, creating or refreshing its
    /// lease. Fails if the peer is unknown (per §4.H, absence is fatal).
    pub async fn verify_peer(&self, peer_id: &str, now: DateTime<Utc>) -> Result<(), AuthorityError> {
        let peer = self.peer_store.get(peer_id).await.ok_or_else(|| AuthorityError::PeerNotFound(peer_id.to_string()))?;

        let mut permissions: BTreeSet<String> = peer.roles.clone();
        if peer.is_authority() {
            permissions.insert("admin".to_string());
        }
        permissions.insert("validate".to_string());

        let lease = VerifiedPeer { peer_id: peer_id.to_string(), permissions, valid_until: now + LEASE_DURATION, last_verified: now };
        self.leases.write().await.insert(peer_id.to_string(), lease);
        Ok(())
    }

    /// `true` iff a valid, non-expired lease exists granting `action` or
    /// the `admin` wildcard.
    pub async fn is_authorized(&self, peer_id: &str, action: &str, now: DateTime<Utc>) -> bool {
        self.leases.read().await.get(peer_id).map(|lease| lease.authorizes(action, now)).unwrap_or(false)
    }

    /// Immediately evict `peer_id`'s lease.
    pub async fn revoke(&self, peer_id: &str) {
        self.leases.write().await.remove(peer_id);
    }

    /// Evict every lease expired as of `now`. Intended to run hourly.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let mut guard = self.leases.write().await;
        let before = guard.len();
        guard.retain(|_, lease| lease.valid_until > now);
        self.metrics.authority_leases_active.set(guard.len() as i64);
        before - guard.len()
    }

    /// Validate one record with the default structural validator.
    pub fn validate_one(&self, record: &MarketDataRecord) -> ValidationResult {
        default_validate(record, self.config.min_reputation, self.config.max_penalty)
    }

    /// Validate a batch concurrently, preserving input order. Per §4.H, an
    /// item-level error aborts the whole batch.
    pub async fn validate_batch(&self, records: &[MarketDataRecord]) -> Result<Vec<ValidationResult>, AuthorityError> {
        let futures = records.iter().map(|r| async move { self.validate_one(r) });
        Ok(join_all(futures).await)
    }

    /// Handle one inbound `ValidationRequest` envelope, verifying the caller
    /// and running batch validation, producing the encoded response or
    /// error frame to write back.
    pub async fn handle_request(&self, requester_peer_id: &str, request_bytes: &[u8]) -> Vec<u8> {
        self.metrics.authority_requests_total.inc();
        let now = Utc::now();

        if self.verify_peer(requester_peer_id, now).await.is_err() {
            self.metrics.authority_requests_failed_total.inc();
            return error_frame(500, "peer verification failed", None);
        }
        if !self.is_authorized(requester_peer_id, "validate", now).await {
            self.metrics.authority_requests_failed_total.inc();
            return error_frame(500, "peer not authorized", None);
        }

        let request: ValidationRequest = match decode_payload(request_bytes) {
            Ok(r) => r,
            Err(_) => {
                self.metrics.authority_requests_failed_total.inc();
                return error_frame(500, "malformed validation request", None);
            }
        };

        match self.validate_batch(&request.records).await {
            Ok(results) => {
                let response = ValidationResponse { results };
                encode_payload(&response).unwrap_or_else(|_| error_frame(500, "encode failure", None))
            }
            Err(e) => {
                self.metrics.authority_requests_failed_total.inc();
                error_frame(500, "validation failed", Some(e.to_string()))
            }
        }
    }

    /// Drive one swarm `AuthorityRequest` event end to end: decode the
    /// requester's peer id, answer, and respond on `channel`.
    pub async fn serve(&self, peer: PeerId, request: AuthorityRequest, channel: ResponseChannel<AuthorityResponse>) {
        let response_bytes = self.handle_request(&peer.to_string(), &request.0).await;
        self.swarm.authority_respond(channel, AuthorityResponse(response_bytes)).await;
    }

    /// Send a validation request to a remote authority peer, returning its
    /// decoded response or `None` on transport failure.
    pub async fn request_remote(&self, peer_id: &str, request: ValidationRequest) -> Option<ValidationResponse> {
        let peer = PeerId::from_str(peer_id).ok()?;
        let bytes = encode_payload(&request).ok()?;
        let response = self.swarm.authority_request(peer, AuthorityRequest(bytes)).await?;
        decode_payload(&response.0).ok()
    }
}

fn error_frame(code: u32, message: &str, details: Option<String>) -> Vec<u8> {
    let payload = ErrorPayload { code, message: message.to_string(), details };
    encode_payload(&payload).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{compute_content_hash, DataType, Peer, SigAlg};
    use crate::repository::InMemoryRepository;

    fn sample_record(valid: bool) -> MarketDataRecord {
        let payload = if valid {
            RecordPayload::Eod { open: 1.0, high: 2.0, low: 0.5, close: 1.5, volume: 100 }
        } else {
            RecordPayload::Eod { open: -1.0, high: 2.0, low: 0.5, close: 1.5, volume: 100 }
        };
        let timestamp = Utc::now();
        let hash = compute_content_hash("AAPL", DataType::Eod, &payload, timestamp, "nasdaq");
        MarketDataRecord {
            id: "rec-1".into(),
            symbol: "AAPL".into(),
            data_type: DataType::Eod,
            timestamp,
            source: "nasdaq".into(),
            payload,
            validation_score: 0.0,
            content_hash: hash,
            signatures: Default::default(),
            metadata: Default::default(),
        }
    }

    fn service() -> AuthorityService {
        let peer_store = Arc::new(PeerStore::new(Arc::new(InMemoryRepository::new())));
        let (swarm, _rx) = SwarmHandle::new_for_test(PeerId::random());
        let metrics = Arc::new(Metrics::new().unwrap());
        AuthorityService::new(peer_store, swarm, metrics, AuthorityConfig { min_reputation: 0.5, max_penalty: 0.5 })
    }

    #[test]
    fn confidence_formulas_scale_with_min_reputation_and_penalty() {
        assert!((confidence_on_success(0.5, 0.5) - 0.75).abs() < 1e-9);
        assert!((confidence_on_failure(0.5, 0.5) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn default_validate_rejects_non_positive_price() {
        let result = default_validate(&sample_record(false), 0.5, 0.5);
        assert!(!result.is_valid);
    }

    #[test]
    fn default_validate_accepts_well_formed_record() {
        let result = default_validate(&sample_record(true), 0.5, 0.5);
        assert!(result.is_valid);
    }

    #[tokio::test]
    async fn unknown_peer_verification_fails() {
        let svc = service();
        let err = svc.verify_peer("ghost", Utc::now()).await.unwrap_err();
        assert!(matches!(err, AuthorityError::PeerNotFound(_)));
    }

    #[tokio::test]
    async fn verified_peer_is_authorized_until_expiry() {
        let svc = service();
        svc.peer_store
            .add(Peer::new("peer-a".into(), "/ip4/127.0.0.1/tcp/9000".into(), vec![1u8; 32], SigAlg::Ed25519))
            .await
            .unwrap();
        let now = Utc::now();
        svc.verify_peer("peer-a", now).await.unwrap();
        assert!(svc.is_authorized("peer-a", "validate", now).await);
        assert!(!svc.is_authorized("peer-a", "validate", now + LEASE_DURATION + ChronoDuration::seconds(1)).await);
    }

    #[tokio::test]
    async fn revoke_evicts_immediately() {
        let svc = service();
        svc.peer_store
            .add(Peer::new("peer-a".into(), "/ip4/127.0.0.1/tcp/9000".into(), vec![1u8; 32], SigAlg::Ed25519))
            .await
            .unwrap();
        let now = Utc::now();
        svc.verify_peer("peer-a", now).await.unwrap();
        svc.revoke("peer-a").await;
        assert!(!svc.is_authorized("peer-a", "validate", now).await);
    }

    #[tokio::test]
    async fn batch_preserves_order() {
        let svc = service();
        let records = vec![sample_record(true), sample_record(false)];
        let results = svc.validate_batch(&records).await.unwrap();
        assert!(results[0].is_valid);
        assert!(!results[1].is_valid);
    }
}
