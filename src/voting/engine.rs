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

//! The central state machine: session creation, vote intake, termination,
//! retention, and batch voting.

use super::session::{VoteResult, VotingSession};
use crate::core::reputation::{Action, ReputationManager};
use crate::core::types::{MarketDataRecord, SessionStatus, Vote};
use crate::monitoring::metrics::Metrics;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{oneshot, RwLock};
use tracing::{info, warn};

/// Default minimum number of distinct voters required to conclude in favor.
pub const MIN_VOTERS: usize = 3;
/// Default weighted-confidence fraction required for quorum.
pub const QUORUM: f64 = 0.66;
/// Default session lifetime before a forced timeout conclusion.
pub const VOTING_TIMEOUT: ChronoDuration = ChronoDuration::seconds(20);

/// Voting engine errors.
#[derive(Debug, Error)]
pub enum VotingError {
    /// `startVoting` called for a record with an already-active session.
    #[error("duplicate session for record {0}")]
    DuplicateSession(String),
    /// `submitVote` or a query addressed a session that does not exist or
    /// has been reaped.
    #[error("session not found for record {0}")]
    SessionNotFound(String),
}

/// Tunable engine parameters.
#[derive(Clone, Copy, Debug)]
pub struct VotingEngineConfig {
    /// Minimum distinct voters to conclude in favor.
    pub min_voters: usize,
    /// Weighted-confidence quorum fraction.
    pub quorum: f64,
    /// Session lifetime before forced timeout.
    pub voting_timeout: ChronoDuration,
}

impl Default for VotingEngineConfig {
    fn default() -> Self {
        Self { min_voters: MIN_VOTERS, quorum: QUORUM, voting_timeout: VOTING_TIMEOUT }
    }
}

struct SessionEntry {
    session: VotingSession,
    /// Single-consumer response channel; `None` once taken or already sent.
    responder: Option<oneshot::Sender<VoteResult>>,
    /// Set once the session concludes; reaped at `concluded_at + voting_timeout`.
    concluded_at: Option<DateTime<Utc>>,
}

/// Owns every in-flight and recently-concluded voting session.
pub struct VotingEngine {
    sessions: RwLock<BTreeMap<String, SessionEntry>>,
    config: VotingEngineConfig,
    reputation: Arc<ReputationManager>,
    metrics: Arc<Metrics>,
}

impl VotingEngine {
    /// Build an engine with the given config, sharing the reputation
    /// manager and metrics with the rest of the host.
    pub fn new(config: VotingEngineConfig, reputation: Arc<ReputationManager>, metrics: Arc<Metrics>) -> Self {
        Self { sessions: RwLock::new(BTreeMap::new()), config, reputation, metrics }
    }

    /// Create a session for `record`, returning a receiver that resolves
    /// once the session concludes (accept, reject, or timeout).
    pub async fn start_voting(&self, record: MarketDataRecord) -> Result<oneshot::Receiver<VoteResult>, VotingError> {
        let id = record.id.clone();
        let mut guard = self.sessions.write().await;
        if let Some(existing) = guard.get(&id) {
            let reaped = existing
                .concluded_at
                .map(|t| Utc::now() - t > self.config.voting_timeout)
                .unwrap_or(false);
            if !reaped {
                return Err(VotingError::DuplicateSession(id));
            }
        }

        let deadline = Utc::now() + self.config.voting_timeout;
        let session = VotingSession::new(record, self.config.min_voters, self.config.quorum, deadline);
        let (tx, rx) = oneshot::channel();
        guard.insert(id, SessionEntry { session, responder: Some(tx), concluded_at: None });
        self.metrics.voting_sessions_active.set(guard.values().filter(|e| e.session.status == SessionStatus::Active).count() as i64);
        Ok(rx)
    }

    /// Insert `vote` into its session and evaluate termination. A vote for a
    /// session that has already concluded (present but not yet reaped) is
    /// dropped with a log entry and returns `Ok(())` without mutating state.
    /// Only a truly absent (reaped, or never created) session is an error.
    pub async fn submit_vote(&self, vote: Vote) -> Result<(), VotingError> {
        let mut guard = self.sessions.write().await;
        let Some(entry) = guard.get_mut(&vote.record_id) else {
            self.metrics.voting_late_votes_total.inc();
            return Err(VotingError::SessionNotFound(vote.record_id.clone()));
        };
        if entry.session.status != SessionStatus::Active {
            self.metrics.voting_late_votes_total.inc();
            info!(record_id = %vote.record_id, "late vote for a concluded session dropped");
            return Ok(());
        }

        entry.session.insert_vote(vote);
        if let Some(result) = entry.session.evaluate(Utc::now()) {
            self.conclude(entry, result).await;
        }
        Ok(())
    }

    /// Force-evaluate every active session against `now`, concluding any
    /// past its deadline. Intended to run on a short interval from the host
    /// supervisor so sessions terminate even without new votes arriving.
    pub async fn sweep_deadlines(&self, now: DateTime<Utc>) {
        let mut guard = self.sessions.write().await;
        let ids: Vec<String> =
            guard.iter().filter(|(_, e)| e.session.status == SessionStatus::Active).map(|(id, _)| id.clone()).collect();
        for id in ids {
            if let Some(entry) = guard.get_mut(&id) {
                if let Some(result) = entry.session.evaluate(now) {
                    self.conclude(entry, result).await;
                }
            }
        }
    }

    async fn conclude(&self, entry: &mut SessionEntry, result: VoteResult) {
        entry.concluded_at = Some(result.completed_at);
        if let Some(tx) = entry.responder.take() {
            let _ = tx.send(result.clone());
        }
        if result.accepted {
            self.metrics.voting_sessions_accepted_total.inc();
        } else {
            self.metrics.voting_sessions_rejected_total.inc();
        }

        let now = result.completed_at;
        for vote in entry.session.votes.values() {
            let agreed = vote.is_valid == result.accepted;
            let action = if agreed { Action::ValidData } else { Action::InvalidData };
            self.reputation.record(&vote.validator_id, action, vote.confidence, now);
        }

        info!(record_id = %entry.session.id, accepted = result.accepted, score = result.score, "voting session concluded");
    }

    /// Remove sessions concluded more than `voting_timeout` ago. Reaping is
    /// non-blocking: callers should invoke this from a background interval,
    /// not the hot vote-submission path.
    pub async fn reap(&self, now: DateTime<Utc>) -> usize {
        let mut guard = self.sessions.write().await;
        let doomed: Vec<String> = guard
            .iter()
            .filter(|(_, e)| e.concluded_at.map(|t| now - t > self.config.voting_timeout).unwrap_or(false))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &doomed {
            guard.remove(id);
        }
        if !doomed.is_empty() {
            warn!(count = doomed.len(), "reaped concluded voting sessions");
        }
        doomed.len()
    }

    /// Start N sessions concurrently for a batch of records. The returned
    /// vector preserves input order; a per-record failure (duplicate
    /// session) occupies its own slot without failing the batch.
    pub async fn start_voting_batch(
        &self,
        records: Vec<MarketDataRecord>,
    ) -> Vec<Result<oneshot::Receiver<VoteResult>, VotingError>> {
        let futures = records.into_iter().map(|record| self.start_voting(record));
        futures::future::join_all(futures).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{compute_content_hash, DataType, RecordPayload, Signature};

    fn sample_record(id: &str) -> MarketDataRecord {
        let payload = RecordPayload::Eod { open: 149.0, high: 151.0, low: 148.5, close: 150.0, volume: 1_000_000 };
        let timestamp = Utc::now();
        let hash = compute_content_hash("AAPL", DataType::Eod, &payload, timestamp, "nasdaq");
        MarketDataRecord {
            id: id.to_string(),
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

    fn vote(record_id: &str, validator: &str, is_valid: bool, confidence: f64) -> Vote {
        Vote {
            id: uuid::Uuid::new_v4().to_string(),
            record_id: record_id.to_string(),
            validator_id: validator.into(),
            is_valid,
            confidence,
            timestamp: Utc::now(),
            signature: Signature(vec![0u8; 64]),
            reason: None,
        }
    }

    fn new_engine() -> VotingEngine {
        VotingEngine::new(VotingEngineConfig::default(), Arc::new(ReputationManager::new(0.5)), Arc::new(Metrics::new().unwrap()))
    }

    #[tokio::test]
    async fn duplicate_session_rejected() {
        let engine = new_engine();
        engine.start_voting(sample_record("rec-1")).await.unwrap();
        let err = engine.start_voting(sample_record("rec-1")).await.unwrap_err();
        assert!(matches!(err, VotingError::DuplicateSession(_)));
    }

    #[tokio::test]
    async fn publish_accept_updates_reputation() {
        let engine = new_engine();
        let rx = engine.start_voting(sample_record("rec-1")).await.unwrap();
        engine.submit_vote(vote("rec-1", "p2", true, 0.9)).await.unwrap();
        engine.submit_vote(vote("rec-1", "p3", true, 0.8)).await.unwrap();
        engine.submit_vote(vote("rec-1", "p4", true, 0.75)).await.unwrap();
        let result = rx.await.unwrap();
        assert!(result.accepted);
        assert_eq!(result.vote_count, 3);
        assert!(engine.reputation.score_of("p2") > 0.5);
    }

    #[tokio::test]
    async fn late_vote_after_reap_is_session_not_found() {
        let engine = new_engine();
        engine.start_voting(sample_record("rec-1")).await.unwrap();
        engine.submit_vote(vote("rec-1", "p2", true, 0.9)).await.unwrap();
        engine.submit_vote(vote("rec-1", "p3", true, 0.8)).await.unwrap();
        engine.submit_vote(vote("rec-1", "p4", true, 0.75)).await.unwrap();

        let far_future = Utc::now() + ChronoDuration::hours(1);
        engine.reap(far_future).await;
        let err = engine.submit_vote(vote("rec-1", "p5", true, 0.5)).await.unwrap_err();
        assert!(matches!(err, VotingError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn late_vote_after_conclusion_but_before_reap_is_dropped_not_errored() {
        let engine = new_engine();
        let rx = engine.start_voting(sample_record("rec-1")).await.unwrap();
        engine.submit_vote(vote("rec-1", "p2", true, 0.9)).await.unwrap();
        engine.submit_vote(vote("rec-1", "p3", true, 0.8)).await.unwrap();
        engine.submit_vote(vote("rec-1", "p4", true, 0.75)).await.unwrap();
        rx.await.unwrap();

        let result = engine.submit_vote(vote("rec-1", "p5", true, 0.5)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn start_voting_rejected_while_a_concluded_session_is_still_retained() {
        let engine = new_engine();
        let rx = engine.start_voting(sample_record("rec-1")).await.unwrap();
        engine.submit_vote(vote("rec-1", "p2", true, 0.9)).await.unwrap();
        engine.submit_vote(vote("rec-1", "p3", true, 0.8)).await.unwrap();
        engine.submit_vote(vote("rec-1", "p4", true, 0.75)).await.unwrap();
        rx.await.unwrap();

        let err = engine.start_voting(sample_record("rec-1")).await.unwrap_err();
        assert!(matches!(err, VotingError::DuplicateSession(_)));
    }

    #[tokio::test]
    async fn batch_preserves_order_and_isolates_duplicates() {
        let engine = new_engine();
        engine.start_voting(sample_record("rec-1")).await.unwrap();
        let results = engine.start_voting_batch(vec![sample_record("rec-1"), sample_record("rec-2")]).await;
        assert!(results[0].is_err());
        assert!(results[1].is_ok());
    }
}
