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

//! Per-record vote aggregator and its termination rule. Pure state, no I/O:
//! the engine owns the timers and channels around this.

use crate::core::types::{MarketDataRecord, SessionStatus, Vote};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Outcome of a concluded session.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct VoteResult {
    /// Record this result is about.
    pub record_id: String,
    /// Whether quorum was reached in favor.
    pub accepted: bool,
    /// Number of distinct validators that voted.
    pub vote_count: usize,
    /// `weightedAccept / totalWeight`, or `0` on timeout-below-quorum.
    pub score: f64,
    /// Time the session concluded.
    pub completed_at: DateTime<Utc>,
}

/// Bounded-lifetime aggregator of votes for one record.
pub struct VotingSession {
    /// Equal to `record.id`.
    pub id: String,
    /// The record under vote.
    pub record: MarketDataRecord,
    /// Votes by validator id; last-writer-wins per validator.
    pub votes: BTreeMap<String, Vote>,
    /// Session creation time.
    pub start_time: DateTime<Utc>,
    /// Conclusion time, once terminal.
    pub end_time: Option<DateTime<Utc>>,
    /// Current lifecycle state.
    pub status: SessionStatus,
    /// Set once `status` becomes terminal.
    pub result: Option<VoteResult>,
    /// Minimum distinct voters required to conclude in favor.
    pub min_voters: usize,
    /// Weighted-confidence fraction required for quorum.
    pub quorum: f64,
    /// Deadline after which the session force-concludes.
    pub deadline: DateTime<Utc>,
}

impl VotingSession {
    /// Start a fresh `Active` session for `record`.
    pub fn new(record: MarketDataRecord, min_voters: usize, quorum: f64, deadline: DateTime<Utc>) -> Self {
        let id = record.id.clone();
        Self {
            id,
            record,
            votes: BTreeMap::new(),
            start_time: Utc::now(),
            end_time: None,
            status: SessionStatus::Active,
            result: None,
            min_voters,
            quorum,
            deadline,
        }
    }

    fn weighted_totals(&self) -> (f64, f64) {
        let total: f64 = self.votes.values().map(|v| v.confidence).sum();
        let accept: f64 = self.votes.values().filter(|v| v.is_valid).map(|v| v.confidence).sum();
        (total, accept)
    }

    /// Insert or replace `vote` under its validator id. No-op on a
    /// non-`Active` session (caller must check status first).
    pub fn insert_vote(&mut self, vote: Vote) {
        self.votes.insert(vote.validator_id.clone(), vote);
    }

    /// Evaluate the termination rule, transitioning to a terminal state and
    /// returning the result if one is reached. A no-op (returns `None`) if
    /// already terminal.
    pub fn evaluate(&mut self, now: DateTime<Utc>) -> Option<VoteResult> {
        if self.status != SessionStatus::Active {
            return None;
        }

        let (total, accept) = self.weighted_totals();
        let enough_voters = self.votes.len() >= self.min_voters;
        let weight_quorum = total >= self.quorum;
        let past_deadline = now >= self.deadline;

        if !((enough_voters && weight_quorum) || past_deadline) {
            return None;
        }

        let (accepted, score) = if enough_voters && weight_quorum {
            let ratio = if total > 0.0 { accept / total } else { 0.0 };
            if ratio >= self.quorum {
                (true, ratio)
            } else {
                (false, 0.0)
            }
        } else {
            (false, 0.0)
        };
        self.end_time = Some(now);
        self.status = if accepted { SessionStatus::Complete } else { SessionStatus::Failed };
        let result = VoteResult { record_id: self.id.clone(), accepted, vote_count: self.votes.len(), score, completed_at: now };
        self.result = Some(result.clone());
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{compute_content_hash, DataType, RecordPayload, Signature};

    fn sample_record() -> MarketDataRecord {
        let payload = RecordPayload::Eod { open: 149.0, high: 151.0, low: 148.5, close: 150.0, volume: 1_000_000 };
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

    fn vote(validator: &str, is_valid: bool, confidence: f64) -> Vote {
        Vote {
            id: uuid::Uuid::new_v4().to_string(),
            record_id: "rec-1".into(),
            validator_id: validator.into(),
            is_valid,
            confidence,
            timestamp: Utc::now(),
            signature: Signature(vec![0u8; 64]),
            reason: None,
        }
    }

    #[test]
    fn quorum_correctness_example() {
        let mut session = VotingSession::new(sample_record(), 3, 0.66, Utc::now() + chrono::Duration::seconds(20));
        session.insert_vote(vote("p2", true, 0.9));
        session.insert_vote(vote("p3", true, 0.8));
        session.insert_vote(vote("p4", false, 0.2));
        let result = session.evaluate(Utc::now()).expect("should conclude");
        assert!(result.accepted);
        assert_eq!(result.vote_count, 3);
        assert!((result.score - 0.895).abs() < 1e-3);
    }

    #[test]
    fn idempotent_vote_insertion() {
        let mut session = VotingSession::new(sample_record(), 3, 0.66, Utc::now() + chrono::Duration::seconds(20));
        session.insert_vote(vote("p2", true, 0.9));
        session.insert_vote(vote("p2", true, 0.9));
        assert_eq!(session.votes.len(), 1);
    }

    #[test]
    fn timeout_below_min_voters_rejects_with_zero_score() {
        let mut session = VotingSession::new(sample_record(), 3, 0.66, Utc::now() - chrono::Duration::seconds(1));
        session.insert_vote(vote("p2", true, 0.9));
        session.insert_vote(vote("p3", true, 0.8));
        let result = session.evaluate(Utc::now()).expect("deadline passed");
        assert!(!result.accepted);
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn rejection_quorum_yields_zero_score() {
        let mut session = VotingSession::new(sample_record(), 3, 0.66, Utc::now() + chrono::Duration::seconds(20));
        session.insert_vote(vote("p2", false, 0.8));
        session.insert_vote(vote("p3", false, 0.8));
        session.insert_vote(vote("p4", false, 0.8));
        let result = session.evaluate(Utc::now()).expect("should conclude");
        assert!(!result.accepted);
        assert_eq!(result.score, 0.0);
    }
}
