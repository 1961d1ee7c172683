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

//! Persistence contract consumed by the core. No SQL schema is implemented
//! here — that detail is owned by whatever concretely backs this trait in a
//! deployment; this module supplies the trait plus an in-memory reference
//! implementation used by the default wiring and by tests.

use crate::core::types::{DataType, MarketDataRecord, Peer, Stake, Vote};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::RwLock;
use thiserror::Error;

/// Repository errors.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// No entity with the given id.
    #[error("not found: {0}")]
    NotFound(String),
    /// An entity with this key already exists.
    #[error("duplicate: {0}")]
    Duplicate(String),
}

/// Persistence contract for every durable entity in the data model. Backed
/// by whatever storage a deployment chooses; the core only depends on this
/// trait object.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Insert a new record. `Duplicate` if `record.id` already exists.
    async fn save_record(&self, record: &MarketDataRecord) -> Result<(), RepositoryError>;
    /// Fetch a record by id.
    async fn get_record(&self, id: &str) -> Result<MarketDataRecord, RepositoryError>;
    /// Replace an existing record. `NotFound` if `record.id` is unknown.
    async fn update_record(&self, record: &MarketDataRecord) -> Result<(), RepositoryError>;
    /// Delete a record by id. `NotFound` if unknown.
    async fn delete_record(&self, id: &str) -> Result<(), RepositoryError>;
    /// List every known record.
    async fn list_records(&self) -> Result<Vec<MarketDataRecord>, RepositoryError>;
    /// Records for `symbol` and `data_type` whose timestamp falls in
    /// `[from, to]`.
    async fn query_records(
        &self,
        symbol: &str,
        data_type: DataType,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<MarketDataRecord>, RepositoryError>;
    /// Every distinct `source` tag seen across stored records.
    async fn list_sources(&self) -> Result<Vec<String>, RepositoryError>;

    /// Insert a vote. `Duplicate` if `(record_id, validator_id)` exists.
    async fn save_vote(&self, vote: &Vote) -> Result<(), RepositoryError>;
    /// Votes cast for `record_id`.
    async fn list_votes(&self, record_id: &str) -> Result<Vec<Vote>, RepositoryError>;

    /// Insert or replace a peer.
    async fn save_peer(&self, peer: &Peer) -> Result<(), RepositoryError>;
    /// Fetch a peer by id.
    async fn get_peer(&self, id: &str) -> Result<Peer, RepositoryError>;
    /// List every known peer.
    async fn list_peers(&self) -> Result<Vec<Peer>, RepositoryError>;
    /// Delete a peer by id. Idempotent: missing peers are not an error.
    async fn delete_peer(&self, id: &str) -> Result<(), RepositoryError>;

    /// Record a new stake binding.
    async fn create_stake(&self, stake: Stake) -> Result<(), RepositoryError>;
    /// Every stake ever created for `peer_id`, in creation order.
    async fn list_stakes_by_peer(&self, peer_id: &str) -> Result<Vec<Stake>, RepositoryError>;
}

/// In-memory `Repository`, guarded by plain `RwLock`s (no lock is ever held
/// across an `.await`). Suitable as the default wiring and for tests; not
/// durable across process restarts.
#[derive(Default)]
pub struct InMemoryRepository {
    records: RwLock<BTreeMap<String, MarketDataRecord>>,
    votes: RwLock<BTreeMap<(String, String), Vote>>,
    peers: RwLock<BTreeMap<String, Peer>>,
    stakes: RwLock<BTreeMap<String, Vec<Stake>>>,
}

impl InMemoryRepository {
    /// Build an empty repository.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn save_record(&self, record: &MarketDataRecord) -> Result<(), RepositoryError> {
        let mut guard = self.records.write().expect("repository lock poisoned");
        if guard.contains_key(&record.id) {
            return Err(RepositoryError::Duplicate(record.id.clone()));
        }
        guard.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get_record(&self, id: &str) -> Result<MarketDataRecord, RepositoryError> {
        self.records
            .read()
            .expect("repository lock poisoned")
            .get(id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
    }

    async fn update_record(&self, record: &MarketDataRecord) -> Result<(), RepositoryError> {
        let mut guard = self.records.write().expect("repository lock poisoned");
        if !guard.contains_key(&record.id) {
            return Err(RepositoryError::NotFound(record.id.clone()));
        }
        guard.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn delete_record(&self, id: &str) -> Result<(), RepositoryError> {
        let mut guard = self.records.write().expect("repository lock poisoned");
        guard.remove(id).ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        Ok(())
    }

    async fn list_records(&self) -> Result<Vec<MarketDataRecord>, RepositoryError> {
        Ok(self.records.read().expect("repository lock poisoned").values().cloned().collect())
    }

    async fn query_records(
        &self,
        symbol: &str,
        data_type: DataType,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<MarketDataRecord>, RepositoryError> {
        Ok(self
            .records
            .read()
            .expect("repository lock poisoned")
            .values()
            .filter(|r| {
                r.symbol == symbol
                    && r.data_type == data_type
                    && r.timestamp >= from
                    && r.timestamp <= to
            })
            .cloned()
            .collect())
    }

    async fn list_sources(&self) -> Result<Vec<String>, RepositoryError> {
        let guard = self.records.read().expect("repository lock poisoned");
        let mut sources: Vec<String> = guard.values().map(|r| r.source.clone()).collect();
        sources.sort();
        sources.dedup();
        Ok(sources)
    }

    async fn save_vote(&self, vote: &Vote) -> Result<(), RepositoryError> {
        let key = (vote.record_id.clone(), vote.validator_id.clone());
        let mut guard = self.votes.write().expect("repository lock poisoned");
        if guard.contains_key(&key) {
            return Err(RepositoryError::Duplicate(format!("{}/{}", key.0, key.1)));
        }
        guard.insert(key, vote.clone());
        Ok(())
    }

    async fn list_votes(&self, record_id: &str) -> Result<Vec<Vote>, RepositoryError> {
        Ok(self
            .votes
            .read()
            .expect("repository lock poisoned")
            .values()
            .filter(|v| v.record_id == record_id)
            .cloned()
            .collect())
    }

    async fn save_peer(&self, peer: &Peer) -> Result<(), RepositoryError> {
        self.peers.write().expect("repository lock poisoned").insert(peer.id.clone(), peer.clone());
        Ok(())
    }

    async fn get_peer(&self, id: &str) -> Result<Peer, RepositoryError> {
        self.peers
            .read()
            .expect("repository lock poisoned")
            .get(id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
    }

    async fn list_peers(&self) -> Result<Vec<Peer>, RepositoryError> {
        Ok(self.peers.read().expect("repository lock poisoned").values().cloned().collect())
    }

    async fn delete_peer(&self, id: &str) -> Result<(), RepositoryError> {
        self.peers.write().expect("repository lock poisoned").remove(id);
        Ok(())
    }

    async fn create_stake(&self, stake: Stake) -> Result<(), RepositoryError> {
        self.stakes
            .write()
            .expect("repository lock poisoned")
            .entry(stake.peer_id.clone())
            .or_default()
            .push(stake);
        Ok(())
    }

    async fn list_stakes_by_peer(&self, peer_id: &str) -> Result<Vec<Stake>, RepositoryError> {
        Ok(self
            .stakes
            .read()
            .expect("repository lock poisoned")
            .get(peer_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::SigAlg;

    fn sample_peer(id: &str) -> Peer {
        Peer::new(id.to_string(), "/ip4/127.0.0.1/tcp/9000".to_string(), vec![1u8; 32], SigAlg::Ed25519)
    }

    #[tokio::test]
    async fn unknown_peer_is_not_found() {
        let repo = InMemoryRepository::new();
        let err = repo.get_peer("nobody").await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));
    }

    #[tokio::test]
    async fn duplicate_record_rejected() {
        use crate::core::types::{compute_content_hash, DataType, RecordPayload};
        let payload = RecordPayload::Split { ratio_from: 1, ratio_to: 2 };
        let now = Utc::now();
        let hash = compute_content_hash("AAPL", DataType::Split, &payload, now, "nasdaq");
        let record = MarketDataRecord {
            id: "rec-1".into(),
            symbol: "AAPL".into(),
            data_type: DataType::Split,
            timestamp: now,
            source: "nasdaq".into(),
            payload,
            validation_score: 0.0,
            content_hash: hash,
            signatures: Default::default(),
            metadata: Default::default(),
        };
        let repo = InMemoryRepository::new();
        repo.save_record(&record).await.unwrap();
        let err = repo.save_record(&record).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Duplicate(_)));
    }

    #[tokio::test]
    async fn stakes_accumulate_per_peer() {
        let repo = InMemoryRepository::new();
        repo.save_peer(&sample_peer("peer-a")).await.unwrap();
        let now = Utc::now();
        repo.create_stake(Stake {
            peer_id: "peer-a".into(),
            amount: 100,
            purpose: "validation-bond".into(),
            created_at: now,
            expires_at: now + chrono::Duration::days(30),
            status: crate::core::types::StakeStatus::Active,
        })
        .await
        .unwrap();
        let stakes = repo.list_stakes_by_peer("peer-a").await.unwrap();
        assert_eq!(stakes.len(), 1);
    }
}
