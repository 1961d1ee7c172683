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

//! Thread-safe peer directory, write-through to the repository.

use crate::core::types::{Peer, SigAlg};
use crate::repository::Repository;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Peer store errors.
#[derive(Debug, Error)]
pub enum PeerStoreError {
    /// No such peer.
    #[error("peer not found: {0}")]
    NotFound(String),
    /// The repository write-through failed.
    #[error("repository error")]
    Repository,
}

/// In-memory mapping of peer id to [`Peer`], kept consistent with a
/// [`Repository`] as the durable source of truth. Reads never touch the
/// repository; writes go to both.
pub struct PeerStore {
    peers: RwLock<BTreeMap<String, Peer>>,
    repository: Arc<dyn Repository>,
}

impl PeerStore {
    /// Build an empty store backed by `repository`.
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self { peers: RwLock::new(BTreeMap::new()), repository }
    }

    /// Load all known peers from the repository into memory. Call once at
    /// startup, before any other component reads the store.
    pub async fn hydrate(&self) -> Result<(), PeerStoreError> {
        let loaded = self.repository.list_peers().await.map_err(|_| PeerStoreError::Repository)?;
        let mut guard = self.peers.write().await;
        for peer in loaded {
            guard.insert(peer.id.clone(), peer);
        }
        Ok(())
    }

    /// Insert or replace a peer, writing through to the repository.
    pub async fn add(&self, peer: Peer) -> Result<(), PeerStoreError> {
        self.repository.save_peer(&peer).await.map_err(|_| PeerStoreError::Repository)?;
        self.peers.write().await.insert(peer.id.clone(), peer);
        Ok(())
    }

    /// Fetch a peer by id.
    pub async fn get(&self, peer_id: &str) -> Option<Peer> {
        self.peers.read().await.get(peer_id).cloned()
    }

    /// Remove a peer, writing through to the repository. Missing peers are
    /// not an error (idempotent remove).
    pub async fn remove(&self, peer_id: &str) -> Result<(), PeerStoreError> {
        self.repository.delete_peer(peer_id).await.map_err(|_| PeerStoreError::Repository)?;
        self.peers.write().await.remove(peer_id);
        Ok(())
    }

    /// Snapshot of every known peer.
    pub async fn list(&self) -> Vec<Peer> {
        self.peers.read().await.values().cloned().collect()
    }

    /// Decode `peer_id`'s stored public key per its recorded algorithm.
    /// Currently only [`SigAlg::Ed25519`] is exercised; the 32-byte array
    /// return type reflects that.
    pub async fn public_key(&self, peer_id: &str) -> Result<([u8; 32], SigAlg), PeerStoreError> {
        let peer = self.get(peer_id).await.ok_or_else(|| PeerStoreError::NotFound(peer_id.to_string()))?;
        if peer.public_key.len() != 32 {
            return Err(PeerStoreError::NotFound(peer_id.to_string()));
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&peer.public_key);
        Ok((out, peer.alg))
    }

    /// Register a self-certified announcement: insert the peer if it's not
    /// yet known, or refresh its address/last-seen if it is. The stored
    /// public key is never overwritten by an announcement for an
    /// already-known peer id, so a later announcement can't hijack an
    /// established peer's identity by claiming its id with a different key.
    pub async fn register_announced(
        &self,
        peer_id: String,
        address: String,
        public_key: Vec<u8>,
        alg: SigAlg,
    ) -> Result<(), PeerStoreError> {
        if self.get(&peer_id).await.is_some() {
            return self.update(&peer_id, |peer| {
                peer.address = address;
                peer.last_seen = Utc::now();
            }).await;
        }
        self.add(Peer::new(peer_id, address, public_key, alg)).await
    }

    /// Apply `f` to a mutable copy of the stored peer and write it back
    /// through the repository, or no-op if absent.
    pub async fn update<F: FnOnce(&mut Peer)>(&self, peer_id: &str, f: F) -> Result<(), PeerStoreError> {
        let mut guard = self.peers.write().await;
        let Some(peer) = guard.get_mut(peer_id) else {
            return Ok(());
        };
        f(peer);
        let snapshot = peer.clone();
        drop(guard);
        self.repository.save_peer(&snapshot).await.map_err(|_| PeerStoreError::Repository)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::SigAlg;
    use crate::repository::InMemoryRepository;

    fn sample_peer(id: &str) -> Peer {
        Peer::new(id.to_string(), "/ip4/127.0.0.1/tcp/9000".to_string(), vec![7u8; 32], SigAlg::Ed25519)
    }

    #[tokio::test]
    async fn add_then_get_round_trips() {
        let store = PeerStore::new(Arc::new(InMemoryRepository::new()));
        store.add(sample_peer("peer-a")).await.unwrap();
        let fetched = store.get("peer-a").await.unwrap();
        assert_eq!(fetched.id, "peer-a");
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let store = PeerStore::new(Arc::new(InMemoryRepository::new()));
        store.add(sample_peer("peer-a")).await.unwrap();
        store.remove("peer-a").await.unwrap();
        store.remove("peer-a").await.unwrap();
        assert!(store.get("peer-a").await.is_none());
    }

    #[tokio::test]
    async fn register_announced_adds_an_unknown_peer() {
        let store = PeerStore::new(Arc::new(InMemoryRepository::new()));
        store
            .register_announced("peer-a".into(), "/ip4/127.0.0.1/tcp/9000".into(), vec![7u8; 32], SigAlg::Ed25519)
            .await
            .unwrap();
        let fetched = store.get("peer-a").await.unwrap();
        assert_eq!(fetched.public_key, vec![7u8; 32]);
    }

    #[tokio::test]
    async fn register_announced_never_overwrites_an_existing_key() {
        let store = PeerStore::new(Arc::new(InMemoryRepository::new()));
        store.add(sample_peer("peer-a")).await.unwrap();
        store
            .register_announced("peer-a".into(), "/ip4/10.0.0.1/tcp/9001".into(), vec![9u8; 32], SigAlg::Ed25519)
            .await
            .unwrap();
        let fetched = store.get("peer-a").await.unwrap();
        assert_eq!(fetched.public_key, vec![7u8; 32]);
        assert_eq!(fetched.address, "/ip4/10.0.0.1/tcp/9001");
    }

    #[tokio::test]
    async fn public_key_decodes_stored_bytes() {
        let store = PeerStore::new(Arc::new(InMemoryRepository::new()));
        store.add(sample_peer("peer-a")).await.unwrap();
        let (key, alg) = store.public_key("peer-a").await.unwrap();
        assert_eq!(key, [7u8; 32]);
        assert_eq!(alg, SigAlg::Ed25519);
    }
}
