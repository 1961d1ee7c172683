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

//! Local-network discovery: mDNS announcements (carried to us as swarm
//! `PeerDiscovered` events), deduplicated with a staleness timeout.

use super::Discovery;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use libp2p::PeerId;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

const STALENESS_TIMEOUT: ChronoDuration = ChronoDuration::minutes(10);

/// Tracks peers announced via mDNS, deduplicating repeat announcements
/// within the staleness window.
#[derive(Default)]
pub struct LocalDiscovery {
    seen: RwLock<BTreeMap<PeerId, DateTime<Utc>>>,
}

impl LocalDiscovery {
    /// Build an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an announcement for `peer` at `now`. Returns `true` if this is
    /// a fresh sighting (first ever, or past the staleness window) rather
    /// than a duplicate of a recent one.
    pub async fn note_announcement(&self, peer: PeerId, now: DateTime<Utc>) -> bool {
        let mut guard = self.seen.write().await;
        let fresh = match guard.get(&peer) {
            Some(last) => now - *last > STALENESS_TIMEOUT,
            None => true,
        };
        guard.insert(peer, now);
        fresh
    }

    /// Drop announcements older than the staleness window, relative to `now`.
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> usize {
        let mut guard = self.seen.write().await;
        let before = guard.len();
        guard.retain(|_, last| now - *last <= STALENESS_TIMEOUT);
        before - guard.len()
    }
}

#[async_trait]
impl Discovery for LocalDiscovery {
    async fn start(&self) {}

    async fn stop(&self) {
        self.seen.write().await.clear();
    }

    async fn connected_peers(&self) -> Vec<PeerId> {
        self.seen.read().await.keys().copied().collect()
    }

    async fn is_connected(&self, peer: &PeerId) -> bool {
        self.seen.read().await.contains_key(peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_then_stale_then_fresh_again() {
        let d = LocalDiscovery::new();
        let peer = PeerId::random();
        let t0 = Utc::now();
        assert!(d.note_announcement(peer, t0).await);
        assert!(!d.note_announcement(peer, t0 + ChronoDuration::minutes(1)).await);
        assert!(d.note_announcement(peer, t0 + ChronoDuration::minutes(11)).await);
    }

    #[tokio::test]
    async fn expire_stale_removes_old_entries() {
        let d = LocalDiscovery::new();
        let peer = PeerId::random();
        let t0 = Utc::now();
        d.note_announcement(peer, t0).await;
        let removed = d.expire_stale(t0 + ChronoDuration::minutes(11)).await;
        assert_eq!(removed, 1);
        assert!(!d.is_connected(&peer).await);
    }
}
