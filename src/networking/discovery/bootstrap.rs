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

//! Bootstrap discovery: dial a configured address list with bounded retries,
//! then periodically redial to ride out transient splits.

use super::Discovery;
use crate::networking::swarm::SwarmHandle;
use async_trait::async_trait;
use libp2p::{Multiaddr, PeerId};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::warn;

const MAX_RETRIES: u32 = 3;
const RECONNECT_INTERVAL: Duration = Duration::from_secs(600);

/// Dials a fixed, configured set of bootstrap addresses.
pub struct BootstrapDiscovery {
    addrs: Vec<Multiaddr>,
    swarm: SwarmHandle,
    known: RwLock<BTreeSet<PeerId>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

fn parse_addrs(raw_addrs: &[String]) -> Vec<Multiaddr> {
    raw_addrs
        .iter()
        .filter_map(|s| match s.parse::<Multiaddr>() {
            Ok(a) => Some(a),
            Err(_) => {
                warn!(addr = %s, "unparseable bootstrap address, skipping");
                None
            }
        })
        .collect()
}

impl BootstrapDiscovery {
    /// Build from a list of multiaddr strings; unparseable entries are
    /// logged and skipped.
    pub fn new(swarm: SwarmHandle, raw_addrs: &[String]) -> Self {
        let addrs = parse_addrs(raw_addrs);
        Self { addrs, swarm, known: RwLock::new(BTreeSet::new()), task: Mutex::new(None) }
    }

    async fn dial_all_with_retries(addrs: &[Multiaddr], swarm: &SwarmHandle) {
        for addr in addrs {
            for attempt in 0..MAX_RETRIES {
                swarm.dial(addr.clone()).await;
                tokio::time::sleep(Duration::from_secs((attempt + 1) as u64)).await;
            }
        }
    }
}

#[async_trait]
impl Discovery for BootstrapDiscovery {
    /// Kick off the initial bounded-retry dial and the periodic redial in a
    /// single background task, so `start()` itself returns immediately
    /// regardless of how many bootstrap addresses are configured.
    async fn start(&self) {
        let addrs = self.addrs.clone();
        let swarm = self.swarm.clone();
        let handle = tokio::spawn(async move {
            Self::dial_all_with_retries(&addrs, &swarm).await;

            let mut ticker = tokio::time::interval(RECONNECT_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                for addr in &addrs {
                    swarm.dial(addr.clone()).await;
                }
            }
        });
        *self.task.lock().await = Some(handle);
    }

    async fn stop(&self) {
        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
        }
    }

    async fn connected_peers(&self) -> Vec<PeerId> {
        self.known.read().await.iter().copied().collect()
    }

    async fn is_connected(&self, peer: &PeerId) -> bool {
        self.known.read().await.contains(peer)
    }
}

impl BootstrapDiscovery {
    /// Record a peer connection observed elsewhere (the lifecycle manager
    /// forwards swarm connection events here so `connected_peers` stays
    /// accurate without this variant re-deriving connection state itself).
    pub async fn note_connected(&self, peer: PeerId) {
        self.known.write().await.insert(peer);
    }

    /// Record a peer disconnection.
    pub async fn note_disconnected(&self, peer: &PeerId) {
        self.known.write().await.remove(peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unparseable_addresses_are_skipped_not_fatal() {
        let addrs = parse_addrs(&["not-a-multiaddr".to_string(), "/ip4/127.0.0.1/tcp/9000".to_string()]);
        assert_eq!(addrs.len(), 1);
    }
}
