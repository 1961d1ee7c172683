#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Pluggable peer discovery. Three variants run concurrently under the
//! lifecycle manager: bootstrap list dialing, DHT provider lookup, and
//! local-network mDNS announcements.

mod bootstrap;
mod dht;
mod local;

pub use bootstrap::BootstrapDiscovery;
pub use dht::DhtDiscovery;
pub use local::LocalDiscovery;

use async_trait::async_trait;
use libp2p::PeerId;

/// Common surface every discovery variant exposes to the lifecycle manager.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Start background discovery activity.
    async fn start(&self);
    /// Stop background discovery activity.
    async fn stop(&self);
    /// Peers this variant currently considers connected/known.
    async fn connected_peers(&self) -> Vec<PeerId>;
    /// Whether `peer` is currently known by this variant.
    async fn is_connected(&self, peer: &PeerId) -> bool;
}
