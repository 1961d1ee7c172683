#![forbid(unsafe_code)]
#![allow(missing_docs)]

//! Networking: libp2p transport, peer directory, discovery, lifecycle,
//! pub/sub plane, and the authority RPC service.

pub mod authority;
pub mod discovery;
pub mod lifecycle;
pub mod p2p_identity;
pub mod peer_store;
pub mod pubsub;
pub mod swarm;
