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

//! Publishing and per-topic receive dispatch on top of the swarm's gossipsub
//! behaviour. Application-level envelope verification happens here,
//! independently of gossipsub's own transport-level strict signing.

use super::peer_store::PeerStore;
use super::swarm::{expected_types_for_topic, SwarmHandle};
use crate::core::codec::{decode_payload, encode_payload, signing_input_bytes, CodecError, Envelope};
use crate::core::security::keystore::{verify_pubkey_bytes, FileEd25519Backend, Keystore};
use crate::core::types::{MessageType, PeerInfo};
use crate::monitoring::metrics::Metrics;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Pub/sub plane errors.
#[derive(Debug, thiserror::Error)]
pub enum PubsubError {
    /// Envelope construction or signing failed.
    #[error("codec: {0}")]
    Codec(#[from] CodecError),
}

/// Decoded and verified inbound message, ready for type-specific handling.
#[derive(Debug)]
pub struct VerifiedMessage {
    /// Wire topic it arrived on.
    pub topic: String,
    /// Sender's peer id as carried in the envelope.
    pub sender_id: String,
    /// Message type tag.
    pub msg_type: MessageType,
    /// Opaque payload bytes (decode with [`crate::core::codec::decode_payload`]).
    pub data: Vec<u8>,
}

/// Publishing half: builds, signs, and broadcasts an envelope for `payload`
/// under `msg_type` on `topic`.
pub async fn publish<T: Serialize>(
    swarm: &SwarmHandle,
    keystore: &Keystore<FileEd25519Backend>,
    local_id: &str,
    topic: &str,
    msg_type: MessageType,
    payload: &T,
) -> Result<(), PubsubError> {
    let data = encode_payload(payload)?;
    let mut envelope = Envelope::new(msg_type, local_id.to_string(), data);
    let sig = keystore
        .sign(&envelope.signing_input())
        .map_err(|_| CodecError::InvalidEnvelope("signing failed"))?;
    envelope.signature = Some(sig);
    let bytes = envelope.encode_full()?;
    swarm.publish(topic, bytes).await;
    Ok(())
}

/// Decode, verify, and filter one gossipsub payload against the topic's
/// expected message types. Returns `None` (and bumps the dropped-message
/// counter) on any decode, lookup, or signature failure.
pub async fn verify_inbound(
    peer_store: &PeerStore,
    metrics: &Metrics,
    topic: &str,
    raw: Vec<u8>,
) -> Option<VerifiedMessage> {
    let envelope = match Envelope::decode_full(&raw) {
        Ok(e) => e,
        Err(e) => {
            debug!(?e, topic, "envelope decode failed");
            metrics.pubsub_messages_dropped_total.inc();
            return None;
        }
    };

    let expected = expected_types_for_topic(topic);
    if !expected.is_empty() && !expected.contains(&envelope.msg_type) {
        debug!(topic, sender = %envelope.sender_id, "unexpected message type for topic");
        metrics.pubsub_messages_dropped_total.inc();
        return None;
    }

    let Ok((public_key, _alg)) = peer_store.public_key(&envelope.sender_id).await else {
        debug!(sender = %envelope.sender_id, "unknown sender, dropping message");
        metrics.pubsub_messages_dropped_total.inc();
        return None;
    };

    let signing_input = signing_input_bytes(envelope.msg_type, &envelope.data, &envelope.sender_id);
    let Some(sig) = envelope.signature.as_ref() else {
        metrics.pubsub_messages_dropped_total.inc();
        return None;
    };
    if verify_pubkey_bytes(&public_key, &signing_input, sig).is_err() {
        warn!(sender = %envelope.sender_id, "envelope signature verification failed");
        metrics.pubsub_messages_dropped_total.inc();
        return None;
    }

    metrics.pubsub_messages_received_total.inc();
    Some(VerifiedMessage {
        topic: topic.to_string(),
        sender_id: envelope.sender_id,
        msg_type: envelope.msg_type,
        data: envelope.data,
    })
}

/// Verify a `PeerDiscovery` announcement against the public key it carries
/// in its own payload, rather than against the peer store. This is the only
/// message type a peer can legitimately self-certify before it has ever
/// been registered, since [`verify_inbound`] requires the sender to already
/// be known. Returns the announced [`PeerInfo`] once the envelope's
/// signature is confirmed to match the key it claims.
pub async fn verify_announcement(metrics: &Metrics, raw: Vec<u8>) -> Option<PeerInfo> {
    let envelope = match Envelope::decode_full(&raw) {
        Ok(e) => e,
        Err(e) => {
            debug!(?e, "announcement decode failed");
            metrics.pubsub_messages_dropped_total.inc();
            return None;
        }
    };
    if envelope.msg_type != MessageType::PeerDiscovery {
        metrics.pubsub_messages_dropped_total.inc();
        return None;
    }

    let info: PeerInfo = match decode_payload(&envelope.data) {
        Ok(info) => info,
        Err(e) => {
            debug!(?e, "announcement payload decode failed");
            metrics.pubsub_messages_dropped_total.inc();
            return None;
        }
    };
    if info.peer_id != envelope.sender_id {
        warn!(sender = %envelope.sender_id, claimed = %info.peer_id, "announcement peer id mismatch");
        metrics.pubsub_messages_dropped_total.inc();
        return None;
    }
    let Ok(public_key) = <[u8; 32]>::try_from(info.public_key.as_slice()) else {
        warn!(sender = %envelope.sender_id, "announcement carries a malformed public key");
        metrics.pubsub_messages_dropped_total.inc();
        return None;
    };

    let signing_input = signing_input_bytes(envelope.msg_type, &envelope.data, &envelope.sender_id);
    let Some(sig) = envelope.signature.as_ref() else {
        metrics.pubsub_messages_dropped_total.inc();
        return None;
    };
    if verify_pubkey_bytes(&public_key, &signing_input, sig).is_err() {
        warn!(sender = %envelope.sender_id, "announcement signature verification failed");
        metrics.pubsub_messages_dropped_total.inc();
        return None;
    }

    metrics.pubsub_messages_received_total.inc();
    Some(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryRepository;
    use tempfile::tempdir;

    #[tokio::test]
    async fn tampered_signature_is_dropped() {
        let dir = tempdir().unwrap();
        let keystore = Keystore::open(dir.path().to_str().unwrap()).unwrap();
        let peer_store = PeerStore::new(Arc::new(InMemoryRepository::new()));
        let peer = crate::core::types::Peer::new(
            "sender-1".into(),
            "/ip4/127.0.0.1/tcp/9000".into(),
            keystore.public_key().to_vec(),
            crate::core::types::SigAlg::Ed25519,
        );
        peer_store.add(peer).await.unwrap();
        let metrics = Metrics::new().unwrap();

        let data = encode_payload(&"hello").unwrap();
        let mut envelope = Envelope::new(MessageType::PeerDiscovery, "sender-1".into(), data);
        envelope.signature = Some(crate::core::types::Signature(vec![0u8; 64]));
        let bytes = envelope.encode_full().unwrap();

        let result = verify_inbound(&peer_store, &metrics, "peer-discovery", bytes).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn unknown_sender_is_dropped() {
        let dir = tempdir().unwrap();
        let keystore = Keystore::open(dir.path().to_str().unwrap()).unwrap();
        let peer_store = PeerStore::new(Arc::new(InMemoryRepository::new()));
        let metrics = Metrics::new().unwrap();

        let data = encode_payload(&"hello").unwrap();
        let mut envelope = Envelope::new(MessageType::PeerDiscovery, "ghost".into(), data);
        let sig = keystore.sign(&envelope.signing_input()).unwrap();
        envelope.signature = Some(sig);
        let bytes = envelope.encode_full().unwrap();

        let result = verify_inbound(&peer_store, &metrics, "peer-discovery", bytes).await;
        assert!(result.is_none());
    }

    fn build_announcement(keystore: &Keystore<FileEd25519Backend>, peer_id: &str, key: Vec<u8>) -> Vec<u8> {
        let info = PeerInfo {
            peer_id: peer_id.to_string(),
            address: "/ip4/127.0.0.1/tcp/9000".into(),
            public_key: key,
            alg: crate::core::types::SigAlg::Ed25519,
        };
        let data = encode_payload(&info).unwrap();
        let mut envelope = Envelope::new(MessageType::PeerDiscovery, peer_id.to_string(), data);
        let sig = keystore.sign(&envelope.signing_input()).unwrap();
        envelope.signature = Some(sig);
        envelope.encode_full().unwrap()
    }

    #[tokio::test]
    async fn announcement_self_certifies_an_unknown_peer() {
        let dir = tempdir().unwrap();
        let keystore = Keystore::open(dir.path().to_str().unwrap()).unwrap();
        let metrics = Metrics::new().unwrap();

        let bytes = build_announcement(&keystore, "peer-a", keystore.public_key().to_vec());
        let info = verify_announcement(&metrics, bytes).await.unwrap();
        assert_eq!(info.peer_id, "peer-a");
        assert_eq!(info.public_key, keystore.public_key().to_vec());
    }

    #[tokio::test]
    async fn announcement_with_mismatched_peer_id_is_dropped() {
        let dir = tempdir().unwrap();
        let keystore = Keystore::open(dir.path().to_str().unwrap()).unwrap();
        let metrics = Metrics::new().unwrap();

        let info = PeerInfo {
            peer_id: "someone-else".into(),
            address: "/ip4/127.0.0.1/tcp/9000".into(),
            public_key: keystore.public_key().to_vec(),
            alg: crate::core::types::SigAlg::Ed25519,
        };
        let data = encode_payload(&info).unwrap();
        let mut envelope = Envelope::new(MessageType::PeerDiscovery, "peer-a".into(), data);
        let sig = keystore.sign(&envelope.signing_input()).unwrap();
        envelope.signature = Some(sig);
        let bytes = envelope.encode_full().unwrap();

        assert!(verify_announcement(&metrics, bytes).await.is_none());
    }

    #[tokio::test]
    async fn announcement_signed_by_a_different_key_than_it_claims_is_dropped() {
        let dir_a = tempdir().unwrap();
        let dir_b = tempdir().unwrap();
        let signer = Keystore::open(dir_a.path().to_str().unwrap()).unwrap();
        let claimed = Keystore::open(dir_b.path().to_str().unwrap()).unwrap();
        let metrics = Metrics::new().unwrap();

        let bytes = build_announcement(&signer, "peer-a", claimed.public_key().to_vec());
        assert!(verify_announcement(&metrics, bytes).await.is_none());
    }
}
