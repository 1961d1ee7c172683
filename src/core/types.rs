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

//! Core data model: records, votes, peers, envelopes, and canonical hashing.

use chrono::{DateTime, Utc};
use ring::digest;
use std::collections::{BTreeMap, BTreeSet};

/// Detached signature bytes (64 for Ed25519).
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Signature(pub Vec<u8>);

/// Signature algorithm tag carried by every envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SigAlg {
    /// Ed25519 (the only algorithm this implementation exercises end-to-end).
    Ed25519,
}

/// Data type carried by a [`MarketDataRecord`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DataType {
    /// End-of-day quote.
    Eod,
    /// Dividend announcement.
    Dividend,
    /// Stock split.
    Split,
    /// Insider trade disclosure.
    InsiderTrade,
}

/// Typed payload of a [`MarketDataRecord`], one variant per [`DataType`].
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind")]
pub enum RecordPayload {
    /// End-of-day OHLCV quote.
    Eod {
        /// Opening price.
        open: f64,
        /// High price.
        high: f64,
        /// Low price.
        low: f64,
        /// Closing price.
        close: f64,
        /// Traded volume.
        volume: u64,
    },
    /// Dividend payload.
    Dividend {
        /// Ex-dividend date.
        ex_date: DateTime<Utc>,
        /// Dividend amount per share.
        amount: f64,
        /// ISO-4217 currency code.
        currency: String,
    },
    /// Stock split payload.
    Split {
        /// "From" side of the ratio (e.g. 1 in a 1-for-2 split).
        ratio_from: u32,
        /// "To" side of the ratio (e.g. 2 in a 1-for-2 split).
        ratio_to: u32,
    },
    /// Insider trade disclosure payload.
    InsiderTrade {
        /// Reporting insider's name or identifier.
        insider: String,
        /// Number of shares transacted.
        shares: u64,
        /// Price per share.
        price: f64,
        /// Free-form transaction type (e.g. "buy", "sell").
        transaction_type: String,
    },
}

/// Canonical record published and voted on by the network.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct MarketDataRecord {
    /// Universally unique identifier.
    pub id: String,
    /// Ticker symbol; must be non-empty.
    pub symbol: String,
    /// Record kind.
    pub data_type: DataType,
    /// UTC timestamp the record pertains to; must be non-zero.
    pub timestamp: DateTime<Utc>,
    /// Non-empty origin tag (e.g. "nasdaq").
    pub source: String,
    /// Typed payload fields.
    pub payload: RecordPayload,
    /// Aggregate validation score in `[0, 1]`.
    pub validation_score: f64,
    /// Digest of the canonical encoding of `(symbol, data_type, payload, timestamp, source)`.
    pub content_hash: [u8; 32],
    /// Validator id -> detached signature. Append-only within a record's lifetime.
    pub signatures: BTreeMap<String, Signature>,
    /// Free-form metadata.
    pub metadata: BTreeMap<String, String>,
}

const RECORD_HASH_DOMAIN: &[u8] = b"marketmesh-record-v1";

fn push_f64(buf: &mut Vec<u8>, v: f64) {
    buf.extend_from_slice(&v.to_bits().to_be_bytes());
}

/// Compute `contentHash` as a pure function of the fields that define record
/// identity. Every `f64` is encoded as its IEEE-754 big-endian bit pattern so
/// the hash is stable across platforms and languages.
pub fn compute_content_hash(
    symbol: &str,
    data_type: DataType,
    payload: &RecordPayload,
    timestamp: DateTime<Utc>,
    source: &str,
) -> [u8; 32] {
    let mut buf = Vec::new();
    buf.extend_from_slice(RECORD_HASH_DOMAIN);
    buf.extend_from_slice(symbol.as_bytes());
    buf.push(0);
    buf.push(data_type as u8);
    match payload {
        RecordPayload::Eod { open, high, low, close, volume } => {
            push_f64(&mut buf, *open);
            push_f64(&mut buf, *high);
            push_f64(&mut buf, *low);
            push_f64(&mut buf, *close);
            buf.extend_from_slice(&volume.to_be_bytes());
        }
        RecordPayload::Dividend { ex_date, amount, currency } => {
            buf.extend_from_slice(&ex_date.timestamp_millis().to_be_bytes());
            push_f64(&mut buf, *amount);
            buf.extend_from_slice(currency.as_bytes());
        }
        RecordPayload::Split { ratio_from, ratio_to } => {
            buf.extend_from_slice(&ratio_from.to_be_bytes());
            buf.extend_from_slice(&ratio_to.to_be_bytes());
        }
        RecordPayload::InsiderTrade { insider, shares, price, transaction_type } => {
            buf.extend_from_slice(insider.as_bytes());
            buf.push(0);
            buf.extend_from_slice(&shares.to_be_bytes());
            push_f64(&mut buf, *price);
            buf.extend_from_slice(transaction_type.as_bytes());
        }
    }
    buf.extend_from_slice(&timestamp.timestamp_millis().to_be_bytes());
    buf.extend_from_slice(source.as_bytes());

    let digest = digest::digest(&digest::SHA256, &buf);
    let mut out = [0u8; 32];
    out.copy_from_slice(digest.as_ref());
    out
}

impl MarketDataRecord {
    /// Recompute and store `content_hash` from the current field values.
    /// Must be called after mutating any field that contributes to the hash.
    pub fn refresh_hash(&mut self) {
        self.content_hash = compute_content_hash(
            &self.symbol,
            self.data_type,
            &self.payload,
            self.timestamp,
            &self.source,
        );
    }
}

/// A signed opinion about a record's validity. Immutable once constructed.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Vote {
    /// Unique id.
    pub id: String,
    /// Record this vote pertains to.
    pub record_id: String,
    /// Casting validator's id.
    pub validator_id: String,
    /// Whether the validator considers the record valid.
    pub is_valid: bool,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// UTC cast time.
    pub timestamp: DateTime<Utc>,
    /// Detached signature; required (votes without one fail validation).
    pub signature: Signature,
    /// Optional free-text justification.
    pub reason: Option<String>,
}

/// Lifecycle state of a [`crate::voting::session::VotingSession`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SessionStatus {
    /// Collecting votes.
    Active,
    /// Quorum reached; terminal.
    Complete,
    /// Timed out or cancelled; terminal.
    Failed,
}

/// Connectivity status of a [`Peer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PeerStatus {
    /// Reachable and counted against connection bounds.
    Active,
    /// Disconnected by the lifecycle manager; retained for history.
    Pruned,
}

/// Network participant.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Peer {
    /// Id derived from the peer's public key (libp2p `PeerId` string form).
    pub id: String,
    /// Last known dialable address.
    pub address: String,
    /// Raw public key bytes.
    pub public_key: Vec<u8>,
    /// Key algorithm.
    pub alg: SigAlg,
    /// Reputation score in `[0, 1]`; mutated only by the reputation manager.
    pub reputation: f64,
    /// Role tags; `"authority"` grants validation-service privileges.
    pub roles: BTreeSet<String>,
    /// Last time this peer was observed active; mutated only by the
    /// lifecycle manager.
    pub last_seen: DateTime<Utc>,
    /// Connectivity status.
    pub status: PeerStatus,
    /// Free-form metadata.
    pub metadata: BTreeMap<String, String>,
}

impl Peer {
    /// Construct a freshly-discovered peer with the default reputation.
    pub fn new(id: String, address: String, public_key: Vec<u8>, alg: SigAlg) -> Self {
        Self {
            id,
            address,
            public_key,
            alg,
            reputation: 0.5,
            roles: BTreeSet::new(),
            last_seen: Utc::now(),
            status: PeerStatus::Active,
            metadata: BTreeMap::new(),
        }
    }

    /// Whether this peer holds the `authority` role.
    pub fn is_authority(&self) -> bool {
        self.roles.contains("authority")
    }
}

/// Time-bounded authorization lease held by the authority service for a
/// verified peer.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct VerifiedPeer {
    /// Verified peer's id.
    pub peer_id: String,
    /// Granted action permissions; `"admin"` is a wildcard.
    pub permissions: BTreeSet<String>,
    /// Lease expiry.
    pub valid_until: DateTime<Utc>,
    /// Last (re-)verification time.
    pub last_verified: DateTime<Utc>,
}

impl VerifiedPeer {
    /// Whether `action` is permitted at `now`.
    pub fn authorizes(&self, action: &str, now: DateTime<Utc>) -> bool {
        now < self.valid_until
            && (self.permissions.contains("admin") || self.permissions.contains(action))
    }
}

/// Status of an economic [`Stake`] binding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum StakeStatus {
    /// Bound and not yet expired (subject also to `expires_at`).
    Active,
    /// Explicitly closed.
    Closed,
}

/// Optional economic binding of a peer to a purpose. Not referenced by the
/// core protocol; persisted as first-class state for external consumers.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Stake {
    /// Staking peer's id.
    pub peer_id: String,
    /// Staked amount; must be `> 0`.
    pub amount: u64,
    /// Free-form purpose tag.
    pub purpose: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Expiry time.
    pub expires_at: DateTime<Utc>,
    /// Current status.
    pub status: StakeStatus,
}

impl Stake {
    /// A stake is active iff `status == Active` and `now < expires_at`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status == StakeStatus::Active && now < self.expires_at
    }
}

/// Wire-level message type tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageType {
    /// Payload is a [`MarketDataRecord`].
    MarketData,
    /// Payload is a [`ValidationRequest`].
    ValidationRequest,
    /// Payload is a [`ValidationResponse`].
    ValidationResponse,
    /// Payload is a [`ValidationResult`].
    ValidationResult,
    /// Payload is a [`Vote`].
    Vote,
    /// Payload is peer address info.
    PeerDiscovery,
    /// Payload is an [`ErrorPayload`].
    Error,
}

/// Payload for [`MessageType::ValidationRequest`].
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ValidationRequest {
    /// Record(s) to validate.
    pub records: Vec<MarketDataRecord>,
    /// Id of the peer asking for validation.
    pub requester_id: String,
}

/// Per-record validation verdict.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ValidationResult {
    /// Record id this verdict is about.
    pub record_id: String,
    /// Whether the record passed validation.
    pub is_valid: bool,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Present when `is_valid == false`.
    pub error_msg: Option<String>,
}

/// Payload for [`MessageType::ValidationResponse`] — the batch reply.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ValidationResponse {
    /// Per-item results, preserving request order.
    pub results: Vec<ValidationResult>,
}

/// Payload for [`MessageType::Error`].
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ErrorPayload {
    /// Numeric error code (e.g. 500).
    pub code: u32,
    /// Human-readable message.
    pub message: String,
    /// Free-form details.
    pub details: Option<String>,
}

/// Peer address info, the `PeerDiscovery` payload. Self-certifying: the
/// embedded `public_key` is checked against the envelope's own signature by
/// [`crate::networking::pubsub::verify_announcement`], so a first-contact
/// peer can register itself without already being in the peer store.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct PeerInfo {
    /// Advertising peer's id.
    pub peer_id: String,
    /// Dialable address.
    pub address: String,
    /// Application-level public key backing the envelope signature.
    pub public_key: Vec<u8>,
    /// Signature algorithm `public_key` is for.
    pub alg: SigAlg,
}
