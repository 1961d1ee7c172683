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

//! Envelope codec: the self-describing JSON wire form, and the
//! byte-stable signature-input form used to sign and verify envelopes.

use crate::core::types::{MessageType, SigAlg, Signature};
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Codec errors.
#[derive(Debug, Error)]
pub enum CodecError {
    /// JSON (de)serialization failed.
    #[error("serialization")]
    Serialize,
    /// The `type` field did not match a known [`MessageType`].
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),
    /// A required envelope field was empty, zero, or missing.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(&'static str),
}

/// Signed (or about-to-be-signed) wire frame carrying one application
/// message. `data` holds the decoded, type-specific JSON payload bytes.
#[derive(Clone, Debug)]
pub struct Envelope {
    /// Message type tag.
    pub msg_type: MessageType,
    /// Wire format version.
    pub version: u32,
    /// Unique message id.
    pub id: String,
    /// UTC send time.
    pub timestamp: DateTime<Utc>,
    /// Sending peer's id.
    pub sender_id: String,
    /// Opaque payload bytes (type-specific JSON, pre-signature).
    pub data: Vec<u8>,
    /// Detached signature over the signature-input form. `None` only for
    /// locally constructed, not-yet-sent messages.
    pub signature: Option<Signature>,
    /// Signature algorithm.
    pub alg: SigAlg,
    /// Free-form metadata.
    pub metadata: Option<BTreeMap<String, String>>,
}

const WIRE_VERSION: u32 = 1;

fn type_tag(t: MessageType) -> &'static str {
    match t {
        MessageType::MarketData => "MarketData",
        MessageType::ValidationRequest => "ValidationRequest",
        MessageType::ValidationResponse => "ValidationResponse",
        MessageType::ValidationResult => "ValidationResult",
        MessageType::Vote => "Vote",
        MessageType::PeerDiscovery => "PeerDiscovery",
        MessageType::Error => "Error",
    }
}

fn type_from_tag(tag: &str) -> Option<MessageType> {
    Some(match tag {
        "MarketData" => MessageType::MarketData,
        "ValidationRequest" => MessageType::ValidationRequest,
        "ValidationResponse" => MessageType::ValidationResponse,
        "ValidationResult" => MessageType::ValidationResult,
        "Vote" => MessageType::Vote,
        "PeerDiscovery" => MessageType::PeerDiscovery,
        "Error" => MessageType::Error,
        _ => return None,
    })
}

#[derive(Serialize, Deserialize)]
struct EnvelopeWire {
    #[serde(rename = "type")]
    type_tag: String,
    version: u32,
    id: String,
    timestamp: DateTime<Utc>,
    #[serde(rename = "senderId")]
    sender_id: String,
    alg: SigAlg,
    /// Base64 of the opaque payload bytes.
    data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<BTreeMap<String, String>>,
}

impl Envelope {
    /// Build a fresh, unsigned envelope ready for [`signing_input`] + signing.
    pub fn new(msg_type: MessageType, sender_id: String, data: Vec<u8>) -> Self {
        Self {
            msg_type,
            version: WIRE_VERSION,
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            sender_id,
            data,
            signature: None,
            alg: SigAlg::Ed25519,
            metadata: None,
        }
    }

    fn validate(&self, require_signature: bool) -> Result<(), CodecError> {
        if self.id.is_empty() {
            return Err(CodecError::InvalidEnvelope("id"));
        }
        if self.timestamp.timestamp_millis() == 0 {
            return Err(CodecError::InvalidEnvelope("timestamp"));
        }
        if self.sender_id.is_empty() {
            return Err(CodecError::InvalidEnvelope("senderId"));
        }
        if require_signature && self.signature.is_none() {
            return Err(CodecError::InvalidEnvelope("signature"));
        }
        Ok(())
    }

    /// Encode the full wire form (for transmission). Requires a signature to
    /// already be attached.
    pub fn encode_full(&self) -> Result<Vec<u8>, CodecError> {
        self.validate(true)?;
        let wire = EnvelopeWire {
            type_tag: type_tag(self.msg_type).to_string(),
            version: self.version,
            id: self.id.clone(),
            timestamp: self.timestamp,
            sender_id: self.sender_id.clone(),
            alg: self.alg,
            data: B64.encode(&self.data),
            signature: self.signature.as_ref().map(|s| B64.encode(&s.0)),
            metadata: self.metadata.clone(),
        };
        serde_json::to_vec(&wire).map_err(|_| CodecError::Serialize)
    }

    /// Decode the full wire form, validating required fields. Unknown
    /// `type` tags fail with [`CodecError::UnknownMessageType`].
    pub fn decode_full(bytes: &[u8]) -> Result<Self, CodecError> {
        let wire: EnvelopeWire = serde_json::from_slice(bytes).map_err(|_| CodecError::Serialize)?;
        let msg_type = type_from_tag(&wire.type_tag)
            .ok_or_else(|| CodecError::UnknownMessageType(wire.type_tag.clone()))?;
        let data = B64.decode(wire.data.as_bytes()).map_err(|_| CodecError::Serialize)?;
        let signature = match wire.signature {
            Some(s) => Some(Signature(B64.decode(s.as_bytes()).map_err(|_| CodecError::Serialize)?)),
            None => None,
        };
        let env = Envelope {
            msg_type,
            version: wire.version,
            id: wire.id,
            timestamp: wire.timestamp,
            sender_id: wire.sender_id,
            data,
            signature,
            alg: wire.alg,
            metadata: wire.metadata,
        };
        env.validate(true)?;
        Ok(env)
    }

    /// Byte-stable signature-input form: `type || 0x00 || data || 0x00 ||
    /// senderId`. Never includes `signature`; field order is fixed
    /// regardless of struct field order so independent implementations
    /// agree on the bytes being signed.
    pub fn signing_input(&self) -> Vec<u8> {
        signing_input_bytes(self.msg_type, &self.data, &self.sender_id)
    }
}

/// Free function form of [`Envelope::signing_input`], usable before an
/// `Envelope` is fully constructed.
pub fn signing_input_bytes(msg_type: MessageType, data: &[u8], sender_id: &str) -> Vec<u8> {
    let tag = type_tag(msg_type).as_bytes();
    let mut out = Vec::with_capacity(tag.len() + data.len() + sender_id.len() + 2);
    out.extend_from_slice(tag);
    out.push(0);
    out.extend_from_slice(data);
    out.push(0);
    out.extend_from_slice(sender_id.as_bytes());
    out
}

/// Serialize a typed payload to the opaque bytes stored in `data`.
pub fn encode_payload<T: Serialize>(payload: &T) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(payload).map_err(|_| CodecError::Serialize)
}

/// Deserialize `data` into a typed payload.
pub fn decode_payload<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, CodecError> {
    serde_json::from_slice(data).map_err(|_| CodecError::Serialize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signing_input_excludes_signature_and_is_stable() {
        let mut env = Envelope::new(MessageType::Vote, "peer-a".into(), b"payload".to_vec());
        let first = env.signing_input();
        env.signature = Some(Signature(vec![1, 2, 3]));
        let second = env.signing_input();
        assert_eq!(first, second);
    }

    #[test]
    fn unknown_type_tag_rejected() {
        let wire = serde_json::json!({
            "type": "NotARealType",
            "version": 1,
            "id": "x",
            "timestamp": Utc::now().to_rfc3339(),
            "senderId": "peer-a",
            "alg": "ed25519",
            "data": B64.encode(b"x"),
            "signature": B64.encode([0u8; 64]),
        });
        let bytes = serde_json::to_vec(&wire).unwrap();
        let err = Envelope::decode_full(&bytes).unwrap_err();
        assert!(matches!(err, CodecError::UnknownMessageType(_)));
    }

    #[test]
    fn missing_signature_rejected() {
        let env = Envelope::new(MessageType::Vote, "peer-a".into(), b"payload".to_vec());
        assert!(env.encode_full().is_err());
    }
}
