#![forbid(unsafe_code)]

use marketmesh::core::codec::{signing_input_bytes, Envelope};
use marketmesh::core::security::keystore::{verify, Keystore};
use marketmesh::core::types::{MessageType, SigAlg};

#[test]
fn envelope_signed_by_a_keystore_verifies_against_its_public_key() {
    let dir = tempfile::tempdir().unwrap();
    let keystore = Keystore::open(dir.path().to_str().unwrap()).unwrap();
    let pk = keystore.public_key();

    let mut envelope = Envelope::new(MessageType::MarketData, "peer-a".to_string(), b"{\"symbol\":\"AAPL\"}".to_vec());
    let input = signing_input_bytes(envelope.msg_type, &envelope.data, &envelope.sender_id);
    let sig = keystore.sign(&input).unwrap();
    envelope.signature = Some(sig.clone());
    envelope.alg = SigAlg::Ed25519;

    assert!(verify(&input, &sig, &pk));

    let encoded = envelope.encode_full().unwrap();
    let decoded = Envelope::decode_full(&encoded).unwrap();
    assert_eq!(decoded.sender_id, "peer-a");
    assert_eq!(decoded.data, envelope.data);
    assert!(verify(&signing_input_bytes(decoded.msg_type, &decoded.data, &decoded.sender_id), decoded.signature.as_ref().unwrap(), &pk));
}

#[test]
fn tampering_with_the_payload_breaks_verification() {
    let dir = tempfile::tempdir().unwrap();
    let keystore = Keystore::open(dir.path().to_str().unwrap()).unwrap();
    let pk = keystore.public_key();

    let envelope = Envelope::new(MessageType::Vote, "peer-b".to_string(), b"{\"valid\":true}".to_vec());
    let input = signing_input_bytes(envelope.msg_type, &envelope.data, &envelope.sender_id);
    let sig = keystore.sign(&input).unwrap();

    let forged_input = signing_input_bytes(envelope.msg_type, b"{\"valid\":false}", &envelope.sender_id);
    assert!(!verify(&forged_input, &sig, &pk));
}
