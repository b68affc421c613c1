//! Cross-checking of swarm-replicated responses.
//!
//! Expiry updates are confirmed by every storage node individually: each
//! node signs a canonical byte sequence over what it applied. A response
//! without a signature, or with one that fails verification, is rejected;
//! with the all-or-nothing quorum (`required_successful_responses = -1`) a
//! single bad node fails the whole call.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use tracing::warn;

use crate::error::{NetError, Result};
use crate::responses::{NodeExpireResult, SwarmExpireResponse};

/// All swarm members must validate.
pub const REQUIRE_ALL: i32 = -1;

/// Canonical byte sequence a node's expiry confirmation signs:
/// `swarm_pk ‖ applied_expiry ‖ requested_hashes ‖ sorted(updated) ‖
/// sorted-by-hash(unchanged hash‖expiry pairs)`.
fn confirmation_bytes(
    swarm_pubkey_hex: &str,
    applied_expiry: u64,
    requested_hashes: &[String],
    node: &NodeExpireResult,
) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(swarm_pubkey_hex.as_bytes());
    bytes.extend_from_slice(applied_expiry.to_string().as_bytes());
    for hash in requested_hashes {
        bytes.extend_from_slice(hash.as_bytes());
    }

    let mut updated: Vec<&String> = node.updated.iter().collect();
    updated.sort();
    for hash in updated {
        bytes.extend_from_slice(hash.as_bytes());
    }

    // BTreeMap iteration is already hash-ordered.
    for (hash, expiry) in &node.unchanged {
        bytes.extend_from_slice(hash.as_bytes());
        bytes.extend_from_slice(expiry.to_string().as_bytes());
    }
    bytes
}

fn node_validates(
    node_pubkey_hex: &str,
    swarm_pubkey_hex: &str,
    requested_hashes: &[String],
    node: &NodeExpireResult,
) -> bool {
    if node.failed {
        return false;
    }
    let (Some(expiry), Some(signature_b64)) = (node.expiry, node.signature.as_ref()) else {
        return false;
    };

    let Ok(pubkey_bytes) = hex::decode(node_pubkey_hex) else {
        return false;
    };
    let Ok(pubkey_bytes) = <[u8; 32]>::try_from(pubkey_bytes.as_slice()) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&pubkey_bytes) else {
        return false;
    };

    let Ok(signature_bytes) = BASE64.decode(signature_b64) else {
        return false;
    };
    let Ok(signature_bytes) = <[u8; 64]>::try_from(signature_bytes.as_slice()) else {
        return false;
    };
    let signature = Signature::from_bytes(&signature_bytes);

    let message = confirmation_bytes(swarm_pubkey_hex, expiry, requested_hashes, node);
    verifying_key.verify(&message, &signature).is_ok()
}

/// Validate a swarm expiry-update response.
///
/// Returns the applied expiry confirmed by the swarm. With
/// `required_successful = REQUIRE_ALL`, every node response must carry a
/// valid signature; otherwise at least `required_successful` must.
pub fn validate_expiry_update(
    swarm_pubkey_hex: &str,
    requested_hashes: &[String],
    required_successful: i32,
    response: &SwarmExpireResponse,
) -> Result<u64> {
    if response.swarm.is_empty() {
        return Err(NetError::ParsingFailed(
            "expiry response contained no swarm members".to_string(),
        ));
    }

    let mut valid = 0usize;
    let mut applied_expiry = None;

    for (node_pubkey, node) in &response.swarm {
        if node_validates(node_pubkey, swarm_pubkey_hex, requested_hashes, node) {
            valid += 1;
            applied_expiry = applied_expiry.or(node.expiry);
        } else {
            warn!(node = %node_pubkey, "swarm member failed expiry confirmation check");
            if required_successful == REQUIRE_ALL {
                return Err(NetError::SignatureVerificationFailed);
            }
        }
    }

    if required_successful != REQUIRE_ALL && (valid as i32) < required_successful {
        return Err(NetError::SignatureVerificationFailed);
    }

    applied_expiry.ok_or(NetError::SignatureVerificationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use std::collections::BTreeMap;

    fn signed_node(
        key: &SigningKey,
        swarm_pubkey_hex: &str,
        requested: &[String],
        expiry: u64,
        updated: Vec<String>,
        unchanged: BTreeMap<String, u64>,
    ) -> NodeExpireResult {
        let mut node = NodeExpireResult {
            failed: false,
            expiry: Some(expiry),
            updated,
            unchanged,
            signature: None,
        };
        let message = confirmation_bytes(swarm_pubkey_hex, expiry, requested, &node);
        node.signature = Some(BASE64.encode(key.sign(&message).to_bytes()));
        node
    }

    fn build_swarm(n: usize, tamper_last: bool) -> (Vec<String>, SwarmExpireResponse) {
        let swarm_pk = "05ab".repeat(16);
        let requested = vec!["hashA".to_string(), "hashB".to_string()];
        let mut swarm = BTreeMap::new();

        for i in 0..n {
            let key = SigningKey::from_bytes(&[i as u8 + 1; 32]);
            let mut node = signed_node(
                &key,
                &swarm_pk,
                &requested,
                1_700_000_000_000,
                vec!["hashB".to_string(), "hashA".to_string()],
                BTreeMap::new(),
            );
            if tamper_last && i == n - 1 {
                node.signature = Some(BASE64.encode([0u8; 64]));
            }
            swarm.insert(hex::encode(key.verifying_key().to_bytes()), node);
        }
        (requested, SwarmExpireResponse { swarm })
    }

    #[test]
    fn test_all_valid_passes() {
        let (requested, response) = build_swarm(5, false);
        let expiry =
            validate_expiry_update(&"05ab".repeat(16), &requested, REQUIRE_ALL, &response)
                .unwrap();
        assert_eq!(expiry, 1_700_000_000_000);
    }

    #[test]
    fn test_one_bad_signature_fails_whole_call() {
        let (requested, response) = build_swarm(5, true);
        assert!(matches!(
            validate_expiry_update(&"05ab".repeat(16), &requested, REQUIRE_ALL, &response),
            Err(NetError::SignatureVerificationFailed)
        ));
    }

    #[test]
    fn test_partial_quorum_when_configured() {
        let (requested, response) = build_swarm(5, true);
        // 4 of 5 valid; a threshold of 4 passes, 5 fails.
        assert!(validate_expiry_update(&"05ab".repeat(16), &requested, 4, &response).is_ok());
        assert!(validate_expiry_update(&"05ab".repeat(16), &requested, 5, &response).is_err());
    }

    #[test]
    fn test_missing_signature_rejected() {
        let (requested, mut response) = build_swarm(1, false);
        for node in response.swarm.values_mut() {
            node.signature = None;
        }
        assert!(matches!(
            validate_expiry_update(&"05ab".repeat(16), &requested, REQUIRE_ALL, &response),
            Err(NetError::SignatureVerificationFailed)
        ));
    }

    #[test]
    fn test_empty_swarm_is_parsing_failed() {
        let response = SwarmExpireResponse { swarm: BTreeMap::new() };
        assert!(matches!(
            validate_expiry_update("05", &[], REQUIRE_ALL, &response),
            Err(NetError::ParsingFailed(_))
        ));
    }
}
