//! Per-request authentication.
//!
//! [`sign`] picks the concrete signing scheme from the [`AuthMethod`]
//! attached to a request: community destinations that support (or force)
//! blinding get a per-server blinded15 signature, everything else falls
//! back to the caller-specified scheme. [`signature_headers`] produces the
//! full header set a community server expects, with a fresh nonce per
//! call.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, Verifier};
use rand::RngCore;
use std::collections::BTreeMap;

use crate::blinding::{self, BlindedKeyPair};
use crate::clock::Clock;
use crate::constants::{
    CAPABILITY_BLIND, HEADER_NONCE, HEADER_PUBKEY, HEADER_SIGNATURE, HEADER_TIMESTAMP,
    REQUEST_NONCE_SIZE, SIGNATURE_SIZE,
};
use crate::error::AuthError;
use crate::identity::Identity;
use crate::types::{AccountId, Capabilities};

/// Concrete signing scheme applied to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningScheme {
    /// Derived standard-scheme keypair (the account's `05`-prefixed id).
    Standard,
    /// Raw Ed25519 identity key (`00`-prefixed id).
    Unblinded,
    /// Per-server blinded keypair, scheme 15.
    Blinded15,
    /// Per-server blinded keypair, scheme 25.
    Blinded25,
}

/// How a request authenticates. Immutable per request; constructed fresh
/// from caller context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMethod {
    Standard,
    Unblinded,
    Blinded15 { server_pubkey: [u8; 32] },
    Blinded25 { server_pubkey: [u8; 32] },
    /// Community server auth: scheme resolution depends on the server's
    /// advertised capabilities. `capabilities: None` means they have not
    /// been fetched yet, which is an error when blinding is forced.
    Community {
        server_pubkey: [u8; 32],
        capabilities: Option<Capabilities>,
        force_blinded: bool,
    },
    /// Revocable group subaccount: signs with the standard scheme and
    /// carries an admin-issued token the server checks alongside the
    /// signature.
    Subaccount {
        group: AccountId,
        auth_token: Vec<u8>,
    },
}

impl AuthMethod {
    /// Server pubkey the canonical verification bytes are bound to, when
    /// the destination has one.
    pub fn server_pubkey(&self) -> Option<&[u8; 32]> {
        match self {
            AuthMethod::Blinded15 { server_pubkey }
            | AuthMethod::Blinded25 { server_pubkey }
            | AuthMethod::Community { server_pubkey, .. } => Some(server_pubkey),
            _ => None,
        }
    }
}

/// Result of signing: the scheme used, the public key to verify against
/// and the 64-byte signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSignature {
    pub scheme: SigningScheme,
    pub public_key: [u8; 32],
    pub signature: [u8; SIGNATURE_SIZE],
}

impl AuthSignature {
    pub fn account_id(&self) -> AccountId {
        match self.scheme {
            SigningScheme::Standard => AccountId::standard(self.public_key),
            SigningScheme::Unblinded => AccountId::unblinded(self.public_key),
            SigningScheme::Blinded15 => AccountId::blinded15(self.public_key),
            SigningScheme::Blinded25 => AccountId::blinded25(self.public_key),
        }
    }

    /// Verify this signature over `message` with the embedded public key.
    pub fn verify(&self, message: &[u8]) -> Result<(), AuthError> {
        match self.scheme {
            SigningScheme::Standard | SigningScheme::Unblinded => {
                let key = ed25519_dalek::VerifyingKey::from_bytes(&self.public_key)
                    .map_err(|_| AuthError::VerificationFailed)?;
                let sig = Signature::from_bytes(&self.signature);
                key.verify(message, &sig)
                    .map_err(|_| AuthError::VerificationFailed)
            }
            SigningScheme::Blinded15 | SigningScheme::Blinded25 => {
                blinding::verify(&self.public_key, message, &self.signature)
            }
        }
    }
}

/// Resolve the scheme an auth method signs with, honoring the blinding
/// capability and the caller's fallback.
fn resolve_scheme(auth: &AuthMethod, fallback: SigningScheme) -> Result<SigningScheme, AuthError> {
    match auth {
        AuthMethod::Standard => Ok(SigningScheme::Standard),
        AuthMethod::Unblinded => Ok(SigningScheme::Unblinded),
        AuthMethod::Blinded15 { .. } => Ok(SigningScheme::Blinded15),
        AuthMethod::Blinded25 { .. } => Ok(SigningScheme::Blinded25),
        AuthMethod::Subaccount { .. } => Ok(SigningScheme::Standard),
        AuthMethod::Community {
            capabilities,
            force_blinded,
            ..
        } => match capabilities {
            Some(caps) if caps.supports(CAPABILITY_BLIND) => Ok(SigningScheme::Blinded15),
            Some(_) if *force_blinded => Ok(SigningScheme::Blinded15),
            Some(_) => Ok(fallback),
            None if *force_blinded => Err(AuthError::CapabilitiesUnresolved),
            None => Ok(fallback),
        },
    }
}

/// Sign `message` under `auth`, falling back to `fallback` when the
/// method leaves the scheme open.
pub fn sign(
    identity: Option<&Identity>,
    message: &[u8],
    auth: &AuthMethod,
    fallback: SigningScheme,
) -> Result<AuthSignature, AuthError> {
    let identity = identity.ok_or_else(|| {
        AuthError::SigningFailed("no local identity keys available".to_string())
    })?;

    let scheme = resolve_scheme(auth, fallback)?;

    match scheme {
        SigningScheme::Unblinded => {
            let sig = identity.sign(message);
            Ok(AuthSignature {
                scheme,
                public_key: identity.public_key_bytes(),
                signature: sig.to_bytes(),
            })
        }
        SigningScheme::Standard => {
            let key = identity.standard_signing_key();
            let sig = key.sign(message);
            Ok(AuthSignature {
                scheme,
                public_key: key.verifying_key().to_bytes(),
                signature: sig.to_bytes(),
            })
        }
        SigningScheme::Blinded15 => {
            let server_pk = auth.server_pubkey().ok_or_else(|| {
                AuthError::SigningFailed("blinded15 requires a server pubkey".to_string())
            })?;
            let pair = BlindedKeyPair::blind15(identity, server_pk);
            Ok(AuthSignature {
                scheme,
                public_key: pair.public_bytes(),
                signature: pair.sign(message),
            })
        }
        SigningScheme::Blinded25 => {
            let server_pk = auth.server_pubkey().ok_or_else(|| {
                AuthError::SigningFailed("blinded25 requires a server pubkey".to_string())
            })?;
            let pair = BlindedKeyPair::blind25(identity, server_pk);
            Ok(AuthSignature {
                scheme,
                public_key: pair.public_bytes(),
                signature: pair.sign(message),
            })
        }
    }
}

/// Canonical byte sequence a request signature covers:
/// `server_pk ‖ nonce ‖ timestamp ‖ method ‖ path ‖ body_hash`.
pub fn verification_bytes(
    server_pubkey: Option<&[u8; 32]>,
    nonce: &[u8],
    timestamp_secs: u64,
    method: &str,
    path: &str,
    body: Option<&[u8]>,
) -> Vec<u8> {
    let mut bytes = Vec::new();
    if let Some(pk) = server_pubkey {
        bytes.extend_from_slice(pk);
    }
    bytes.extend_from_slice(nonce);
    bytes.extend_from_slice(timestamp_secs.to_string().as_bytes());
    bytes.extend_from_slice(method.as_bytes());
    bytes.extend_from_slice(path.as_bytes());
    if let Some(body) = body {
        bytes.extend_from_slice(blake3::hash(body).as_bytes());
    }
    bytes
}

/// Build the signature header set for one request. The nonce is freshly
/// random every call; nonces are never reused.
pub fn signature_headers(
    identity: Option<&Identity>,
    auth: &AuthMethod,
    method: &str,
    path: &str,
    body: Option<&[u8]>,
    fallback: SigningScheme,
    clock: &dyn Clock,
) -> Result<BTreeMap<String, String>, AuthError> {
    let mut nonce = [0u8; REQUEST_NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    let timestamp = clock.now_secs();

    let message = verification_bytes(auth.server_pubkey(), &nonce, timestamp, method, path, body);
    let signed = sign(identity, &message, auth, fallback)?;

    let mut headers = BTreeMap::new();
    headers.insert(HEADER_PUBKEY.to_string(), signed.account_id().to_hex());
    headers.insert(HEADER_TIMESTAMP.to_string(), timestamp.to_string());
    headers.insert(HEADER_NONCE.to_string(), BASE64.encode(nonce));
    headers.insert(HEADER_SIGNATURE.to_string(), BASE64.encode(signed.signature));
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test::FixedClock;

    fn community(caps: &[&str], force: bool) -> AuthMethod {
        AuthMethod::Community {
            server_pubkey: [9u8; 32],
            capabilities: Some(Capabilities {
                capabilities: caps.iter().map(|s| s.to_string()).collect(),
                missing: None,
            }),
            force_blinded: force,
        }
    }

    #[test]
    fn test_sign_verify_all_schemes() {
        let identity = Identity::generate();
        let message = b"canonical bytes";

        for (auth, fallback) in [
            (AuthMethod::Standard, SigningScheme::Standard),
            (AuthMethod::Unblinded, SigningScheme::Unblinded),
            (
                AuthMethod::Blinded15 { server_pubkey: [9u8; 32] },
                SigningScheme::Standard,
            ),
        ] {
            let signed = sign(Some(&identity), message, &auth, fallback).unwrap();
            assert!(signed.verify(message).is_ok());

            // Flipping a message byte must fail.
            assert!(signed.verify(b"canonical bytez").is_err());

            // Flipping a signature byte must fail.
            let mut tampered = signed.clone();
            tampered.signature[10] ^= 0x01;
            assert!(tampered.verify(message).is_err());
        }
    }

    #[test]
    fn test_missing_identity_is_signing_failed() {
        let result = sign(None, b"m", &AuthMethod::Standard, SigningScheme::Standard);
        assert!(matches!(result, Err(AuthError::SigningFailed(_))));
    }

    #[test]
    fn test_community_with_blind_capability_uses_blinded15() {
        let identity = Identity::generate();
        let signed = sign(
            Some(&identity),
            b"m",
            &community(&["blind", "reactions"], false),
            SigningScheme::Unblinded,
        )
        .unwrap();
        assert_eq!(signed.scheme, SigningScheme::Blinded15);
    }

    #[test]
    fn test_community_without_blind_falls_back() {
        let identity = Identity::generate();
        let signed = sign(
            Some(&identity),
            b"m",
            &community(&["reactions"], false),
            SigningScheme::Unblinded,
        )
        .unwrap();
        assert_eq!(signed.scheme, SigningScheme::Unblinded);
        assert_eq!(signed.public_key, identity.public_key_bytes());
    }

    #[test]
    fn test_forced_blinding_without_capabilities_fails() {
        let identity = Identity::generate();
        let auth = AuthMethod::Community {
            server_pubkey: [9u8; 32],
            capabilities: None,
            force_blinded: true,
        };
        let result = sign(Some(&identity), b"m", &auth, SigningScheme::Standard);
        assert!(matches!(result, Err(AuthError::CapabilitiesUnresolved)));
    }

    #[test]
    fn test_signature_headers_fresh_nonce() {
        let identity = Identity::generate();
        let clock = FixedClock::at_ms(1_700_000_000_000);
        let auth = community(&["blind"], false);

        let a = signature_headers(
            Some(&identity),
            &auth,
            "GET",
            "/capabilities",
            None,
            SigningScheme::Standard,
            &clock,
        )
        .unwrap();
        let b = signature_headers(
            Some(&identity),
            &auth,
            "GET",
            "/capabilities",
            None,
            SigningScheme::Standard,
            &clock,
        )
        .unwrap();

        assert_ne!(a[HEADER_NONCE], b[HEADER_NONCE]);
        assert_ne!(a[HEADER_SIGNATURE], b[HEADER_SIGNATURE]);
        assert_eq!(a[HEADER_TIMESTAMP], "1700000000");
        assert!(a[HEADER_PUBKEY].starts_with("15"));
    }

    #[test]
    fn test_verification_bytes_binds_body() {
        let with = verification_bytes(None, &[1; 16], 10, "POST", "/room", Some(b"{}"));
        let without = verification_bytes(None, &[1; 16], 10, "POST", "/room", None);
        assert_ne!(with, without);
    }
}
