//! Per-server blinded identities.
//!
//! A community server must not be able to correlate one account across
//! servers, so requests are signed with a keypair derived from both the
//! long-term identity and the target server's public key: a blinding
//! factor `k` is hashed from the server key, the blinded secret is `k·a`
//! and the blinded public key `k·a·G`. Signatures are Schnorr over
//! edwards25519 with BLAKE3 as the hash, verified against the blinded
//! public key alone.

use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::Scalar;

use crate::constants::{
    KDF_CONTEXT_BLIND15, KDF_CONTEXT_BLIND25, KDF_CONTEXT_SCHNORR_CHALLENGE,
    KDF_CONTEXT_SCHNORR_NONCE, SIGNATURE_SIZE,
};
use crate::error::AuthError;
use crate::identity::Identity;
use crate::types::AccountId;

/// Hash arbitrary input to a scalar via the BLAKE3 XOF (64 wide bytes
/// reduced mod the group order).
fn hash_to_scalar(domain: &str, parts: &[&[u8]]) -> Scalar {
    let mut hasher = blake3::Hasher::new_derive_key(domain);
    for part in parts {
        hasher.update(part);
    }
    let mut wide = [0u8; 64];
    hasher.finalize_xof().fill(&mut wide);
    Scalar::from_bytes_mod_order_wide(&wide)
}

/// A keypair blinded for one specific server.
#[derive(Clone)]
pub struct BlindedKeyPair {
    secret: Scalar,
    public: [u8; 32],
}

impl BlindedKeyPair {
    /// Scheme-15 blinding: `k = H(server_pk)`, secret `k·a`.
    pub fn blind15(identity: &Identity, server_pubkey: &[u8; 32]) -> Self {
        let k = hash_to_scalar(KDF_CONTEXT_BLIND15, &[server_pubkey]);
        Self::from_factor(identity, k)
    }

    /// Scheme-25 blinding also binds the account id into the factor, so
    /// two schemes over the same identity never share a key.
    pub fn blind25(identity: &Identity, server_pubkey: &[u8; 32]) -> Self {
        let k = hash_to_scalar(
            KDF_CONTEXT_BLIND25,
            &[&identity.public_key_bytes(), server_pubkey],
        );
        Self::from_factor(identity, k)
    }

    fn from_factor(identity: &Identity, k: Scalar) -> Self {
        let secret = k * identity.to_scalar();
        let public = EdwardsPoint::mul_base(&secret).compress().to_bytes();
        Self { secret, public }
    }

    pub fn public_bytes(&self) -> [u8; 32] {
        self.public
    }

    pub fn account_id15(&self) -> AccountId {
        AccountId::blinded15(self.public)
    }

    pub fn account_id25(&self) -> AccountId {
        AccountId::blinded25(self.public)
    }

    /// Schnorr sign: deterministic nonce `r` from (secret, pubkey,
    /// message), `R = r·G`, challenge `c = H(R ‖ A ‖ M)`, `s = r + c·ka`.
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        let r = hash_to_scalar(
            KDF_CONTEXT_SCHNORR_NONCE,
            &[self.secret.as_bytes(), &self.public, message],
        );
        let big_r = EdwardsPoint::mul_base(&r).compress().to_bytes();
        let c = hash_to_scalar(
            KDF_CONTEXT_SCHNORR_CHALLENGE,
            &[&big_r, &self.public, message],
        );
        let s = r + c * self.secret;

        let mut sig = [0u8; SIGNATURE_SIZE];
        sig[..32].copy_from_slice(&big_r);
        sig[32..].copy_from_slice(s.as_bytes());
        sig
    }

    /// ECDH between this blinded secret and another blinded public key.
    /// Both directions derive the same point: `ka·(kb·G) == kb·(ka·G)`.
    pub fn shared_secret(&self, their_public: &[u8; 32]) -> Result<[u8; 32], AuthError> {
        let point = CompressedEdwardsY(*their_public)
            .decompress()
            .ok_or(AuthError::VerificationFailed)?;
        Ok((self.secret * point).compress().to_bytes())
    }
}

/// Verify a blinded Schnorr signature: `s·G == R + c·A`.
pub fn verify(public: &[u8; 32], message: &[u8], signature: &[u8]) -> Result<(), AuthError> {
    if signature.len() != SIGNATURE_SIZE {
        return Err(AuthError::VerificationFailed);
    }

    let big_r_bytes: [u8; 32] = signature[..32].try_into().unwrap();
    let s_bytes: [u8; 32] = signature[32..].try_into().unwrap();

    let big_r = CompressedEdwardsY(big_r_bytes)
        .decompress()
        .ok_or(AuthError::VerificationFailed)?;
    let a = CompressedEdwardsY(*public)
        .decompress()
        .ok_or(AuthError::VerificationFailed)?;
    let s = Option::<Scalar>::from(Scalar::from_canonical_bytes(s_bytes))
        .ok_or(AuthError::VerificationFailed)?;

    let c = hash_to_scalar(KDF_CONTEXT_SCHNORR_CHALLENGE, &[&big_r_bytes, public, message]);

    // s·G - c·A must land back on R.
    let check = EdwardsPoint::vartime_double_scalar_mul_basepoint(&-c, &a, &s);
    if check == big_r {
        Ok(())
    } else {
        Err(AuthError::VerificationFailed)
    }
}
