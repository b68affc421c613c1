use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::constants::{KDF_CONTEXT_DUMP_KEY, KDF_CONTEXT_STANDARD_SIGNING};
use crate::error::IdentityError;
use crate::types::AccountId;

/// The long-term cryptographic identity, an Ed25519 seed. Every other
/// keypair in the system (x25519 ECDH, the standard-scheme signing key,
/// per-server blinded keys) is derived from it.
#[derive(Clone)]
pub struct Identity {
    signing_key: SigningKey,
}

/// Serializable format for storing/exporting identity
#[derive(Serialize, Deserialize)]
pub struct IdentityExport {
    pub secret_key: [u8; 32],
    pub public_key: [u8; 32],
}

impl Identity {
    /// Generate a new random identity
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Restore identity from secret key bytes. All-zero key material is
    /// treated as absent.
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Result<Self, IdentityError> {
        if secret.iter().all(|b| *b == 0) {
            return Err(IdentityError::MissingKeys);
        }
        Ok(Self {
            signing_key: SigningKey::from_bytes(secret),
        })
    }

    /// Restore identity from a serialized export
    pub fn from_export(export: &IdentityExport) -> Result<Self, IdentityError> {
        Self::from_secret_bytes(&export.secret_key)
    }

    /// The unblinded account id (raw Ed25519 public key).
    pub fn unblinded_id(&self) -> AccountId {
        AccountId::unblinded(self.signing_key.verifying_key().to_bytes())
    }

    /// The standard account id: the public half of the derived
    /// standard-scheme signing keypair.
    pub fn standard_id(&self) -> AccountId {
        AccountId::standard(self.standard_signing_key().verifying_key().to_bytes())
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn secret_bytes(&self) -> &[u8; 32] {
        self.signing_key.as_bytes()
    }

    /// Sign with the raw (unblinded) Ed25519 key.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// The Ed25519 private scalar, input to per-server blinded keypairs.
    pub fn to_scalar(&self) -> curve25519_dalek::Scalar {
        self.signing_key.to_scalar()
    }

    /// Derive the standard-scheme signing keypair from the seed via BLAKE3
    /// KDF, the same derive-a-subkeypair pattern used for every other
    /// derived key.
    pub fn standard_signing_key(&self) -> SigningKey {
        let seed = blake3::derive_key(KDF_CONTEXT_STANDARD_SIGNING, self.signing_key.as_bytes());
        SigningKey::from_bytes(&seed)
    }

    /// Derive the x25519 ECDH secret used by the session protocol.
    pub fn x25519_secret(&self) -> x25519_dalek::StaticSecret {
        // Clamped automatically by x25519-dalek.
        x25519_dalek::StaticSecret::from(*self.signing_key.as_bytes())
    }

    pub fn x25519_public(&self) -> x25519_dalek::PublicKey {
        x25519_dalek::PublicKey::from(&self.x25519_secret())
    }

    /// Export identity for serialization
    pub fn to_export(&self) -> IdentityExport {
        IdentityExport {
            secret_key: *self.signing_key.as_bytes(),
            public_key: self.signing_key.verifying_key().to_bytes(),
        }
    }

    /// Derive the config-dump encryption key from the identity using BLAKE3
    pub fn derive_dump_key(&self) -> [u8; 32] {
        blake3::derive_key(KDF_CONTEXT_DUMP_KEY, self.signing_key.as_bytes())
    }
}

/// Verify a signature against a raw Ed25519 public key
pub fn verify_signature(
    pubkey_bytes: &[u8; 32],
    message: &[u8],
    signature: &Signature,
) -> Result<(), IdentityError> {
    let verifying_key =
        VerifyingKey::from_bytes(pubkey_bytes).map_err(|_| IdentityError::InvalidKeyBytes)?;
    verifying_key
        .verify(message, signature)
        .map_err(|_| IdentityError::InvalidKeyBytes)
}
