use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

use crate::constants::{KDF_CONTEXT_BLINDED_DM_KEY, KDF_CONTEXT_SESSION_KEY, NONCE_SIZE};
use crate::error::CryptoError;

pub type SymmetricKey = [u8; 32];

pub fn generate_symmetric_key() -> SymmetricKey {
    let mut key = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

// Returns nonce || ciphertext (24 bytes nonce prepended)
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce_bytes = generate_nonce();
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

pub fn decrypt(key: &SymmetricKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce = XNonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Session-protocol key agreement: x25519 ECDH, then a BLAKE3 KDF over the
/// shared secret. Both sides derive the same symmetric key.
pub fn derive_session_key(
    our_secret: &x25519_dalek::StaticSecret,
    their_public: &x25519_dalek::PublicKey,
) -> SymmetricKey {
    let shared = our_secret.diffie_hellman(their_public);
    blake3::derive_key(KDF_CONTEXT_SESSION_KEY, shared.as_bytes())
}

/// Key for community-inbox DMs between two blinded identities. The key
/// material is the ECDH secret plus both blinded public keys so either
/// side derives the same key regardless of direction.
pub fn derive_blinded_dm_key(
    shared_secret: &[u8; 32],
    sender_blinded: &[u8; 32],
    recipient_blinded: &[u8; 32],
) -> SymmetricKey {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_BLINDED_DM_KEY);
    hasher.update(shared_secret);
    // Order-independent: hash the lexicographically smaller key first.
    if sender_blinded <= recipient_blinded {
        hasher.update(sender_blinded);
        hasher.update(recipient_blinded);
    } else {
        hasher.update(recipient_blinded);
        hasher.update(sender_blinded);
    }
    let hash = hasher.finalize();
    let mut key = [0u8; 32];
    key.copy_from_slice(&hash.as_bytes()[..32]);
    key
}

/// Seal a plaintext for a recipient x25519 public key.
pub fn seal(
    our_secret: &x25519_dalek::StaticSecret,
    their_public: &x25519_dalek::PublicKey,
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let key = derive_session_key(our_secret, their_public);
    encrypt(&key, plaintext)
}

/// Open a sealed ciphertext from a sender x25519 public key.
pub fn open(
    our_secret: &x25519_dalek::StaticSecret,
    their_public: &x25519_dalek::PublicKey,
    data: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let key = derive_session_key(our_secret, their_public);
    decrypt(&key, data)
}
