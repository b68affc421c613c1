use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,

    #[error("Invalid key length")]
    InvalidKeyLength,
}

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Invalid key bytes")]
    InvalidKeyBytes,

    #[error("Identity keys are absent or empty")]
    MissingKeys,
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error("Signature verification failed")]
    VerificationFailed,

    #[error("Server capabilities required for blinding could not be resolved")]
    CapabilitiesUnresolved,

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),
}
