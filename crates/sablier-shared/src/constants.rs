/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;

/// Ed25519 public key size in bytes
pub const PUBKEY_SIZE: usize = 32;

/// Ed25519 secret key size in bytes
pub const SECRET_KEY_SIZE: usize = 32;

/// Symmetric key size in bytes (for XChaCha20-Poly1305)
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Signature size in bytes (Ed25519 and the blinded Schnorr scheme)
pub const SIGNATURE_SIZE: usize = 64;

/// Request signature nonce size in bytes
pub const REQUEST_NONCE_SIZE: usize = 16;

/// Maximum message size in bytes (256 KiB)
pub const MAX_MESSAGE_SIZE: usize = 262_144;

/// Maximum file transfer size in bytes (10 MiB)
pub const MAX_FILE_SIZE: usize = 10 * 1024 * 1024;

/// Window within which avatar download requests are coalesced into a
/// single batch dispatch.
pub const AVATAR_THROTTLE_MS: u64 = 250;

/// Tolerated clock variance between this device and a storage node when
/// checking signed expiry confirmations.
pub const SWARM_TIMESTAMP_VARIANCE_MS: u64 = 60_000;

/// Key derivation contexts (BLAKE3)
pub const KDF_CONTEXT_DUMP_KEY: &str = "sablier-config-dump-key-v1";
pub const KDF_CONTEXT_STANDARD_SIGNING: &str = "sablier-standard-signing-v1";
pub const KDF_CONTEXT_SESSION_KEY: &str = "sablier-session-protocol-key-v1";
pub const KDF_CONTEXT_BLINDED_DM_KEY: &str = "sablier-blinded-dm-key-v1";
pub const KDF_CONTEXT_BLIND15: &str = "sablier-blind15-factor-v1";
pub const KDF_CONTEXT_BLIND25: &str = "sablier-blind25-factor-v1";
pub const KDF_CONTEXT_SCHNORR_NONCE: &str = "sablier-schnorr-nonce-v1";
pub const KDF_CONTEXT_SCHNORR_CHALLENGE: &str = "sablier-schnorr-challenge-v1";

/// Community server signature headers
pub const HEADER_PUBKEY: &str = "X-SOGS-Pubkey";
pub const HEADER_TIMESTAMP: &str = "X-SOGS-Timestamp";
pub const HEADER_NONCE: &str = "X-SOGS-Nonce";
pub const HEADER_SIGNATURE: &str = "X-SOGS-Signature";

/// Capability strings advertised by community servers
pub const CAPABILITY_BLIND: &str = "blind";
pub const CAPABILITY_REACTIONS: &str = "reactions";

/// Account id prefixes (first hex byte of the printable form)
pub const PREFIX_STANDARD: u8 = 0x05;
pub const PREFIX_UNBLINDED: u8 = 0x00;
pub const PREFIX_BLINDED15: u8 = 0x15;
pub const PREFIX_BLINDED25: u8 = 0x25;
