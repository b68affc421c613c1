use thiserror::Error;

/// Errors produced by the merge/dispatch engine.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The message failed its structural validity check.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Attachment references on the message do not match the uploaded
    /// file ids supplied.
    #[error("Attachments have not been uploaded")]
    AttachmentsNotUploaded,

    /// A config-class message was routed through the plain message-send
    /// path by mistake.
    #[error("Config messages must go through the config sync path")]
    InvalidConfigMessageHandling,

    /// Payload (de)serialization failure.
    #[error("Payload conversion failed: {0}")]
    ProtoConversionFailed(String),

    /// Signing failure (missing identity keys, unresolved capabilities).
    #[error("Auth error: {0}")]
    Auth(#[from] sablier_shared::AuthError),

    /// Request preparation / validation failure.
    #[error("Net error: {0}")]
    Net(#[from] sablier_net::NetError),

    /// Store failure.
    #[error("Store error: {0}")]
    Store(#[from] sablier_store::StoreError),

    /// Crypto failure outside the per-delta recoverable path.
    #[error("Crypto error: {0}")]
    Crypto(#[from] sablier_shared::CryptoError),

    /// Operation against a destroyed namespace.
    #[error("Namespace has been destroyed")]
    NamespaceDestroyed,
}

impl SyncError {
    /// Whether the job boundary should report this as
    /// `failure(permanent: true)`. Transient failures (network, store)
    /// are left to the caller's retry policy.
    pub fn is_permanent(&self) -> bool {
        match self {
            SyncError::InvalidMessage(_)
            | SyncError::AttachmentsNotUploaded
            | SyncError::InvalidConfigMessageHandling
            | SyncError::ProtoConversionFailed(_)
            | SyncError::Auth(_)
            | SyncError::Crypto(_)
            | SyncError::NamespaceDestroyed => true,
            SyncError::Store(_) => false,
            SyncError::Net(net) => match net {
                sablier_net::NetError::Network(network) => !matches!(
                    network,
                    sablier_net::NetworkError::Timeout
                        | sablier_net::NetworkError::Transport(_)
                ),
                _ => true,
            },
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permanence_classification() {
        assert!(SyncError::AttachmentsNotUploaded.is_permanent());
        assert!(SyncError::InvalidConfigMessageHandling.is_permanent());
        assert!(
            !SyncError::Net(sablier_net::NetError::Network(
                sablier_net::NetworkError::Timeout
            ))
            .is_permanent()
        );
        assert!(SyncError::Net(sablier_net::NetError::SignatureVerificationFailed).is_permanent());
    }
}
