use thiserror::Error;

use crate::transport::NetworkError;

/// Errors produced by the request-preparation layer.
#[derive(Error, Debug)]
pub enum NetError {
    /// Structurally invalid request (auth method incompatible with the
    /// destination, body on a bodiless method, ...).
    #[error("Invalid prepared request: {0}")]
    InvalidPreparedRequest(String),

    /// A response body was absent or did not decode to the expected type.
    #[error("Parsing failed: {0}")]
    ParsingFailed(String),

    /// A swarm member's signed confirmation failed verification.
    #[error("Signature verification failed")]
    SignatureVerificationFailed,

    /// Signing the request failed.
    #[error("Auth error: {0}")]
    Auth(#[from] sablier_shared::AuthError),

    /// Failure reported by the transport.
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, NetError>;
