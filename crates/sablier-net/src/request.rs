//! Typed, destination-aware request descriptors.
//!
//! A [`PreparedRequest`] is built once, signed, and consumed once by a
//! [`Transport`](crate::transport::Transport). Construction fails only on
//! structurally invalid input; no I/O happens until `send`.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::de::DeserializeOwned;

use sablier_shared::auth::{self, AuthMethod, SigningScheme};
use sablier_shared::clock::Clock;
use sablier_shared::identity::Identity;
use sablier_shared::types::AccountId;

use crate::endpoint::Endpoint;
use crate::error::{NetError, Result};
use crate::transport::{ResponseInfo, Transport};

pub use crate::endpoint::Method;

/// Default timeout for control-plane calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for file transfers.
pub const FILE_TIMEOUT: Duration = Duration::from_secs(60);

/// Where a request physically goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A storage node holding (part of) `swarm_pubkey`'s swarm.
    Snode {
        address: String,
        swarm_pubkey: AccountId,
    },
    /// A community server.
    Server {
        base_url: String,
        server_pubkey: [u8; 32],
    },
    /// File upload to a community server (longer timeout class).
    Upload {
        base_url: String,
        server_pubkey: [u8; 32],
    },
    /// File download from a community server (longer timeout class).
    Download {
        base_url: String,
        server_pubkey: [u8; 32],
    },
}

impl Target {
    pub fn base_url(&self) -> &str {
        match self {
            Target::Snode { address, .. } => address,
            Target::Server { base_url, .. }
            | Target::Upload { base_url, .. }
            | Target::Download { base_url, .. } => base_url,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        match self {
            Target::Upload { .. } | Target::Download { .. } => FILE_TIMEOUT,
            _ => DEFAULT_TIMEOUT,
        }
    }

    fn is_server(&self) -> bool {
        !matches!(self, Target::Snode { .. })
    }
}

type DecodeFn<R> = Box<dyn Fn(&[u8]) -> Result<R> + Send + Sync>;

/// An immutable request descriptor with a typed expected response.
pub struct PreparedRequest<R> {
    pub endpoint: Endpoint,
    pub method: Method,
    pub body: Option<Vec<u8>>,
    pub target: Target,
    pub auth: AuthMethod,
    pub headers: BTreeMap<String, String>,
    pub timeout: Duration,
    decoder: DecodeFn<R>,
}

impl<R> std::fmt::Debug for PreparedRequest<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedRequest")
            .field("endpoint", &self.endpoint)
            .field("method", &self.method)
            .field("target", &self.target)
            .field("body_len", &self.body.as_ref().map(|b| b.len()))
            .finish()
    }
}

impl<R: DeserializeOwned + 'static> PreparedRequest<R> {
    /// Build a request. Fails only on structurally invalid combinations;
    /// never performs I/O.
    pub fn prepare(
        endpoint: Endpoint,
        method: Method,
        body: Option<serde_json::Value>,
        target: Target,
        auth: AuthMethod,
    ) -> Result<Self> {
        if body.is_some() && !method.allows_body() {
            return Err(NetError::InvalidPreparedRequest(format!(
                "{} request cannot carry a body",
                method.as_str()
            )));
        }

        if endpoint.is_server_endpoint() != target.is_server() {
            return Err(NetError::InvalidPreparedRequest(format!(
                "endpoint {:?} incompatible with target {:?}",
                endpoint.kind(),
                target
            )));
        }

        if matches!(auth, AuthMethod::Community { .. }) && !target.is_server() {
            return Err(NetError::InvalidPreparedRequest(
                "community auth cannot address a storage node".to_string(),
            ));
        }

        let body = match body {
            // Map keys are BTreeMap-backed, so serialization is
            // deterministic and signatures stay reproducible.
            Some(value) => Some(
                serde_json::to_vec(&value)
                    .map_err(|e| NetError::InvalidPreparedRequest(e.to_string()))?,
            ),
            None => None,
        };

        let timeout = target.default_timeout();
        Ok(Self {
            endpoint,
            method,
            body,
            target,
            auth,
            headers: BTreeMap::new(),
            timeout,
            decoder: Box::new(|bytes: &[u8]| {
                serde_json::from_slice(bytes).map_err(|e| NetError::ParsingFailed(e.to_string()))
            }),
        })
    }

    /// Shorthand using the endpoint's default method.
    pub fn get(endpoint: Endpoint, target: Target, auth: AuthMethod) -> Result<Self> {
        let method = endpoint.default_method();
        Self::prepare(endpoint, method, None, target, auth)
    }
}

impl<R: 'static> PreparedRequest<R> {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Post-process the decoded response. Composes with the existing
    /// decoder; the mapping failure surfaces as `ParsingFailed`.
    pub fn try_map<T, F>(self, f: F) -> PreparedRequest<T>
    where
        T: 'static,
        F: Fn(R) -> Result<T> + Send + Sync + 'static,
    {
        let inner = self.decoder;
        PreparedRequest {
            endpoint: self.endpoint,
            method: self.method,
            body: self.body,
            target: self.target,
            auth: self.auth,
            headers: self.headers,
            timeout: self.timeout,
            decoder: Box::new(move |bytes| inner(bytes).and_then(&f)),
        }
    }

    /// Discard the response body (fire-and-forget calls).
    pub fn ignore_response(self) -> PreparedRequest<()> {
        PreparedRequest {
            endpoint: self.endpoint,
            method: self.method,
            body: self.body,
            target: self.target,
            auth: self.auth,
            headers: self.headers,
            timeout: self.timeout,
            decoder: Box::new(|_| Ok(())),
        }
    }

    /// Decode a raw response body into the expected type.
    pub fn decode(&self, bytes: &[u8]) -> Result<R> {
        (self.decoder)(bytes)
    }

    /// Sign the fully-built request: derives the signature header set from
    /// the final destination, body and auth method. Call this last, after
    /// every structural change.
    pub fn sign(
        &mut self,
        identity: Option<&Identity>,
        fallback: SigningScheme,
        clock: &dyn Clock,
    ) -> Result<()> {
        let headers = auth::signature_headers(
            identity,
            &self.auth,
            self.method.as_str(),
            &self.endpoint.path(),
            self.body.as_deref(),
            fallback,
            clock,
        )?;
        self.headers.extend(headers);
        Ok(())
    }

    /// Send through a transport and decode the body. Side-effect free
    /// until the transport responds; dropping the future before completion
    /// leaves no partial state anywhere.
    pub async fn send(&self, transport: &dyn Transport) -> Result<(ResponseInfo, R)> {
        let (info, bytes) = transport.send(self.parts()).await?;
        let decoded = self.decode(&bytes)?;
        Ok((info, decoded))
    }

    /// The transport-level view of this request.
    pub fn parts(&self) -> crate::transport::RequestParts {
        crate::transport::RequestParts {
            url: format!("{}{}", self.target.base_url(), self.endpoint.path()),
            method: self.method,
            headers: self.headers.clone(),
            body: self.body.clone(),
            timeout: self.timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sablier_shared::clock::test::FixedClock;
    use sablier_shared::constants::{HEADER_NONCE, HEADER_PUBKEY};
    use sablier_shared::types::Capabilities;

    fn server_target() -> Target {
        Target::Server {
            base_url: "https://open.example.org".to_string(),
            server_pubkey: [9u8; 32],
        }
    }

    fn community_auth() -> AuthMethod {
        AuthMethod::Community {
            server_pubkey: [9u8; 32],
            capabilities: Some(Capabilities {
                capabilities: vec!["blind".to_string()],
                missing: None,
            }),
            force_blinded: false,
        }
    }

    #[test]
    fn test_get_with_body_is_invalid() {
        let result = PreparedRequest::<serde_json::Value>::prepare(
            Endpoint::Capabilities,
            Method::Get,
            Some(serde_json::json!({"x": 1})),
            server_target(),
            community_auth(),
        );
        assert!(matches!(result, Err(NetError::InvalidPreparedRequest(_))));
    }

    #[test]
    fn test_community_auth_rejected_for_snode_target() {
        let result = PreparedRequest::<serde_json::Value>::prepare(
            Endpoint::SnodeExpire,
            Method::Post,
            None,
            Target::Snode {
                address: "https://snode.example.org:22021".to_string(),
                swarm_pubkey: sablier_shared::AccountId::standard([1u8; 32]),
            },
            community_auth(),
        );
        assert!(matches!(result, Err(NetError::InvalidPreparedRequest(_))));
    }

    #[test]
    fn test_endpoint_target_mismatch_is_invalid() {
        let result = PreparedRequest::<serde_json::Value>::prepare(
            Endpoint::SnodeExpire,
            Method::Post,
            None,
            server_target(),
            community_auth(),
        );
        assert!(matches!(result, Err(NetError::InvalidPreparedRequest(_))));
    }

    #[test]
    fn test_sign_populates_headers() {
        let identity = Identity::generate();
        let clock = FixedClock::at_ms(1_700_000_000_000);

        let mut request = PreparedRequest::<serde_json::Value>::get(
            Endpoint::Capabilities,
            server_target(),
            community_auth(),
        )
        .unwrap();
        assert!(request.headers.is_empty());

        request
            .sign(Some(&identity), SigningScheme::Unblinded, &clock)
            .unwrap();
        assert!(request.headers.contains_key(HEADER_PUBKEY));
        assert!(request.headers.contains_key(HEADER_NONCE));
    }

    #[test]
    fn test_try_map_composes_decoding() {
        let request = PreparedRequest::<Capabilities>::get(
            Endpoint::Capabilities,
            server_target(),
            community_auth(),
        )
        .unwrap()
        .try_map(|caps| Ok(caps.capabilities.len()));

        let count = request.decode(br#"{"capabilities":["blind","reactions"]}"#).unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_decode_failure_is_parsing_failed() {
        let request = PreparedRequest::<Capabilities>::get(
            Endpoint::Capabilities,
            server_target(),
            community_auth(),
        )
        .unwrap();
        assert!(matches!(
            request.decode(b"not json"),
            Err(NetError::ParsingFailed(_))
        ));
    }
}
