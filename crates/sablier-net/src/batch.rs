//! Batch and sequence envelopes.
//!
//! N independent requests wrapped into one POST. `batch` executes every
//! sub-request regardless of individual failure; `sequence` executes in
//! order and stops at the first non-2xx, so unexecuted requests are simply
//! absent from the response list. Sub-responses decode into a tagged union
//! keyed by endpoint kind with typed accessors.

use serde::de::DeserializeOwned;
use serde_json::json;

use sablier_shared::auth::AuthMethod;

use crate::endpoint::{Endpoint, EndpointKind, Method};
use crate::error::{NetError, Result};
use crate::request::{PreparedRequest, Target};
use crate::responses::{Capabilities, Room};

/// One request inside a batch/sequence envelope.
#[derive(Debug, Clone)]
pub struct SubRequest {
    pub endpoint: Endpoint,
    pub method: Method,
    pub body: Option<serde_json::Value>,
}

impl SubRequest {
    pub fn get(endpoint: Endpoint) -> Self {
        let method = endpoint.default_method();
        Self { endpoint, method, body: None }
    }

    pub fn post(endpoint: Endpoint, body: serde_json::Value) -> Self {
        Self {
            endpoint,
            method: Method::Post,
            body: Some(body),
        }
    }

    // serde_json maps are BTreeMap-backed, so this serializes with sorted
    // keys and signatures over the envelope stay reproducible.
    fn to_json(&self) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        obj.insert("method".to_string(), json!(self.method.as_str()));
        obj.insert("path".to_string(), json!(self.endpoint.path()));
        if let Some(body) = &self.body {
            obj.insert("json".to_string(), body.clone());
        }
        serde_json::Value::Object(obj)
    }
}

/// One decoded sub-response: status code plus raw JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct SubResponse {
    pub code: u16,
    pub body: Option<serde_json::Value>,
}

impl SubResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Decode the body into a concrete type; absent or mistyped bodies
    /// surface as `ParsingFailed`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        let body = self
            .body
            .clone()
            .ok_or_else(|| NetError::ParsingFailed("sub-response body absent".to_string()))?;
        serde_json::from_value(body).map_err(|e| NetError::ParsingFailed(e.to_string()))
    }
}

/// Eagerly-decoded sub-response for the endpoint kinds the merge layer
/// consumes. Anything else stays raw under its kind tag.
#[derive(Debug, Clone, PartialEq)]
pub enum SubResult {
    Capabilities(Capabilities),
    Rooms(Vec<Room>),
    Room(Room),
    Other(EndpointKind, SubResponse),
}

/// Responses of a batch/sequence call, in sub-request order. A sequence
/// response may be shorter than the request list (execution stopped at the
/// first non-2xx) and its last entry may itself be a non-2xx terminal
/// result.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResponse {
    entries: Vec<(EndpointKind, SubResponse)>,
}

impl BatchResponse {
    pub fn from_parts(kinds: &[EndpointKind], raw: serde_json::Value) -> Result<Self> {
        let list = raw
            .as_array()
            .ok_or_else(|| NetError::ParsingFailed("batch response is not a list".to_string()))?;
        if list.len() > kinds.len() {
            return Err(NetError::ParsingFailed(format!(
                "batch returned {} responses for {} requests",
                list.len(),
                kinds.len()
            )));
        }

        let mut entries = Vec::with_capacity(list.len());
        for (kind, item) in kinds.iter().zip(list) {
            let code = item
                .get("code")
                .and_then(|c| c.as_u64())
                .ok_or_else(|| NetError::ParsingFailed("sub-response missing code".to_string()))?;
            let body = item.get("body").cloned().filter(|b| !b.is_null());
            entries.push((*kind, SubResponse { code: code as u16, body }));
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(EndpointKind, SubResponse)] {
        &self.entries
    }

    /// First successful sub-response of the given kind.
    pub fn first_of(&self, kind: EndpointKind) -> Option<&SubResponse> {
        self.entries
            .iter()
            .find(|(k, r)| *k == kind && r.is_success())
            .map(|(_, r)| r)
    }

    /// Typed lookup: first successful sub-response of `kind`, decoded.
    /// Absence is `ParsingFailed` — the expected sub-response never came
    /// back.
    pub fn decode_first<T: DeserializeOwned>(&self, kind: EndpointKind) -> Result<T> {
        self.first_of(kind)
            .ok_or_else(|| {
                NetError::ParsingFailed(format!("no successful {kind:?} sub-response present"))
            })?
            .decode()
    }

    /// The whole response as a tagged union list.
    pub fn typed(&self) -> Vec<SubResult> {
        self.entries
            .iter()
            .map(|(kind, sub)| match kind {
                EndpointKind::Capabilities => sub
                    .decode()
                    .map(SubResult::Capabilities)
                    .unwrap_or_else(|_| SubResult::Other(*kind, sub.clone())),
                EndpointKind::Rooms => sub
                    .decode()
                    .map(SubResult::Rooms)
                    .unwrap_or_else(|_| SubResult::Other(*kind, sub.clone())),
                EndpointKind::Room => sub
                    .decode()
                    .map(SubResult::Room)
                    .unwrap_or_else(|_| SubResult::Other(*kind, sub.clone())),
                _ => SubResult::Other(*kind, sub.clone()),
            })
            .collect()
    }
}

fn envelope(
    wrapper: Endpoint,
    requests: Vec<SubRequest>,
    target: Target,
    auth: AuthMethod,
) -> Result<PreparedRequest<BatchResponse>> {
    if requests.is_empty() {
        return Err(NetError::InvalidPreparedRequest(
            "empty batch envelope".to_string(),
        ));
    }

    let kinds: Vec<EndpointKind> = requests.iter().map(|r| r.endpoint.kind()).collect();
    let body = serde_json::Value::Array(requests.iter().map(SubRequest::to_json).collect());

    let prepared = PreparedRequest::<serde_json::Value>::prepare(
        wrapper,
        Method::Post,
        Some(body),
        target,
        auth,
    )?;
    Ok(prepared.try_map(move |raw| BatchResponse::from_parts(&kinds, raw)))
}

/// Wrap N independent requests into one POST; all sub-requests execute
/// regardless of individual failure.
pub fn batch(
    requests: Vec<SubRequest>,
    target: Target,
    auth: AuthMethod,
) -> Result<PreparedRequest<BatchResponse>> {
    envelope(Endpoint::Batch, requests, target, auth)
}

/// Wrap N requests to execute in order, stopping at the first non-2xx.
pub fn sequence(
    requests: Vec<SubRequest>,
    target: Target,
    auth: AuthMethod,
) -> Result<PreparedRequest<BatchResponse>> {
    envelope(Endpoint::Sequence, requests, target, auth)
}

/// Capabilities + one room, fetched in a single sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilitiesAndRoom {
    pub capabilities: Capabilities,
    pub room: Room,
}

/// Capabilities + the full room list, fetched in a single sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilitiesAndRooms {
    pub capabilities: Capabilities,
    pub rooms: Vec<Room>,
}

pub fn prepare_capabilities_and_room(
    room_token: &str,
    target: Target,
    auth: AuthMethod,
) -> Result<PreparedRequest<CapabilitiesAndRoom>> {
    let requests = vec![
        SubRequest::get(Endpoint::Capabilities),
        SubRequest::get(Endpoint::Room(room_token.to_string())),
    ];
    Ok(sequence(requests, target, auth)?.try_map(|response| {
        Ok(CapabilitiesAndRoom {
            capabilities: response.decode_first(EndpointKind::Capabilities)?,
            room: response.decode_first(EndpointKind::Room)?,
        })
    }))
}

pub fn prepare_capabilities_and_rooms(
    target: Target,
    auth: AuthMethod,
) -> Result<PreparedRequest<CapabilitiesAndRooms>> {
    let requests = vec![
        SubRequest::get(Endpoint::Capabilities),
        SubRequest::get(Endpoint::Rooms),
    ];
    Ok(sequence(requests, target, auth)?.try_map(|response| {
        Ok(CapabilitiesAndRooms {
            capabilities: response.decode_first(EndpointKind::Capabilities)?,
            rooms: response.decode_first(EndpointKind::Rooms)?,
        })
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn target() -> Target {
        Target::Server {
            base_url: "https://open.example.org".to_string(),
            server_pubkey: [9u8; 32],
        }
    }

    fn auth() -> AuthMethod {
        AuthMethod::Community {
            server_pubkey: [9u8; 32],
            capabilities: None,
            force_blinded: false,
        }
    }

    #[test]
    fn test_empty_envelope_rejected() {
        assert!(matches!(
            batch(vec![], target(), auth()),
            Err(NetError::InvalidPreparedRequest(_))
        ));
    }

    #[test]
    fn test_envelope_body_is_deterministic() {
        let make = || {
            batch(
                vec![
                    SubRequest::get(Endpoint::Capabilities),
                    SubRequest::get(Endpoint::Rooms),
                ],
                target(),
                auth(),
            )
            .unwrap()
        };
        assert_eq!(make().body, make().body);
    }

    #[test]
    fn test_capabilities_and_rooms_decodes() {
        let prepared = prepare_capabilities_and_rooms(target(), auth()).unwrap();
        let raw = json!([
            {"code": 200, "body": {"capabilities": ["blind", "reactions"]}},
            {"code": 200, "body": [
                {"token": "testRoom", "name": "Test"},
                {"token": "testRoom2", "name": "Test 2", "image_id": "12"},
            ]},
        ]);
        let decoded = prepared.decode(serde_json::to_vec(&raw).unwrap().as_slice()).unwrap();
        assert!(decoded.capabilities.supports("blind"));
        assert_eq!(decoded.rooms.len(), 2);
        assert_eq!(decoded.rooms[1].image_id.as_deref(), Some("12"));
    }

    #[test]
    fn test_missing_sub_response_is_parsing_failed() {
        // Sequence stopped after capabilities: rooms never executed.
        let prepared = prepare_capabilities_and_rooms(target(), auth()).unwrap();
        let raw = json!([{"code": 200, "body": {"capabilities": []}}]);
        assert!(matches!(
            prepared.decode(serde_json::to_vec(&raw).unwrap().as_slice()),
            Err(NetError::ParsingFailed(_))
        ));
    }

    #[test]
    fn test_sequence_terminal_failure_is_not_a_decode_error() {
        let raw = json!([
            {"code": 200, "body": {"capabilities": []}},
            {"code": 403, "body": {"error": "forbidden"}},
        ]);
        let response = BatchResponse::from_parts(
            &[EndpointKind::Capabilities, EndpointKind::Rooms],
            raw,
        )
        .unwrap();
        assert_eq!(response.len(), 2);
        assert!(response.first_of(EndpointKind::Rooms).is_none());
        assert!(response.first_of(EndpointKind::Capabilities).is_some());
    }

    #[test]
    fn test_typed_union() {
        let raw = json!([
            {"code": 200, "body": {"capabilities": ["blind"]}},
            {"code": 200, "body": {"token": "lobby", "name": "Lobby"}},
        ]);
        let response = BatchResponse::from_parts(
            &[EndpointKind::Capabilities, EndpointKind::Room],
            raw,
        )
        .unwrap();
        let typed = response.typed();
        assert!(matches!(typed[0], SubResult::Capabilities(_)));
        assert!(matches!(typed[1], SubResult::Room(_)));
    }
}
