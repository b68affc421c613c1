//! Typed response bodies, one struct per endpoint class.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use sablier_shared::types::Capabilities;

/// A community room as returned by `/rooms` and `/room/<token>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Room {
    pub token: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// File id of the room's display picture, when it has one.
    #[serde(default)]
    pub image_id: Option<String>,
    #[serde(default)]
    pub info_updates: i64,
    #[serde(default)]
    pub message_sequence: i64,
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub moderator: bool,
}

/// A message in a community room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomMessage {
    pub id: i64,
    #[serde(default)]
    pub session_id: Option<String>,
    pub posted: f64,
    pub seqno: i64,
    /// Base64 message body; absent when the message was deleted.
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub reactions: BTreeMap<String, serde_json::Value>,
}

/// Server-assigned id + timestamp for a posted community message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SendMessageResponse {
    pub id: i64,
    pub posted: f64,
}

/// A blinded DM from a community server inbox/outbox.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DirectMessage {
    pub id: i64,
    pub sender: String,
    pub recipient: String,
    pub posted_at: f64,
    #[serde(default)]
    pub expires_at: Option<f64>,
    /// Base64 ciphertext.
    pub message: String,
}

/// Storage-node store confirmation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreResponse {
    pub hash: String,
    #[serde(default)]
    pub t: Option<u64>,
}

/// One stored message returned by a retrieve call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedMessage {
    pub hash: String,
    pub timestamp: u64,
    /// Base64 ciphertext.
    pub data: String,
}

/// Storage-node retrieve response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrieveResponse {
    pub messages: Vec<RetrievedMessage>,
    #[serde(default)]
    pub more: bool,
}

/// Per-node result inside a swarm expiry-update response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeExpireResult {
    #[serde(default)]
    pub failed: bool,
    #[serde(default)]
    pub expiry: Option<u64>,
    #[serde(default)]
    pub updated: Vec<String>,
    #[serde(default)]
    pub unchanged: BTreeMap<String, u64>,
    /// Base64 Ed25519 signature over the canonical confirmation bytes.
    #[serde(default)]
    pub signature: Option<String>,
}

/// Swarm-wide expiry-update response, keyed by node Ed25519 pubkey (hex).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SwarmExpireResponse {
    pub swarm: BTreeMap<String, NodeExpireResult>,
}
