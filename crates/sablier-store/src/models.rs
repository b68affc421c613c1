//! Domain model structs persisted in the local database.
//!
//! All of these rows are projections of fields owned by the in-memory
//! config state; see the crate docs for the mutation discipline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// A known account's profile, as projected from the user-profile or
/// contacts namespace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    /// 66-char prefixed hex account id.
    pub account_id: String,
    pub display_name: Option<String>,
    /// Display picture location on the file server.
    pub avatar_url: Option<String>,
    /// Decryption key for the display picture.
    pub avatar_key: Option<Vec<u8>>,
    /// Local path once the picture has been downloaded.
    pub avatar_path: Option<String>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

/// A closed group, as projected from the group-info namespace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Group {
    pub group_id: String,
    pub name: String,
    pub description: Option<String>,
    pub avatar_url: Option<String>,
    pub avatar_key: Option<Vec<u8>>,
    /// Disappearing-message timer, when set.
    pub expiry_seconds: Option<u32>,
    /// Watermark: interactions older than this must be purged locally.
    pub delete_before_ms: Option<u64>,
    /// Watermark restricted to interactions carrying attachments.
    pub attach_delete_before_ms: Option<u64>,
    pub destroyed: bool,
    pub local_is_admin: bool,
    pub created_at: DateTime<Utc>,
}

/// Role of a group member.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MemberRole {
    Member,
    Admin,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberRole::Member => "member",
            MemberRole::Admin => "admin",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "member" => Some(MemberRole::Member),
            "admin" => Some(MemberRole::Admin),
            _ => None,
        }
    }
}

/// Membership row, as projected from the group-members namespace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupMember {
    pub group_id: String,
    pub account_id: String,
    pub role: MemberRole,
    pub joined_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Open group (community room)
// ---------------------------------------------------------------------------

/// A community room we participate in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OpenGroup {
    pub server: String,
    pub room: String,
    pub name: String,
    /// Server-side file id of the room image.
    pub image_id: Option<String>,
    /// Local path once the image has been downloaded.
    pub image_path: Option<String>,
    pub info_updates: i64,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Interaction
// ---------------------------------------------------------------------------

/// Send-state machine of an interaction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SendState {
    Sending,
    Syncing,
    Sent,
    Failed,
    FailedToSync,
}

impl SendState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SendState::Sending => "sending",
            SendState::Syncing => "syncing",
            SendState::Sent => "sent",
            SendState::Failed => "failed",
            SendState::FailedToSync => "failed_to_sync",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "sending" => Some(SendState::Sending),
            "syncing" => Some(SendState::Syncing),
            "sent" => Some(SendState::Sent),
            "failed" => Some(SendState::Failed),
            "failed_to_sync" => Some(SendState::FailedToSync),
            _ => None,
        }
    }

    /// States a failure-recovery write may transition away from.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, SendState::Sending | SendState::Syncing)
    }
}

/// A single message row. Identity for deduplication is
/// `(thread_id, sent_timestamp_ms)` until a `server_hash` is recorded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Interaction {
    pub id: Uuid,
    pub thread_id: String,
    pub author: String,
    pub body: Option<String>,
    pub state: SendState,
    pub failure_text: Option<String>,
    pub server_hash: Option<String>,
    pub sent_timestamp_ms: u64,
    pub has_attachments: bool,
    pub expires_in_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Reaction
// ---------------------------------------------------------------------------

/// A reaction attached to an interaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reaction {
    pub id: Uuid,
    pub interaction_id: Uuid,
    pub emoji: String,
    pub author: String,
    pub server_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Config dump
// ---------------------------------------------------------------------------

/// Durable snapshot of one in-memory config object, keyed by
/// (owner identity, namespace).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigDump {
    pub owner: String,
    pub namespace: i32,
    pub version: u32,
    /// Opaque encrypted blob.
    pub data: Vec<u8>,
    pub updated_at: DateTime<Utc>,
}
