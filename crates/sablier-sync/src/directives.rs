//! Side-effect directives emitted by merges and pushes.
//!
//! The engine never performs downloads, deletions or UI notification
//! itself; it emits these values exactly once per underlying change and
//! the job/UI layers act on them.

use uuid::Uuid;

use sablier_shared::types::{AccountId, Namespace};

/// A consequential side effect the caller must drive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Fetch and decrypt a profile/group display picture.
    DownloadAvatar {
        /// Prefixed hex id of the profile or group the picture belongs to.
        owner: String,
        url: String,
        key: Vec<u8>,
    },
    /// Fetch a community room image by file id.
    DownloadRoomImage {
        server: String,
        room: String,
        image_id: String,
    },
    /// Delete interactions locally (watermark or tombstone purge).
    LocalDelete {
        thread_id: String,
        interaction_ids: Vec<Uuid>,
    },
    /// Fire-and-forget network deletion of stored messages by hash.
    /// Only emitted when the local user is an admin for the namespace.
    ServerDelete {
        owner: AccountId,
        hashes: Vec<String>,
    },
    /// Purge all local state of a destroyed group and mark the thread
    /// destroyed.
    PurgeGroup { group: AccountId },
    /// The local config object still differs from the last push; the
    /// caller should schedule a config sync.
    RePush {
        owner: AccountId,
        namespace: Namespace,
    },
    /// Start the disappearing-message timer for a sent interaction.
    ScheduleExpiry {
        interaction_id: Uuid,
        expires_in_ms: u64,
    },
    /// Queue a best-effort sync-to-self copy of a sent one-to-one
    /// message.
    SyncToSelf { interaction_id: Uuid },
}

/// Downstream "something changed" notifications. Emitted only when the
/// effective value actually differs from the previous authoritative one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Conversation { thread_id: String },
    Profile { account_id: String },
}
