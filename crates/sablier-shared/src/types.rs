use serde::{Deserialize, Serialize};

use crate::constants::{PREFIX_BLINDED15, PREFIX_BLINDED25, PREFIX_STANDARD, PREFIX_UNBLINDED};

// Account identity = one prefix byte + 32-byte public key, printed as 66
// hex characters. The prefix states which signing scheme the key belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountId {
    pub prefix: u8,
    pub key: [u8; 32],
}

impl AccountId {
    pub fn standard(key: [u8; 32]) -> Self {
        Self { prefix: PREFIX_STANDARD, key }
    }

    pub fn unblinded(key: [u8; 32]) -> Self {
        Self { prefix: PREFIX_UNBLINDED, key }
    }

    pub fn blinded15(key: [u8; 32]) -> Self {
        Self { prefix: PREFIX_BLINDED15, key }
    }

    pub fn blinded25(key: [u8; 32]) -> Self {
        Self { prefix: PREFIX_BLINDED25, key }
    }

    pub fn is_blinded(&self) -> bool {
        self.prefix == PREFIX_BLINDED15 || self.prefix == PREFIX_BLINDED25
    }

    pub fn to_hex(&self) -> String {
        format!("{:02x}{}", self.prefix, hex::encode(self.key))
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 33 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes[1..]);
        Ok(Self { prefix: bytes[0], key })
    }

    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Logical partition of stored config/message data. Used both for storage
/// routing and as the merge-routing key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Namespace {
    Default,
    UserProfile,
    Contacts,
    UserGroups,
    GroupInfo,
    GroupMembers,
    GroupKeys,
    GroupMessages,
    RevokedRetrievableGroupMessages,
}

impl Namespace {
    /// Storage-server namespace number.
    pub fn id(&self) -> i32 {
        match self {
            Namespace::Default => 0,
            Namespace::UserProfile => 2,
            Namespace::Contacts => 3,
            Namespace::UserGroups => 5,
            Namespace::GroupInfo => 11,
            Namespace::GroupMembers => 12,
            Namespace::GroupKeys => 13,
            Namespace::GroupMessages => 14,
            Namespace::RevokedRetrievableGroupMessages => -11,
        }
    }

    /// Namespaces whose contents are config deltas rather than messages.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Namespace::UserProfile
                | Namespace::Contacts
                | Namespace::UserGroups
                | Namespace::GroupInfo
                | Namespace::GroupMembers
                | Namespace::GroupKeys
        )
    }

    pub fn is_group(&self) -> bool {
        matches!(
            self,
            Namespace::GroupInfo
                | Namespace::GroupMembers
                | Namespace::GroupKeys
                | Namespace::GroupMessages
                | Namespace::RevokedRetrievableGroupMessages
        )
    }
}

/// Where an outgoing application message is headed. Determines the
/// encryption wrapping and the signing scheme applied before send.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessageDestination {
    /// Direct message to another account.
    Contact { account: AccountId },
    /// Copy of an outgoing message delivered to our own swarm so other
    /// devices see what was sent.
    SyncToSelf,
    /// Legacy closed group (session-protocol encrypted per member key).
    LegacyClosedGroup { group: AccountId },
    /// Closed group addressed by its `group`-prefixed identity.
    ClosedGroup { group: AccountId },
    /// Community (open group) room on a specific server.
    Community { server: String, room: String },
    /// DM to a blinded id via a community server's inbox.
    CommunityInbox { server: String, recipient: AccountId },
}

impl MessageDestination {
    pub fn is_community(&self) -> bool {
        matches!(
            self,
            MessageDestination::Community { .. } | MessageDestination::CommunityInbox { .. }
        )
    }
}

/// Capability set advertised by a community server.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Capabilities {
    pub capabilities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing: Option<Vec<String>>,
}

impl Capabilities {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

/// Kind of optimistic community mutation awaiting server confirmation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PendingChangeKind {
    ReactionAdd,
    ReactionRemove,
}

/// An optimistic local mutation (e.g. a reaction) recorded before the
/// server confirms it. Reconciled against poll results by `seq_no`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingChange {
    pub server: String,
    pub room: String,
    pub kind: PendingChangeKind,
    pub message_id: i64,
    pub emoji: String,
    pub seq_no: Option<i64>,
    /// Free-form metadata; never part of equality.
    pub metadata: Option<serde_json::Value>,
}

// Equality deliberately ignores `metadata`: two records for the same
// change must compare equal even when bookkeeping differs, while `seq_no`
// still distinguishes confirmed from unconfirmed instances.
impl PartialEq for PendingChange {
    fn eq(&self, other: &Self) -> bool {
        self.server == other.server
            && self.room == other.room
            && self.kind == other.kind
            && self.message_id == other.message_id
            && self.emoji == other.emoji
            && self.seq_no == other.seq_no
    }
}

impl Eq for PendingChange {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_id_hex_roundtrip() {
        let id = AccountId::standard([42u8; 32]);
        let hex = id.to_hex();
        assert_eq!(hex.len(), 66);
        assert!(hex.starts_with("05"));
        assert_eq!(AccountId::from_hex(&hex).unwrap(), id);
    }

    #[test]
    fn test_account_id_rejects_bad_length() {
        assert!(AccountId::from_hex("05abcd").is_err());
    }

    #[test]
    fn test_namespace_classification() {
        assert!(Namespace::Contacts.is_config());
        assert!(!Namespace::GroupMessages.is_config());
        assert!(Namespace::GroupKeys.is_group());
        assert!(!Namespace::UserProfile.is_group());
    }

    #[test]
    fn test_pending_change_equality_ignores_metadata() {
        let a = PendingChange {
            server: "https://example.org".into(),
            room: "lobby".into(),
            kind: PendingChangeKind::ReactionAdd,
            message_id: 7,
            emoji: "👍".into(),
            seq_no: Some(12),
            metadata: Some(serde_json::json!({"local": true})),
        };
        let mut b = a.clone();
        b.metadata = None;
        assert_eq!(a, b);

        b.seq_no = Some(13);
        assert_ne!(a, b);
    }
}
