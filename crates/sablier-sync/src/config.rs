//! In-memory config objects and their field-level merge rules.
//!
//! Every synchronized field carries the timestamp of its last update. A
//! remote value wins only when its timestamp is strictly greater than the
//! cached one; equal timestamps are "already current" and a zero/absent
//! timestamp on both sides is accepted unconditionally (older clients
//! never set update timestamps).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use sablier_shared::types::Namespace;

use crate::error::{Result, SyncError};

/// Last-writer-wins register.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Lww<T> {
    pub value: T,
    pub timestamp_ms: u64,
}

impl<T: Clone + PartialEq> Lww<T> {
    pub fn new(value: T, timestamp_ms: u64) -> Self {
        Self { value, timestamp_ms }
    }

    /// Apply a remote update. Returns whether the effective value changed.
    pub fn merge_remote(&mut self, value: &T, timestamp_ms: u64) -> bool {
        let accept = timestamp_ms > self.timestamp_ms
            || (timestamp_ms == 0 && self.timestamp_ms == 0);
        if !accept {
            return false;
        }

        self.timestamp_ms = self.timestamp_ms.max(timestamp_ms);
        if self.value == *value {
            return false;
        }
        self.value = value.clone();
        true
    }

    /// Apply a local edit, unconditionally taking the new timestamp.
    /// Returns whether the effective value changed.
    pub fn set_local(&mut self, value: T, timestamp_ms: u64) -> bool {
        self.timestamp_ms = self.timestamp_ms.max(timestamp_ms);
        if self.value == value {
            return false;
        }
        self.value = value;
        true
    }
}

/// Display-picture pointer: remote location plus decryption key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AvatarPointer {
    pub url: String,
    pub key: Vec<u8>,
}

/// The local user's profile namespace.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserProfileConfig {
    pub display_name: Lww<Option<String>>,
    pub avatar: Lww<Option<AvatarPointer>>,
    pub pro_features: Lww<bool>,
}

/// One synced contact.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContactEntry {
    pub name: Lww<Option<String>>,
    pub avatar: Lww<Option<AvatarPointer>>,
    pub approved: Lww<bool>,
    pub blocked: Lww<bool>,
}

/// The contacts namespace: entries keyed by prefixed hex account id.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContactsConfig {
    pub contacts: BTreeMap<String, ContactEntry>,
}

/// The group-info namespace.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupInfoConfig {
    pub name: Lww<String>,
    pub description: Lww<Option<String>>,
    pub avatar: Lww<Option<AvatarPointer>>,
    pub expiry_seconds: Lww<Option<u32>>,
    /// Watermark: purge interactions older than this.
    pub delete_before_ms: Lww<Option<u64>>,
    /// Watermark restricted to interactions with attachments.
    pub attach_delete_before_ms: Lww<Option<u64>>,
    /// Tombstone. Monotonic: once set it never clears, and a delta
    /// carrying it short-circuits the rest of the merge.
    pub destroyed: bool,
}

/// Role carried in the group-members namespace.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConfigRole {
    #[default]
    Member,
    Admin,
}

/// One synced group member.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberEntry {
    pub role: Lww<ConfigRole>,
    pub removed: Lww<bool>,
}

/// The group-members namespace: entries keyed by prefixed hex account id.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupMembersConfig {
    pub members: BTreeMap<String, MemberEntry>,
}

/// One group encryption key generation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupKey {
    pub generation: u32,
    pub key: Vec<u8>,
}

/// The group-keys namespace. Merge is a union by generation; the highest
/// generation is the current sending key.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupKeysConfig {
    pub keys: Vec<GroupKey>,
}

impl GroupKeysConfig {
    pub fn current(&self) -> Option<&GroupKey> {
        self.keys.iter().max_by_key(|k| k.generation)
    }
}

/// One namespace's authoritative in-memory state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConfigObject {
    UserProfile(UserProfileConfig),
    Contacts(ContactsConfig),
    GroupInfo(GroupInfoConfig),
    GroupMembers(GroupMembersConfig),
    GroupKeys(GroupKeysConfig),
}

impl ConfigObject {
    /// Fresh empty state for a config namespace.
    pub fn empty(namespace: Namespace) -> Result<Self> {
        match namespace {
            Namespace::UserProfile => Ok(ConfigObject::UserProfile(Default::default())),
            Namespace::Contacts => Ok(ConfigObject::Contacts(Default::default())),
            Namespace::GroupInfo => Ok(ConfigObject::GroupInfo(Default::default())),
            Namespace::GroupMembers => Ok(ConfigObject::GroupMembers(Default::default())),
            Namespace::GroupKeys => Ok(ConfigObject::GroupKeys(Default::default())),
            other => Err(SyncError::ProtoConversionFailed(format!(
                "namespace {other:?} does not hold config state"
            ))),
        }
    }

    pub fn namespace(&self) -> Namespace {
        match self {
            ConfigObject::UserProfile(_) => Namespace::UserProfile,
            ConfigObject::Contacts(_) => Namespace::Contacts,
            ConfigObject::GroupInfo(_) => Namespace::GroupInfo,
            ConfigObject::GroupMembers(_) => Namespace::GroupMembers,
            ConfigObject::GroupKeys(_) => Namespace::GroupKeys,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| SyncError::ProtoConversionFailed(e.to_string()))
    }

    pub fn decode(namespace: Namespace, bytes: &[u8]) -> Result<Self> {
        let object: ConfigObject = bincode::deserialize(bytes)
            .map_err(|e| SyncError::ProtoConversionFailed(e.to_string()))?;
        if object.namespace() != namespace {
            return Err(SyncError::ProtoConversionFailed(format!(
                "payload is {:?}, expected {:?}",
                object.namespace(),
                namespace
            )));
        }
        Ok(object)
    }

    /// Field-level merge of a remote payload into this state. Returns
    /// whether anything effectively changed.
    pub fn merge_from(&mut self, incoming: &ConfigObject) -> Result<bool> {
        match (self, incoming) {
            (ConfigObject::UserProfile(ours), ConfigObject::UserProfile(theirs)) => {
                let mut changed = false;
                changed |= ours
                    .display_name
                    .merge_remote(&theirs.display_name.value, theirs.display_name.timestamp_ms);
                changed |= ours
                    .avatar
                    .merge_remote(&theirs.avatar.value, theirs.avatar.timestamp_ms);
                changed |= ours
                    .pro_features
                    .merge_remote(&theirs.pro_features.value, theirs.pro_features.timestamp_ms);
                Ok(changed)
            }
            (ConfigObject::Contacts(ours), ConfigObject::Contacts(theirs)) => {
                let mut changed = false;
                for (account, entry) in &theirs.contacts {
                    let our_entry = ours.contacts.entry(account.clone()).or_default();
                    changed |= our_entry
                        .name
                        .merge_remote(&entry.name.value, entry.name.timestamp_ms);
                    changed |= our_entry
                        .avatar
                        .merge_remote(&entry.avatar.value, entry.avatar.timestamp_ms);
                    changed |= our_entry
                        .approved
                        .merge_remote(&entry.approved.value, entry.approved.timestamp_ms);
                    changed |= our_entry
                        .blocked
                        .merge_remote(&entry.blocked.value, entry.blocked.timestamp_ms);
                }
                Ok(changed)
            }
            (ConfigObject::GroupInfo(ours), ConfigObject::GroupInfo(theirs)) => {
                let mut changed = false;
                changed |= ours
                    .name
                    .merge_remote(&theirs.name.value, theirs.name.timestamp_ms);
                changed |= ours
                    .description
                    .merge_remote(&theirs.description.value, theirs.description.timestamp_ms);
                changed |= ours
                    .avatar
                    .merge_remote(&theirs.avatar.value, theirs.avatar.timestamp_ms);
                changed |= ours
                    .expiry_seconds
                    .merge_remote(&theirs.expiry_seconds.value, theirs.expiry_seconds.timestamp_ms);
                changed |= ours.delete_before_ms.merge_remote(
                    &theirs.delete_before_ms.value,
                    theirs.delete_before_ms.timestamp_ms,
                );
                changed |= ours.attach_delete_before_ms.merge_remote(
                    &theirs.attach_delete_before_ms.value,
                    theirs.attach_delete_before_ms.timestamp_ms,
                );
                if theirs.destroyed && !ours.destroyed {
                    ours.destroyed = true;
                    changed = true;
                }
                Ok(changed)
            }
            (ConfigObject::GroupMembers(ours), ConfigObject::GroupMembers(theirs)) => {
                let mut changed = false;
                for (account, entry) in &theirs.members {
                    let our_entry = ours.members.entry(account.clone()).or_default();
                    changed |= our_entry
                        .role
                        .merge_remote(&entry.role.value, entry.role.timestamp_ms);
                    changed |= our_entry
                        .removed
                        .merge_remote(&entry.removed.value, entry.removed.timestamp_ms);
                }
                Ok(changed)
            }
            (ConfigObject::GroupKeys(ours), ConfigObject::GroupKeys(theirs)) => {
                let mut changed = false;
                for key in &theirs.keys {
                    if !ours.keys.iter().any(|k| k.generation == key.generation) {
                        ours.keys.push(key.clone());
                        changed = true;
                    }
                }
                if changed {
                    ours.keys.sort_by_key(|k| k.generation);
                }
                Ok(changed)
            }
            (ours, theirs) => Err(SyncError::ProtoConversionFailed(format!(
                "cannot merge {:?} payload into {:?} state",
                theirs.namespace(),
                ours.namespace()
            ))),
        }
    }
}
