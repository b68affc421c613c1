//! Outgoing change push: staging local mutations into the in-memory
//! config object and deciding whether a network push is required.
//!
//! Writes by callers lacking the required capability are staged locally
//! but never pushed — the server would reject them and local/remote state
//! would desync. "Changed" events fire only when the effective value
//! actually differs.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::json;
use tracing::debug;

use sablier_net::endpoint::{Endpoint, Method};
use sablier_net::request::{PreparedRequest, Target};
use sablier_net::responses::StoreResponse;
use sablier_shared::auth::AuthMethod;
use sablier_shared::clock::Clock;
use sablier_shared::crypto::{self, SymmetricKey};
use sablier_shared::types::Namespace;
use sablier_store::{groups, profiles, Database};

use crate::config::{AvatarPointer, ConfigObject};
use crate::directives::ChangeEvent;
use crate::error::{Result, SyncError};
use crate::state::{ConfigKey, ConfigRegistry, EntryState};

/// A local mutation of config-relevant data.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigMutation {
    SetProfileName(Option<String>),
    SetProfileAvatar(Option<AvatarPointer>),
    SetGroupName(String),
    SetGroupDescription(Option<String>),
    SetGroupAvatar(Option<AvatarPointer>),
    SetExpiryTimer(Option<u32>),
    /// Watermark: only ever advances.
    SetDeleteBefore(u64),
    /// Watermark: only ever advances.
    SetAttachDeleteBefore(u64),
}

impl ConfigMutation {
    pub fn namespace(&self) -> Namespace {
        match self {
            ConfigMutation::SetProfileName(_) | ConfigMutation::SetProfileAvatar(_) => {
                Namespace::UserProfile
            }
            _ => Namespace::GroupInfo,
        }
    }

    /// Whether this mutation needs the group-admin capability to reach
    /// the network.
    fn requires_admin(&self) -> bool {
        self.namespace().is_group()
    }
}

/// Result of staging a mutation.
#[derive(Debug)]
pub struct PushOutcome {
    /// The push request, when one is required and permitted. Unsigned;
    /// the caller passes it through the signing step before send.
    pub request: Option<PreparedRequest<StoreResponse>>,
    pub events: Vec<ChangeEvent>,
}

/// Stage a mutation into the in-memory object and, when permitted and
/// necessary, produce the push request for it.
#[allow(clippy::too_many_arguments)]
pub fn stage_and_maybe_push(
    registry: &ConfigRegistry,
    db: &Database,
    key: ConfigKey,
    mutation: ConfigMutation,
    is_admin: bool,
    encryption_key: &SymmetricKey,
    snode_address: &str,
    ttl_ms: u64,
    clock: &dyn Clock,
) -> Result<PushOutcome> {
    if mutation.namespace() != key.1 {
        return Err(SyncError::ProtoConversionFailed(format!(
            "{mutation:?} does not belong to namespace {:?}",
            key.1
        )));
    }

    let entry = registry.entry(db, &key)?;
    let mut guard = entry.lock().expect("entry lock poisoned");

    // Destroyed is terminal.
    if guard.state == EntryState::Destroyed {
        return Ok(PushOutcome { request: None, events: vec![] });
    }

    let now_ms = clock.now_ms();
    let changed = apply(&mut guard.object, &mutation, now_ms)?;

    let mut events = Vec::new();
    if changed {
        // Stage into ConfigState first, then project the same values to
        // the database.
        project_local(db, &key, &guard.object, clock)?;
        guard.state = EntryState::Dirty;
        registry.dump(db, &key, &guard)?;

        events.push(match key.1 {
            Namespace::UserProfile => ChangeEvent::Profile { account_id: key.0.to_hex() },
            _ => ChangeEvent::Conversation { thread_id: key.0.to_hex() },
        });
    }

    // Non-admin group writes stay local: pushing them would be rejected
    // server-side.
    if mutation.requires_admin() && !is_admin {
        debug!(owner = %key.0.short(), "suppressing config push for non-admin");
        return Ok(PushOutcome { request: None, events });
    }

    if !guard.needs_push()? {
        return Ok(PushOutcome { request: None, events });
    }

    let request = push_request_for(&guard.object, &key, encryption_key, snode_address, ttl_ms, now_ms)?;
    Ok(PushOutcome { request: Some(request), events })
}

fn push_request_for(
    object: &ConfigObject,
    key: &ConfigKey,
    encryption_key: &SymmetricKey,
    snode_address: &str,
    ttl_ms: u64,
    now_ms: u64,
) -> Result<PreparedRequest<StoreResponse>> {
    let ciphertext = crypto::encrypt(encryption_key, &object.encode()?)?;
    let body = json!({
        "pubkey": key.0.to_hex(),
        "namespace": key.1.id(),
        "timestamp": now_ms,
        "ttl": ttl_ms,
        "data": BASE64.encode(&ciphertext),
    });
    let request = PreparedRequest::<StoreResponse>::prepare(
        Endpoint::SnodeStore(key.1),
        Method::Post,
        Some(body),
        Target::Snode {
            address: snode_address.to_string(),
            swarm_pubkey: key.0,
        },
        AuthMethod::Standard,
    )?;
    Ok(request)
}

/// Build the push request for a namespace with already-staged edits
/// (driven by the config sync job). `None` when nothing owes a push.
pub fn build_push_request(
    registry: &ConfigRegistry,
    db: &Database,
    key: &ConfigKey,
    encryption_key: &SymmetricKey,
    snode_address: &str,
    ttl_ms: u64,
    clock: &dyn Clock,
) -> Result<Option<PreparedRequest<StoreResponse>>> {
    let entry = registry.entry(db, key)?;
    let guard = entry.lock().expect("entry lock poisoned");
    if guard.state == EntryState::Destroyed || !guard.needs_push()? {
        return Ok(None);
    }
    Ok(Some(push_request_for(
        &guard.object,
        key,
        encryption_key,
        snode_address,
        ttl_ms,
        clock.now_ms(),
    )?))
}

/// Confirm a successful push: the current object becomes the last-pushed
/// state and the dump advances.
pub fn confirm_pushed(registry: &ConfigRegistry, db: &Database, key: &ConfigKey) -> Result<()> {
    let entry = registry.entry(db, key)?;
    let mut guard = entry.lock().expect("entry lock poisoned");
    if guard.state == EntryState::Destroyed {
        return Ok(());
    }
    guard.mark_pushed()?;
    registry.dump(db, key, &guard)
}

fn apply(object: &mut ConfigObject, mutation: &ConfigMutation, now_ms: u64) -> Result<bool> {
    match (object, mutation) {
        (ConfigObject::UserProfile(profile), ConfigMutation::SetProfileName(name)) => {
            Ok(profile.display_name.set_local(name.clone(), now_ms))
        }
        (ConfigObject::UserProfile(profile), ConfigMutation::SetProfileAvatar(avatar)) => {
            Ok(profile.avatar.set_local(avatar.clone(), now_ms))
        }
        (ConfigObject::GroupInfo(info), ConfigMutation::SetGroupName(name)) => {
            Ok(info.name.set_local(name.clone(), now_ms))
        }
        (ConfigObject::GroupInfo(info), ConfigMutation::SetGroupDescription(description)) => {
            Ok(info.description.set_local(description.clone(), now_ms))
        }
        (ConfigObject::GroupInfo(info), ConfigMutation::SetGroupAvatar(avatar)) => {
            Ok(info.avatar.set_local(avatar.clone(), now_ms))
        }
        (ConfigObject::GroupInfo(info), ConfigMutation::SetExpiryTimer(seconds)) => {
            Ok(info.expiry_seconds.set_local(*seconds, now_ms))
        }
        (ConfigObject::GroupInfo(info), ConfigMutation::SetDeleteBefore(watermark)) => {
            // Monotonic: only advance if newer.
            if info.delete_before_ms.value.map(|v| *watermark <= v).unwrap_or(false) {
                return Ok(false);
            }
            Ok(info.delete_before_ms.set_local(Some(*watermark), now_ms))
        }
        (ConfigObject::GroupInfo(info), ConfigMutation::SetAttachDeleteBefore(watermark)) => {
            if info
                .attach_delete_before_ms
                .value
                .map(|v| *watermark <= v)
                .unwrap_or(false)
            {
                return Ok(false);
            }
            Ok(info.attach_delete_before_ms.set_local(Some(*watermark), now_ms))
        }
        (object, mutation) => Err(SyncError::ProtoConversionFailed(format!(
            "{mutation:?} cannot apply to {:?}",
            object.namespace()
        ))),
    }
}

/// Project the staged values to the database rows they own.
fn project_local(
    db: &Database,
    key: &ConfigKey,
    object: &ConfigObject,
    clock: &dyn Clock,
) -> Result<()> {
    let owner_hex = key.0.to_hex();
    match object {
        ConfigObject::UserProfile(profile) => {
            let existing = profiles::get_profile(db.conn(), &owner_hex).ok();
            profiles::upsert_profile(
                db.conn(),
                &sablier_store::Profile {
                    account_id: owner_hex,
                    display_name: profile.display_name.value.clone(),
                    avatar_url: profile.avatar.value.as_ref().map(|a| a.url.clone()),
                    avatar_key: profile.avatar.value.as_ref().map(|a| a.key.clone()),
                    avatar_path: existing.and_then(|p| p.avatar_path),
                    updated_at: clock.now(),
                },
            )?;
        }
        ConfigObject::GroupInfo(info) => {
            let existing = groups::get_group(db.conn(), &owner_hex).ok();
            groups::upsert_group(
                db.conn(),
                &sablier_store::Group {
                    group_id: owner_hex,
                    name: info.name.value.clone(),
                    description: info.description.value.clone(),
                    avatar_url: info.avatar.value.as_ref().map(|a| a.url.clone()),
                    avatar_key: info.avatar.value.as_ref().map(|a| a.key.clone()),
                    expiry_seconds: info.expiry_seconds.value,
                    delete_before_ms: info.delete_before_ms.value,
                    attach_delete_before_ms: info.attach_delete_before_ms.value,
                    destroyed: false,
                    local_is_admin: existing.as_ref().map(|g| g.local_is_admin).unwrap_or(false),
                    created_at: existing
                        .as_ref()
                        .map(|g| g.created_at)
                        .unwrap_or_else(|| clock.now()),
                },
            )?;
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sablier_shared::clock::test::FixedClock;
    use sablier_shared::types::AccountId;

    const ENC_KEY: SymmetricKey = [5u8; 32];
    const SNODE: &str = "https://snode.example.org:22021";

    fn stage(
        registry: &ConfigRegistry,
        db: &Database,
        key: ConfigKey,
        mutation: ConfigMutation,
        is_admin: bool,
        now_ms: u64,
    ) -> PushOutcome {
        let clock = FixedClock::at_ms(now_ms);
        stage_and_maybe_push(
            registry, db, key, mutation, is_admin, &ENC_KEY, SNODE, 86_400_000, &clock,
        )
        .unwrap()
    }

    fn group_key() -> ConfigKey {
        (AccountId::blinded15([3u8; 32]), Namespace::GroupInfo)
    }

    #[test]
    fn test_admin_edit_produces_push_request() {
        let db = Database::open_in_memory().unwrap();
        let registry = ConfigRegistry::new([7u8; 32]);

        let outcome = stage(
            &registry,
            &db,
            group_key(),
            ConfigMutation::SetGroupName("Ops".to_string()),
            true,
            1_000,
        );
        assert!(outcome.request.is_some());
        assert_eq!(outcome.events.len(), 1);

        // The projection committed alongside the staged edit.
        assert_eq!(db.get_group(&group_key().0.to_hex()).unwrap().name, "Ops");
    }

    #[test]
    fn test_non_admin_edit_never_pushes() {
        let db = Database::open_in_memory().unwrap();
        let registry = ConfigRegistry::new([7u8; 32]);

        let outcome = stage(
            &registry,
            &db,
            group_key(),
            ConfigMutation::SetGroupName("Rogue rename".to_string()),
            false,
            1_000,
        );
        // The in-memory object changed, the event fired, but no push.
        assert!(outcome.request.is_none());
        assert_eq!(outcome.events.len(), 1);

        let entry = registry.entry(&db, &group_key()).unwrap();
        assert_eq!(entry.lock().unwrap().state, EntryState::Dirty);
    }

    #[test]
    fn test_no_effective_change_emits_nothing() {
        let db = Database::open_in_memory().unwrap();
        let registry = ConfigRegistry::new([7u8; 32]);
        let key = group_key();

        stage(&registry, &db, key, ConfigMutation::SetGroupName("Ops".to_string()), true, 1_000);
        let outcome = stage(
            &registry,
            &db,
            key,
            ConfigMutation::SetGroupName("Ops".to_string()),
            true,
            2_000,
        );
        assert!(outcome.events.is_empty());
    }

    #[test]
    fn test_watermark_only_advances() {
        let db = Database::open_in_memory().unwrap();
        let registry = ConfigRegistry::new([7u8; 32]);
        let key = group_key();

        stage(&registry, &db, key, ConfigMutation::SetDeleteBefore(5_000), true, 1_000);
        // Regression attempt is a no-op.
        let outcome = stage(&registry, &db, key, ConfigMutation::SetDeleteBefore(4_000), true, 2_000);
        assert!(outcome.events.is_empty());

        let entry = registry.entry(&db, &key).unwrap();
        let guard = entry.lock().unwrap();
        match &guard.object {
            ConfigObject::GroupInfo(info) => {
                assert_eq!(info.delete_before_ms.value, Some(5_000));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_confirm_pushed_clears_dirty() {
        let db = Database::open_in_memory().unwrap();
        let registry = ConfigRegistry::new([7u8; 32]);
        let key = group_key();

        stage(&registry, &db, key, ConfigMutation::SetGroupName("Ops".to_string()), true, 1_000);
        confirm_pushed(&registry, &db, &key).unwrap();

        let entry = registry.entry(&db, &key).unwrap();
        let guard = entry.lock().unwrap();
        assert_eq!(guard.state, EntryState::Loaded);
        assert!(!guard.needs_push().unwrap());
    }

    #[test]
    fn test_mutation_namespace_mismatch_is_an_error() {
        let db = Database::open_in_memory().unwrap();
        let registry = ConfigRegistry::new([7u8; 32]);
        let clock = FixedClock::at_ms(1);

        let result = stage_and_maybe_push(
            &registry,
            &db,
            (AccountId::standard([1u8; 32]), Namespace::UserProfile),
            ConfigMutation::SetGroupName("nope".to_string()),
            true,
            &ENC_KEY,
            SNODE,
            1,
            &clock,
        );
        assert!(matches!(result, Err(SyncError::ProtoConversionFailed(_))));
    }
}
