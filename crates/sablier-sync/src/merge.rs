//! The config merge engine.
//!
//! Takes encrypted configuration deltas received from other devices and
//! merges them into the authoritative in-memory state, then projects the
//! resolved fields into the database in a single transaction and emits
//! side-effect directives. Re-applying an already-merged delta (by server
//! hash) changes nothing and re-triggers nothing.

use std::collections::BTreeMap;

use tracing::{debug, warn};
use uuid::Uuid;

use sablier_shared::clock::Clock;
use sablier_shared::crypto::{self, SymmetricKey};
use sablier_shared::types::{AccountId, Namespace};
use sablier_store::{
    groups, interactions, profiles, reactions, Database, Group, GroupMember, MemberRole, Profile,
    StoreError,
};

use crate::config::{AvatarPointer, ConfigObject, ConfigRole};
use crate::directives::{ChangeEvent, Directive};
use crate::error::Result;
use crate::state::{ConfigKey, ConfigRegistry, EntryState};

/// One encrypted unit of configuration change received from the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigDelta {
    pub namespace: Namespace,
    pub server_hash: String,
    pub server_timestamp_ms: u64,
    pub ciphertext: Vec<u8>,
}

/// Result of one merge call.
#[derive(Debug, Default)]
pub struct MergeOutcome {
    /// Server hashes newly merged into state.
    pub applied: Vec<String>,
    /// Hashes skipped (already merged, undecryptable, malformed).
    pub skipped: Vec<String>,
    pub directives: Vec<Directive>,
    pub events: Vec<ChangeEvent>,
}

impl MergeOutcome {
    fn absorb(&mut self, other: MergeOutcome) {
        self.applied.extend(other.applied);
        self.skipped.extend(other.skipped);
        self.directives.extend(other.directives);
        self.events.extend(other.events);
    }
}

/// Deterministic processing order: server timestamp, ties broken by
/// server hash, so every device resolves the same way.
pub fn sort_deltas(deltas: &mut [ConfigDelta]) {
    deltas.sort_by(|a, b| {
        a.server_timestamp_ms
            .cmp(&b.server_timestamp_ms)
            .then_with(|| a.server_hash.cmp(&b.server_hash))
    });
}

/// Merge a batch of deltas for one owning identity.
///
/// Deltas may span namespaces; each namespace merges under its own lock
/// and a failure confined to one namespace does not affect the others.
pub fn merge_incoming(
    registry: &ConfigRegistry,
    db: &mut Database,
    owner: AccountId,
    local_account: &AccountId,
    decryption_key: &SymmetricKey,
    deltas: Vec<ConfigDelta>,
    clock: &dyn Clock,
) -> Result<MergeOutcome> {
    let mut by_namespace: BTreeMap<Namespace, Vec<ConfigDelta>> = BTreeMap::new();
    for delta in deltas {
        by_namespace.entry(delta.namespace).or_default().push(delta);
    }

    let mut outcome = MergeOutcome::default();
    for (namespace, group_deltas) in by_namespace {
        match merge_namespace(
            registry,
            db,
            (owner, namespace),
            local_account,
            decryption_key,
            group_deltas,
            clock,
        ) {
            Ok(sub) => outcome.absorb(sub),
            // A failure scoped to one namespace must not abort the rest
            // of the batch.
            Err(e) => warn!(
                owner = %owner.short(),
                namespace = ?namespace,
                error = %e,
                "namespace merge failed, continuing batch"
            ),
        }
    }
    Ok(outcome)
}

fn merge_namespace(
    registry: &ConfigRegistry,
    db: &mut Database,
    key: ConfigKey,
    local_account: &AccountId,
    decryption_key: &SymmetricKey,
    mut deltas: Vec<ConfigDelta>,
    clock: &dyn Clock,
) -> Result<MergeOutcome> {
    let mut outcome = MergeOutcome::default();
    let entry = registry.entry(db, &key)?;
    let mut guard = entry.lock().expect("entry lock poisoned");

    // Destroyed is terminal: everything becomes a no-op.
    if guard.state == EntryState::Destroyed {
        outcome.skipped.extend(deltas.into_iter().map(|d| d.server_hash));
        return Ok(outcome);
    }

    sort_deltas(&mut deltas);

    let before = guard.object.clone();
    let was_dirty = guard.state == EntryState::Dirty;
    let mut changed = false;
    let mut tombstoned = false;

    for delta in deltas {
        if guard.seen_hashes.contains(&delta.server_hash) {
            debug!(hash = %delta.server_hash, "delta already merged, skipping");
            outcome.skipped.push(delta.server_hash);
            continue;
        }

        // A single bad delta never aborts the merge of the others.
        let plaintext = match crypto::decrypt(decryption_key, &delta.ciphertext) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(hash = %delta.server_hash, error = %e, "undecryptable delta, skipping");
                outcome.skipped.push(delta.server_hash);
                continue;
            }
        };
        let incoming = match ConfigObject::decode(key.1, &plaintext) {
            Ok(object) => object,
            Err(e) => {
                warn!(hash = %delta.server_hash, error = %e, "malformed delta, skipping");
                outcome.skipped.push(delta.server_hash);
                continue;
            }
        };

        // Group-destroyed tombstone short-circuits the rest of the merge:
        // all other field changes in this and later deltas are ignored.
        if let ConfigObject::GroupInfo(info) = &incoming {
            if info.destroyed {
                guard.seen_hashes.insert(delta.server_hash.clone());
                outcome.applied.push(delta.server_hash);
                tombstoned = true;
                break;
            }
        }

        match guard.object.merge_from(&incoming) {
            Ok(delta_changed) => {
                changed |= delta_changed;
                guard.seen_hashes.insert(delta.server_hash.clone());
                outcome.applied.push(delta.server_hash);
            }
            Err(e) => {
                warn!(hash = %delta.server_hash, error = %e, "incompatible delta, skipping");
                outcome.skipped.push(delta.server_hash);
            }
        }
    }

    if tombstoned {
        guard.state = EntryState::Destroyed;
        db.with_transaction(|tx| {
            groups::purge_group(tx, &key.0.to_hex())?;
            sablier_store::config_dumps::delete_config_dumps(tx, &key.0.to_hex())?;
            Ok(())
        })?;
        outcome.directives.push(Directive::PurgeGroup { group: key.0 });
        outcome
            .events
            .push(ChangeEvent::Conversation { thread_id: key.0.to_hex() });
        return Ok(outcome);
    }

    if outcome.applied.is_empty() {
        // Nothing new: state and side effects stay exactly as they were.
        return Ok(outcome);
    }

    // Project the resolved state into the database in one transaction and
    // derive the side-effect directives from what actually changed.
    let after = guard.object.clone();
    let mut directives = Vec::new();
    let mut events = Vec::new();
    db.with_transaction(|tx| {
        project(
            tx,
            &key,
            local_account,
            &before,
            &after,
            changed,
            clock,
            &mut directives,
            &mut events,
        )
    })?;
    outcome.directives.extend(directives);
    outcome.events.extend(events);

    // After a clean merge the in-memory state agrees with the network;
    // only pre-existing local edits still owe a push.
    if was_dirty && guard.needs_push()? {
        guard.state = EntryState::Dirty;
        outcome.directives.push(Directive::RePush {
            owner: key.0,
            namespace: key.1,
        });
    } else {
        guard.mark_pushed()?;
    }

    // Advance the durable dump.
    registry.dump(db, &key, &guard)?;

    Ok(outcome)
}

/// Write the database projection of a merged namespace and collect
/// directives/events. Runs inside the merge transaction.
#[allow(clippy::too_many_arguments)]
fn project(
    tx: &rusqlite::Transaction<'_>,
    key: &ConfigKey,
    local_account: &AccountId,
    before: &ConfigObject,
    after: &ConfigObject,
    changed: bool,
    clock: &dyn Clock,
    directives: &mut Vec<Directive>,
    events: &mut Vec<ChangeEvent>,
) -> std::result::Result<(), StoreError> {
    let owner_hex = key.0.to_hex();
    let now = clock.now();

    match (before, after) {
        (ConfigObject::UserProfile(old), ConfigObject::UserProfile(new)) => {
            let existing = profiles::get_profile(tx, &owner_hex).ok();
            let avatar_changed = old.avatar.value != new.avatar.value;
            let avatar_path = keep_path_if_current(existing.as_ref().map(|p| {
                (p.avatar_url.clone(), p.avatar_key.clone(), p.avatar_path.clone())
            }), &new.avatar.value);

            profiles::upsert_profile(
                tx,
                &Profile {
                    account_id: owner_hex.clone(),
                    display_name: new.display_name.value.clone(),
                    avatar_url: new.avatar.value.as_ref().map(|a| a.url.clone()),
                    avatar_key: new.avatar.value.as_ref().map(|a| a.key.clone()),
                    avatar_path,
                    updated_at: now,
                },
            )?;

            if let Some(avatar) = &new.avatar.value {
                if avatar_changed || !on_disk(existing.as_ref(), avatar) {
                    push_avatar_directive(directives, &owner_hex, avatar);
                }
            }
            if changed {
                events.push(ChangeEvent::Profile { account_id: owner_hex.clone() });
            }
        }

        (ConfigObject::Contacts(old), ConfigObject::Contacts(new)) => {
            for (account, entry) in &new.contacts {
                let old_entry = old.contacts.get(account);
                let entry_changed = old_entry != Some(entry);
                if !entry_changed {
                    continue;
                }

                let existing = profiles::get_profile(tx, account).ok();
                let avatar_path = keep_path_if_current(existing.as_ref().map(|p| {
                    (p.avatar_url.clone(), p.avatar_key.clone(), p.avatar_path.clone())
                }), &entry.avatar.value);

                profiles::upsert_profile(
                    tx,
                    &Profile {
                        account_id: account.clone(),
                        display_name: entry.name.value.clone(),
                        avatar_url: entry.avatar.value.as_ref().map(|a| a.url.clone()),
                        avatar_key: entry.avatar.value.as_ref().map(|a| a.key.clone()),
                        avatar_path,
                        updated_at: now,
                    },
                )?;

                if let Some(avatar) = &entry.avatar.value {
                    if !on_disk(existing.as_ref(), avatar) {
                        push_avatar_directive(directives, account, avatar);
                    }
                }
                events.push(ChangeEvent::Profile { account_id: account.clone() });
            }
        }

        (ConfigObject::GroupInfo(old), ConfigObject::GroupInfo(new)) => {
            let existing = groups::get_group(tx, &owner_hex).ok();
            let local_is_admin = existing.as_ref().map(|g| g.local_is_admin).unwrap_or(false);
            let avatar_changed = old.avatar.value != new.avatar.value;

            groups::upsert_group(
                tx,
                &Group {
                    group_id: owner_hex.clone(),
                    name: new.name.value.clone(),
                    description: new.description.value.clone(),
                    avatar_url: new.avatar.value.as_ref().map(|a| a.url.clone()),
                    avatar_key: new.avatar.value.as_ref().map(|a| a.key.clone()),
                    expiry_seconds: new.expiry_seconds.value,
                    delete_before_ms: new.delete_before_ms.value,
                    attach_delete_before_ms: new.attach_delete_before_ms.value,
                    destroyed: false,
                    local_is_admin,
                    created_at: existing.as_ref().map(|g| g.created_at).unwrap_or(now),
                },
            )?;

            if let Some(avatar) = &new.avatar.value {
                if avatar_changed {
                    push_avatar_directive(directives, &owner_hex, avatar);
                }
            }

            // delete_before / attach_delete_before watermarks: local
            // deletion always, server deletion only for admins.
            let mut doomed: Vec<Uuid> = Vec::new();
            let mut hashes: Vec<String> = Vec::new();
            apply_watermark(
                tx,
                &owner_hex,
                old.delete_before_ms.value,
                new.delete_before_ms.value,
                false,
                &mut doomed,
                &mut hashes,
            )?;
            apply_watermark(
                tx,
                &owner_hex,
                old.attach_delete_before_ms.value,
                new.attach_delete_before_ms.value,
                true,
                &mut doomed,
                &mut hashes,
            )?;

            if !doomed.is_empty() {
                hashes.extend(reactions::reaction_hashes_for_interactions(tx, &doomed)?);
                interactions::delete_interactions(tx, &doomed)?;
                directives.push(Directive::LocalDelete {
                    thread_id: owner_hex.clone(),
                    interaction_ids: doomed,
                });
                if local_is_admin && !hashes.is_empty() {
                    directives.push(Directive::ServerDelete { owner: key.0, hashes });
                }
            }

            if changed {
                events.push(ChangeEvent::Conversation { thread_id: owner_hex.clone() });
            }
        }

        (ConfigObject::GroupMembers(old), ConfigObject::GroupMembers(new)) => {
            for (account, entry) in &new.members {
                if old.members.get(account) == Some(entry) {
                    continue;
                }
                if entry.removed.value {
                    groups::remove_group_member(tx, &owner_hex, account)?;
                } else {
                    groups::upsert_group_member(
                        tx,
                        &GroupMember {
                            group_id: owner_hex.clone(),
                            account_id: account.clone(),
                            role: match entry.role.value {
                                ConfigRole::Admin => MemberRole::Admin,
                                ConfigRole::Member => MemberRole::Member,
                            },
                            joined_at: now,
                        },
                    )?;
                }
            }

            // Keep the group row's admin flag for the local user current.
            let local_hex = local_account.to_hex();
            let local_is_admin = new
                .members
                .get(&local_hex)
                .map(|m| m.role.value == ConfigRole::Admin && !m.removed.value)
                .unwrap_or(false);
            if let Ok(mut group) = groups::get_group(tx, &owner_hex) {
                if group.local_is_admin != local_is_admin {
                    group.local_is_admin = local_is_admin;
                    groups::upsert_group(tx, &group)?;
                }
            }

            if changed {
                events.push(ChangeEvent::Conversation { thread_id: owner_hex.clone() });
            }
        }

        // Group keys have no database projection; they only feed the
        // dispatch layer.
        (ConfigObject::GroupKeys(_), ConfigObject::GroupKeys(_)) => {}

        _ => {}
    }

    Ok(())
}

fn apply_watermark(
    tx: &rusqlite::Transaction<'_>,
    thread_id: &str,
    old: Option<u64>,
    new: Option<u64>,
    attachments_only: bool,
    doomed: &mut Vec<Uuid>,
    hashes: &mut Vec<String>,
) -> std::result::Result<(), StoreError> {
    let Some(watermark) = new else { return Ok(()) };
    if old.map(|o| watermark <= o).unwrap_or(false) {
        return Ok(());
    }

    for interaction in
        interactions::interactions_before(tx, thread_id, watermark, attachments_only)?
    {
        if doomed.contains(&interaction.id) {
            continue;
        }
        doomed.push(interaction.id);
        if let Some(hash) = interaction.server_hash {
            hashes.push(hash);
        }
    }
    Ok(())
}

/// Keep a previously-downloaded avatar path only when it still matches
/// the (url, key) pair being written.
fn keep_path_if_current(
    existing: Option<(Option<String>, Option<Vec<u8>>, Option<String>)>,
    new_avatar: &Option<AvatarPointer>,
) -> Option<String> {
    let (url, key, path) = existing?;
    let avatar = new_avatar.as_ref()?;
    if url.as_deref() == Some(avatar.url.as_str()) && key.as_deref() == Some(avatar.key.as_slice())
    {
        path
    } else {
        None
    }
}

/// Whether the avatar is already present on disk for this profile row.
fn on_disk(existing: Option<&Profile>, avatar: &AvatarPointer) -> bool {
    existing
        .map(|p| {
            p.avatar_url.as_deref() == Some(avatar.url.as_str())
                && p.avatar_key.as_deref() == Some(avatar.key.as_slice())
                && p.avatar_path.is_some()
        })
        .unwrap_or(false)
}

/// One download directive per owner, even when several deltas touched the
/// avatar in the same merge.
fn push_avatar_directive(directives: &mut Vec<Directive>, owner: &str, avatar: &AvatarPointer) {
    let duplicate = directives.iter().any(|d| match d {
        Directive::DownloadAvatar { owner: existing, .. } => existing == owner,
        _ => false,
    });
    if !duplicate {
        directives.push(Directive::DownloadAvatar {
            owner: owner.to_string(),
            url: avatar.url.clone(),
            key: avatar.key.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sablier_shared::clock::test::FixedClock;
    use sablier_store::{Interaction, Reaction, SendState};

    use crate::config::{GroupInfoConfig, Lww, UserProfileConfig};

    const KEY: SymmetricKey = [3u8; 32];

    fn local() -> AccountId {
        AccountId::standard([0xEEu8; 32])
    }

    fn group_owner() -> AccountId {
        AccountId::blinded15([0x33u8; 32])
    }

    fn delta(namespace: Namespace, hash: &str, ts: u64, object: &ConfigObject) -> ConfigDelta {
        ConfigDelta {
            namespace,
            server_hash: hash.to_string(),
            server_timestamp_ms: ts,
            ciphertext: crypto::encrypt(&KEY, &object.encode().unwrap()).unwrap(),
        }
    }

    fn group_info_with_avatar(name: &str, ts: u64) -> ConfigObject {
        let mut info = GroupInfoConfig::default();
        info.name = Lww::new(name.to_string(), ts);
        info.avatar = Lww::new(
            Some(AvatarPointer { url: "https://files.example.org/9".to_string(), key: vec![9; 32] }),
            ts,
        );
        ConfigObject::GroupInfo(info)
    }

    fn merge(
        registry: &ConfigRegistry,
        db: &mut Database,
        owner: AccountId,
        deltas: Vec<ConfigDelta>,
    ) -> MergeOutcome {
        let clock = FixedClock::at_ms(1_700_000_000_000);
        merge_incoming(registry, db, owner, &local(), &KEY, deltas, &clock).unwrap()
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut db = Database::open_in_memory().unwrap();
        let registry = ConfigRegistry::new([7u8; 32]);
        let owner = group_owner();
        let d = delta(Namespace::GroupInfo, "h1", 100, &group_info_with_avatar("Ops", 100));

        let first = merge(&registry, &mut db, owner, vec![d.clone()]);
        assert_eq!(first.applied, vec!["h1"]);
        assert!(first
            .directives
            .iter()
            .any(|d| matches!(d, Directive::DownloadAvatar { .. })));

        // Re-applying the same delta changes nothing and re-triggers no
        // side effects.
        let second = merge(&registry, &mut db, owner, vec![d]);
        assert!(second.applied.is_empty());
        assert!(second.directives.is_empty());
        assert!(second.events.is_empty());
    }

    #[test]
    fn test_permutations_converge() {
        let deltas = vec![
            delta(Namespace::GroupInfo, "hA", 300, &group_info_with_avatar("late", 300)),
            delta(Namespace::GroupInfo, "hB", 200, &group_info_with_avatar("middle", 200)),
            delta(Namespace::GroupInfo, "hC", 100, &group_info_with_avatar("early", 100)),
        ];
        let mut reversed = deltas.clone();
        reversed.reverse();

        let run = |deltas: Vec<ConfigDelta>| {
            let mut db = Database::open_in_memory().unwrap();
            let registry = ConfigRegistry::new([7u8; 32]);
            merge(&registry, &mut db, group_owner(), deltas);
            let entry = registry
                .entry(&db, &(group_owner(), Namespace::GroupInfo))
                .unwrap();
            let object = entry.lock().unwrap().object.clone();
            object
        };

        assert_eq!(run(deltas), run(reversed));
    }

    #[test]
    fn test_stale_timestamp_leaves_field_unchanged() {
        let mut db = Database::open_in_memory().unwrap();
        let registry = ConfigRegistry::new([7u8; 32]);
        let owner = local();

        let mut profile = UserProfileConfig::default();
        profile.display_name = Lww::new(Some("current".to_string()), 500);
        let current = ConfigObject::UserProfile(profile);
        merge(&registry, &mut db, owner, vec![delta(Namespace::UserProfile, "h1", 500, &current)]);

        let mut stale = UserProfileConfig::default();
        stale.display_name = Lww::new(Some("stale".to_string()), 400);
        let outcome = merge(
            &registry,
            &mut db,
            owner,
            vec![delta(Namespace::UserProfile, "h2", 600, &ConfigObject::UserProfile(stale))],
        );
        // The delta itself is new (hash applied) but the field is not.
        assert_eq!(outcome.applied, vec!["h2"]);
        assert!(outcome.events.is_empty());

        let row = db.get_profile(&owner.to_hex()).unwrap();
        assert_eq!(row.display_name.as_deref(), Some("current"));
    }

    #[test]
    fn test_bad_delta_skipped_good_delta_applied() {
        let mut db = Database::open_in_memory().unwrap();
        let registry = ConfigRegistry::new([7u8; 32]);
        let owner = group_owner();

        let garbage = ConfigDelta {
            namespace: Namespace::GroupInfo,
            server_hash: "bad".to_string(),
            server_timestamp_ms: 50,
            ciphertext: vec![0xFF; 48],
        };
        let good = delta(Namespace::GroupInfo, "good", 100, &group_info_with_avatar("Ops", 100));

        let outcome = merge(&registry, &mut db, owner, vec![garbage, good]);
        assert_eq!(outcome.applied, vec!["good"]);
        assert_eq!(outcome.skipped, vec!["bad"]);
        assert_eq!(db.get_group(&owner.to_hex()).unwrap().name, "Ops");
    }

    #[test]
    fn test_tombstone_short_circuits_and_purges() {
        let mut db = Database::open_in_memory().unwrap();
        let registry = ConfigRegistry::new([7u8; 32]);
        let owner = group_owner();

        merge(
            &registry,
            &mut db,
            owner,
            vec![delta(Namespace::GroupInfo, "h1", 100, &group_info_with_avatar("Ops", 100))],
        );

        let mut dead = GroupInfoConfig::default();
        dead.destroyed = true;
        // The same delta also carries a rename; the tombstone must win
        // and the rename must be ignored.
        dead.name = Lww::new("renamed".to_string(), 999);
        let outcome = merge(
            &registry,
            &mut db,
            owner,
            vec![delta(Namespace::GroupInfo, "h2", 200, &ConfigObject::GroupInfo(dead))],
        );

        assert!(outcome
            .directives
            .iter()
            .any(|d| matches!(d, Directive::PurgeGroup { .. })));
        assert!(matches!(
            db.get_group(&owner.to_hex()),
            Err(StoreError::NotFound)
        ));

        // Terminal: later deltas are no-ops.
        let late = merge(
            &registry,
            &mut db,
            owner,
            vec![delta(Namespace::GroupInfo, "h3", 300, &group_info_with_avatar("zombie", 300))],
        );
        assert!(late.applied.is_empty());
        assert_eq!(late.skipped, vec!["h3"]);
    }

    fn seed_watermark_thread(db: &Database, owner: &AccountId, admin: bool) -> Vec<String> {
        db.upsert_group(&Group {
            group_id: owner.to_hex(),
            name: "Ops".to_string(),
            description: None,
            avatar_url: None,
            avatar_key: None,
            expiry_seconds: None,
            delete_before_ms: None,
            attach_delete_before_ms: None,
            destroyed: false,
            local_is_admin: admin,
            created_at: Utc::now(),
        })
        .unwrap();

        let mut hashes = Vec::new();
        for (i, ts) in [(0u8, 100u64), (1, 200), (2, 300), (3, 5_000)] {
            let interaction = Interaction {
                id: Uuid::new_v4(),
                thread_id: owner.to_hex(),
                author: "05aa".to_string(),
                body: Some(format!("m{i}")),
                state: SendState::Sent,
                failure_text: None,
                server_hash: Some(format!("msg-hash-{i}")),
                sent_timestamp_ms: ts,
                has_attachments: false,
                expires_in_ms: None,
                created_at: Utc::now(),
            };
            db.insert_interaction(&interaction).unwrap();
            if ts < 1000 {
                hashes.push(format!("msg-hash-{i}"));
            }
            // One reaction with a network hash on the first doomed row.
            if i == 0 {
                db.add_reaction(&Reaction {
                    id: Uuid::new_v4(),
                    interaction_id: interaction.id,
                    emoji: "👍".to_string(),
                    author: "05bb".to_string(),
                    server_hash: Some("react-hash-0".to_string()),
                    created_at: Utc::now(),
                })
                .unwrap();
            }
        }
        hashes
    }

    #[test]
    fn test_delete_before_watermark_admin() {
        let mut db = Database::open_in_memory().unwrap();
        let registry = ConfigRegistry::new([7u8; 32]);
        let owner = group_owner();
        let doomed_hashes = seed_watermark_thread(&db, &owner, true);

        let mut info = GroupInfoConfig::default();
        info.name = Lww::new("Ops".to_string(), 10);
        info.delete_before_ms = Lww::new(Some(1000), 400);
        let outcome = merge(
            &registry,
            &mut db,
            owner,
            vec![delta(Namespace::GroupInfo, "wm", 400, &ConfigObject::GroupInfo(info))],
        );

        let local_delete = outcome
            .directives
            .iter()
            .find_map(|d| match d {
                Directive::LocalDelete { interaction_ids, .. } => Some(interaction_ids.len()),
                _ => None,
            })
            .expect("local delete directive");
        assert_eq!(local_delete, 3);

        let server_delete = outcome
            .directives
            .iter()
            .find_map(|d| match d {
                Directive::ServerDelete { hashes, .. } => Some(hashes.clone()),
                _ => None,
            })
            .expect("server delete directive for admin");
        for hash in &doomed_hashes {
            assert!(server_delete.contains(hash));
        }
        assert!(server_delete.contains(&"react-hash-0".to_string()));
        assert!(!server_delete.contains(&"msg-hash-3".to_string()));

        // Rows are gone from the projection.
        let remaining =
            interactions::interactions_before(db.conn(), &owner.to_hex(), u64::MAX, false)
                .unwrap();
        assert_eq!(remaining.len(), 1);
    }

    #[test]
    fn test_delete_before_watermark_non_admin_has_no_server_delete() {
        let mut db = Database::open_in_memory().unwrap();
        let registry = ConfigRegistry::new([7u8; 32]);
        let owner = group_owner();
        seed_watermark_thread(&db, &owner, false);

        let mut info = GroupInfoConfig::default();
        info.name = Lww::new("Ops".to_string(), 10);
        info.delete_before_ms = Lww::new(Some(1000), 400);
        let outcome = merge(
            &registry,
            &mut db,
            owner,
            vec![delta(Namespace::GroupInfo, "wm", 400, &ConfigObject::GroupInfo(info))],
        );

        assert!(outcome
            .directives
            .iter()
            .any(|d| matches!(d, Directive::LocalDelete { .. })));
        assert!(!outcome
            .directives
            .iter()
            .any(|d| matches!(d, Directive::ServerDelete { .. })));
    }

    #[test]
    fn test_avatar_directive_deduplicated_across_deltas() {
        let mut db = Database::open_in_memory().unwrap();
        let registry = ConfigRegistry::new([7u8; 32]);
        let owner = group_owner();

        let outcome = merge(
            &registry,
            &mut db,
            owner,
            vec![
                delta(Namespace::GroupInfo, "h1", 100, &group_info_with_avatar("a", 100)),
                delta(Namespace::GroupInfo, "h2", 200, &group_info_with_avatar("b", 200)),
            ],
        );

        let downloads = outcome
            .directives
            .iter()
            .filter(|d| matches!(d, Directive::DownloadAvatar { .. }))
            .count();
        assert_eq!(downloads, 1);
    }
}
