//! Per-namespace config state lifecycle and registry.
//!
//! One [`ConfigEntry`] exists per (owning identity, namespace). Entries
//! serialize all merges and local edits through their own mutex, so
//! concurrent work on *different* namespaces proceeds fully in parallel
//! while work on the same namespace is mutually exclusive.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use sablier_shared::crypto::{self, SymmetricKey};
use sablier_shared::types::{AccountId, Namespace};
use sablier_store::{config_dumps, ConfigDump, Database};

use crate::config::ConfigObject;
use crate::error::{Result, SyncError};

/// Identifies one config object: owning identity plus namespace.
pub type ConfigKey = (AccountId, Namespace);

/// Lifecycle of a config entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Loaded from the last durable dump (or created empty) and in sync
    /// with the last push.
    Loaded,
    /// The in-memory object differs from the last pushed state.
    Dirty,
    /// Terminal: the owning group/thread was destroyed. All further
    /// operations are no-ops.
    Destroyed,
}

/// One namespace's authoritative in-memory state plus merge bookkeeping.
#[derive(Debug)]
pub struct ConfigEntry {
    pub state: EntryState,
    pub object: ConfigObject,
    /// Server hashes of every delta already merged; re-merging one is a
    /// no-op and must not re-trigger side effects.
    pub seen_hashes: HashSet<String>,
    /// Encoded form of the object at the last successful push/dump.
    pub last_pushed: Option<Vec<u8>>,
}

impl ConfigEntry {
    /// Whether the current object differs from the last pushed state.
    pub fn needs_push(&self) -> Result<bool> {
        if self.state == EntryState::Destroyed {
            return Ok(false);
        }
        let encoded = self.object.encode()?;
        Ok(self.last_pushed.as_deref() != Some(encoded.as_slice()))
    }

    pub fn mark_pushed(&mut self) -> Result<()> {
        self.last_pushed = Some(self.object.encode()?);
        if self.state == EntryState::Dirty {
            self.state = EntryState::Loaded;
        }
        Ok(())
    }
}

/// Version tag of the dump format.
const DUMP_VERSION: u32 = 1;

/// Serialized (pre-encryption) snapshot of a config entry.
#[derive(Serialize, Deserialize)]
struct DumpPayload {
    version: u32,
    namespace: Namespace,
    object: Vec<u8>,
    seen_hashes: Vec<String>,
    last_pushed: Option<Vec<u8>>,
    destroyed: bool,
}

/// Registry of all live config entries, keyed by (owner, namespace).
pub struct ConfigRegistry {
    entries: Mutex<HashMap<ConfigKey, Arc<Mutex<ConfigEntry>>>>,
    dump_key: SymmetricKey,
}

impl ConfigRegistry {
    /// `dump_key` encrypts durable snapshots; derive it from the local
    /// identity (see `Identity::derive_dump_key`).
    pub fn new(dump_key: SymmetricKey) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            dump_key,
        }
    }

    /// Fetch (loading on first use) the entry for a key. The returned arc
    /// is the per-namespace lock: hold its guard for the whole merge or
    /// edit.
    pub fn entry(&self, db: &Database, key: &ConfigKey) -> Result<Arc<Mutex<ConfigEntry>>> {
        {
            let entries = self.entries.lock().expect("registry lock poisoned");
            if let Some(entry) = entries.get(key) {
                return Ok(entry.clone());
            }
        }

        // Unloaded -> Loaded: deserialize the last durable dump, or start
        // from empty state.
        let loaded = match db.get_config_dump(&key.0.to_hex(), key.1.id()) {
            Ok(dump) => self.decode_dump(key.1, &dump)?,
            Err(sablier_store::StoreError::NotFound) => {
                debug!(owner = %key.0.short(), namespace = ?key.1, "no dump, starting empty");
                ConfigEntry {
                    state: EntryState::Loaded,
                    object: ConfigObject::empty(key.1)?,
                    seen_hashes: HashSet::new(),
                    last_pushed: None,
                }
            }
            Err(e) => return Err(e.into()),
        };

        let mut entries = self.entries.lock().expect("registry lock poisoned");
        // Another caller may have loaded concurrently; keep the first.
        let entry = entries
            .entry(*key)
            .or_insert_with(|| Arc::new(Mutex::new(loaded)));
        Ok(entry.clone())
    }

    fn decode_dump(&self, namespace: Namespace, dump: &ConfigDump) -> Result<ConfigEntry> {
        let plaintext = crypto::decrypt(&self.dump_key, &dump.data)?;
        let payload: DumpPayload = bincode::deserialize(&plaintext)
            .map_err(|e| SyncError::ProtoConversionFailed(e.to_string()))?;
        if payload.version != DUMP_VERSION || payload.namespace != namespace {
            return Err(SyncError::ProtoConversionFailed(format!(
                "dump tag mismatch (version {}, namespace {:?})",
                payload.version, payload.namespace
            )));
        }

        Ok(ConfigEntry {
            state: if payload.destroyed {
                EntryState::Destroyed
            } else {
                EntryState::Loaded
            },
            object: ConfigObject::decode(namespace, &payload.object)?,
            seen_hashes: payload.seen_hashes.into_iter().collect(),
            last_pushed: payload.last_pushed,
        })
    }

    /// Write the entry's durable dump. Called after every successful merge
    /// or push, with the entry guard still held.
    pub fn dump(&self, db: &Database, key: &ConfigKey, entry: &ConfigEntry) -> Result<()> {
        let payload = DumpPayload {
            version: DUMP_VERSION,
            namespace: key.1,
            object: entry.object.encode()?,
            seen_hashes: entry.seen_hashes.iter().cloned().collect(),
            last_pushed: entry.last_pushed.clone(),
            destroyed: entry.state == EntryState::Destroyed,
        };
        let plaintext = bincode::serialize(&payload)
            .map_err(|e| SyncError::ProtoConversionFailed(e.to_string()))?;
        let data = crypto::encrypt(&self.dump_key, &plaintext)?;

        db.upsert_config_dump(&ConfigDump {
            owner: key.0.to_hex(),
            namespace: key.1.id(),
            version: DUMP_VERSION,
            data,
            updated_at: Utc::now(),
        })?;
        Ok(())
    }

    /// Mark a namespace destroyed and drop its dumps. Terminal.
    pub fn destroy(&self, db: &Database, key: &ConfigKey) -> Result<()> {
        let entry = self.entry(db, key)?;
        {
            let mut guard = entry.lock().expect("entry lock poisoned");
            guard.state = EntryState::Destroyed;
        }
        config_dumps::delete_config_dumps(db.conn(), &key.0.to_hex())?;
        info!(owner = %key.0.short(), namespace = ?key.1, "config namespace destroyed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Lww;

    fn registry() -> ConfigRegistry {
        ConfigRegistry::new([7u8; 32])
    }

    fn key() -> ConfigKey {
        (AccountId::standard([1u8; 32]), Namespace::UserProfile)
    }

    #[test]
    fn test_entry_starts_empty_without_dump() {
        let db = Database::open_in_memory().unwrap();
        let registry = registry();

        let entry = registry.entry(&db, &key()).unwrap();
        let guard = entry.lock().unwrap();
        assert_eq!(guard.state, EntryState::Loaded);
        assert!(guard.seen_hashes.is_empty());
    }

    #[test]
    fn test_dump_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let registry = registry();
        let key = key();

        let entry = registry.entry(&db, &key).unwrap();
        {
            let mut guard = entry.lock().unwrap();
            if let ConfigObject::UserProfile(profile) = &mut guard.object {
                profile.display_name = Lww::new(Some("Alice".to_string()), 42);
            }
            guard.seen_hashes.insert("hashA".to_string());
            registry.dump(&db, &key, &guard).unwrap();
        }

        // A fresh registry sees the dumped state.
        let reloaded = ConfigRegistry::new([7u8; 32]);
        let entry = reloaded.entry(&db, &key).unwrap();
        let guard = entry.lock().unwrap();
        assert!(guard.seen_hashes.contains("hashA"));
        match &guard.object {
            ConfigObject::UserProfile(profile) => {
                assert_eq!(profile.display_name.value.as_deref(), Some("Alice"));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_wrong_dump_key_is_an_error() {
        let db = Database::open_in_memory().unwrap();
        let registry = registry();
        let key = key();

        let entry = registry.entry(&db, &key).unwrap();
        registry.dump(&db, &key, &entry.lock().unwrap()).unwrap();

        let other = ConfigRegistry::new([8u8; 32]);
        assert!(other.entry(&db, &key).is_err());
    }

    #[test]
    fn test_needs_push_tracks_last_pushed() {
        let db = Database::open_in_memory().unwrap();
        let registry = registry();

        let entry = registry.entry(&db, &key()).unwrap();
        let mut guard = entry.lock().unwrap();
        assert!(guard.needs_push().unwrap());

        guard.mark_pushed().unwrap();
        assert!(!guard.needs_push().unwrap());

        if let ConfigObject::UserProfile(profile) = &mut guard.object {
            profile.display_name = Lww::new(Some("Bob".to_string()), 1);
        }
        assert!(guard.needs_push().unwrap());
    }
}
