//! CRUD operations for [`Profile`] records.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Profile;

impl Database {
    /// Insert or update a profile row.
    pub fn upsert_profile(&self, profile: &Profile) -> Result<()> {
        upsert_profile(self.conn(), profile)
    }

    /// Fetch a single profile by account id.
    pub fn get_profile(&self, account_id: &str) -> Result<Profile> {
        get_profile(self.conn(), account_id)
    }
}

/// Insert or update a profile row (composable inside a transaction).
pub fn upsert_profile(conn: &Connection, profile: &Profile) -> Result<()> {
    conn.execute(
        "INSERT INTO profiles (account_id, display_name, avatar_url, avatar_key, avatar_path, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(account_id) DO UPDATE SET
             display_name = excluded.display_name,
             avatar_url   = excluded.avatar_url,
             avatar_key   = excluded.avatar_key,
             avatar_path  = excluded.avatar_path,
             updated_at   = excluded.updated_at",
        params![
            profile.account_id,
            profile.display_name,
            profile.avatar_url,
            profile.avatar_key.as_ref().map(hex::encode),
            profile.avatar_path,
            profile.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn get_profile(conn: &Connection, account_id: &str) -> Result<Profile> {
    conn.query_row(
        "SELECT account_id, display_name, avatar_url, avatar_key, avatar_path, updated_at
         FROM profiles
         WHERE account_id = ?1",
        params![account_id],
        row_to_profile,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
        other => StoreError::Sqlite(other),
    })
}

/// Record that a profile's avatar has been downloaded to a local path.
pub fn set_profile_avatar_path(conn: &Connection, account_id: &str, path: &str) -> Result<()> {
    conn.execute(
        "UPDATE profiles SET avatar_path = ?2 WHERE account_id = ?1",
        params![account_id, path],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`Profile`].
fn row_to_profile(row: &rusqlite::Row<'_>) -> rusqlite::Result<Profile> {
    let account_id: String = row.get(0)?;
    let display_name: Option<String> = row.get(1)?;
    let avatar_url: Option<String> = row.get(2)?;
    let avatar_key_hex: Option<String> = row.get(3)?;
    let avatar_path: Option<String> = row.get(4)?;
    let updated_str: String = row.get(5)?;

    let avatar_key = avatar_key_hex
        .map(|k| hex::decode(&k))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;

    let updated_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&updated_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Profile {
        account_id,
        display_name,
        avatar_url,
        avatar_key,
        avatar_path,
        updated_at,
    })
}
