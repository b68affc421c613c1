//! CRUD operations for [`ConfigDump`] records.
//!
//! A dump is the durable snapshot of one in-memory config object, read at
//! startup and rewritten after every successful merge or push. The blob is
//! opaque to this layer apart from its version/namespace tag.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::ConfigDump;

impl Database {
    pub fn upsert_config_dump(&self, dump: &ConfigDump) -> Result<()> {
        upsert_config_dump(self.conn(), dump)
    }

    pub fn get_config_dump(&self, owner: &str, namespace: i32) -> Result<ConfigDump> {
        get_config_dump(self.conn(), owner, namespace)
    }

    pub fn delete_config_dumps(&self, owner: &str) -> Result<usize> {
        delete_config_dumps(self.conn(), owner)
    }
}

pub fn upsert_config_dump(conn: &Connection, dump: &ConfigDump) -> Result<()> {
    conn.execute(
        "INSERT INTO config_dumps (owner, namespace, version, data, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(owner, namespace) DO UPDATE SET
             version    = excluded.version,
             data       = excluded.data,
             updated_at = excluded.updated_at",
        params![
            dump.owner,
            dump.namespace,
            dump.version,
            dump.data,
            dump.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn get_config_dump(conn: &Connection, owner: &str, namespace: i32) -> Result<ConfigDump> {
    conn.query_row(
        "SELECT owner, namespace, version, data, updated_at
         FROM config_dumps
         WHERE owner = ?1 AND namespace = ?2",
        params![owner, namespace],
        row_to_dump,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
        other => StoreError::Sqlite(other),
    })
}

/// Remove every dump belonging to an identity (e.g. on group destruction).
pub fn delete_config_dumps(conn: &Connection, owner: &str) -> Result<usize> {
    let affected = conn.execute("DELETE FROM config_dumps WHERE owner = ?1", params![owner])?;
    Ok(affected)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn row_to_dump(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConfigDump> {
    let updated_str: String = row.get(4)?;
    let updated_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&updated_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(ConfigDump {
        owner: row.get(0)?,
        namespace: row.get(1)?,
        version: row.get(2)?,
        data: row.get(3)?,
        updated_at,
    })
}
