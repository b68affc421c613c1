//! CRUD operations for [`OpenGroup`] records.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::OpenGroup;

impl Database {
    pub fn upsert_open_group(&self, open_group: &OpenGroup) -> Result<()> {
        upsert_open_group(self.conn(), open_group)
    }

    pub fn get_open_group(&self, server: &str, room: &str) -> Result<OpenGroup> {
        get_open_group(self.conn(), server, room)
    }

    pub fn list_open_groups(&self, server: &str) -> Result<Vec<OpenGroup>> {
        list_open_groups(self.conn(), server)
    }
}

pub fn upsert_open_group(conn: &Connection, open_group: &OpenGroup) -> Result<()> {
    conn.execute(
        "INSERT INTO open_groups (server, room, name, image_id, image_path, info_updates, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(server, room) DO UPDATE SET
             name         = excluded.name,
             image_id     = excluded.image_id,
             image_path   = excluded.image_path,
             info_updates = excluded.info_updates",
        params![
            open_group.server,
            open_group.room,
            open_group.name,
            open_group.image_id,
            open_group.image_path,
            open_group.info_updates,
            open_group.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn get_open_group(conn: &Connection, server: &str, room: &str) -> Result<OpenGroup> {
    conn.query_row(
        "SELECT server, room, name, image_id, image_path, info_updates, created_at
         FROM open_groups
         WHERE server = ?1 AND room = ?2",
        params![server, room],
        row_to_open_group,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
        other => StoreError::Sqlite(other),
    })
}

pub fn list_open_groups(conn: &Connection, server: &str) -> Result<Vec<OpenGroup>> {
    let mut stmt = conn.prepare(
        "SELECT server, room, name, image_id, image_path, info_updates, created_at
         FROM open_groups
         WHERE server = ?1
         ORDER BY room ASC",
    )?;

    let rows = stmt.query_map(params![server], row_to_open_group)?;

    let mut rooms = Vec::new();
    for row in rows {
        rooms.push(row?);
    }
    Ok(rooms)
}

/// Record that a room image was downloaded to a local path.
pub fn set_open_group_image(
    conn: &Connection,
    server: &str,
    room: &str,
    image_id: Option<&str>,
    image_path: Option<&str>,
) -> Result<()> {
    conn.execute(
        "UPDATE open_groups SET image_id = ?3, image_path = ?4
         WHERE server = ?1 AND room = ?2",
        params![server, room, image_id, image_path],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn row_to_open_group(row: &rusqlite::Row<'_>) -> rusqlite::Result<OpenGroup> {
    let created_str: String = row.get(6)?;
    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(OpenGroup {
        server: row.get(0)?,
        room: row.get(1)?,
        name: row.get(2)?,
        image_id: row.get(3)?,
        image_path: row.get(4)?,
        info_updates: row.get(5)?,
        created_at,
    })
}
