//! CRUD operations for [`Interaction`] records and their send-state
//! machine.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Interaction, SendState};

impl Database {
    pub fn insert_interaction(&self, interaction: &Interaction) -> Result<()> {
        insert_interaction(self.conn(), interaction)
    }

    pub fn get_interaction(&self, id: Uuid) -> Result<Interaction> {
        get_interaction(self.conn(), id)
    }

    pub fn mark_interaction_sent(&self, id: Uuid, server_hash: Option<&str>) -> Result<()> {
        mark_interaction_sent(self.conn(), id, server_hash)
    }

    pub fn mark_in_flight_failed(&self, thread_id: &str, cause: &str) -> Result<usize> {
        mark_in_flight_failed(self.conn(), thread_id, cause)
    }
}

pub fn insert_interaction(conn: &Connection, interaction: &Interaction) -> Result<()> {
    conn.execute(
        "INSERT INTO interactions (id, thread_id, author, body, state, failure_text,
                                   server_hash, sent_timestamp_ms, has_attachments,
                                   expires_in_ms, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            interaction.id.to_string(),
            interaction.thread_id,
            interaction.author,
            interaction.body,
            interaction.state.as_str(),
            interaction.failure_text,
            interaction.server_hash,
            interaction.sent_timestamp_ms as i64,
            interaction.has_attachments,
            interaction.expires_in_ms.map(|v| v as i64),
            interaction.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn get_interaction(conn: &Connection, id: Uuid) -> Result<Interaction> {
    conn.query_row(
        "SELECT id, thread_id, author, body, state, failure_text, server_hash,
                sent_timestamp_ms, has_attachments, expires_in_ms, created_at
         FROM interactions WHERE id = ?1",
        params![id.to_string()],
        row_to_interaction,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
        other => StoreError::Sqlite(other),
    })
}

/// Look an interaction up by its dedup identity.
pub fn get_interaction_by_identity(
    conn: &Connection,
    thread_id: &str,
    sent_timestamp_ms: u64,
    author: &str,
) -> Result<Interaction> {
    conn.query_row(
        "SELECT id, thread_id, author, body, state, failure_text, server_hash,
                sent_timestamp_ms, has_attachments, expires_in_ms, created_at
         FROM interactions
         WHERE thread_id = ?1 AND sent_timestamp_ms = ?2 AND author = ?3",
        params![thread_id, sent_timestamp_ms as i64, author],
        row_to_interaction,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
        other => StoreError::Sqlite(other),
    })
}

/// Record a successful send. Idempotent: an already-`sent` row with a
/// server hash is left untouched so re-delivery never clobbers state.
pub fn mark_interaction_sent(conn: &Connection, id: Uuid, server_hash: Option<&str>) -> Result<()> {
    conn.execute(
        "UPDATE interactions
         SET state = 'sent', failure_text = NULL,
             server_hash = COALESCE(server_hash, ?2)
         WHERE id = ?1 AND state != 'sent'",
        params![id.to_string(), server_hash],
    )?;
    Ok(())
}

/// Flip every in-flight row of a thread to its terminal failed state,
/// attaching a human-readable cause. Returns the number of rows touched.
pub fn mark_in_flight_failed(conn: &Connection, thread_id: &str, cause: &str) -> Result<usize> {
    let affected = conn.execute(
        "UPDATE interactions
         SET state = CASE state WHEN 'syncing' THEN 'failed_to_sync' ELSE 'failed' END,
             failure_text = ?2
         WHERE thread_id = ?1 AND state IN ('sending', 'syncing')",
        params![thread_id, cause],
    )?;
    Ok(affected)
}

/// Interactions of a thread strictly older than `before_ms`, optionally
/// restricted to ones carrying attachments. Input to watermark deletion.
pub fn interactions_before(
    conn: &Connection,
    thread_id: &str,
    before_ms: u64,
    attachments_only: bool,
) -> Result<Vec<Interaction>> {
    let mut stmt = conn.prepare(
        "SELECT id, thread_id, author, body, state, failure_text, server_hash,
                sent_timestamp_ms, has_attachments, expires_in_ms, created_at
         FROM interactions
         WHERE thread_id = ?1 AND sent_timestamp_ms < ?2
           AND (?3 = 0 OR has_attachments = 1)
         ORDER BY sent_timestamp_ms ASC",
    )?;

    let rows = stmt.query_map(
        params![thread_id, before_ms as i64, attachments_only],
        row_to_interaction,
    )?;

    let mut interactions = Vec::new();
    for row in rows {
        interactions.push(row?);
    }
    Ok(interactions)
}

/// Delete interactions by id. Returns the number of rows deleted.
pub fn delete_interactions(conn: &Connection, ids: &[Uuid]) -> Result<usize> {
    let mut deleted = 0;
    for id in ids {
        deleted += conn.execute(
            "DELETE FROM interactions WHERE id = ?1",
            params![id.to_string()],
        )?;
    }
    Ok(deleted)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn row_to_interaction(row: &rusqlite::Row<'_>) -> rusqlite::Result<Interaction> {
    let id_str: String = row.get(0)?;
    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let state_str: String = row.get(4)?;
    let state = SendState::from_str(&state_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("unknown send state '{state_str}'").into(),
        )
    })?;

    let sent_timestamp_ms: i64 = row.get(7)?;
    let expires_in_ms: Option<i64> = row.get(9)?;

    let created_str: String = row.get(10)?;
    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(10, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Interaction {
        id,
        thread_id: row.get(1)?,
        author: row.get(2)?,
        body: row.get(3)?,
        state,
        failure_text: row.get(5)?,
        server_hash: row.get(6)?,
        sent_timestamp_ms: sent_timestamp_ms as u64,
        has_attachments: row.get(8)?,
        expires_in_ms: expires_in_ms.map(|v| v as u64),
        created_at,
    })
}
