use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::database::Database;
use crate::error::Result;
use crate::models::Reaction;

impl Database {
    pub fn add_reaction(&self, reaction: &Reaction) -> Result<()> {
        add_reaction(self.conn(), reaction)
    }

    pub fn get_reactions_for_interaction(&self, interaction_id: Uuid) -> Result<Vec<Reaction>> {
        get_reactions_for_interaction(self.conn(), interaction_id)
    }
}

pub fn add_reaction(conn: &Connection, reaction: &Reaction) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO reactions (id, interaction_id, emoji, author, server_hash, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            reaction.id.to_string(),
            reaction.interaction_id.to_string(),
            reaction.emoji,
            reaction.author,
            reaction.server_hash,
            reaction.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn remove_reaction(
    conn: &Connection,
    interaction_id: Uuid,
    author: &str,
    emoji: &str,
) -> Result<bool> {
    let affected = conn.execute(
        "DELETE FROM reactions WHERE interaction_id = ?1 AND author = ?2 AND emoji = ?3",
        params![interaction_id.to_string(), author, emoji],
    )?;
    Ok(affected > 0)
}

pub fn get_reactions_for_interaction(
    conn: &Connection,
    interaction_id: Uuid,
) -> Result<Vec<Reaction>> {
    let mut stmt = conn.prepare(
        "SELECT id, interaction_id, emoji, author, server_hash, created_at
         FROM reactions WHERE interaction_id = ?1 ORDER BY created_at ASC",
    )?;

    let rows = stmt.query_map(params![interaction_id.to_string()], row_to_reaction)?;

    let mut reactions = Vec::new();
    for row in rows {
        reactions.push(row?);
    }
    Ok(reactions)
}

/// Network hashes of every reaction attached to the given interactions.
/// Collected alongside the interactions' own hashes for server-side
/// watermark deletion.
pub fn reaction_hashes_for_interactions(
    conn: &Connection,
    interaction_ids: &[Uuid],
) -> Result<Vec<String>> {
    let mut hashes = Vec::new();
    let mut stmt = conn.prepare(
        "SELECT server_hash FROM reactions
         WHERE interaction_id = ?1 AND server_hash IS NOT NULL",
    )?;
    for id in interaction_ids {
        let rows = stmt.query_map(params![id.to_string()], |row| row.get::<_, String>(0))?;
        for row in rows {
            hashes.push(row?);
        }
    }
    Ok(hashes)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn row_to_reaction(row: &rusqlite::Row<'_>) -> rusqlite::Result<Reaction> {
    let id_str: String = row.get(0)?;
    let interaction_str: String = row.get(1)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let interaction_id = Uuid::parse_str(&interaction_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let created_str: String = row.get(5)?;
    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Reaction {
        id,
        interaction_id,
        emoji: row.get(2)?,
        author: row.get(3)?,
        server_hash: row.get(4)?,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Interaction, SendState};

    #[test]
    fn reaction_hashes_collected_per_interaction() {
        let db = Database::open_in_memory().unwrap();
        let interaction = Interaction {
            id: Uuid::new_v4(),
            thread_id: "t".to_string(),
            author: "05aa".to_string(),
            body: None,
            state: SendState::Sent,
            failure_text: None,
            server_hash: Some("msg-hash".to_string()),
            sent_timestamp_ms: 1,
            has_attachments: false,
            expires_in_ms: None,
            created_at: Utc::now(),
        };
        db.insert_interaction(&interaction).unwrap();

        for (emoji, hash) in [("👍", Some("r1")), ("🎉", None)] {
            db.add_reaction(&Reaction {
                id: Uuid::new_v4(),
                interaction_id: interaction.id,
                emoji: emoji.to_string(),
                author: "05bb".to_string(),
                server_hash: hash.map(|h| h.to_string()),
                created_at: Utc::now(),
            })
            .unwrap();
        }

        let hashes = reaction_hashes_for_interactions(db.conn(), &[interaction.id]).unwrap();
        assert_eq!(hashes, vec!["r1".to_string()]);
    }
}
