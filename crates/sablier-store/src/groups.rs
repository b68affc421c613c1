//! CRUD operations for [`Group`] and [`GroupMember`] records.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Group, GroupMember, MemberRole};

impl Database {
    pub fn upsert_group(&self, group: &Group) -> Result<()> {
        upsert_group(self.conn(), group)
    }

    pub fn get_group(&self, group_id: &str) -> Result<Group> {
        get_group(self.conn(), group_id)
    }

    pub fn upsert_group_member(&self, member: &GroupMember) -> Result<()> {
        upsert_group_member(self.conn(), member)
    }

    pub fn list_group_members(&self, group_id: &str) -> Result<Vec<GroupMember>> {
        list_group_members(self.conn(), group_id)
    }
}

pub fn upsert_group(conn: &Connection, group: &Group) -> Result<()> {
    conn.execute(
        "INSERT INTO groups (group_id, name, description, avatar_url, avatar_key,
                             expiry_seconds, delete_before_ms, attach_delete_before_ms,
                             destroyed, local_is_admin, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(group_id) DO UPDATE SET
             name                    = excluded.name,
             description             = excluded.description,
             avatar_url              = excluded.avatar_url,
             avatar_key              = excluded.avatar_key,
             expiry_seconds          = excluded.expiry_seconds,
             delete_before_ms        = excluded.delete_before_ms,
             attach_delete_before_ms = excluded.attach_delete_before_ms,
             destroyed               = excluded.destroyed,
             local_is_admin          = excluded.local_is_admin",
        params![
            group.group_id,
            group.name,
            group.description,
            group.avatar_url,
            group.avatar_key.as_ref().map(hex::encode),
            group.expiry_seconds,
            group.delete_before_ms.map(|v| v as i64),
            group.attach_delete_before_ms.map(|v| v as i64),
            group.destroyed,
            group.local_is_admin,
            group.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn get_group(conn: &Connection, group_id: &str) -> Result<Group> {
    conn.query_row(
        "SELECT group_id, name, description, avatar_url, avatar_key, expiry_seconds,
                delete_before_ms, attach_delete_before_ms, destroyed, local_is_admin, created_at
         FROM groups
         WHERE group_id = ?1",
        params![group_id],
        row_to_group,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
        other => StoreError::Sqlite(other),
    })
}

/// Purge everything belonging to a destroyed group: the group row (members
/// cascade), plus its thread's interactions.
pub fn purge_group(conn: &Connection, group_id: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM interactions WHERE thread_id = ?1",
        params![group_id],
    )?;
    conn.execute("DELETE FROM groups WHERE group_id = ?1", params![group_id])?;
    Ok(())
}

pub fn upsert_group_member(conn: &Connection, member: &GroupMember) -> Result<()> {
    conn.execute(
        "INSERT INTO group_members (group_id, account_id, role, joined_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(group_id, account_id) DO UPDATE SET role = excluded.role",
        params![
            member.group_id,
            member.account_id,
            member.role.as_str(),
            member.joined_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn remove_group_member(conn: &Connection, group_id: &str, account_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "DELETE FROM group_members WHERE group_id = ?1 AND account_id = ?2",
        params![group_id, account_id],
    )?;
    Ok(affected > 0)
}

pub fn list_group_members(conn: &Connection, group_id: &str) -> Result<Vec<GroupMember>> {
    let mut stmt = conn.prepare(
        "SELECT group_id, account_id, role, joined_at
         FROM group_members
         WHERE group_id = ?1
         ORDER BY account_id ASC",
    )?;

    let rows = stmt.query_map(params![group_id], row_to_member)?;

    let mut members = Vec::new();
    for row in rows {
        members.push(row?);
    }
    Ok(members)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn row_to_group(row: &rusqlite::Row<'_>) -> rusqlite::Result<Group> {
    let avatar_key_hex: Option<String> = row.get(4)?;
    let avatar_key = avatar_key_hex
        .map(|k| hex::decode(&k))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

    let created_str: String = row.get(10)?;
    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(10, rusqlite::types::Type::Text, Box::new(e))
        })?;

    let delete_before_ms: Option<i64> = row.get(6)?;
    let attach_delete_before_ms: Option<i64> = row.get(7)?;

    Ok(Group {
        group_id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        avatar_url: row.get(3)?,
        avatar_key,
        expiry_seconds: row.get(5)?,
        delete_before_ms: delete_before_ms.map(|v| v as u64),
        attach_delete_before_ms: attach_delete_before_ms.map(|v| v as u64),
        destroyed: row.get(8)?,
        local_is_admin: row.get(9)?,
        created_at,
    })
}

fn row_to_member(row: &rusqlite::Row<'_>) -> rusqlite::Result<GroupMember> {
    let role_str: String = row.get(2)?;
    let role = MemberRole::from_str(&role_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown role '{role_str}'").into(),
        )
    })?;

    let joined_str: String = row.get(3)?;
    let joined_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&joined_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(GroupMember {
        group_id: row.get(0)?,
        account_id: row.get(1)?,
        role,
        joined_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_group(id: &str) -> Group {
        Group {
            group_id: id.to_string(),
            name: "Ops".to_string(),
            description: None,
            avatar_url: None,
            avatar_key: None,
            expiry_seconds: None,
            delete_before_ms: None,
            attach_delete_before_ms: None,
            destroyed: false,
            local_is_admin: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn group_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let group = sample_group("03aa");
        db.upsert_group(&group).unwrap();

        let loaded = db.get_group("03aa").unwrap();
        assert_eq!(loaded.name, "Ops");
        assert!(loaded.local_is_admin);
    }

    #[test]
    fn members_cascade_on_purge() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_group(&sample_group("03aa")).unwrap();
        db.upsert_group_member(&GroupMember {
            group_id: "03aa".to_string(),
            account_id: "05bb".to_string(),
            role: MemberRole::Admin,
            joined_at: Utc::now(),
        })
        .unwrap();

        purge_group(db.conn(), "03aa").unwrap();
        assert!(matches!(db.get_group("03aa"), Err(StoreError::NotFound)));
        assert!(db.list_group_members("03aa").unwrap().is_empty());
    }
}
