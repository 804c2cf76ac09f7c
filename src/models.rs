use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

use crate::Result;
use crate::db::Db;

/// Per-chat feature flags. A missing `Chat` row and `flags = 0` mean the
/// same thing.
pub mod chat_flags {
    pub const ALLOW_NSFW: i64 = 1 << 0;
    pub const ALLOW_EXTERN: i64 = 1 << 1;
    pub const ALLOW_EXTRA: i64 = 1 << 2;
}

/// Command descriptor flags, shared by builtins and external rows.
pub mod cmd_flags {
    pub const EXTERN: i64 = 1 << 0;
    pub const CALLBACK: i64 = 1 << 1;
    pub const ADMIN: i64 = 1 << 2;
    pub const NSFW: i64 = 1 << 3;
    pub const EXTRA: i64 = 1 << 4;
    pub const HIDDEN: i64 = 1 << 5;
    pub const DISALLOW_PRIVATE_CHAT: i64 = 1 << 6;
}

/// Argument-profile bits of an external command row.
pub mod extern_args {
    /// Pass the raw update JSON as the trailing argv entry.
    pub const RAW_JSON: i64 = 1 << 0;
}

pub const CMD_NAME_SIZE: usize = 32;
pub const CMD_DESC_SIZE: usize = 256;
pub const CMD_MESSAGE_VALUE_SIZE: usize = 8192;
pub const SCHED_VALUE_SIZE: usize = 8192;

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS Chat(
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_id    BIGINT NOT NULL,
            flags      INTEGER NOT NULL,
            created_at TIMESTAMP DEFAULT (UNIXEPOCH()) NOT NULL,
            created_by BIGINT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS Admin(
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_id      BIGINT NOT NULL,
            user_id      BIGINT NOT NULL,
            is_anonymous BOOLEAN NOT NULL,
            privileges   INTEGER NOT NULL,
            created_at   TIMESTAMP DEFAULT (UNIXEPOCH()) NOT NULL
        );

        CREATE TABLE IF NOT EXISTS Sched_Message(
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            type       INTEGER NOT NULL,
            chat_id    BIGINT NOT NULL,
            message_id BIGINT,
            value      VARCHAR(8192),
            next_run   TIMESTAMP NOT NULL,
            expire     TIMESTAMP NOT NULL
        );

        CREATE TABLE IF NOT EXISTS Cmd_Extern(
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            is_enable   BOOLEAN NOT NULL,
            flags       INTEGER NOT NULL,
            args        INTEGER NOT NULL,
            name        VARCHAR(32) NOT NULL,
            file_name   VARCHAR(1024) NOT NULL,
            description VARCHAR(256) NOT NULL
        );

        CREATE TABLE IF NOT EXISTS Cmd_Extern_Disabled(
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_id    BIGINT NOT NULL,
            name       VARCHAR(32) NOT NULL,
            created_at TIMESTAMP DEFAULT (UNIXEPOCH()) NOT NULL
        );

        CREATE TABLE IF NOT EXISTS Cmd_Message(
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_id    BIGINT NOT NULL,
            name       VARCHAR(32) NOT NULL,
            value      VARCHAR(8192),
            created_by BIGINT NOT NULL,
            created_at TIMESTAMP DEFAULT (UNIXEPOCH()) NOT NULL,
            updated_by BIGINT,
            updated_at BIGINT
        );",
    )?;

    Ok(())
}

/*
 * Chat
 */

pub fn chat_get_flags(db: &Db, chat_id: i64) -> Result<i64> {
    let conn = db.get();
    let flags = conn
        .query_row("SELECT flags FROM Chat WHERE (chat_id = ?1) ORDER BY id DESC LIMIT 1", params![chat_id], |r| {
            r.get(0)
        })
        .optional()?;

    Ok(flags.unwrap_or(0))
}

/// Upserts the chat row; inserts it on first write.
pub fn chat_set_flags(db: &Db, chat_id: i64, flags: i64, by: i64) -> Result<usize> {
    let mut conn = db.get();
    let tx = conn.transaction()?;

    let exists: Option<i64> = tx
        .query_row("SELECT 1 FROM Chat WHERE (chat_id = ?1)", params![chat_id], |r| r.get(0))
        .optional()?;

    let changed = if exists.is_some() {
        tx.execute("UPDATE Chat SET flags = ?1 WHERE (chat_id = ?2)", params![flags, chat_id])?
    } else {
        tx.execute(
            "INSERT INTO Chat(chat_id, flags, created_by) VALUES(?1, ?2, ?3)",
            params![chat_id, flags, by],
        )?
    };

    tx.commit()?;
    Ok(changed)
}

/*
 * Admin
 */

#[derive(Debug, Clone)]
pub struct AdminRow {
    pub chat_id: i64,
    pub user_id: i64,
    pub privileges: i64,
    pub is_anonymous: bool,
}

/// Replaces a chat's admin set wholesale: delete + insert under one
/// transaction. The new set may be empty.
pub fn admin_reload(db: &Db, chat_id: i64, list: &[AdminRow]) -> Result<usize> {
    let mut conn = db.get();
    let tx = conn.transaction()?;

    tx.execute("DELETE FROM Admin WHERE (chat_id = ?1)", params![chat_id])?;

    let mut added = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO Admin(chat_id, user_id, is_anonymous, privileges) VALUES(?1, ?2, ?3, ?4)",
        )?;
        for admin in list {
            added += stmt.execute(params![
                chat_id,
                admin.user_id,
                admin.is_anonymous,
                admin.privileges
            ])?;
        }
    }

    tx.commit()?;
    Ok(added)
}

/// Latest recorded privilege bitmask for (chat, user); 0 when absent.
pub fn admin_get_privileges(db: &Db, chat_id: i64, user_id: i64) -> Result<i64> {
    let conn = db.get();
    let privileges = conn
        .query_row(
            "SELECT privileges FROM Admin \
             WHERE (chat_id = ?1) AND (user_id = ?2) \
             ORDER BY id DESC LIMIT 1",
            params![chat_id, user_id],
            |r| r.get(0),
        )
        .optional()?;

    Ok(privileges.unwrap_or(0))
}

/*
 * Cmd_Message
 */

#[derive(Debug, Clone)]
pub struct CmdMessage {
    pub chat_id: i64,
    pub name: String,
    /// `None` unsets the entry.
    pub value: Option<String>,
    pub created_by: i64,
    pub updated_by: i64,
}

/// Effective value for (chat, name); `None` when unset or never set.
pub fn cmd_message_get(db: &Db, chat_id: i64, name: &str) -> Result<Option<String>> {
    let conn = db.get();
    let value: Option<Option<String>> = conn
        .query_row(
            "SELECT value FROM Cmd_Message \
             WHERE (chat_id = ?1) AND (name = ?2) \
             ORDER BY id DESC LIMIT 1",
            params![chat_id, name],
            |r| r.get(0),
        )
        .optional()?;

    Ok(value.flatten().filter(|v| !v.is_empty()))
}

/// Probe + insert/update under one transaction. Returns the number of rows
/// written; 0 means the unset targeted a missing entry.
pub fn cmd_message_set(db: &Db, msg: &CmdMessage) -> Result<usize> {
    let mut conn = db.get();
    let tx = conn.transaction()?;

    let exists: Option<i64> = tx
        .query_row(
            "SELECT 1 FROM Cmd_Message WHERE (chat_id = ?1) AND (name = ?2)",
            params![msg.chat_id, msg.name],
            |r| r.get(0),
        )
        .optional()?;

    let changed = match exists {
        None if msg.value.is_none() => 0,
        None => tx.execute(
            "INSERT INTO Cmd_Message(value, created_by, chat_id, name) VALUES(?1, ?2, ?3, ?4)",
            params![msg.value, msg.created_by, msg.chat_id, msg.name],
        )?,
        Some(_) => tx.execute(
            "UPDATE Cmd_Message \
             SET value = ?1, updated_at = UNIXEPOCH(), updated_by = ?2 \
             WHERE (chat_id = ?3) AND (name = ?4)",
            params![msg.value, msg.updated_by, msg.chat_id, msg.name],
        )?,
    };

    tx.commit()?;
    Ok(changed)
}

/// Whether any chat has an entry under this name. Used to keep builtin and
/// message-command namespaces disjoint at registration time.
pub fn cmd_message_exists(db: &Db, name: &str) -> Result<bool> {
    let conn = db.get();
    let row: Option<i64> = conn
        .query_row("SELECT 1 FROM Cmd_Message WHERE (name = ?1)", params![name], |r| r.get(0))
        .optional()?;

    Ok(row.is_some())
}

/*
 * Cmd_Extern
 */

#[derive(Debug, Clone)]
pub struct CmdExtern {
    pub id: i64,
    pub is_enabled: bool,
    pub flags: i64,
    pub args: i64,
    pub name: String,
    pub file_name: String,
    pub description: String,
}

/// Fetches an enabled external command unless the chat disabled it.
pub fn cmd_extern_get(db: &Db, chat_id: i64, name: &str) -> Result<Option<CmdExtern>> {
    let conn = db.get();
    let row = conn
        .query_row(
            "SELECT id, is_enable, flags, args, name, file_name, description \
             FROM Cmd_Extern \
             WHERE (name = ?1) AND (is_enable != 0) AND (name NOT IN ( \
                 SELECT name FROM Cmd_Extern_Disabled WHERE (chat_id = ?2) \
             )) \
             ORDER BY id DESC LIMIT 1",
            params![name, chat_id],
            |r| {
                Ok(CmdExtern {
                    id: r.get(0)?,
                    is_enabled: r.get(1)?,
                    flags: r.get(2)?,
                    args: r.get(3)?,
                    name: r.get(4)?,
                    file_name: r.get(5)?,
                    description: r.get(6)?,
                })
            },
        )
        .optional()?;

    Ok(row)
}

pub fn cmd_extern_exists(db: &Db, name: &str) -> Result<bool> {
    let conn = db.get();
    let row: Option<i64> = conn
        .query_row("SELECT 1 FROM Cmd_Extern WHERE (name = ?1)", params![name], |r| r.get(0))
        .optional()?;

    Ok(row.is_some())
}

/// Listing for `/help`: name, description and flags of enabled externals.
pub fn cmd_extern_list(db: &Db) -> Result<Vec<(String, String, i64)>> {
    let conn = db.get();
    let mut stmt = conn.prepare(
        "SELECT name, description, flags FROM Cmd_Extern WHERE (is_enable != 0) ORDER BY name",
    )?;

    let rows = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// First-join seeding: disables every NSFW-flagged external for the chat.
/// A no-op when the chat already has a disabled-set.
pub fn cmd_extern_disabled_seed(db: &Db, chat_id: i64) -> Result<usize> {
    let mut conn = db.get();
    let tx = conn.transaction()?;

    let exists: Option<i64> = tx
        .query_row(
            "SELECT 1 FROM Cmd_Extern_Disabled WHERE (chat_id = ?1)",
            params![chat_id],
            |r| r.get(0),
        )
        .optional()?;

    let changed = if exists.is_some() {
        0
    } else {
        tx.execute(
            "INSERT INTO Cmd_Extern_Disabled(name, chat_id) \
             SELECT name, ?1 FROM Cmd_Extern WHERE ((flags & ?2) != 0)",
            params![chat_id, cmd_flags::NSFW],
        )?
    };

    tx.commit()?;
    Ok(changed)
}

/*
 * Sched_Message
 */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedKind {
    Send = 0,
    Delete = 1,
}

impl SchedKind {
    fn from_i64(raw: i64) -> Option<Self> {
        match raw {
            0 => Some(Self::Send),
            1 => Some(Self::Delete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedAction {
    pub id: i64,
    pub kind: SchedKind,
    pub chat_id: i64,
    /// 0 means "no message id".
    pub message_id: i64,
    pub value: Option<String>,
    pub next_run: i64,
    pub expire: i64,
}

/// Due rows: `next_run <= now < next_run + expire`. Rows past their expiry
/// window are never returned and thus never executed.
pub fn sched_get_due(db: &Db, now: i64, limit: usize) -> Result<Vec<SchedAction>> {
    let conn = db.get();
    let mut stmt = conn.prepare(
        "SELECT id, type, chat_id, message_id, value, next_run, expire \
         FROM Sched_Message \
         WHERE (?1 >= next_run) AND (?1 < (next_run + expire)) \
         LIMIT ?2",
    )?;

    let rows = stmt.query_map(params![now, limit as i64], |r| {
        Ok((
            r.get::<_, i64>(0)?,
            r.get::<_, i64>(1)?,
            r.get::<_, i64>(2)?,
            r.get::<_, Option<i64>>(3)?,
            r.get::<_, Option<String>>(4)?,
            r.get::<_, i64>(5)?,
            r.get::<_, i64>(6)?,
        ))
    })?;

    let mut list = Vec::new();
    for row in rows {
        let (id, kind, chat_id, message_id, value, next_run, expire) = row?;
        let Some(kind) = SchedKind::from_i64(kind) else {
            tracing::warn!(id, kind, "scheduled action with unknown type, skipping");
            continue;
        };

        list.push(SchedAction {
            id,
            kind,
            chat_id,
            message_id: message_id.unwrap_or(0),
            value,
            next_run,
            expire,
        });
    }

    Ok(list)
}

/// Deletes picked rows (plus anything already due) in one statement.
pub fn sched_delete(db: &Db, ids: &[i64], now: i64) -> Result<usize> {
    if ids.is_empty() {
        return Ok(0);
    }

    let placeholders = vec!["?"; ids.len()].join(", ");
    let sql =
        format!("DELETE FROM Sched_Message WHERE (?1 >= next_run) AND id IN ({placeholders})");

    let conn = db.get();
    let mut stmt = conn.prepare(&sql)?;
    stmt.raw_bind_parameter(1, now)?;
    for (i, id) in ids.iter().enumerate() {
        stmt.raw_bind_parameter(i + 2, *id)?;
    }

    Ok(stmt.raw_execute()?)
}

pub fn sched_add_send(
    db: &Db,
    chat_id: i64,
    message_id: i64,
    value: &str,
    interval_s: i64,
    expire_s: i64,
) -> Result<usize> {
    if value.is_empty() || value.len() >= SCHED_VALUE_SIZE {
        return Err(crate::Error::Invalid("invalid scheduled message".into()));
    }

    sched_add(db, SchedKind::Send, chat_id, message_id, Some(value), interval_s, expire_s)
}

pub fn sched_add_delete(
    db: &Db,
    chat_id: i64,
    message_id: i64,
    interval_s: i64,
    expire_s: i64,
) -> Result<usize> {
    sched_add(db, SchedKind::Delete, chat_id, message_id, None, interval_s, expire_s)
}

fn sched_add(
    db: &Db,
    kind: SchedKind,
    chat_id: i64,
    message_id: i64,
    value: Option<&str>,
    interval_s: i64,
    expire_s: i64,
) -> Result<usize> {
    if expire_s < 5 {
        return Err(crate::Error::Invalid("invalid expiration time".into()));
    }

    if interval_s <= 0 {
        return Err(crate::Error::Invalid("invalid interval".into()));
    }

    let conn = db.get();
    let changed = conn.execute(
        "INSERT INTO Sched_Message(type, chat_id, message_id, value, next_run, expire) \
         VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            kind as i64,
            chat_id,
            message_id,
            value,
            Utc::now().timestamp() + interval_s,
            expire_s
        ],
    )?;

    Ok(changed)
}
