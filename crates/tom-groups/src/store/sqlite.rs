//! SQLite-backed `GroupStore`.
//!
//! Role lists are JSON text columns; metas, bulletins and history entries
//! are MessagePack blobs, the same encoding used on the wire.
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{GroupStore, HistoryEntry, RoleUpdate};
use crate::error::StoreError;
use crate::group::{Bulletin, CommandKind, GroupId, GroupMeta};
use crate::types::NodeId;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS group_meta (
    group_id TEXT PRIMARY KEY,
    meta     BLOB NOT NULL
);
CREATE TABLE IF NOT EXISTS group_bulletin (
    group_id TEXT PRIMARY KEY,
    bulletin BLOB NOT NULL
);
CREATE TABLE IF NOT EXISTS group_roles (
    group_id TEXT NOT NULL,
    role     TEXT NOT NULL,
    nodes    TEXT NOT NULL,
    PRIMARY KEY (group_id, role)
);
CREATE TABLE IF NOT EXISTS group_reset (
    group_id TEXT PRIMARY KEY,
    entry    BLOB NOT NULL
);
CREATE TABLE IF NOT EXISTS group_history (
    seq         INTEGER PRIMARY KEY AUTOINCREMENT,
    group_id    TEXT NOT NULL,
    envelope_id TEXT NOT NULL,
    admin       INTEGER NOT NULL,
    time        INTEGER NOT NULL,
    entry       BLOB NOT NULL,
    UNIQUE (group_id, envelope_id)
);
CREATE TABLE IF NOT EXISTS nickname (
    node_id TEXT PRIMARY KEY,
    name    TEXT NOT NULL
);
";

const ROLE_MEMBERS: &str = "members";
const ROLE_ADMINISTRATORS: &str = "administrators";

/// Persistent store on a single SQLite connection.
pub struct SqliteGroupStore {
    conn: Mutex<Connection>,
}

impl SqliteGroupStore {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open(path)?)
    }

    /// Throwaway in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn load_blob<T: DeserializeOwned>(
        &self,
        sql: &str,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        let blob: Option<Vec<u8>> = self
            .conn()?
            .query_row(sql, params![key], |row| row.get(0))
            .optional()?;
        blob.map(|b| rmp_serde::from_slice(&b).map_err(StoreError::from))
            .transpose()
    }

    fn store_blob<T: Serialize>(&self, sql: &str, key: &str, value: &T) -> Result<(), StoreError> {
        let blob = rmp_serde::to_vec(value)?;
        self.conn()?.execute(sql, params![key, blob])?;
        Ok(())
    }

    fn role(&self, group: &GroupId, role: &str) -> Result<Vec<NodeId>, StoreError> {
        let json: Option<String> = self
            .conn()?
            .query_row(
                "SELECT nodes FROM group_roles WHERE group_id = ?1 AND role = ?2",
                params![group.0, role],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(text) => Ok(serde_json::from_str(&text)?),
            None => Ok(Vec::new()),
        }
    }

    fn save_role(&self, group: &GroupId, role: &str, nodes: &[NodeId]) -> Result<(), StoreError> {
        write_role(&*self.conn()?, group, role, nodes)
    }
}

fn write_role(
    conn: &Connection,
    group: &GroupId,
    role: &str,
    nodes: &[NodeId],
) -> Result<(), StoreError> {
    let json = serde_json::to_string(nodes)?;
    conn.execute(
        "INSERT OR REPLACE INTO group_roles (group_id, role, nodes) VALUES (?1, ?2, ?3)",
        params![group.0, role, json],
    )?;
    Ok(())
}

impl GroupStore for SqliteGroupStore {
    fn meta(&self, group: &GroupId) -> Result<Option<GroupMeta>, StoreError> {
        self.load_blob("SELECT meta FROM group_meta WHERE group_id = ?1", &group.0)
    }

    fn save_meta(&self, meta: &GroupMeta) -> Result<(), StoreError> {
        self.store_blob(
            "INSERT OR REPLACE INTO group_meta (group_id, meta) VALUES (?1, ?2)",
            &meta.group_id().0,
            meta,
        )
    }

    fn bulletin(&self, group: &GroupId) -> Result<Option<Bulletin>, StoreError> {
        self.load_blob(
            "SELECT bulletin FROM group_bulletin WHERE group_id = ?1",
            &group.0,
        )
    }

    fn commit_bulletin(
        &self,
        bulletin: &Bulletin,
        administrators: &[NodeId],
    ) -> Result<(), StoreError> {
        let blob = rmp_serde::to_vec(bulletin)?;
        let group = &bulletin.group;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO group_bulletin (group_id, bulletin) VALUES (?1, ?2)",
            params![group.0, blob],
        )?;
        write_role(&tx, group, ROLE_ADMINISTRATORS, administrators)?;
        tx.execute(
            "DELETE FROM group_history WHERE group_id = ?1 AND admin = 1 AND time < ?2",
            params![group.0, bulletin.time as i64],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn members(&self, group: &GroupId) -> Result<Vec<NodeId>, StoreError> {
        self.role(group, ROLE_MEMBERS)
    }

    fn save_members(&self, group: &GroupId, members: &[NodeId]) -> Result<(), StoreError> {
        self.save_role(group, ROLE_MEMBERS, members)
    }

    fn administrators(&self, group: &GroupId) -> Result<Vec<NodeId>, StoreError> {
        self.role(group, ROLE_ADMINISTRATORS)
    }

    fn save_administrators(&self, group: &GroupId, admins: &[NodeId]) -> Result<(), StoreError> {
        self.save_role(group, ROLE_ADMINISTRATORS, admins)
    }

    fn reset_command(&self, group: &GroupId) -> Result<Option<HistoryEntry>, StoreError> {
        self.load_blob("SELECT entry FROM group_reset WHERE group_id = ?1", &group.0)
    }

    fn group_histories(&self, group: &GroupId) -> Result<Vec<HistoryEntry>, StoreError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT entry FROM group_history WHERE group_id = ?1 ORDER BY seq")?;
        let blobs = stmt
            .query_map(params![group.0], |row| row.get::<_, Vec<u8>>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        blobs
            .iter()
            .map(|b| rmp_serde::from_slice(b).map_err(StoreError::from))
            .collect()
    }

    fn commit_history(
        &self,
        group: &GroupId,
        entry: &HistoryEntry,
        roles: RoleUpdate<'_>,
    ) -> Result<bool, StoreError> {
        let blob = rmp_serde::to_vec(entry)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        if entry.command.kind() == CommandKind::Reset {
            tx.execute(
                "DELETE FROM group_history WHERE group_id = ?1 AND admin = 0",
                params![group.0],
            )?;
            tx.execute(
                "INSERT OR REPLACE INTO group_reset (group_id, entry) VALUES (?1, ?2)",
                params![group.0, blob],
            )?;
        } else {
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO group_history (group_id, envelope_id, admin, time, entry)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    group.0,
                    entry.message.id,
                    entry.command.kind().is_admin_history(),
                    entry.command.time as i64,
                    blob
                ],
            )?;
            if inserted == 0 {
                return Ok(false);
            }
        }
        if let Some(members) = roles.members {
            write_role(&tx, group, ROLE_MEMBERS, members)?;
        }
        if let Some(admins) = roles.administrators {
            write_role(&tx, group, ROLE_ADMINISTRATORS, admins)?;
        }
        tx.commit()?;
        Ok(true)
    }

    fn nickname(&self, node: &NodeId) -> Result<Option<String>, StoreError> {
        Ok(self
            .conn()?
            .query_row(
                "SELECT name FROM nickname WHERE node_id = ?1",
                params![node.to_string()],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn save_nickname(&self, node: &NodeId, name: &str) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO nickname (node_id, name) VALUES (?1, ?2)",
            params![node.to_string(), name],
        )?;
        Ok(())
    }

    fn groups(&self) -> Result<Vec<GroupId>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT group_id FROM group_meta ORDER BY group_id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids.into_iter().map(GroupId).collect())
    }
}
