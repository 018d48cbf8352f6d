use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::{GroupStore, HistoryEntry, RoleUpdate};
use crate::error::StoreError;
use crate::group::{Bulletin, CommandKind, GroupId, GroupMeta};
use crate::types::NodeId;

#[derive(Default)]
struct Tables {
    metas: HashMap<GroupId, GroupMeta>,
    bulletins: HashMap<GroupId, Bulletin>,
    members: HashMap<GroupId, Vec<NodeId>>,
    administrators: HashMap<GroupId, Vec<NodeId>>,
    resets: HashMap<GroupId, HistoryEntry>,
    histories: HashMap<GroupId, Vec<HistoryEntry>>,
    nicknames: HashMap<NodeId, String>,
}

/// In-memory store. Used in tests and for nodes that do not persist.
#[derive(Default)]
pub struct MemoryGroupStore {
    tables: Mutex<Tables>,
}

impl MemoryGroupStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl GroupStore for MemoryGroupStore {
    fn meta(&self, group: &GroupId) -> Result<Option<GroupMeta>, StoreError> {
        Ok(self.tables()?.metas.get(group).cloned())
    }

    fn save_meta(&self, meta: &GroupMeta) -> Result<(), StoreError> {
        self.tables()?.metas.insert(meta.group_id(), meta.clone());
        Ok(())
    }

    fn bulletin(&self, group: &GroupId) -> Result<Option<Bulletin>, StoreError> {
        Ok(self.tables()?.bulletins.get(group).cloned())
    }

    fn commit_bulletin(
        &self,
        bulletin: &Bulletin,
        administrators: &[NodeId],
    ) -> Result<(), StoreError> {
        let mut tables = self.tables()?;
        let group = &bulletin.group;
        tables.bulletins.insert(group.clone(), bulletin.clone());
        tables
            .administrators
            .insert(group.clone(), administrators.to_vec());
        if let Some(log) = tables.histories.get_mut(group) {
            log.retain(|e| {
                !e.command.kind().is_admin_history() || e.command.time >= bulletin.time
            });
        }
        Ok(())
    }

    fn members(&self, group: &GroupId) -> Result<Vec<NodeId>, StoreError> {
        Ok(self.tables()?.members.get(group).cloned().unwrap_or_default())
    }

    fn save_members(&self, group: &GroupId, members: &[NodeId]) -> Result<(), StoreError> {
        self.tables()?.members.insert(group.clone(), members.to_vec());
        Ok(())
    }

    fn administrators(&self, group: &GroupId) -> Result<Vec<NodeId>, StoreError> {
        Ok(self
            .tables()?
            .administrators
            .get(group)
            .cloned()
            .unwrap_or_default())
    }

    fn save_administrators(&self, group: &GroupId, admins: &[NodeId]) -> Result<(), StoreError> {
        self.tables()?
            .administrators
            .insert(group.clone(), admins.to_vec());
        Ok(())
    }

    fn reset_command(&self, group: &GroupId) -> Result<Option<HistoryEntry>, StoreError> {
        Ok(self.tables()?.resets.get(group).cloned())
    }

    fn group_histories(&self, group: &GroupId) -> Result<Vec<HistoryEntry>, StoreError> {
        Ok(self
            .tables()?
            .histories
            .get(group)
            .cloned()
            .unwrap_or_default())
    }

    fn commit_history(
        &self,
        group: &GroupId,
        entry: &HistoryEntry,
        roles: RoleUpdate<'_>,
    ) -> Result<bool, StoreError> {
        let mut guard = self.tables()?;
        let tables = &mut *guard;
        let log = tables.histories.entry(group.clone()).or_default();
        if entry.command.kind() == CommandKind::Reset {
            log.retain(|e| e.command.kind().is_admin_history());
            tables.resets.insert(group.clone(), entry.clone());
        } else if log.iter().any(|e| e.message.id == entry.message.id) {
            return Ok(false);
        } else {
            log.push(entry.clone());
        }
        if let Some(members) = roles.members {
            tables.members.insert(group.clone(), members.to_vec());
        }
        if let Some(admins) = roles.administrators {
            tables.administrators.insert(group.clone(), admins.to_vec());
        }
        Ok(true)
    }

    fn nickname(&self, node: &NodeId) -> Result<Option<String>, StoreError> {
        Ok(self.tables()?.nicknames.get(node).cloned())
    }

    fn save_nickname(&self, node: &NodeId, name: &str) -> Result<(), StoreError> {
        self.tables()?.nicknames.insert(*node, name.to_string());
        Ok(())
    }

    fn groups(&self) -> Result<Vec<GroupId>, StoreError> {
        let mut groups: Vec<GroupId> = self.tables()?.metas.keys().cloned().collect();
        groups.sort();
        Ok(groups)
    }
}
