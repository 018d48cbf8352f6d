//! Storage abstraction for group state.
//!
//! Synchronous trait: the runtime serializes all processing on one task,
//! so a read-then-write sequence for a group is never interleaved with
//! another write to the same group. Backends must still be `Send + Sync`
//! because components share them through `Arc`.
//!
//! Absent data is not an error: lookups return `Ok(None)` or an empty list.
mod memory;
mod sqlite;

pub use memory::MemoryGroupStore;
pub use sqlite::SqliteGroupStore;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::group::{Bulletin, GroupCommand, GroupId, GroupMeta};
use crate::message::ReliableMessage;
use crate::types::NodeId;

/// A history record: the (annotated) command and the signed envelope it
/// arrived in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub command: GroupCommand,
    pub message: ReliableMessage,
}

impl HistoryEntry {
    pub fn new(command: GroupCommand, message: ReliableMessage) -> Self {
        Self { command, message }
    }
}

/// Role lists written in the same unit as a history entry. `None` leaves
/// the stored list untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoleUpdate<'a> {
    pub members: Option<&'a [NodeId]>,
    pub administrators: Option<&'a [NodeId]>,
}

impl<'a> RoleUpdate<'a> {
    pub fn members(members: &'a [NodeId]) -> Self {
        Self {
            members: Some(members),
            administrators: None,
        }
    }

    pub fn administrators(administrators: &'a [NodeId]) -> Self {
        Self {
            members: None,
            administrators: Some(administrators),
        }
    }
}

/// Persistence for metas, bulletins, role lists and command history.
pub trait GroupStore: Send + Sync {
    fn meta(&self, group: &GroupId) -> Result<Option<GroupMeta>, StoreError>;

    /// Store a meta under `meta.group_id()`.
    fn save_meta(&self, meta: &GroupMeta) -> Result<(), StoreError>;

    fn bulletin(&self, group: &GroupId) -> Result<Option<Bulletin>, StoreError>;

    /// Overwrite the bulletin for `bulletin.group` together with the
    /// administrator list it names, and drop `resign` entries older than
    /// it. All or nothing.
    fn commit_bulletin(
        &self,
        bulletin: &Bulletin,
        administrators: &[NodeId],
    ) -> Result<(), StoreError>;

    fn members(&self, group: &GroupId) -> Result<Vec<NodeId>, StoreError>;

    fn save_members(&self, group: &GroupId, members: &[NodeId]) -> Result<(), StoreError>;

    fn administrators(&self, group: &GroupId) -> Result<Vec<NodeId>, StoreError>;

    fn save_administrators(&self, group: &GroupId, admins: &[NodeId]) -> Result<(), StoreError>;

    /// The cached "current reset" checkpoint.
    fn reset_command(&self, group: &GroupId) -> Result<Option<HistoryEntry>, StoreError>;

    /// History log in insertion order.
    fn group_histories(&self, group: &GroupId) -> Result<Vec<HistoryEntry>, StoreError>;

    /// Record an admitted command and the role lists it produces. All or
    /// nothing.
    ///
    /// A reset becomes the checkpoint and drops membership commands
    /// (everything except `resign`) from the log; any other command is
    /// appended. Returns `false`, writing nothing, when an entry with the
    /// same envelope id is already stored.
    fn commit_history(
        &self,
        group: &GroupId,
        entry: &HistoryEntry,
        roles: RoleUpdate<'_>,
    ) -> Result<bool, StoreError>;

    fn nickname(&self, node: &NodeId) -> Result<Option<String>, StoreError>;

    fn save_nickname(&self, node: &NodeId, name: &str) -> Result<(), StoreError>;

    /// Groups with a stored meta.
    fn groups(&self) -> Result<Vec<GroupId>, StoreError>;
}
