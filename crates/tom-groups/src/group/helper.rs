/// GroupCommandHelper: the consistency gate.
///
/// Decides whether a command is still admissible against the cached
/// checkpoint and persists admitted commands.
use std::sync::Arc;

use crate::error::TomGroupError;
use crate::group::command::{CommandKind, GroupCommand};
use crate::group::delegate::GroupDelegate;
use crate::group::types::{dedup_members, GroupId};
use crate::message::ReliableMessage;
use crate::store::{HistoryEntry, RoleUpdate};

pub struct GroupCommandHelper {
    delegate: Arc<GroupDelegate>,
}

impl GroupCommandHelper {
    pub fn new(delegate: Arc<GroupDelegate>) -> Self {
        Self { delegate }
    }

    /// Whether `command` predates the checkpoint it is judged against.
    ///
    /// `resign` is judged against the bulletin time, everything else
    /// against the cached reset. With nothing cached, nothing is expired.
    /// A reset must be strictly newer than the cached one; any other
    /// command is expired only when strictly older.
    pub fn is_command_expired(&self, command: &GroupCommand) -> Result<bool, TomGroupError> {
        let store = self.delegate.store();
        let expired = match command.kind() {
            CommandKind::Resign => store
                .bulletin(&command.group)?
                .is_some_and(|doc| command.time < doc.time),
            CommandKind::Reset => store
                .reset_command(&command.group)?
                .is_some_and(|cached| command.time <= cached.command.time),
            _ => store
                .reset_command(&command.group)?
                .is_some_and(|cached| command.time < cached.command.time),
        };
        Ok(expired)
    }

    /// Persist an admitted command with its envelope.
    ///
    /// Returns `false` when the command is expired or the envelope was
    /// already stored. A reset drops the membership history it supersedes
    /// and becomes the cached checkpoint.
    pub fn save_group_history(
        &self,
        group: &GroupId,
        command: &GroupCommand,
        message: &ReliableMessage,
    ) -> Result<bool, TomGroupError> {
        self.commit(group, command, message, RoleUpdate::default())
    }

    /// [`save_group_history`](Self::save_group_history) together with the
    /// role lists the command produces, in one store write. On `false` or
    /// an error nothing was written.
    pub fn commit(
        &self,
        group: &GroupId,
        command: &GroupCommand,
        message: &ReliableMessage,
        roles: RoleUpdate<'_>,
    ) -> Result<bool, TomGroupError> {
        if self.is_command_expired(command)? {
            tracing::debug!(
                "not saving expired {} command for {group} (time {})",
                command.kind(),
                command.time
            );
            return Ok(false);
        }
        let members = roles.members.map(dedup_members);
        let admins = roles.administrators.map(dedup_members);
        let roles = RoleUpdate {
            members: members.as_deref(),
            administrators: admins.as_deref(),
        };
        let entry = HistoryEntry::new(command.clone(), message.clone());
        Ok(self.delegate.store().commit_history(group, &entry, roles)?)
    }

    /// The cached reset checkpoint.
    pub fn reset_command(&self, group: &GroupId) -> Result<Option<HistoryEntry>, TomGroupError> {
        Ok(self.delegate.store().reset_command(group)?)
    }

    /// Commands saved after the checkpoint, in arrival order.
    pub fn group_histories(&self, group: &GroupId) -> Result<Vec<HistoryEntry>, TomGroupError> {
        Ok(self.delegate.store().group_histories(group)?)
    }

    /// Time of the newest admitted command, checkpoint included.
    pub fn last_history_time(&self, group: &GroupId) -> Result<Option<u64>, TomGroupError> {
        let reset = self.reset_command(group)?.map(|e| e.command.time);
        let latest = self
            .group_histories(group)?
            .iter()
            .map(|e| e.command.time)
            .max();
        Ok(reset.max(latest))
    }
}
