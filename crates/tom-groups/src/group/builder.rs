/// GroupHistoryBuilder: assembles what a peer needs to catch up:
/// document, then the reset checkpoint, then the commands after it.
use std::sync::Arc;

use crate::content::Content;
use crate::error::TomGroupError;
use crate::group::command::{CommandKind, GroupCommand};
use crate::group::delegate::GroupDelegate;
use crate::group::helper::GroupCommandHelper;
use crate::group::packer::GroupPacker;
use crate::group::types::GroupId;
use crate::message::{InstantMessage, ReliableMessage};
use crate::store::HistoryEntry;
use crate::types::{now_ms, Address};

pub struct GroupHistoryBuilder {
    delegate: Arc<GroupDelegate>,
    helper: Arc<GroupCommandHelper>,
    packer: Arc<GroupPacker>,
}

impl GroupHistoryBuilder {
    pub fn new(
        delegate: Arc<GroupDelegate>,
        helper: Arc<GroupCommandHelper>,
        packer: Arc<GroupPacker>,
    ) -> Self {
        Self {
            delegate,
            helper,
            packer,
        }
    }

    /// Signed broadcast of a group command, ready to store and forward.
    pub fn pack_command(&self, command: &GroupCommand) -> Result<ReliableMessage, TomGroupError> {
        let msg = InstantMessage::new(
            self.delegate.local_id(),
            Address::Anyone,
            Content::Command(command.clone()),
        )
        .in_group(command.group.clone());
        self.packer.sign_broadcast(&msg)
    }

    /// Meta + bulletin as a signed broadcast. `None` if either is missing.
    pub fn build_document_message(
        &self,
        group: &GroupId,
    ) -> Result<Option<ReliableMessage>, TomGroupError> {
        let (Some(meta), Some(bulletin)) =
            (self.delegate.meta(group)?, self.delegate.bulletin(group)?)
        else {
            return Ok(None);
        };
        let msg = InstantMessage::new(
            self.delegate.local_id(),
            Address::Anyone,
            Content::Document { meta, bulletin },
        )
        .in_group(group.clone());
        Ok(Some(self.packer.sign_broadcast(&msg)?))
    }

    /// New reset command for `members`, packed but not saved.
    ///
    /// Its time is strictly after the cached checkpoint, even within the
    /// same millisecond.
    pub fn build_reset_command(
        &self,
        group: &GroupId,
        members: Vec<crate::types::NodeId>,
    ) -> Result<(GroupCommand, ReliableMessage), TomGroupError> {
        let time = match self.delegate.last_reset_time(group)? {
            Some(cached) => now_ms().max(cached + 1),
            None => now_ms(),
        };
        let command = GroupCommand::reset(group.clone(), time, members);
        let message = self.pack_command(&command)?;
        Ok((command, message))
    }

    /// The cached checkpoint, replaced by a fresh one when we may reset
    /// and the cached one is missing or no longer matches local members.
    pub fn reset_checkpoint(&self, group: &GroupId) -> Result<Option<HistoryEntry>, TomGroupError> {
        let cached = self.helper.reset_command(group)?;
        let Some(snapshot) = self.delegate.snapshot(group)? else {
            return Ok(cached);
        };
        if !snapshot.can_reset(&self.delegate.local_id()) || !snapshot.is_ready() {
            return Ok(cached);
        }
        let stale = match &cached {
            Some(entry) => entry.command.members() != snapshot.members.as_slice(),
            None => true,
        };
        if !stale {
            return Ok(cached);
        }
        let (command, message) = self.build_reset_command(group, snapshot.members.clone())?;
        if !self.helper.save_group_history(group, &command, &message)? {
            return Ok(cached);
        }
        tracing::debug!("refreshed reset checkpoint for {group}");
        Ok(Some(HistoryEntry::new(command, message)))
    }

    /// Document, reset, then every live command except queries.
    pub fn build_group_histories(
        &self,
        group: &GroupId,
    ) -> Result<Vec<ReliableMessage>, TomGroupError> {
        let mut messages = Vec::new();
        if let Some(doc) = self.build_document_message(group)? {
            messages.push(doc);
        }
        let Some(reset) = self.reset_checkpoint(group)? else {
            tracing::debug!("no reset checkpoint for {group}");
            return Ok(messages);
        };
        messages.push(reset.message);
        for entry in self.helper.group_histories(group)? {
            if entry.command.kind() == CommandKind::Query {
                continue;
            }
            if self.helper.is_command_expired(&entry.command)? {
                continue;
            }
            messages.push(entry.message);
        }
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::testing::{identity, node, Fixture};

    fn contents(messages: &[ReliableMessage]) -> Vec<Content> {
        messages
            .iter()
            .map(|m| m.open(&identity(99)).unwrap().content)
            .collect()
    }

    #[test]
    fn history_starts_with_document_then_reset() {
        let fx = Fixture::founded(&[2, 3], &[]);
        let histories = fx.builder.build_group_histories(&fx.group).unwrap();
        let contents = contents(&histories);
        assert_eq!(contents.len(), 2);
        assert!(matches!(contents[0], Content::Document { .. }));
        let Content::Command(reset) = &contents[1] else {
            panic!("expected reset");
        };
        assert_eq!(reset.members(), &[node(1), node(2), node(3)]);
        assert_eq!(reset.time, fx.t0);
    }

    #[test]
    fn live_commands_follow_reset() {
        let fx = Fixture::member_view(2, &[2, 3, 4], &[]);
        let quit = GroupCommand::quit(fx.group.clone(), fx.t0 + 1);
        let msg = fx.signed(4, &quit);
        fx.helper.save_group_history(&fx.group, &quit, &msg).unwrap();
        let histories = fx.builder.build_group_histories(&fx.group).unwrap();
        assert_eq!(histories.len(), 3);
        assert_eq!(histories[2].id, msg.id);
    }

    #[test]
    fn owner_refreshes_stale_checkpoint() {
        let fx = Fixture::founded(&[2, 3], &[]);
        fx.delegate
            .save_members(&fx.group, &[node(1), node(2)])
            .unwrap();
        let histories = fx.builder.build_group_histories(&fx.group).unwrap();
        let Content::Command(reset) = &contents(&histories)[1] else {
            panic!("expected reset");
        };
        assert_eq!(reset.members(), &[node(1), node(2)]);
        assert!(reset.time > fx.t0);
        assert_eq!(
            fx.delegate.last_reset_time(&fx.group).unwrap(),
            Some(reset.time)
        );
    }

    #[test]
    fn member_keeps_cached_checkpoint() {
        let fx = Fixture::member_view(3, &[2, 3], &[]);
        fx.delegate
            .save_members(&fx.group, &[node(1), node(3)])
            .unwrap();
        let histories = fx.builder.build_group_histories(&fx.group).unwrap();
        let Content::Command(reset) = &contents(&histories)[1] else {
            panic!("expected reset");
        };
        assert_eq!(reset.time, fx.t0);
    }

    #[test]
    fn reset_time_is_strictly_after_checkpoint() {
        let fx = Fixture::founded(&[2], &[]);
        let (first, msg) = fx
            .builder
            .build_reset_command(&fx.group, vec![node(1), node(2)])
            .unwrap();
        fx.helper.save_group_history(&fx.group, &first, &msg).unwrap();
        let (second, _) = fx
            .builder
            .build_reset_command(&fx.group, vec![node(1)])
            .unwrap();
        assert!(second.time > first.time);
    }
}
