/// GroupAssistant: the bot side of group delivery.
///
/// A bot receives one group-addressed envelope, exposing the group id and
/// carrying a wrapped key per member, and relays one copy per member by
/// key substitution. It never holds a key for the body. History bundles
/// sent by the owner or an administrator are redistributed to the
/// members the same way.
use std::sync::Arc;

use crate::content::{Content, ReceiptContent};
use crate::group::delegate::GroupDelegate;
use crate::group::packer::GroupPacker;
use crate::group::types::*;
use crate::error::TomGroupError;
use crate::message::ReliableMessage;
use crate::types::{NodeId, Priority};

pub struct GroupAssistant {
    delegate: Arc<GroupDelegate>,
    packer: Arc<GroupPacker>,
}

impl GroupAssistant {
    pub fn new(delegate: Arc<GroupDelegate>, packer: Arc<GroupPacker>) -> Self {
        Self { delegate, packer }
    }

    /// Whether the local node is a declared assistant of `group`.
    pub fn serves(&self, group: &GroupId) -> Result<bool, TomGroupError> {
        Ok(self
            .delegate
            .assistants(group)?
            .contains(&self.delegate.local_id()))
    }

    /// Split a group envelope for its recipients and acknowledge it to
    /// the sender, so the sender can measure this bot.
    ///
    /// Recipients are the members holding a wrapped key. Unencrypted
    /// envelopes go to the locally known members.
    pub fn split_group_message(
        &self,
        group: &GroupId,
        envelope: &ReliableMessage,
    ) -> Result<Vec<GroupAction>, TomGroupError> {
        let local = self.delegate.local_id();
        let recipients: Vec<NodeId> = if envelope.encrypted {
            envelope.keys.keys().copied().collect()
        } else {
            self.delegate.members(group)?
        };
        let copies = self.packer.split_reliable_message(
            envelope,
            &recipients
                .into_iter()
                .filter(|r| *r != local)
                .collect::<Vec<_>>(),
        );
        tracing::debug!(
            "splitting {} from {} for {} member(s) of {group}",
            envelope.id,
            envelope.sender,
            copies.len()
        );

        let mut actions: Vec<GroupAction> = copies
            .into_iter()
            .filter_map(|copy| {
                copy.receiver.node().map(|to| GroupAction::Forward {
                    to,
                    message: copy,
                    priority: Priority::Normal,
                })
            })
            .collect();
        actions.push(GroupAction::receipt(
            envelope.sender,
            ReceiptContent::new("Message forwarded.")
                .for_group(group)
                .answering(envelope.id.clone()),
        ));
        Ok(actions)
    }

    /// Relay a history bundle from `from` to every other member. Bundles
    /// from anyone but the owner or an administrator are dropped.
    pub fn redistribute(
        &self,
        group: &GroupId,
        from: NodeId,
        messages: Vec<ReliableMessage>,
    ) -> Result<Vec<GroupAction>, TomGroupError> {
        if messages.is_empty() {
            return Ok(vec![]);
        }
        let Some(snapshot) = self.delegate.snapshot(group)? else {
            return Ok(vec![]);
        };
        if !snapshot.can_reset(&from) {
            tracing::debug!("{from} may not redistribute history of {group}");
            return Ok(vec![]);
        }
        let local = self.delegate.local_id();
        let targets: Vec<NodeId> = snapshot
            .members
            .into_iter()
            .filter(|m| *m != local && *m != from)
            .collect();
        tracing::debug!(
            "redistributing {} message(s) of {group} to {} member(s)",
            messages.len(),
            targets.len()
        );
        Ok(targets
            .into_iter()
            .map(|to| GroupAction::Send {
                to,
                content: Content::Forward {
                    messages: messages.clone(),
                },
                priority: Priority::Normal,
            })
            .collect())
    }
}
