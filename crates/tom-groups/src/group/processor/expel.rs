use super::{
    pass, CommandProcessor, ProcessorContext, EXPEL_ADMIN_NOT_ALLOWED, EXPEL_NOT_ALLOWED,
    MEMBERS_EMPTY,
};
use crate::error::TomGroupError;
use crate::group::command::GroupCommand;
use crate::group::types::*;
use crate::message::ReliableMessage;
use crate::store::RoleUpdate;

/// Legacy `expel`. Local expulsion goes through a reset; this only
/// admits expel commands from older peers.
///
/// Owner or administrator only, and never against the owner or an
/// administrator.
pub struct ExpelCommandProcessor;

impl CommandProcessor for ExpelCommandProcessor {
    fn process(
        &self,
        ctx: &ProcessorContext,
        command: &GroupCommand,
        message: &ReliableMessage,
    ) -> Result<Vec<GroupAction>, TomGroupError> {
        pass!(ctx.check_expired(command));
        let snapshot = pass!(ctx.ready_snapshot(command, message));
        let group = &command.group;
        let sender = message.sender;

        if !snapshot.can_reset(&sender) {
            return Ok(vec![ctx.receipt(
                command,
                message,
                "Not allowed to expel member.",
                EXPEL_NOT_ALLOWED,
            )]);
        }
        let targets = dedup_members(command.members());
        if targets.is_empty() {
            return Ok(vec![ctx.receipt(
                command,
                message,
                "Expel command error.",
                MEMBERS_EMPTY,
            )]);
        }
        if targets.iter().any(|t| snapshot.can_reset(t)) {
            return Ok(vec![ctx.receipt(
                command,
                message,
                "Not allowed to expel owner or administrator.",
                EXPEL_ADMIN_NOT_ALLOWED,
            )]);
        }

        let (members, removed) = remove_all(&snapshot.members, &targets);
        if removed.is_empty() {
            return Ok(vec![]);
        }
        let annotated = command.annotated(vec![], removed.clone());
        if !ctx
            .helper
            .commit(group, &annotated, message, RoleUpdate::members(&members))?
        {
            return Ok(vec![]);
        }
        ctx.packer.rotate_group_key(group);
        tracing::info!("{sender} expelled {} member(s) from {group}", removed.len());
        Ok(vec![GroupAction::Event(GroupEvent::MembershipChanged {
            group: group.clone(),
            members,
            added: vec![],
            removed,
        })])
    }
}
