use super::{pass, CommandProcessor, ProcessorContext, INVITE_NOT_ALLOWED, MEMBERS_EMPTY};
use crate::error::TomGroupError;
use crate::group::command::GroupCommand;
use crate::group::types::*;
use crate::message::ReliableMessage;
use crate::store::RoleUpdate;

/// `invite`: any member may invite.
///
/// Owner and administrators admit directly. An ordinary member's invite
/// of new nodes becomes a pending application; inviting nodes that are
/// all members already means the sender is out of date, so it gets the
/// current history.
pub struct InviteCommandProcessor;

impl CommandProcessor for InviteCommandProcessor {
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

        if !snapshot.is_member(&sender) {
            return Ok(vec![ctx.receipt(
                command,
                message,
                "Not allowed to invite member.",
                INVITE_NOT_ALLOWED,
            )]);
        }
        let invitees = dedup_members(command.members());
        if invitees.is_empty() {
            return Ok(vec![ctx.receipt(
                command,
                message,
                "Invite command error.",
                MEMBERS_EMPTY,
            )]);
        }

        let (members, added) = append_unique(&snapshot.members, &invitees);
        if !snapshot.can_reset(&sender) {
            if added.is_empty() {
                tracing::debug!("{sender} invited existing members of {group}, sending history");
                return ctx.send_histories(group, sender);
            }
            if !ctx.helper.save_group_history(group, command, message)? {
                return Ok(vec![]);
            }
            tracing::info!("invite by {sender} for {group} awaits review");
            return Ok(vec![GroupAction::Event(GroupEvent::ApplicationReceived {
                group: group.clone(),
                from: sender,
                candidates: added,
            })]);
        }

        if added.is_empty() {
            return Ok(vec![]);
        }
        let annotated = command.annotated(added.clone(), vec![]);
        if !ctx
            .helper
            .commit(group, &annotated, message, RoleUpdate::members(&members))?
        {
            return Ok(vec![]);
        }
        tracing::info!("{sender} added {} member(s) to {group}", added.len());
        Ok(vec![GroupAction::Event(GroupEvent::MembershipChanged {
            group: group.clone(),
            members,
            added,
            removed: vec![],
        })])
    }
}
