use super::{pass, CommandProcessor, ProcessorContext};
use crate::error::TomGroupError;
use crate::group::command::GroupCommand;
use crate::group::types::*;
use crate::message::ReliableMessage;

/// `join`: a stranger asks to be admitted. The request waits for an
/// owner or administrator; a member sending `join` is out of date and
/// gets the current history instead.
pub struct JoinCommandProcessor;

impl CommandProcessor for JoinCommandProcessor {
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

        if snapshot.is_member(&sender) {
            tracing::debug!("{sender} already in {group}, sending history");
            return ctx.send_histories(group, sender);
        }
        if !ctx.helper.save_group_history(group, command, message)? {
            return Ok(vec![]);
        }
        tracing::info!("join request from {sender} for {group}");
        Ok(vec![GroupAction::Event(GroupEvent::ApplicationReceived {
            group: group.clone(),
            from: sender,
            candidates: vec![sender],
        })])
    }
}
