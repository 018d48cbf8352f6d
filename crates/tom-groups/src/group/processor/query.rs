use super::{pass, CommandProcessor, ProcessorContext, HISTORY_NOT_UPDATED, QUERY_NOT_ALLOWED};
use crate::content::ReceiptContent;
use crate::error::TomGroupError;
use crate::group::command::{CommandBody, GroupCommand};
use crate::group::types::*;
use crate::message::ReliableMessage;

/// `query`: a member or assistant asks for the current history. Read only.
///
/// If the sender's `last_time` is already at or past our newest command,
/// it gets a "not updated" receipt instead of the history.
pub struct QueryCommandProcessor;

impl CommandProcessor for QueryCommandProcessor {
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

        if !snapshot.is_member(&sender) && !snapshot.is_assistant(&sender) {
            return Ok(vec![ctx.receipt(
                command,
                message,
                "Not allowed to query members.",
                QUERY_NOT_ALLOWED,
            )]);
        }

        if let CommandBody::Query {
            last_time: Some(their_time),
        } = &command.body
        {
            if let Some(ours) = ctx.helper.last_history_time(group)? {
                if ours <= *their_time {
                    tracing::debug!("{sender} already has history of {group} up to {ours}");
                    return Ok(vec![GroupAction::receipt(
                        sender,
                        ReceiptContent::new("Group history not updated.")
                            .with_template(HISTORY_NOT_UPDATED)
                            .replace("ID", group.to_string())
                            .replace("LAST_TIME", their_time.to_string())
                            .for_group(group)
                            .answering(message.id.clone()),
                    )]);
                }
            }
        }

        tracing::debug!("sending history of {group} to {sender}");
        ctx.send_histories(group, sender)
    }
}
