use super::{pass, CommandProcessor, ProcessorContext, ADMIN_CANNOT_QUIT, OWNER_CANNOT_QUIT};
use crate::error::TomGroupError;
use crate::group::command::GroupCommand;
use crate::group::types::*;
use crate::message::ReliableMessage;
use crate::store::RoleUpdate;

/// `quit`: a member leaves. Owner and administrators may not.
/// No reply on success.
pub struct QuitCommandProcessor;

impl CommandProcessor for QuitCommandProcessor {
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

        if snapshot.is_owner(&sender) {
            return Ok(vec![ctx.receipt(
                command,
                message,
                "Owner cannot quit.",
                OWNER_CANNOT_QUIT,
            )]);
        }
        if snapshot.is_administrator(&sender) {
            return Ok(vec![ctx.receipt(
                command,
                message,
                "Administrator cannot quit.",
                ADMIN_CANNOT_QUIT,
            )]);
        }
        if !snapshot.is_member(&sender) {
            tracing::debug!("{sender} quitting {group} is not a member");
            return Ok(vec![]);
        }

        let (members, removed) = remove_all(&snapshot.members, &[sender]);
        let annotated = command.annotated(vec![], removed.clone());
        if !ctx
            .helper
            .commit(group, &annotated, message, RoleUpdate::members(&members))?
        {
            return Ok(vec![]);
        }
        ctx.packer.rotate_group_key(group);
        tracing::info!("{sender} quit {group}");
        Ok(vec![GroupAction::Event(GroupEvent::MembershipChanged {
            group: group.clone(),
            members,
            added: vec![],
            removed,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::processor::receipt_template;
    use crate::group::testing::{node, Fixture};

    fn quit(fx: &Fixture, from: u8) -> Vec<GroupAction> {
        let cmd = GroupCommand::quit(fx.group.clone(), fx.t0 + 1);
        let msg = fx.signed(from, &cmd);
        fx.dispatcher.process(&cmd, &msg).unwrap()
    }

    #[test]
    fn member_quits() {
        let fx = Fixture::founded(&[2, 3], &[]);
        let actions = quit(&fx, 3);
        assert_eq!(
            fx.delegate.members(&fx.group).unwrap(),
            vec![node(1), node(2)]
        );
        assert_eq!(actions.len(), 1);
        assert_eq!(fx.helper.group_histories(&fx.group).unwrap().len(), 1);
    }

    #[test]
    fn owner_cannot_quit() {
        let fx = Fixture::member_view(2, &[2, 3], &[]);
        let actions = quit(&fx, 1);
        assert_eq!(receipt_template(&actions).as_deref(), Some(OWNER_CANNOT_QUIT));
        assert_eq!(fx.delegate.members(&fx.group).unwrap().len(), 3);
    }

    #[test]
    fn admin_cannot_quit() {
        let fx = Fixture::founded(&[2, 3], &[2]);
        let actions = quit(&fx, 2);
        assert_eq!(receipt_template(&actions).as_deref(), Some(ADMIN_CANNOT_QUIT));
    }

    #[test]
    fn stranger_quit_is_silent() {
        let fx = Fixture::founded(&[2], &[]);
        assert!(quit(&fx, 9).is_empty());
        assert_eq!(fx.delegate.members(&fx.group).unwrap().len(), 2);
    }
}
