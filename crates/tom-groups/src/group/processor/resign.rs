use super::{pass, CommandProcessor, ProcessorContext, OWNER_CANNOT_RESIGN};
use crate::error::TomGroupError;
use crate::group::command::GroupCommand;
use crate::group::types::*;
use crate::message::ReliableMessage;
use crate::store::RoleUpdate;

/// `resign`: an administrator steps down. Judged against the bulletin
/// time. When the owner processes it, the bulletin is re-signed without
/// the administrator and published.
pub struct ResignCommandProcessor;

impl CommandProcessor for ResignCommandProcessor {
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
                "Owner cannot resign.",
                OWNER_CANNOT_RESIGN,
            )]);
        }
        if !snapshot.is_administrator(&sender) {
            tracing::debug!("{sender} resigning from {group} is not an administrator");
            return Ok(vec![]);
        }

        let (admins, removed) = remove_all(&snapshot.administrators, &[sender]);
        let annotated = command.annotated(vec![], removed);
        if !ctx
            .helper
            .commit(group, &annotated, message, RoleUpdate::administrators(&admins))?
        {
            return Ok(vec![]);
        }
        tracing::info!("{sender} resigned as administrator of {group}");

        if snapshot.is_owner(&ctx.local_id()) {
            return ctx.admin.publish_administrators(group, admins);
        }
        Ok(vec![GroupAction::Event(GroupEvent::AdministratorsChanged {
            group: group.clone(),
            administrators: admins,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::processor::receipt_template;
    use crate::group::testing::{node, sends, Fixture};

    fn resign(fx: &Fixture, from: u8) -> Vec<GroupAction> {
        let cmd = GroupCommand::resign(fx.group.clone(), crate::types::now_ms());
        let msg = fx.signed(from, &cmd);
        fx.dispatcher.process(&cmd, &msg).unwrap()
    }

    #[test]
    fn sole_admin_resigns() {
        let fx = Fixture::member_view(3, &[2, 3], &[2]);
        let actions = resign(&fx, 2);
        assert!(fx.delegate.administrators(&fx.group).unwrap().is_empty());
        assert!(matches!(
            &actions[0],
            GroupAction::Event(GroupEvent::AdministratorsChanged { administrators, .. }) if administrators.is_empty()
        ));
        // still a member
        assert_eq!(fx.delegate.members(&fx.group).unwrap().len(), 3);
    }

    #[test]
    fn owner_republishes_bulletin() {
        let fx = Fixture::founded(&[2, 3], &[2, 3]);
        let actions = resign(&fx, 2);
        let doc = fx.delegate.bulletin(&fx.group).unwrap().unwrap();
        assert_eq!(doc.administrators, vec![node(3)]);
        assert_eq!(sends(&actions), vec![node(2), node(3)]);
    }

    #[test]
    fn owner_cannot_resign() {
        let fx = Fixture::member_view(2, &[2], &[]);
        let actions = resign(&fx, 1);
        assert_eq!(receipt_template(&actions).as_deref(), Some(OWNER_CANNOT_RESIGN));
    }

    #[test]
    fn non_admin_resign_is_noop() {
        let fx = Fixture::founded(&[2, 3], &[2]);
        assert!(resign(&fx, 3).is_empty());
        assert_eq!(fx.delegate.administrators(&fx.group).unwrap(), vec![node(2)]);
    }

    #[test]
    fn resign_older_than_bulletin_is_dropped() {
        let fx = Fixture::member_view(3, &[2, 3], &[2]);
        let doc_time = fx.delegate.bulletin(&fx.group).unwrap().unwrap().time;
        let cmd = GroupCommand::resign(fx.group.clone(), doc_time - 1);
        let msg = fx.signed(2, &cmd);
        assert!(fx.dispatcher.process(&cmd, &msg).unwrap().is_empty());
        assert_eq!(fx.delegate.administrators(&fx.group).unwrap(), vec![node(2)]);
    }
}
