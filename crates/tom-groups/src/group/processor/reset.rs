use super::{
    pass, CommandProcessor, Gate, ProcessorContext, MEMBERS_EMPTY, OWNER_NOT_FIRST,
    RESET_EXPELS_ADMIN, RESET_NOT_ALLOWED,
};
use crate::error::TomGroupError;
use crate::group::command::GroupCommand;
use crate::group::types::*;
use crate::message::ReliableMessage;
use crate::store::RoleUpdate;

/// `reset`: the checkpoint. Replaces the whole member list.
///
/// Owner or administrator only; the owner must come first and no
/// administrator may be left out. Only needs the owner to be known, so a
/// node that has just received the bulletin can bootstrap its member list
/// from it.
pub struct ResetCommandProcessor;

impl ResetCommandProcessor {
    fn owner_known(
        ctx: &ProcessorContext,
        command: &GroupCommand,
        message: &ReliableMessage,
    ) -> Result<Gate<GroupSnapshot>, TomGroupError> {
        match ctx.delegate.snapshot(&command.group)? {
            Some(snapshot) => Ok(Gate::Pass(snapshot)),
            None => Ok(Gate::Stop(ctx.not_ready(command, message)?)),
        }
    }
}

impl CommandProcessor for ResetCommandProcessor {
    fn process(
        &self,
        ctx: &ProcessorContext,
        command: &GroupCommand,
        message: &ReliableMessage,
    ) -> Result<Vec<GroupAction>, TomGroupError> {
        pass!(ctx.check_expired(command));
        let snapshot = pass!(Self::owner_known(ctx, command, message));
        let group = &command.group;
        let sender = message.sender;

        if !snapshot.can_reset(&sender) {
            return Ok(vec![ctx.receipt(
                command,
                message,
                "Not allowed to reset members.",
                RESET_NOT_ALLOWED,
            )]);
        }
        let members = dedup_members(command.members());
        let Some(first) = members.first() else {
            return Ok(vec![ctx.receipt(
                command,
                message,
                "Reset command error.",
                MEMBERS_EMPTY,
            )]);
        };
        if !snapshot.is_owner(first) {
            return Ok(vec![ctx.receipt(
                command,
                message,
                "Owner must be the first member.",
                OWNER_NOT_FIRST,
            )]);
        }
        if snapshot
            .administrators
            .iter()
            .any(|admin| !members.contains(admin))
        {
            return Ok(vec![ctx.receipt(
                command,
                message,
                "Not allowed to expel administrator.",
                RESET_EXPELS_ADMIN,
            )]);
        }

        let (added, removed) = membership_delta(&snapshot.members, &members);
        let annotated = command.annotated(added.clone(), removed.clone());
        if !ctx
            .helper
            .commit(group, &annotated, message, RoleUpdate::members(&members))?
        {
            return Ok(vec![]);
        }
        if !removed.is_empty() {
            ctx.packer.rotate_group_key(group);
        }
        tracing::info!(
            "{group} reset by {sender}: {} member(s), +{} -{}",
            members.len(),
            added.len(),
            removed.len()
        );
        Ok(vec![GroupAction::Event(GroupEvent::MembershipChanged {
            group: group.clone(),
            members,
            added,
            removed,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::processor::receipt_template;
    use crate::group::testing::{node, Fixture};

    fn reset(fx: &Fixture, from: u8, time: u64, members: &[u8]) -> Vec<GroupAction> {
        let members = members.iter().map(|s| node(*s)).collect();
        let cmd = GroupCommand::reset(fx.group.clone(), time, members);
        let msg = fx.signed(from, &cmd);
        fx.dispatcher.process(&cmd, &msg).unwrap()
    }

    #[test]
    fn newer_reset_replaces_members() {
        let fx = Fixture::member_view(2, &[2, 3], &[]);
        let actions = reset(&fx, 1, fx.t0 + 5, &[1, 2, 4]);
        assert_eq!(
            fx.delegate.members(&fx.group).unwrap(),
            vec![node(1), node(2), node(4)]
        );
        let GroupAction::Event(GroupEvent::MembershipChanged { added, removed, .. }) = &actions[0]
        else {
            panic!("expected membership change");
        };
        assert_eq!(added, &vec![node(4)]);
        assert_eq!(removed, &vec![node(3)]);
        let cached = fx.helper.reset_command(&fx.group).unwrap().unwrap();
        assert_eq!(cached.command.removed, vec![node(3)]);
    }

    #[test]
    fn older_and_duplicate_resets_are_dropped() {
        let fx = Fixture::member_view(2, &[2, 3], &[]);
        assert!(reset(&fx, 1, fx.t0 - 1, &[1]).is_empty());
        assert!(reset(&fx, 1, fx.t0, &[1]).is_empty());
        assert_eq!(fx.delegate.members(&fx.group).unwrap().len(), 3);
    }

    #[test]
    fn member_cannot_reset() {
        let fx = Fixture::founded(&[2, 3], &[]);
        let actions = reset(&fx, 3, fx.t0 + 1, &[1, 3]);
        assert_eq!(receipt_template(&actions).as_deref(), Some(RESET_NOT_ALLOWED));
        assert_eq!(fx.delegate.members(&fx.group).unwrap().len(), 3);
    }

    #[test]
    fn owner_must_come_first() {
        let fx = Fixture::member_view(2, &[2, 3], &[]);
        let actions = reset(&fx, 1, fx.t0 + 1, &[2, 1, 3]);
        assert_eq!(receipt_template(&actions).as_deref(), Some(OWNER_NOT_FIRST));
    }

    #[test]
    fn reset_may_not_drop_an_admin() {
        let fx = Fixture::member_view(3, &[2, 3], &[2]);
        let actions = reset(&fx, 1, fx.t0 + 1, &[1, 3]);
        assert_eq!(receipt_template(&actions).as_deref(), Some(RESET_EXPELS_ADMIN));
        assert_eq!(fx.delegate.members(&fx.group).unwrap().len(), 3);
    }

    #[test]
    fn admin_may_reset() {
        let fx = Fixture::member_view(3, &[2, 3, 4], &[2]);
        reset(&fx, 2, fx.t0 + 1, &[1, 2, 3]);
        assert_eq!(fx.delegate.members(&fx.group).unwrap().len(), 3);
    }

    #[test]
    fn empty_reset_is_structural_error() {
        let fx = Fixture::member_view(2, &[2], &[]);
        let actions = reset(&fx, 1, fx.t0 + 1, &[]);
        assert_eq!(receipt_template(&actions).as_deref(), Some(MEMBERS_EMPTY));
    }

    #[test]
    fn bootstrap_from_bulletin_only() {
        let fx = Fixture::member_view(2, &[2], &[]);
        fx.delegate.save_members(&fx.group, &[]).unwrap();
        reset(&fx, 1, fx.t0 + 1, &[1, 2]);
        assert_eq!(
            fx.delegate.members(&fx.group).unwrap(),
            vec![node(1), node(2)]
        );
    }
}
