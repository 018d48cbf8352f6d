/// GroupManager: member-facing group operations.
///
/// Pure decision engine: builds and signs commands locally, saves them
/// through the helper and returns `Vec<GroupAction>` for the runtime to
/// send. Local callers get `Err` for denials; nothing is sent then.
use std::sync::Arc;

use crate::content::Content;
use crate::error::TomGroupError;
use crate::group::admin::forward_to;
use crate::group::bots::GroupBotsManager;
use crate::group::builder::GroupHistoryBuilder;
use crate::group::command::GroupCommand;
use crate::group::delegate::GroupDelegate;
use crate::group::helper::GroupCommandHelper;
use crate::group::packer::GroupPacker;
use crate::group::processor::ProcessorContext;
use crate::group::types::*;
use crate::store::RoleUpdate;
use crate::types::{now_ms, NodeId, Priority};

pub struct GroupManager {
    delegate: Arc<GroupDelegate>,
    helper: Arc<GroupCommandHelper>,
    builder: Arc<GroupHistoryBuilder>,
    packer: Arc<GroupPacker>,
    bots: Arc<GroupBotsManager>,
    /// Groups this large get the common assistants at creation.
    polylogue_limit: usize,
}

impl GroupManager {
    pub fn new(ctx: &ProcessorContext, bots: Arc<GroupBotsManager>, polylogue_limit: usize) -> Self {
        Self {
            delegate: ctx.delegate.clone(),
            helper: ctx.helper.clone(),
            builder: ctx.builder.clone(),
            packer: ctx.packer.clone(),
            bots,
            polylogue_limit,
        }
    }

    // ── Creation ─────────────────────────────────────────────────────────

    /// Found a group with `members`. The local node becomes founder and
    /// owner and is moved to the front of the list.
    pub fn create_group(
        &self,
        members: &[NodeId],
    ) -> Result<(GroupId, Vec<GroupAction>), TomGroupError> {
        let identity = self.delegate.identity();
        let local = identity.id();
        let (others, _) = remove_all(&dedup_members(members), &[local]);
        let mut members = Vec::with_capacity(others.len() + 1);
        members.push(local);
        members.extend(others);

        let name = self.delegate.build_group_name(&members)?;
        let meta = GroupMeta::generate(identity, uuid::Uuid::new_v4().to_string());
        let group = meta.group_id();
        let assistants = if members.len() >= self.polylogue_limit {
            self.bots.common_assistants()
        } else {
            vec![]
        };
        let mut bulletin = Bulletin {
            group: group.clone(),
            name,
            founder: local,
            owner: local,
            administrators: vec![],
            assistants,
            time: now_ms(),
            signature: vec![],
        };
        bulletin.sign(identity);
        if !self.delegate.save_meta(&meta)? || !self.delegate.save_bulletin(&bulletin)? {
            return Err(TomGroupError::InvalidEnvelope {
                reason: format!("documents of new group {group} were rejected"),
            });
        }
        tracing::info!("created group {group} \"{}\"", bulletin.name);

        let mut actions = vec![GroupAction::Event(GroupEvent::GroupCreated {
            group: group.clone(),
            members: members.clone(),
        })];
        actions.extend(self.reset_members(&group, members)?);
        Ok((group, actions))
    }

    // ── Membership ───────────────────────────────────────────────────────

    /// Replace the member list with a fresh reset checkpoint.
    ///
    /// Owner or administrator only; the owner must come first and every
    /// administrator must stay. The full history goes to the assistants,
    /// else to the new members and to the removed ones, so they learn
    /// they were expelled.
    pub fn reset_members(
        &self,
        group: &GroupId,
        members: Vec<NodeId>,
    ) -> Result<Vec<GroupAction>, TomGroupError> {
        let Some(snapshot) = self.delegate.snapshot(group)? else {
            return Err(TomGroupError::NotReady {
                group: group.to_string(),
            });
        };
        let local = self.delegate.local_id();
        if !snapshot.can_reset(&local) {
            return Err(TomGroupError::PermissionDenied {
                reason: format!("not allowed to reset members of {group}"),
            });
        }
        let members = dedup_members(&members);
        match members.first() {
            None => {
                return Err(TomGroupError::InvalidCommand {
                    reason: "reset needs at least the owner".into(),
                })
            }
            Some(first) if !snapshot.is_owner(first) => {
                return Err(TomGroupError::InvalidCommand {
                    reason: format!("owner must be the first member of {group}"),
                })
            }
            Some(_) => {}
        }
        if let Some(admin) = snapshot
            .administrators
            .iter()
            .find(|a| !members.contains(a))
        {
            return Err(TomGroupError::InvalidCommand {
                reason: format!("cannot drop administrator {admin} from {group}"),
            });
        }

        let (command, message) = self.builder.build_reset_command(group, members.clone())?;
        let (added, removed) = membership_delta(&snapshot.members, &members);
        let command = command.annotated(added.clone(), removed.clone());
        if !self
            .helper
            .commit(group, &command, &message, RoleUpdate::members(&members))?
        {
            return Err(not_admitted("reset", group));
        }
        if !removed.is_empty() {
            self.packer.rotate_group_key(group);
        }
        tracing::info!(
            "reset {group}: {} member(s), +{} -{}",
            members.len(),
            added.len(),
            removed.len()
        );

        let targets = if snapshot.assistants.is_empty() {
            append_unique(&members, &removed).0
        } else {
            snapshot.assistants.clone()
        };
        let histories = self.builder.build_group_histories(group)?;
        let mut actions = vec![GroupAction::Event(GroupEvent::MembershipChanged {
            group: group.clone(),
            members,
            added,
            removed,
        })];
        actions.extend(targets.into_iter().filter(|t| *t != local).map(|to| {
            GroupAction::Send {
                to,
                content: Content::Forward {
                    messages: histories.clone(),
                },
                priority: Priority::Normal,
            }
        }));
        Ok(actions)
    }

    /// Invite `invitees` into `group`.
    ///
    /// Owner and administrators admit directly through a reset. An
    /// ordinary member's invite is sent for review to the assistants, else
    /// to the owner and administrators.
    pub fn invite_members(
        &self,
        group: &GroupId,
        invitees: &[NodeId],
    ) -> Result<Vec<GroupAction>, TomGroupError> {
        let snapshot = self.ready_snapshot(group)?;
        let local = self.delegate.local_id();
        if !snapshot.is_member(&local) {
            return Err(TomGroupError::PermissionDenied {
                reason: format!("not a member of {group}"),
            });
        }
        if invitees.is_empty() {
            return Err(TomGroupError::InvalidCommand {
                reason: "nobody to invite".into(),
            });
        }
        let (members, added) = append_unique(&snapshot.members, invitees);
        if added.is_empty() {
            tracing::debug!("invitees are already members of {group}");
            return Ok(vec![]);
        }
        if snapshot.can_reset(&local) {
            return self.reset_members(group, members);
        }

        let command = GroupCommand::invite(group.clone(), now_ms(), added);
        let message = self.builder.pack_command(&command)?;
        if !self.helper.save_group_history(group, &command, &message)? {
            return Err(not_admitted("invite", group));
        }
        let targets = if snapshot.assistants.is_empty() {
            let mut reviewers = vec![snapshot.owner];
            reviewers.extend(snapshot.administrators.iter().copied());
            reviewers
        } else {
            snapshot.assistants.clone()
        };
        tracing::info!("asked {} reviewer(s) to admit invitees to {group}", targets.len());
        Ok(dedup_members(&targets)
            .into_iter()
            .filter(|t| *t != local)
            .map(|to| forward_to(to, message.clone()))
            .collect())
    }

    /// Expel `targets` by resetting the member list without them.
    pub fn expel_members(
        &self,
        group: &GroupId,
        targets: &[NodeId],
    ) -> Result<Vec<GroupAction>, TomGroupError> {
        let snapshot = self.ready_snapshot(group)?;
        if let Some(protected) = targets.iter().find(|t| snapshot.can_reset(t)) {
            return Err(TomGroupError::InvalidCommand {
                reason: format!("cannot expel owner or administrator {protected}"),
            });
        }
        let (members, removed) = remove_all(&snapshot.members, targets);
        if removed.is_empty() {
            tracing::debug!("nobody to expel from {group}");
            return Ok(vec![]);
        }
        self.reset_members(group, members)
    }

    /// Leave `group`. The owner and administrators may not.
    pub fn quit_group(&self, group: &GroupId) -> Result<Vec<GroupAction>, TomGroupError> {
        let snapshot = self.ready_snapshot(group)?;
        let local = self.delegate.local_id();
        if snapshot.is_owner(&local) {
            return Err(TomGroupError::PermissionDenied {
                reason: format!("owner cannot quit {group}"),
            });
        }
        if snapshot.is_administrator(&local) {
            return Err(TomGroupError::PermissionDenied {
                reason: format!("administrator cannot quit {group}, resign first"),
            });
        }
        if !snapshot.is_member(&local) {
            return Err(TomGroupError::PermissionDenied {
                reason: format!("not a member of {group}"),
            });
        }

        let command = GroupCommand::quit(group.clone(), now_ms());
        let message = self.builder.pack_command(&command)?;
        let (members, removed) = remove_all(&snapshot.members, &[local]);
        let command = command.annotated(vec![], removed.clone());
        if !self
            .helper
            .commit(group, &command, &message, RoleUpdate::members(&members))?
        {
            return Err(not_admitted("quit", group));
        }
        tracing::info!("quit group {group}");

        let targets = if snapshot.assistants.is_empty() {
            members.clone()
        } else {
            snapshot.assistants.clone()
        };
        let mut actions = vec![GroupAction::Event(GroupEvent::MembershipChanged {
            group: group.clone(),
            members,
            added: vec![],
            removed,
        })];
        actions.extend(targets.into_iter().map(|to| forward_to(to, message.clone())));
        Ok(actions)
    }

    /// Admit every pending join request and member invite.
    pub fn review_applications(&self, group: &GroupId) -> Result<Vec<GroupAction>, TomGroupError> {
        let snapshot = self.ready_snapshot(group)?;
        if !snapshot.can_reset(&self.delegate.local_id()) {
            return Err(TomGroupError::PermissionDenied {
                reason: format!("not allowed to review applications of {group}"),
            });
        }
        let candidates = self.delegate.pending_candidates(group)?;
        if candidates.is_empty() {
            return Ok(vec![]);
        }
        tracing::info!("admitting {} applicant(s) to {group}", candidates.len());
        let (members, _) = append_unique(&snapshot.members, &candidates);
        self.reset_members(group, members)
    }

    /// Ask the network for the latest history of `group`.
    pub fn query_group(&self, group: &GroupId) -> Result<Vec<GroupAction>, TomGroupError> {
        self.delegate.query_group(group)
    }

    fn ready_snapshot(&self, group: &GroupId) -> Result<GroupSnapshot, TomGroupError> {
        match self.delegate.snapshot(group)? {
            Some(snapshot) if snapshot.is_ready() => Ok(snapshot),
            _ => Err(TomGroupError::NotReady {
                group: group.to_string(),
            }),
        }
    }
}

/// A locally built command the consistency gate refused: our clock is
/// behind the cached checkpoint.
fn not_admitted(kind: &str, group: &GroupId) -> TomGroupError {
    TomGroupError::InvalidCommand {
        reason: format!("{kind} for {group} was not admitted"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::testing::{identity, node, sends, Fixture};
    use crate::message::ReliableMessage;

    fn manager(fx: &Fixture) -> GroupManager {
        GroupManager::new(fx.dispatcher.context(), Arc::default(), POLYLOGUE_LIMIT)
    }

    fn history_sent_to(actions: &[GroupAction], to: NodeId) -> Option<Vec<ReliableMessage>> {
        actions.iter().find_map(|a| match a {
            GroupAction::Send {
                to: target,
                content: Content::Forward { messages },
                ..
            } if *target == to => Some(messages.clone()),
            _ => None,
        })
    }

    #[test]
    fn create_puts_founder_first_and_sends_history() {
        let fx = Fixture::bare(1);
        let (group, actions) = manager(&fx)
            .create_group(&[node(2), node(1), node(3)])
            .unwrap();
        assert_eq!(
            fx.delegate.members(&group).unwrap(),
            vec![node(1), node(2), node(3)]
        );
        let snap = fx.delegate.snapshot(&group).unwrap().unwrap();
        assert!(snap.is_owner(&node(1)));
        assert_eq!(fx.delegate.founder(&group).unwrap(), Some(node(1)));
        assert!(fx.delegate.meta(&group).unwrap().unwrap().matches(&group));
        assert!(matches!(&actions[0], GroupAction::Event(GroupEvent::GroupCreated { .. })));
        assert_eq!(sends(&actions), vec![node(2), node(3)]);

        let history = history_sent_to(&actions, node(2)).unwrap();
        assert_eq!(history.len(), 2);
        let reset = history[1].open(&identity(2)).unwrap();
        let Content::Command(reset) = reset.content else {
            panic!("expected reset");
        };
        assert_eq!(reset.members(), &[node(1), node(2), node(3)]);
        assert_eq!(fx.delegate.last_reset_time(&group).unwrap(), Some(reset.time));
    }

    #[test]
    fn large_group_gets_common_assistants() {
        let fx = Fixture::bare(1);
        let bots = Arc::new(GroupBotsManager::new(vec![node(60)]));
        let manager = GroupManager::new(fx.dispatcher.context(), bots, 3);
        let (group, actions) = manager.create_group(&[node(2), node(3)]).unwrap();
        assert_eq!(fx.delegate.assistants(&group).unwrap(), vec![node(60)]);
        assert_eq!(sends(&actions), vec![node(60)]);

        let (small, _) = manager.create_group(&[node(2)]).unwrap();
        assert!(fx.delegate.assistants(&small).unwrap().is_empty());
    }

    #[test]
    fn reset_notifies_removed_members() {
        let fx = Fixture::founded(&[2, 3], &[]);
        let actions = manager(&fx)
            .reset_members(&fx.group, vec![node(1), node(2)])
            .unwrap();
        assert_eq!(
            fx.delegate.members(&fx.group).unwrap(),
            vec![node(1), node(2)]
        );
        assert_eq!(sends(&actions), vec![node(2), node(3)]);
        let cached = fx.helper.reset_command(&fx.group).unwrap().unwrap();
        assert_eq!(cached.command.removed, vec![node(3)]);
        assert!(cached.command.time > fx.t0);
    }

    #[test]
    fn quit_behind_checkpoint_changes_nothing() {
        let fx = Fixture::member_view(3, &[2, 3], &[]);
        let ahead = now_ms() + 3_600_000;
        let reset = GroupCommand::reset(fx.group.clone(), ahead, vec![node(1), node(2), node(3)]);
        assert!(fx
            .helper
            .save_group_history(&fx.group, &reset, &fx.signed(1, &reset))
            .unwrap());

        let err = manager(&fx).quit_group(&fx.group).unwrap_err();
        assert!(matches!(err, TomGroupError::InvalidCommand { .. }));
        assert_eq!(fx.delegate.members(&fx.group).unwrap().len(), 3);
        assert!(fx.helper.group_histories(&fx.group).unwrap().is_empty());
    }

    #[test]
    fn reset_validation() {
        let fx = Fixture::founded(&[2, 3], &[2]);
        let m = manager(&fx);
        assert!(matches!(
            m.reset_members(&fx.group, vec![node(2), node(1)]),
            Err(TomGroupError::InvalidCommand { .. })
        ));
        assert!(matches!(
            m.reset_members(&fx.group, vec![node(1), node(3)]),
            Err(TomGroupError::InvalidCommand { .. })
        ));
        assert!(matches!(
            m.reset_members(&fx.group, vec![]),
            Err(TomGroupError::InvalidCommand { .. })
        ));
        assert_eq!(fx.delegate.last_reset_time(&fx.group).unwrap(), Some(fx.t0));

        let fx = Fixture::member_view(3, &[2, 3], &[]);
        assert!(matches!(
            manager(&fx).reset_members(&fx.group, vec![node(1)]),
            Err(TomGroupError::PermissionDenied { .. })
        ));
    }

    #[test]
    fn owner_invite_goes_through_reset() {
        let fx = Fixture::founded(&[2, 3], &[]);
        let actions = manager(&fx).invite_members(&fx.group, &[node(4)]).unwrap();
        assert_eq!(fx.delegate.members(&fx.group).unwrap().len(), 4);
        assert_eq!(sends(&actions), vec![node(2), node(3), node(4)]);
    }

    #[test]
    fn member_invite_goes_to_reviewers() {
        let fx = Fixture::member_view(3, &[2, 3], &[2]);
        let actions = manager(&fx).invite_members(&fx.group, &[node(4)]).unwrap();
        assert_eq!(sends(&actions), vec![node(1), node(2)]);
        assert_eq!(fx.delegate.members(&fx.group).unwrap().len(), 3);
        assert_eq!(fx.delegate.pending_candidates(&fx.group).unwrap(), vec![node(4)]);
    }

    #[test]
    fn inviting_members_is_noop() {
        let fx = Fixture::founded(&[2], &[]);
        assert!(manager(&fx).invite_members(&fx.group, &[node(2)]).unwrap().is_empty());
    }

    #[test]
    fn expel_is_a_reset() {
        let fx = Fixture::founded(&[2, 3, 4], &[2]);
        let m = manager(&fx);
        let actions = m.expel_members(&fx.group, &[node(4)]).unwrap();
        assert_eq!(
            fx.delegate.members(&fx.group).unwrap(),
            vec![node(1), node(2), node(3)]
        );
        assert!(history_sent_to(&actions, node(4)).is_some());
        assert!(m.expel_members(&fx.group, &[node(2)]).is_err());
        assert!(m.expel_members(&fx.group, &[node(9)]).unwrap().is_empty());
    }

    #[test]
    fn member_quits_and_tells_the_rest() {
        let fx = Fixture::member_view(3, &[2, 3], &[]);
        let actions = manager(&fx).quit_group(&fx.group).unwrap();
        assert_eq!(
            fx.delegate.members(&fx.group).unwrap(),
            vec![node(1), node(2)]
        );
        assert_eq!(sends(&actions), vec![node(1), node(2)]);
        assert_eq!(fx.helper.group_histories(&fx.group).unwrap().len(), 1);
    }

    #[test]
    fn owner_and_admin_cannot_quit() {
        let fx = Fixture::founded(&[2], &[]);
        assert!(manager(&fx).quit_group(&fx.group).is_err());
        let fx = Fixture::member_view(2, &[2], &[2]);
        assert!(manager(&fx).quit_group(&fx.group).is_err());
    }

    #[test]
    fn review_admits_applicants() {
        let fx = Fixture::founded(&[2], &[]);
        let join = GroupCommand::join(fx.group.clone(), fx.t0 + 1);
        let msg = fx.signed(7, &join);
        fx.dispatcher.process(&join, &msg).unwrap();

        let actions = manager(&fx).review_applications(&fx.group).unwrap();
        assert_eq!(
            fx.delegate.members(&fx.group).unwrap(),
            vec![node(1), node(2), node(7)]
        );
        assert!(history_sent_to(&actions, node(7)).is_some());
        assert!(fx.delegate.pending_candidates(&fx.group).unwrap().is_empty());
    }

    #[test]
    fn unknown_group_is_not_ready() {
        let fx = Fixture::bare(1);
        assert!(matches!(
            manager(&fx).invite_members(&fx.group, &[node(2)]),
            Err(TomGroupError::NotReady { .. })
        ));
    }
}
