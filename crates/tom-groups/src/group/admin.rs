/// AdminManager: administrator changes.
///
/// Administrators live in the owner-signed bulletin, not in command
/// history: changing them means re-signing the bulletin and publishing it.
use std::sync::Arc;

use crate::content::Content;
use crate::error::TomGroupError;
use crate::group::builder::GroupHistoryBuilder;
use crate::group::command::GroupCommand;
use crate::group::delegate::GroupDelegate;
use crate::group::helper::GroupCommandHelper;
use crate::group::types::*;
use crate::message::ReliableMessage;
use crate::store::RoleUpdate;
use crate::types::{now_ms, NodeId, Priority};

pub struct AdminManager {
    delegate: Arc<GroupDelegate>,
    helper: Arc<GroupCommandHelper>,
    builder: Arc<GroupHistoryBuilder>,
}

impl AdminManager {
    pub fn new(
        delegate: Arc<GroupDelegate>,
        helper: Arc<GroupCommandHelper>,
        builder: Arc<GroupHistoryBuilder>,
    ) -> Self {
        Self {
            delegate,
            helper,
            builder,
        }
    }

    /// Replace the administrator list. Owner only; every administrator
    /// must be a member other than the owner.
    pub fn update_administrators(
        &self,
        group: &GroupId,
        administrators: &[NodeId],
    ) -> Result<Vec<GroupAction>, TomGroupError> {
        let snapshot = self.ready_snapshot(group)?;
        let local = self.delegate.local_id();
        if !snapshot.is_owner(&local) {
            return Err(TomGroupError::PermissionDenied {
                reason: format!("only the owner can change administrators of {group}"),
            });
        }
        let administrators = dedup_members(administrators);
        if administrators.iter().any(|a| snapshot.is_owner(a)) {
            return Err(TomGroupError::InvalidCommand {
                reason: "the owner cannot be an administrator".into(),
            });
        }
        if let Some(outsider) = administrators.iter().find(|a| !snapshot.is_member(a)) {
            return Err(TomGroupError::InvalidCommand {
                reason: format!("{outsider} is not a member of {group}"),
            });
        }
        self.publish_administrators(group, administrators)
    }

    /// Re-sign the bulletin with `administrators` and broadcast it: to the
    /// neighbor relay first, then to the assistants if any, else to every
    /// member. Caller must be the owner.
    pub(crate) fn publish_administrators(
        &self,
        group: &GroupId,
        administrators: Vec<NodeId>,
    ) -> Result<Vec<GroupAction>, TomGroupError> {
        let Some(mut bulletin) = self.delegate.bulletin(group)? else {
            return Err(TomGroupError::NotReady {
                group: group.to_string(),
            });
        };
        bulletin.administrators = administrators.clone();
        bulletin.time = now_ms().max(bulletin.time + 1);
        bulletin.sign(self.delegate.identity());
        if !self.delegate.save_bulletin(&bulletin)? {
            return Err(TomGroupError::InvalidEnvelope {
                reason: format!("re-signed bulletin for {group} was not accepted"),
            });
        }
        tracing::info!(
            "administrators of {group} now {} node(s)",
            administrators.len()
        );

        let mut actions = vec![
            GroupAction::Event(GroupEvent::BulletinUpdated {
                group: group.clone(),
            }),
            GroupAction::Event(GroupEvent::AdministratorsChanged {
                group: group.clone(),
                administrators,
            }),
        ];
        let Some(document) = self.builder.build_document_message(group)? else {
            return Ok(actions);
        };
        let local = self.delegate.local_id();
        let mut targets = Vec::new();
        if let Some(neighbor) = self.delegate.neighbor() {
            targets.push(neighbor);
        }
        let assistants = self.delegate.assistants(group)?;
        if assistants.is_empty() {
            targets.extend(self.delegate.members(group)?);
        } else {
            targets.extend(assistants);
        }
        targets.retain(|t| *t != local);
        actions.extend(
            dedup_members(&targets)
                .into_iter()
                .map(|to| forward_to(to, document.clone())),
        );
        Ok(actions)
    }

    /// Step down as administrator of `group`.
    pub fn resign(&self, group: &GroupId) -> Result<Vec<GroupAction>, TomGroupError> {
        let snapshot = self.ready_snapshot(group)?;
        let local = self.delegate.local_id();
        if snapshot.is_owner(&local) {
            return Err(TomGroupError::PermissionDenied {
                reason: format!("owner cannot resign from {group}"),
            });
        }
        if !snapshot.is_administrator(&local) {
            return Err(TomGroupError::PermissionDenied {
                reason: format!("not an administrator of {group}"),
            });
        }

        let command = GroupCommand::resign(group.clone(), now_ms());
        let message = self.builder.pack_command(&command)?;
        let (admins, removed) = remove_all(&snapshot.administrators, &[local]);
        let command = command.annotated(vec![], removed);
        if !self
            .helper
            .commit(group, &command, &message, RoleUpdate::administrators(&admins))?
        {
            return Err(TomGroupError::InvalidCommand {
                reason: format!("resign from {group} was not admitted"),
            });
        }
        tracing::info!("resigned as administrator of {group}");

        let targets = if snapshot.assistants.is_empty() {
            snapshot.members.clone()
        } else {
            snapshot.assistants.clone()
        };
        let mut actions = vec![GroupAction::Event(GroupEvent::AdministratorsChanged {
            group: group.clone(),
            administrators: admins,
        })];
        actions.extend(
            targets
                .into_iter()
                .filter(|t| *t != local)
                .map(|to| forward_to(to, message.clone())),
        );
        Ok(actions)
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

/// Send envelopes to `to` inside an encrypted `Forward`.
pub(crate) fn forward_to(to: NodeId, message: ReliableMessage) -> GroupAction {
    GroupAction::Send {
        to,
        content: Content::Forward {
            messages: vec![message],
        },
        priority: Priority::Normal,
    }
}
