/// Group commands, the signed instructions membership is rebuilt from.
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::group::types::GroupId;
use crate::types::NodeId;

/// Command kind, used for dispatch and history bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    Invite,
    /// Legacy; expulsion goes through `Reset`.
    Expel,
    Join,
    Quit,
    Reset,
    Resign,
    Query,
}

impl CommandKind {
    /// Commands whose history is anchored on the bulletin instead of the
    /// reset checkpoint.
    pub fn is_admin_history(&self) -> bool {
        matches!(self, CommandKind::Resign)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Invite => "invite",
            CommandKind::Expel => "expel",
            CommandKind::Join => "join",
            CommandKind::Quit => "quit",
            CommandKind::Reset => "reset",
            CommandKind::Resign => "resign",
            CommandKind::Query => "query",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type-specific payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandBody {
    Invite { members: Vec<NodeId> },
    Expel { members: Vec<NodeId> },
    Join,
    Quit,
    /// Full member list, owner first.
    Reset { members: Vec<NodeId> },
    Resign,
    Query { last_time: Option<u64> },
}

/// A group command as carried in a `Content::Command`.
///
/// `added` / `removed` are local annotations written by the receiver after
/// computing the delta; they are not covered by the sender's signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCommand {
    pub id: String,
    pub group: GroupId,
    pub time: u64,
    pub body: CommandBody,
    #[serde(default)]
    pub added: Vec<NodeId>,
    #[serde(default)]
    pub removed: Vec<NodeId>,
}

impl GroupCommand {
    fn new(group: GroupId, time: u64, body: CommandBody) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            group,
            time,
            body,
            added: Vec::new(),
            removed: Vec::new(),
        }
    }

    pub fn invite(group: GroupId, time: u64, members: Vec<NodeId>) -> Self {
        Self::new(group, time, CommandBody::Invite { members })
    }

    pub fn expel(group: GroupId, time: u64, members: Vec<NodeId>) -> Self {
        Self::new(group, time, CommandBody::Expel { members })
    }

    pub fn join(group: GroupId, time: u64) -> Self {
        Self::new(group, time, CommandBody::Join)
    }

    pub fn quit(group: GroupId, time: u64) -> Self {
        Self::new(group, time, CommandBody::Quit)
    }

    pub fn reset(group: GroupId, time: u64, members: Vec<NodeId>) -> Self {
        Self::new(group, time, CommandBody::Reset { members })
    }

    pub fn resign(group: GroupId, time: u64) -> Self {
        Self::new(group, time, CommandBody::Resign)
    }

    pub fn query(group: GroupId, time: u64, last_time: Option<u64>) -> Self {
        Self::new(group, time, CommandBody::Query { last_time })
    }

    pub fn kind(&self) -> CommandKind {
        match self.body {
            CommandBody::Invite { .. } => CommandKind::Invite,
            CommandBody::Expel { .. } => CommandKind::Expel,
            CommandBody::Join => CommandKind::Join,
            CommandBody::Quit => CommandKind::Quit,
            CommandBody::Reset { .. } => CommandKind::Reset,
            CommandBody::Resign => CommandKind::Resign,
            CommandBody::Query { .. } => CommandKind::Query,
        }
    }

    /// The member list carried by invite/expel/reset; empty otherwise.
    pub fn members(&self) -> &[NodeId] {
        match &self.body {
            CommandBody::Invite { members }
            | CommandBody::Expel { members }
            | CommandBody::Reset { members } => members,
            _ => &[],
        }
    }

    /// Copy with delta annotations attached.
    pub fn annotated(&self, added: Vec<NodeId>, removed: Vec<NodeId>) -> Self {
        Self {
            added,
            removed,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(seed: u8) -> NodeId {
        NodeId::from_bytes([seed; 32])
    }

    fn gid() -> GroupId {
        GroupId::from("grp-test".to_string())
    }

    #[test]
    fn kind_matches_body() {
        assert_eq!(GroupCommand::invite(gid(), 1, vec![]).kind(), CommandKind::Invite);
        assert_eq!(GroupCommand::expel(gid(), 1, vec![]).kind(), CommandKind::Expel);
        assert_eq!(GroupCommand::join(gid(), 1).kind(), CommandKind::Join);
        assert_eq!(GroupCommand::quit(gid(), 1).kind(), CommandKind::Quit);
        assert_eq!(GroupCommand::reset(gid(), 1, vec![]).kind(), CommandKind::Reset);
        assert_eq!(GroupCommand::resign(gid(), 1).kind(), CommandKind::Resign);
        assert_eq!(GroupCommand::query(gid(), 1, None).kind(), CommandKind::Query);
    }

    #[test]
    fn members_only_for_list_commands() {
        let reset = GroupCommand::reset(gid(), 1, vec![node(1), node(2)]);
        assert_eq!(reset.members(), &[node(1), node(2)]);
        assert!(GroupCommand::quit(gid(), 1).members().is_empty());
    }

    #[test]
    fn annotation_keeps_identity() {
        let cmd = GroupCommand::invite(gid(), 5, vec![node(3)]);
        let annotated = cmd.annotated(vec![node(3)], vec![]);
        assert_eq!(annotated.id, cmd.id);
        assert_eq!(annotated.time, 5);
        assert_eq!(annotated.added, vec![node(3)]);
    }

    #[test]
    fn only_resign_is_admin_history() {
        assert!(CommandKind::Resign.is_admin_history());
        assert!(!CommandKind::Quit.is_admin_history());
        assert_eq!(CommandKind::Reset.to_string(), "reset");
    }

    #[test]
    fn msgpack_keeps_annotations() {
        let cmd = GroupCommand::reset(gid(), 9, vec![node(1)]).annotated(vec![node(1)], vec![]);
        let bytes = rmp_serde::to_vec(&cmd).unwrap();
        let decoded: GroupCommand = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(decoded, cmd);
    }
}
