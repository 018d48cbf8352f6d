//! Shared fixtures for group unit tests.
use std::sync::Arc;

use crate::config::GroupConfig;
use crate::content::Content;
use crate::crypto::LocalIdentity;
use crate::group::admin::AdminManager;
use crate::group::builder::GroupHistoryBuilder;
use crate::group::command::GroupCommand;
use crate::group::delegate::GroupDelegate;
use crate::group::helper::GroupCommandHelper;
use crate::group::packer::{seal_broadcast, GroupPacker};
use crate::group::processor::{CommandDispatcher, ProcessorContext};
use crate::group::types::*;
use crate::message::{InstantMessage, ReliableMessage};
use crate::store::MemoryGroupStore;
use crate::types::{now_ms, Address, NodeId};

pub(crate) const FIXTURE_SEED: &str = "fixture";

pub(crate) fn identity(seed: u8) -> LocalIdentity {
    LocalIdentity::from_seed([seed; 32])
}

pub(crate) fn node(seed: u8) -> NodeId {
    identity(seed).id()
}

/// Targets of every `Send` and `Forward`, in order.
pub(crate) fn sends(actions: &[GroupAction]) -> Vec<NodeId> {
    actions
        .iter()
        .filter_map(|a| match a {
            GroupAction::Send { to, .. } | GroupAction::Forward { to, .. } => Some(*to),
            GroupAction::Event(_) => None,
        })
        .collect()
}

/// Envelope of `command` signed by node `seed`.
pub(crate) fn signed_by(seed: u8, command: &GroupCommand) -> ReliableMessage {
    let msg = InstantMessage::new(
        node(seed),
        Address::Anyone,
        Content::Command(command.clone()),
    )
    .in_group(command.group.clone());
    seal_broadcast(&identity(seed), &msg).unwrap()
}

/// One node's view of a group founded by node 1.
pub(crate) struct Fixture {
    pub group: GroupId,
    /// Time of the cached reset.
    pub t0: u64,
    pub delegate: Arc<GroupDelegate>,
    pub helper: Arc<GroupCommandHelper>,
    pub builder: Arc<GroupHistoryBuilder>,
    pub packer: Arc<GroupPacker>,
    pub admin: Arc<AdminManager>,
    pub dispatcher: CommandDispatcher,
}

impl Fixture {
    /// Node `local_seed` with an empty store.
    pub fn bare(local_seed: u8) -> Self {
        Self::with_config(local_seed, GroupConfig::default())
    }

    /// Node 1 founded a group of `[1, others..]`.
    pub fn founded(others: &[u8], admins: &[u8]) -> Self {
        Self::founded_with(others, admins, &[], None)
    }

    pub fn founded_with(
        others: &[u8],
        admins: &[u8],
        assistants: &[u8],
        neighbor: Option<NodeId>,
    ) -> Self {
        let config = GroupConfig {
            neighbor,
            ..GroupConfig::default()
        };
        let fx = Self::with_config(1, config);
        fx.populate(others, admins, assistants);
        fx
    }

    /// Node `local_seed` holding the same group as [`Fixture::founded`].
    pub fn member_view(local_seed: u8, others: &[u8], admins: &[u8]) -> Self {
        let fx = Self::bare(local_seed);
        fx.populate(others, admins, &[]);
        fx
    }

    fn with_config(local_seed: u8, config: GroupConfig) -> Self {
        let store = Arc::new(MemoryGroupStore::new());
        let delegate = Arc::new(GroupDelegate::new(store, identity(local_seed), &config));
        let ctx = ProcessorContext::new(delegate.clone());
        let group = GroupMeta::generate(&identity(1), FIXTURE_SEED).group_id();
        Self {
            group,
            t0: now_ms() - 60_000,
            delegate,
            helper: ctx.helper.clone(),
            builder: ctx.builder.clone(),
            packer: ctx.packer.clone(),
            admin: ctx.admin.clone(),
            dispatcher: CommandDispatcher::new(ctx),
        }
    }

    fn populate(&self, others: &[u8], admins: &[u8], assistants: &[u8]) {
        let founder = identity(1);
        let meta = GroupMeta::generate(&founder, FIXTURE_SEED);
        assert!(self.delegate.save_meta(&meta).unwrap());

        let mut bulletin = Bulletin {
            group: self.group.clone(),
            name: "Fixture".into(),
            founder: founder.id(),
            owner: founder.id(),
            administrators: admins.iter().map(|s| node(*s)).collect(),
            assistants: assistants.iter().map(|s| node(*s)).collect(),
            time: self.t0 - 1000,
            signature: vec![],
        };
        bulletin.sign(&founder);
        assert!(self.delegate.save_bulletin(&bulletin).unwrap());

        let mut members = vec![founder.id()];
        members.extend(others.iter().map(|s| node(*s)));
        self.delegate.save_members(&self.group, &members).unwrap();

        let reset = GroupCommand::reset(self.group.clone(), self.t0, members);
        let msg = signed_by(1, &reset);
        assert!(self
            .helper
            .save_group_history(&self.group, &reset, &msg)
            .unwrap());
    }

    /// Envelope of `command` signed by node `seed`.
    pub fn signed(&self, seed: u8, command: &GroupCommand) -> ReliableMessage {
        signed_by(seed, command)
    }
}
