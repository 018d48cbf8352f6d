//! Command processors: the protocol's state-transition table.
//!
//! Every processor follows the same steps:
//! 1. drop the command if it is expired (no reply);
//! 2. load a snapshot; if the group is not ready, query the network and
//!    answer "Group empty";
//! 3. check the sender's role; denials are answered with a receipt;
//! 4. persist the change (history first, then lists);
//! 5. emit events and follow-ups.
//!
//! Storage failures propagate as errors and stop processing.
mod expel;
mod invite;
mod join;
mod query;
mod quit;
mod reset;
mod resign;

pub use expel::ExpelCommandProcessor;
pub use invite::InviteCommandProcessor;
pub use join::JoinCommandProcessor;
pub use query::QueryCommandProcessor;
pub use quit::QuitCommandProcessor;
pub use reset::ResetCommandProcessor;
pub use resign::ResignCommandProcessor;

use std::collections::HashMap;
use std::sync::Arc;

use crate::content::{Content, ReceiptContent};
use crate::error::TomGroupError;
use crate::group::admin::AdminManager;
use crate::group::builder::GroupHistoryBuilder;
use crate::group::command::{CommandKind, GroupCommand};
use crate::group::delegate::GroupDelegate;
use crate::group::helper::GroupCommandHelper;
use crate::group::packer::GroupPacker;
use crate::group::types::*;
use crate::message::ReliableMessage;
use crate::types::{NodeId, Priority};

// ── Receipt templates ────────────────────────────────────────────────────

pub const GROUP_EMPTY: &str = "Group empty: ${ID}";
pub const MEMBERS_EMPTY: &str = "Group members empty: ${ID}";
pub const INVITE_NOT_ALLOWED: &str = "Not allowed to invite member into group: ${ID}";
pub const EXPEL_NOT_ALLOWED: &str = "Not allowed to expel member from group: ${ID}";
pub const EXPEL_ADMIN_NOT_ALLOWED: &str =
    "Not allowed to expel owner or administrator of group: ${ID}";
pub const OWNER_CANNOT_QUIT: &str = "Owner cannot quit from group: ${ID}";
pub const ADMIN_CANNOT_QUIT: &str = "Administrator cannot quit from group: ${ID}";
pub const RESET_NOT_ALLOWED: &str = "Not allowed to reset members of group: ${ID}";
pub const OWNER_NOT_FIRST: &str = "Owner must be the first member of group: ${ID}";
pub const RESET_EXPELS_ADMIN: &str = "Not allowed to expel administrator of group: ${ID}";
pub const OWNER_CANNOT_RESIGN: &str = "Owner cannot resign from group: ${ID}";
pub const QUERY_NOT_ALLOWED: &str = "Not allowed to query members of group: ${ID}";
pub const HISTORY_NOT_UPDATED: &str = "Group history not updated: ${ID}, last time: ${LAST_TIME}";

// ── Gate ─────────────────────────────────────────────────────────────────

/// Outcome of a pre-check: carry on with a value, or stop and return
/// these actions.
pub(crate) enum Gate<T> {
    Pass(T),
    Stop(Vec<GroupAction>),
}

/// Unwrap a `Result<Gate<T>, _>`, returning early on `Stop`.
macro_rules! pass {
    ($gate:expr) => {
        match $gate? {
            $crate::group::processor::Gate::Pass(value) => value,
            $crate::group::processor::Gate::Stop(actions) => return Ok(actions),
        }
    };
}
pub(crate) use pass;

// ── Context ──────────────────────────────────────────────────────────────

/// Collaborators shared by every processor.
#[derive(Clone)]
pub struct ProcessorContext {
    pub delegate: Arc<GroupDelegate>,
    pub helper: Arc<GroupCommandHelper>,
    pub builder: Arc<GroupHistoryBuilder>,
    pub packer: Arc<GroupPacker>,
    pub admin: Arc<AdminManager>,
}

impl ProcessorContext {
    /// Wire the collaborators around one delegate.
    pub fn new(delegate: Arc<GroupDelegate>) -> Self {
        let helper = Arc::new(GroupCommandHelper::new(delegate.clone()));
        let packer = Arc::new(GroupPacker::new(delegate.clone()));
        let builder = Arc::new(GroupHistoryBuilder::new(
            delegate.clone(),
            helper.clone(),
            packer.clone(),
        ));
        let admin = Arc::new(AdminManager::new(
            delegate.clone(),
            helper.clone(),
            builder.clone(),
        ));
        Self {
            delegate,
            helper,
            builder,
            packer,
            admin,
        }
    }

    pub fn local_id(&self) -> NodeId {
        self.delegate.local_id()
    }

    /// Stop silently if the command predates its checkpoint.
    pub(crate) fn check_expired(&self, command: &GroupCommand) -> Result<Gate<()>, TomGroupError> {
        if self.helper.is_command_expired(command)? {
            tracing::debug!(
                "dropping expired {} for {} (time {})",
                command.kind(),
                command.group,
                command.time
            );
            return Ok(Gate::Stop(vec![]));
        }
        Ok(Gate::Pass(()))
    }

    /// Snapshot of a ready group (owner and members known).
    pub(crate) fn ready_snapshot(
        &self,
        command: &GroupCommand,
        message: &ReliableMessage,
    ) -> Result<Gate<GroupSnapshot>, TomGroupError> {
        match self.delegate.snapshot(&command.group)? {
            Some(snapshot) if snapshot.is_ready() => Ok(Gate::Pass(snapshot)),
            _ => Ok(Gate::Stop(self.not_ready(command, message)?)),
        }
    }

    /// Query the network and tell the sender the group is unknown here.
    pub(crate) fn not_ready(
        &self,
        command: &GroupCommand,
        message: &ReliableMessage,
    ) -> Result<Vec<GroupAction>, TomGroupError> {
        tracing::debug!("group {} not ready for {}", command.group, command.kind());
        let mut actions = self.delegate.query_group(&command.group)?;
        actions.push(self.receipt(command, message, "Group empty.", GROUP_EMPTY));
        Ok(actions)
    }

    /// Receipt for the command's sender, with `${ID}` set to the group.
    pub(crate) fn receipt(
        &self,
        command: &GroupCommand,
        message: &ReliableMessage,
        text: &str,
        template: &str,
    ) -> GroupAction {
        GroupAction::receipt(
            message.sender,
            ReceiptContent::new(text)
                .with_template(template)
                .replace("ID", command.group.to_string())
                .for_group(&command.group)
                .answering(message.id.clone()),
        )
    }

    /// Send the full group history (document, reset, live commands) to `to`.
    pub(crate) fn send_histories(
        &self,
        group: &GroupId,
        to: NodeId,
    ) -> Result<Vec<GroupAction>, TomGroupError> {
        let messages = self.builder.build_group_histories(group)?;
        if messages.is_empty() {
            return Ok(vec![]);
        }
        Ok(vec![GroupAction::Send {
            to,
            content: Content::Forward { messages },
            priority: Priority::Normal,
        }])
    }
}

// ── Processor trait + dispatcher ─────────────────────────────────────────

/// Handler for one command kind.
pub trait CommandProcessor: Send + Sync {
    /// Process a verified command. `message` is the envelope it came in;
    /// its sender is the command's author.
    fn process(
        &self,
        ctx: &ProcessorContext,
        command: &GroupCommand,
        message: &ReliableMessage,
    ) -> Result<Vec<GroupAction>, TomGroupError>;
}

/// Routes each command to the processor registered for its kind.
pub struct CommandDispatcher {
    ctx: ProcessorContext,
    processors: HashMap<CommandKind, Box<dyn CommandProcessor>>,
}

impl CommandDispatcher {
    /// Dispatcher with the standard processor for every kind.
    pub fn new(ctx: ProcessorContext) -> Self {
        let mut dispatcher = Self {
            ctx,
            processors: HashMap::new(),
        };
        dispatcher.register(CommandKind::Invite, Box::new(InviteCommandProcessor));
        dispatcher.register(CommandKind::Expel, Box::new(ExpelCommandProcessor));
        dispatcher.register(CommandKind::Join, Box::new(JoinCommandProcessor));
        dispatcher.register(CommandKind::Quit, Box::new(QuitCommandProcessor));
        dispatcher.register(CommandKind::Reset, Box::new(ResetCommandProcessor));
        dispatcher.register(CommandKind::Resign, Box::new(ResignCommandProcessor));
        dispatcher.register(CommandKind::Query, Box::new(QueryCommandProcessor));
        dispatcher
    }

    /// Replace the processor for `kind`.
    pub fn register(&mut self, kind: CommandKind, processor: Box<dyn CommandProcessor>) {
        self.processors.insert(kind, processor);
    }

    pub fn context(&self) -> &ProcessorContext {
        &self.ctx
    }

    pub fn process(
        &self,
        command: &GroupCommand,
        message: &ReliableMessage,
    ) -> Result<Vec<GroupAction>, TomGroupError> {
        let Some(processor) = self.processors.get(&command.kind()) else {
            return Err(TomGroupError::InvalidCommand {
                reason: format!("no processor for {}", command.kind()),
            });
        };
        processor.process(&self.ctx, command, message)
    }
}

/// The receipt template carried by the first receipt in `actions`.
#[cfg(test)]
pub(crate) fn receipt_template(actions: &[GroupAction]) -> Option<String> {
    actions.iter().find_map(|a| match a {
        GroupAction::Send {
            content: Content::Receipt(r),
            ..
        } => r.template.clone(),
        _ => None,
    })
}
