/// GroupService: one explicitly constructed object per node that owns
/// the whole group graph (delegate, helper, builder, packer, processors,
/// managers, emitter, bots).
///
/// Incoming envelopes are verified, opened and dispatched here; outgoing
/// actions are turned into wire bytes by [`GroupService::pack_action`].
/// Everything stays synchronous; the runtime drives it from one task.
use std::sync::Arc;

use crate::config::GroupConfig;
use crate::content::{Content, ReceiptContent};
use crate::crypto::LocalIdentity;
use crate::error::TomGroupError;
use crate::group::{
    AdminManager, CommandDispatcher, CommandKind, CommandProcessor, Emission, GroupAction,
    GroupAssistant, GroupBotsManager, GroupDelegate, GroupEmitter, GroupEvent, GroupId,
    GroupManager, GroupSnapshot, ProcessorContext,
};
use crate::message::{InstantMessage, ReliableMessage};
use crate::store::GroupStore;
use crate::types::{now_ms, Address, NodeId, Priority};

pub struct GroupService {
    config: GroupConfig,
    delegate: Arc<GroupDelegate>,
    dispatcher: CommandDispatcher,
    manager: GroupManager,
    emitter: GroupEmitter,
    assistant: GroupAssistant,
    bots: Arc<GroupBotsManager>,
}

impl GroupService {
    pub fn new(identity: LocalIdentity, store: Arc<dyn GroupStore>, config: GroupConfig) -> Self {
        let delegate = Arc::new(GroupDelegate::new(store, identity, &config));
        let ctx = ProcessorContext::new(delegate.clone());
        let bots = Arc::new(GroupBotsManager::new(config.common_assistants.clone()));
        let manager = GroupManager::new(&ctx, bots.clone(), config.polylogue_limit);
        let emitter = GroupEmitter::new(
            delegate.clone(),
            ctx.packer.clone(),
            bots.clone(),
            config.secret_group_limit,
        );
        let assistant = GroupAssistant::new(delegate.clone(), ctx.packer.clone());
        Self {
            config,
            delegate,
            dispatcher: CommandDispatcher::new(ctx),
            manager,
            emitter,
            assistant,
            bots,
        }
    }

    pub fn local_id(&self) -> NodeId {
        self.delegate.local_id()
    }

    pub fn config(&self) -> &GroupConfig {
        &self.config
    }

    pub fn delegate(&self) -> &GroupDelegate {
        &self.delegate
    }

    pub fn manager(&self) -> &GroupManager {
        &self.manager
    }

    pub fn admin(&self) -> &AdminManager {
        &self.dispatcher.context().admin
    }

    pub fn emitter(&self) -> &GroupEmitter {
        &self.emitter
    }

    pub fn bots(&self) -> &GroupBotsManager {
        &self.bots
    }

    /// Replace the processor for one command kind.
    pub fn register_processor(&mut self, kind: CommandKind, processor: Box<dyn CommandProcessor>) {
        self.dispatcher.register(kind, processor);
    }

    // ── Local operations ─────────────────────────────────────────────────

    pub fn create_group(
        &self,
        members: &[NodeId],
    ) -> Result<(GroupId, Vec<GroupAction>), TomGroupError> {
        self.manager.create_group(members)
    }

    pub fn reset_members(
        &self,
        group: &GroupId,
        members: Vec<NodeId>,
    ) -> Result<Vec<GroupAction>, TomGroupError> {
        self.manager.reset_members(group, members)
    }

    pub fn invite_members(
        &self,
        group: &GroupId,
        invitees: &[NodeId],
    ) -> Result<Vec<GroupAction>, TomGroupError> {
        self.manager.invite_members(group, invitees)
    }

    pub fn expel_members(
        &self,
        group: &GroupId,
        targets: &[NodeId],
    ) -> Result<Vec<GroupAction>, TomGroupError> {
        self.manager.expel_members(group, targets)
    }

    pub fn quit_group(&self, group: &GroupId) -> Result<Vec<GroupAction>, TomGroupError> {
        self.manager.quit_group(group)
    }

    pub fn review_applications(&self, group: &GroupId) -> Result<Vec<GroupAction>, TomGroupError> {
        self.manager.review_applications(group)
    }

    pub fn query_group(&self, group: &GroupId) -> Result<Vec<GroupAction>, TomGroupError> {
        self.manager.query_group(group)
    }

    pub fn update_administrators(
        &self,
        group: &GroupId,
        administrators: &[NodeId],
    ) -> Result<Vec<GroupAction>, TomGroupError> {
        self.admin().update_administrators(group, administrators)
    }

    pub fn resign(&self, group: &GroupId) -> Result<Vec<GroupAction>, TomGroupError> {
        self.admin().resign(group)
    }

    pub fn send_message(&self, group: &GroupId, content: Content) -> Result<Emission, TomGroupError> {
        self.emitter.send_message(group, content)
    }

    pub fn groups(&self) -> Result<Vec<GroupId>, TomGroupError> {
        self.delegate.groups()
    }

    pub fn snapshot(&self, group: &GroupId) -> Result<Option<GroupSnapshot>, TomGroupError> {
        self.delegate.snapshot(group)
    }

    /// Charge bots that never answered. Returns the bots charged.
    pub fn maintenance(&self, now: u64) -> Vec<NodeId> {
        let timeout = self.config.bot_response_timeout.as_millis() as u64;
        self.bots.expire_pending(now, timeout)
    }

    // ── Incoming ─────────────────────────────────────────────────────────

    /// Decode and handle raw wire bytes.
    pub fn handle_bytes(&self, data: &[u8]) -> Result<Vec<GroupAction>, TomGroupError> {
        let envelope = ReliableMessage::from_bytes(data)?;
        self.handle_envelope(&envelope)
    }

    /// Handle one signed envelope.
    ///
    /// Group envelopes we hold no key for are split if we assist the
    /// group, dropped otherwise.
    pub fn handle_envelope(
        &self,
        envelope: &ReliableMessage,
    ) -> Result<Vec<GroupAction>, TomGroupError> {
        envelope.verify_signature()?;
        let local = self.local_id();

        if let Address::Group(group) = &envelope.receiver {
            if envelope.key.is_none() && !envelope.keys.contains_key(&local) {
                if self.assistant.serves(group)? {
                    return self.assistant.split_group_message(group, envelope);
                }
                tracing::debug!("no key for {} in {group}, dropping", envelope.id);
                return Ok(vec![]);
            }
        }

        let message = envelope.open(self.delegate.identity())?;
        match message.content {
            Content::Command(command) => {
                if message.group.as_ref().is_some_and(|g| *g != command.group) {
                    return Err(TomGroupError::InvalidEnvelope {
                        reason: format!("command for {} sealed in another group", command.group),
                    });
                }
                self.dispatcher.process(&command, envelope)
            }
            Content::Document { meta, bulletin } => self.handle_document(meta, bulletin),
            Content::Forward { messages } => self.handle_forward(message.sender, messages),
            Content::Receipt(receipt) => Ok(self.handle_receipt(message.sender, receipt)),
            content @ (Content::Text { .. } | Content::File(_)) => {
                Ok(vec![GroupAction::Event(GroupEvent::MessageReceived {
                    group: message.group,
                    sender: message.sender,
                    content,
                })])
            }
        }
    }

    fn handle_document(
        &self,
        meta: crate::group::GroupMeta,
        bulletin: crate::group::Bulletin,
    ) -> Result<Vec<GroupAction>, TomGroupError> {
        let group = bulletin.group.clone();
        if !meta.matches(&group) {
            tracing::warn!("document meta does not match {group}");
            return Ok(vec![]);
        }
        if self.delegate.meta(&group)?.is_none() && !self.delegate.save_meta(&meta)? {
            return Ok(vec![]);
        }
        if !self.delegate.save_bulletin(&bulletin)? {
            tracing::debug!("bulletin for {group} not newer, ignored");
            return Ok(vec![]);
        }
        tracing::info!("bulletin of {group} updated (time {})", bulletin.time);
        Ok(vec![
            GroupAction::Event(GroupEvent::BulletinUpdated {
                group: group.clone(),
            }),
            GroupAction::Event(GroupEvent::AdministratorsChanged {
                group,
                administrators: bulletin.administrators,
            }),
        ])
    }

    /// Handle every forwarded envelope in order. A bad inner envelope is
    /// skipped; storage failures abort the batch.
    fn handle_forward(
        &self,
        from: NodeId,
        messages: Vec<ReliableMessage>,
    ) -> Result<Vec<GroupAction>, TomGroupError> {
        let mut actions = Vec::new();
        for inner in &messages {
            match self.handle_envelope(inner) {
                Ok(inner_actions) => actions.extend(inner_actions),
                Err(e @ TomGroupError::Store(_)) => return Err(e),
                Err(e) => tracing::warn!("skipping forwarded {} from {from}: {e}", inner.id),
            }
        }

        let group = messages.iter().find_map(|m| m.group.clone());
        if let Some(group) = group {
            if self.assistant.serves(&group)? {
                actions.extend(self.assistant.redistribute(&group, from, messages)?);
            }
        }
        Ok(actions)
    }

    fn handle_receipt(&self, from: NodeId, receipt: ReceiptContent) -> Vec<GroupAction> {
        if let Some(original) = &receipt.original {
            self.bots.record_response(original, from, now_ms());
        }
        tracing::debug!("receipt from {from}: {}", receipt.render());
        vec![GroupAction::Event(GroupEvent::ReceiptReceived { from, receipt })]
    }

    // ── Outgoing ─────────────────────────────────────────────────────────

    /// Wire form of an action: (target, bytes, priority). Events have none.
    pub fn pack_action(
        &self,
        action: &GroupAction,
    ) -> Result<Option<(NodeId, Vec<u8>, Priority)>, TomGroupError> {
        match action {
            GroupAction::Send {
                to,
                content,
                priority,
            } => {
                let mut message =
                    InstantMessage::new(self.local_id(), Address::Node(*to), content.clone());
                if let Some(group) = content_group(content) {
                    message = message.in_group(group);
                }
                let envelope = self.dispatcher.context().packer.encrypt_and_sign(&message)?;
                Ok(Some((*to, envelope.to_bytes()?, *priority)))
            }
            GroupAction::Forward {
                to,
                message,
                priority,
            } => Ok(Some((*to, message.to_bytes()?, *priority))),
            GroupAction::Event(_) => Ok(None),
        }
    }
}

fn content_group(content: &Content) -> Option<GroupId> {
    match content {
        Content::Command(command) => Some(command.group.clone()),
        Content::Receipt(receipt) => receipt.group.clone(),
        Content::Forward { messages } => messages.iter().find_map(|m| m.group.clone()),
        _ => None,
    }
}
