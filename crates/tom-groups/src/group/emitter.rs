/// GroupEmitter: outgoing group content.
///
/// Picks one of three delivery strategies per message:
/// - a bot is declared: one group envelope to the fastest bot, which
///   splits it for the members without reading it;
/// - tiny group (fewer than `secret_group_limit` members): the plaintext
///   is split per member before encryption, so the group id never leaves
///   this node;
/// - otherwise: encrypted once under the group key, then split by key
///   substitution.
use std::sync::Arc;

use crate::content::Content;
use crate::error::TomGroupError;
use crate::group::bots::GroupBotsManager;
use crate::group::delegate::GroupDelegate;
use crate::group::packer::GroupPacker;
use crate::group::types::*;
use crate::message::{InstantMessage, ReliableMessage};
use crate::types::{now_ms, Address, NodeId, Priority};

/// How a group message reaches the members.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStrategy {
    /// One envelope, group exposed, handed to an assistant.
    ForwardViaAssistant { bot: NodeId },
    /// One sealed envelope per member, group hidden.
    SplitPlaintext,
    /// One body, one wrapped key per member, group exposed.
    SplitEncrypted,
}

impl DeliveryStrategy {
    pub fn select(member_count: usize, bot: Option<NodeId>, secret_group_limit: usize) -> Self {
        match bot {
            Some(bot) => DeliveryStrategy::ForwardViaAssistant { bot },
            None if member_count < secret_group_limit => DeliveryStrategy::SplitPlaintext,
            None => DeliveryStrategy::SplitEncrypted,
        }
    }
}

/// Result of [`GroupEmitter::send_message`].
#[derive(Debug)]
pub struct Emission {
    pub strategy: DeliveryStrategy,
    /// The message as composed, before splitting.
    pub message: InstantMessage,
    pub actions: Vec<GroupAction>,
}

pub struct GroupEmitter {
    delegate: Arc<GroupDelegate>,
    packer: Arc<GroupPacker>,
    bots: Arc<GroupBotsManager>,
    secret_group_limit: usize,
}

impl GroupEmitter {
    pub fn new(
        delegate: Arc<GroupDelegate>,
        packer: Arc<GroupPacker>,
        bots: Arc<GroupBotsManager>,
        secret_group_limit: usize,
    ) -> Self {
        Self {
            delegate,
            packer,
            bots,
            secret_group_limit,
        }
    }

    /// Strategy for the group as it stands now.
    pub fn select_strategy(&self, snapshot: &GroupSnapshot) -> DeliveryStrategy {
        let bot = self.bots.fastest_assistant(&snapshot.assistants, now_ms());
        DeliveryStrategy::select(snapshot.members.len(), bot, self.secret_group_limit)
    }

    /// Pack `content` for every member of `group`.
    ///
    /// Per-member packing failures are reported as `SendFailed` events;
    /// the other members still get the message.
    pub fn send_message(&self, group: &GroupId, content: Content) -> Result<Emission, TomGroupError> {
        let snapshot = match self.delegate.snapshot(group)? {
            Some(snapshot) if snapshot.is_ready() => snapshot,
            _ => {
                return Err(TomGroupError::NotReady {
                    group: group.to_string(),
                })
            }
        };
        let local = self.delegate.local_id();
        if !snapshot.is_member(&local) {
            return Err(TomGroupError::PermissionDenied {
                reason: format!("not a member of {group}"),
            });
        }

        let content = self.packer.prepare_content(group, content)?;
        let message = InstantMessage::new(local, Address::Group(group.clone()), content)
            .in_group(group.clone());
        let strategy = self.select_strategy(&snapshot);
        tracing::debug!("sending {} to {group} via {strategy:?}", message.id);

        let actions = match strategy {
            DeliveryStrategy::ForwardViaAssistant { bot } => {
                let envelope = self.packer.encrypt_and_sign(&message)?;
                self.bots.record_request(&envelope.id, bot, now_ms());
                vec![forward(bot, envelope)]
            }
            DeliveryStrategy::SplitPlaintext => {
                let mut actions = Vec::new();
                for copy in self.packer.split_instant_message(&message, &snapshot.members) {
                    let Some(to) = copy.receiver.node() else {
                        continue;
                    };
                    match self.packer.encrypt_and_sign(&copy) {
                        Ok(envelope) => actions.push(forward(to, envelope)),
                        Err(e) => {
                            tracing::warn!("packing {} for {to} failed: {e}", message.id);
                            actions.push(GroupAction::Event(GroupEvent::SendFailed {
                                to,
                                reason: e.to_string(),
                            }));
                        }
                    }
                }
                actions
            }
            DeliveryStrategy::SplitEncrypted => {
                let envelope = self.packer.encrypt_and_sign(&message)?;
                self.packer
                    .split_reliable_message(&envelope, &snapshot.members)
                    .into_iter()
                    .filter_map(|copy| copy.receiver.node().map(|to| forward(to, copy)))
                    .collect()
            }
        };

        Ok(Emission {
            strategy,
            message,
            actions,
        })
    }
}

fn forward(to: NodeId, message: ReliableMessage) -> GroupAction {
    GroupAction::Forward {
        to,
        message,
        priority: Priority::Normal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::FileContent;
    use crate::group::testing::{identity, node, sends, Fixture};

    fn emitter(fx: &Fixture, bots: Arc<GroupBotsManager>) -> GroupEmitter {
        GroupEmitter::new(
            fx.delegate.clone(),
            fx.packer.clone(),
            bots,
            SECRET_GROUP_LIMIT,
        )
    }

    fn envelopes(actions: &[GroupAction]) -> Vec<&ReliableMessage> {
        actions
            .iter()
            .filter_map(|a| match a {
                GroupAction::Forward { message, .. } => Some(message),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn strategy_selection_table() {
        let bot = Some(node(60));
        assert_eq!(
            DeliveryStrategy::select(3, bot, 16),
            DeliveryStrategy::ForwardViaAssistant { bot: node(60) }
        );
        assert_eq!(
            DeliveryStrategy::select(100, bot, 16),
            DeliveryStrategy::ForwardViaAssistant { bot: node(60) }
        );
        assert_eq!(DeliveryStrategy::select(15, None, 16), DeliveryStrategy::SplitPlaintext);
        assert_eq!(DeliveryStrategy::select(16, None, 16), DeliveryStrategy::SplitEncrypted);
    }

    #[test]
    fn tiny_group_hides_group_id() {
        let fx = Fixture::founded(&[2, 3], &[]);
        let emission = emitter(&fx, Arc::default())
            .send_message(&fx.group, Content::text("hello"))
            .unwrap();
        assert_eq!(emission.strategy, DeliveryStrategy::SplitPlaintext);
        assert_eq!(sends(&emission.actions), vec![node(2), node(3)]);
        for env in envelopes(&emission.actions) {
            assert!(env.group.is_none());
            assert!(env.keys.is_empty());
            assert_eq!(env.id, emission.message.id);
        }
        let first = envelopes(&emission.actions)[0];
        let opened = first.open(&identity(2)).unwrap();
        assert_eq!(opened.group, Some(fx.group.clone()));
        assert_eq!(opened.content, Content::text("hello"));
    }

    #[test]
    fn large_group_shares_one_body() {
        let others: Vec<u8> = (2..=17).collect();
        let fx = Fixture::founded(&others, &[]);
        let emission = emitter(&fx, Arc::default())
            .send_message(&fx.group, Content::text("all"))
            .unwrap();
        assert_eq!(emission.strategy, DeliveryStrategy::SplitEncrypted);
        let envs = envelopes(&emission.actions);
        assert_eq!(envs.len(), 16);
        assert!(envs.iter().all(|e| e.data == envs[0].data));
        assert!(envs.iter().all(|e| e.group == Some(fx.group.clone())));
        let opened = envs[5].open(&identity(7)).unwrap();
        assert_eq!(opened.content, Content::text("all"));
    }

    #[test]
    fn bot_gets_single_group_envelope() {
        let fx = Fixture::founded_with(&[2, 3], &[], &[60, 61], None);
        let bots = Arc::new(GroupBotsManager::default());
        let emission = emitter(&fx, bots.clone())
            .send_message(&fx.group, Content::text("via bot"))
            .unwrap();
        assert_eq!(
            emission.strategy,
            DeliveryStrategy::ForwardViaAssistant { bot: node(60) }
        );
        let envs = envelopes(&emission.actions);
        assert_eq!(sends(&emission.actions), vec![node(60)]);
        assert_eq!(envs[0].group, Some(fx.group.clone()));
        assert_eq!(envs[0].keys.len(), 2);
        // bot cannot read it
        assert!(envs[0].open(&identity(60)).is_err());
        // pending until the bot answers
        assert!(bots.record_response(&envs[0].id, node(60), now_ms()).is_some());
    }

    #[test]
    fn files_are_sealed_before_packing() {
        let fx = Fixture::founded(&[2], &[]);
        let emission = emitter(&fx, Arc::default())
            .send_message(&fx.group, Content::File(FileContent::new("a.txt", b"data".to_vec())))
            .unwrap();
        let Content::File(file) = &emission.message.content else {
            panic!("expected file");
        };
        assert!(file.is_encrypted());
        assert_eq!(file.plaintext().unwrap(), b"data".to_vec());
    }

    #[test]
    fn stranger_and_unknown_group_cannot_send() {
        let fx = Fixture::member_view(9, &[2], &[]);
        let err = emitter(&fx, Arc::default())
            .send_message(&fx.group, Content::text("x"))
            .unwrap_err();
        assert!(matches!(err, TomGroupError::PermissionDenied { .. }));

        let fx = Fixture::bare(1);
        let err = emitter(&fx, Arc::default())
            .send_message(&fx.group, Content::text("x"))
            .unwrap_err();
        assert!(matches!(err, TomGroupError::NotReady { .. }));
    }
}
