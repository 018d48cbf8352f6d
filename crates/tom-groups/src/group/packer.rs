/// GroupPacker: turns instant messages into signed envelopes.
///
/// Three shapes:
/// - broadcast (`Anyone`): signed, not encrypted; used for commands and
///   documents that must stay forwardable to future peers;
/// - node (`Node`): body sealed under a fresh key wrapped for the receiver;
/// - group (`Group`): body sealed once under the group key, which is
///   wrapped for every member. The group id is exposed on the envelope.
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use crate::content::{Content, FileContent};
use crate::crypto::{self, LocalIdentity, SymmetricKey};
use crate::error::TomGroupError;
use crate::group::delegate::GroupDelegate;
use crate::group::types::GroupId;
use crate::message::{InstantMessage, ReliableMessage, SealedBody};
use crate::types::{Address, NodeId};

pub struct GroupPacker {
    delegate: Arc<GroupDelegate>,
    /// Symmetric key reused for every group-addressed body of a group.
    group_keys: Mutex<HashMap<GroupId, SymmetricKey>>,
}

impl GroupPacker {
    pub fn new(delegate: Arc<GroupDelegate>) -> Self {
        Self {
            delegate,
            group_keys: Mutex::new(HashMap::new()),
        }
    }

    /// Sign without encrypting.
    pub fn sign_broadcast(&self, msg: &InstantMessage) -> Result<ReliableMessage, TomGroupError> {
        seal_broadcast(self.delegate.identity(), msg)
    }

    /// Encrypt for `msg.receiver` and sign.
    ///
    /// Group receivers get one body and a key per current member (the
    /// sender excluded); an `Anyone` receiver falls back to
    /// [`sign_broadcast`](Self::sign_broadcast).
    pub fn encrypt_and_sign(&self, msg: &InstantMessage) -> Result<ReliableMessage, TomGroupError> {
        let identity = self.delegate.identity();
        match &msg.receiver {
            Address::Anyone => self.sign_broadcast(msg),
            Address::Node(receiver) => {
                let key = crypto::generate_symmetric_key();
                let mut envelope = seal_with_key(identity, msg, &key, None)?;
                envelope.key = Some(crypto::wrap_key(&key, receiver)?);
                envelope.sign(identity);
                Ok(envelope)
            }
            Address::Group(group) => {
                let key = self.group_key(group);
                let local = identity.id();
                let mut keys = BTreeMap::new();
                for member in self.delegate.members(group)? {
                    if member != local {
                        keys.insert(member, crypto::wrap_key(&key, &member)?);
                    }
                }
                if keys.is_empty() {
                    return Err(TomGroupError::NotReady {
                        group: group.to_string(),
                    });
                }
                let mut envelope = seal_with_key(identity, msg, &key, Some(group.clone()))?;
                envelope.keys = keys;
                envelope.sign(identity);
                Ok(envelope)
            }
        }
    }

    /// One plaintext copy per member, before any encryption. The sender
    /// is skipped. Copies keep the message id.
    pub fn split_instant_message(
        &self,
        msg: &InstantMessage,
        members: &[NodeId],
    ) -> Vec<InstantMessage> {
        members
            .iter()
            .filter(|m| **m != msg.sender)
            .map(|m| InstantMessage {
                receiver: Address::Node(*m),
                group: msg.group.clone().or_else(|| group_of(&msg.receiver)),
                ..msg.clone()
            })
            .collect()
    }

    /// One envelope per member of an already encrypted group envelope,
    /// by moving each member's wrapped key into `key`. The body is not
    /// re-encrypted and the signature stays valid. Members without a
    /// wrapped key are skipped.
    pub fn split_reliable_message(
        &self,
        msg: &ReliableMessage,
        members: &[NodeId],
    ) -> Vec<ReliableMessage> {
        members
            .iter()
            .filter(|m| **m != msg.sender)
            .filter_map(|m| {
                let copy = msg.for_member(m);
                if copy.is_none() {
                    tracing::debug!("no wrapped key for {m} in {}", msg.id);
                }
                copy
            })
            .collect()
    }

    /// Seal an inline file under the group key. Already sealed files are
    /// returned unchanged.
    pub fn encrypt_file_content(
        &self,
        group: &GroupId,
        file: &FileContent,
    ) -> Result<FileContent, TomGroupError> {
        file.encrypt(&self.group_key(group))
    }

    /// Prepare content for a group: inline files get sealed.
    pub fn prepare_content(&self, group: &GroupId, content: Content) -> Result<Content, TomGroupError> {
        match content {
            Content::File(file) if !file.data.is_empty() => {
                Ok(Content::File(self.encrypt_file_content(group, &file)?))
            }
            other => Ok(other),
        }
    }

    /// Drop the cached group key, so removed members cannot read what
    /// comes next.
    pub fn rotate_group_key(&self, group: &GroupId) {
        self.keys().remove(group);
    }

    fn group_key(&self, group: &GroupId) -> SymmetricKey {
        *self
            .keys()
            .entry(group.clone())
            .or_insert_with(crypto::generate_symmetric_key)
    }

    fn keys(&self) -> std::sync::MutexGuard<'_, HashMap<GroupId, SymmetricKey>> {
        self.group_keys
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Signed, unencrypted envelope for `msg`.
pub fn seal_broadcast(
    identity: &LocalIdentity,
    msg: &InstantMessage,
) -> Result<ReliableMessage, TomGroupError> {
    let body = SealedBody {
        group: msg.group.clone(),
        content: msg.content.clone(),
    };
    let mut envelope = ReliableMessage {
        id: msg.id.clone(),
        sender: identity.id(),
        receiver: msg.receiver.clone(),
        group: msg.group.clone(),
        time: msg.time,
        data: rmp_serde::to_vec(&body)?,
        nonce: [0u8; 24],
        encrypted: false,
        key: None,
        keys: BTreeMap::new(),
        signature: Vec::new(),
    };
    envelope.sign(identity);
    Ok(envelope)
}

fn seal_with_key(
    identity: &LocalIdentity,
    msg: &InstantMessage,
    key: &SymmetricKey,
    exposed: Option<GroupId>,
) -> Result<ReliableMessage, TomGroupError> {
    let body = SealedBody {
        group: msg.group.clone(),
        content: msg.content.clone(),
    };
    let (data, nonce) = crypto::seal(&rmp_serde::to_vec(&body)?, key)?;
    Ok(ReliableMessage {
        id: msg.id.clone(),
        sender: identity.id(),
        receiver: msg.receiver.clone(),
        group: exposed,
        time: msg.time,
        data,
        nonce,
        encrypted: true,
        key: None,
        keys: BTreeMap::new(),
        signature: Vec::new(),
    })
}

fn group_of(address: &Address) -> Option<GroupId> {
    match address {
        Address::Group(group) => Some(group.clone()),
        _ => None,
    }
}
