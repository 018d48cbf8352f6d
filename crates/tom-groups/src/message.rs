use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::content::Content;
use crate::crypto::{self, EncryptedPayload, LocalIdentity};
use crate::error::TomGroupError;
use crate::group::GroupId;
use crate::types::{now_ms, Address, NodeId};

/// Plaintext message, before packing.
#[derive(Debug, Clone, PartialEq)]
pub struct InstantMessage {
    pub id: String,
    pub sender: NodeId,
    pub receiver: Address,
    /// Group this message belongs to. Travels inside the sealed body; it is
    /// only copied to the envelope header when the group is exposed.
    pub group: Option<GroupId>,
    pub time: u64,
    pub content: Content,
}

impl InstantMessage {
    pub fn new(sender: NodeId, receiver: Address, content: Content) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender,
            receiver,
            group: None,
            time: now_ms(),
            content,
        }
    }

    pub fn in_group(mut self, group: GroupId) -> Self {
        self.group = Some(group);
        self
    }
}

/// Sealed part of an envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SealedBody {
    pub group: Option<GroupId>,
    pub content: Content,
}

/// Signed envelope: the unit relayed between nodes.
///
/// Serialized as MessagePack. The signature covers `id`, `sender`, `time`,
/// `data` and `nonce` only: `receiver`, `group`, `key` and `keys` may be
/// rewritten by whoever splits a group envelope per member.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReliableMessage {
    pub id: String,
    pub sender: NodeId,
    pub receiver: Address,
    /// Exposed group id (large groups and bot forwarding only).
    #[serde(default)]
    pub group: Option<GroupId>,
    pub time: u64,
    /// Sealed body (plain MessagePack when `encrypted` is false).
    pub data: Vec<u8>,
    #[serde(default)]
    pub nonce: [u8; 24],
    pub encrypted: bool,
    /// Body key wrapped for `receiver`.
    #[serde(default)]
    pub key: Option<EncryptedPayload>,
    /// Body key wrapped per member, for group-addressed envelopes.
    #[serde(default)]
    pub keys: BTreeMap<NodeId, EncryptedPayload>,
    #[serde(default)]
    pub signature: Vec<u8>,
}

impl ReliableMessage {
    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TomGroupError> {
        rmp_serde::to_vec(self).map_err(Into::into)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, TomGroupError> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }

    /// Canonical bytes to sign/verify.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.data.len() + 128);
        buf.extend_from_slice(self.id.as_bytes());
        buf.push(0);
        buf.extend_from_slice(&self.sender.as_bytes());
        buf.extend_from_slice(&self.time.to_le_bytes());
        buf.push(self.encrypted as u8);
        buf.extend_from_slice(&self.nonce);
        buf.extend_from_slice(&self.data);
        buf
    }

    /// Sign with the sender's identity.
    pub fn sign(&mut self, identity: &LocalIdentity) {
        self.signature = identity.sign(&self.signing_bytes());
    }

    /// Verify the signature against `sender`.
    pub fn verify_signature(&self) -> Result<(), TomGroupError> {
        crypto::verify(&self.sender, &self.signing_bytes(), &self.signature)
    }

    pub fn is_signed(&self) -> bool {
        !self.signature.is_empty()
    }

    /// MessagePack size of this envelope in bytes.
    pub fn wire_size(&self) -> usize {
        self.to_bytes().map(|b| b.len()).unwrap_or(0)
    }

    /// Copy addressed to one member: that member's wrapped key is moved
    /// into `key` and the per-member map is dropped.
    ///
    /// Returns `None` if no key was wrapped for `member`.
    pub fn for_member(&self, member: &NodeId) -> Option<Self> {
        if !self.encrypted {
            return Some(Self {
                receiver: Address::Node(*member),
                ..self.clone()
            });
        }
        let key = self.keys.get(member)?.clone();
        Some(Self {
            receiver: Address::Node(*member),
            key: Some(key),
            keys: BTreeMap::new(),
            ..self.clone()
        })
    }

    /// Decrypt (if needed) and decode the body.
    pub fn open(&self, identity: &LocalIdentity) -> Result<InstantMessage, TomGroupError> {
        let plaintext = if self.encrypted {
            let wrapped = self
                .key
                .as_ref()
                .or_else(|| self.keys.get(&identity.id()))
                .ok_or_else(|| TomGroupError::InvalidEnvelope {
                    reason: format!("no key for {}", identity.id()),
                })?;
            let key = crypto::unwrap_key(wrapped, identity)?;
            crypto::open(&self.data, &self.nonce, &key)?
        } else {
            self.data.clone()
        };
        let body: SealedBody = rmp_serde::from_slice(&plaintext)?;
        Ok(InstantMessage {
            id: self.id.clone(),
            sender: self.sender,
            receiver: self.receiver.clone(),
            group: body.group.or_else(|| self.group.clone()),
            time: self.time,
            content: body.content,
        })
    }
}
