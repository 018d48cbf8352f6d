/// Group data structures for the ToM group layer.
///
/// There is no group server: a group is a founder-signed meta record, an
/// owner-signed bulletin, and a member list every peer rebuilds from
/// signed commands.
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::content::{Content, ReceiptContent};
use crate::crypto::{self, LocalIdentity};
use crate::error::TomGroupError;
use crate::types::{NodeId, Priority};

// ── Constants ────────────────────────────────────────────────────────────

/// Groups at or above this size should declare assistant bots.
pub const POLYLOGUE_LIMIT: usize = 32;

/// Groups below this size are delivered by splitting the plaintext per
/// member, so the group id never appears on the wire.
pub const SECRET_GROUP_LIMIT: usize = 16;

/// Minimum interval between two network queries for the same group.
pub const QUERY_EXPIRES_MS: u64 = 10 * 60 * 1000;

/// Max length of a derived group name.
pub const MAX_GROUP_NAME_LEN: usize = 32;

/// Bytes of the SHA-256 digest kept in a group id.
const GROUP_ID_DIGEST_LEN: usize = 20;

// ── GroupId ──────────────────────────────────────────────────────────────

/// Group identifier, derived from the group's meta ("grp-<hex>").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(pub String);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for GroupId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for GroupId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ── GroupMeta ────────────────────────────────────────────────────────────

/// Immutable group meta: binds the group id to its founder's key.
///
/// The founder signs the seed; the id is a digest over founder, seed and
/// fingerprint, so nobody else can mint a meta for the same id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMeta {
    pub founder: NodeId,
    pub seed: String,
    pub fingerprint: Vec<u8>,
}

impl GroupMeta {
    /// Create a meta signed by the founder.
    pub fn generate(founder: &LocalIdentity, seed: impl Into<String>) -> Self {
        let seed = seed.into();
        let fingerprint = founder.sign(seed.as_bytes());
        Self {
            founder: founder.id(),
            seed,
            fingerprint,
        }
    }

    /// The group id this meta describes.
    pub fn group_id(&self) -> GroupId {
        let mut hasher = Sha256::new();
        hasher.update(self.founder.as_bytes());
        hasher.update(self.seed.as_bytes());
        hasher.update(&self.fingerprint);
        let digest = hasher.finalize();
        GroupId(format!("grp-{}", hex::encode(&digest[..GROUP_ID_DIGEST_LEN])))
    }

    /// Whether the fingerprint is the founder's signature over the seed.
    pub fn verify(&self) -> bool {
        crypto::verify(&self.founder, self.seed.as_bytes(), &self.fingerprint).is_ok()
    }

    /// Whether this meta is valid and belongs to `group`.
    pub fn matches(&self, group: &GroupId) -> bool {
        self.verify() && self.group_id() == *group
    }
}

// ── Bulletin ─────────────────────────────────────────────────────────────

/// The group's signed public document.
///
/// Owner and assistants are authoritative here; administrators live here
/// too and are mirrored into local storage whenever a bulletin is saved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bulletin {
    pub group: GroupId,
    pub name: String,
    pub founder: NodeId,
    pub owner: NodeId,
    #[serde(default)]
    pub administrators: Vec<NodeId>,
    #[serde(default)]
    pub assistants: Vec<NodeId>,
    pub time: u64,
    #[serde(default)]
    pub signature: Vec<u8>,
}

impl Bulletin {
    /// Deterministic bytes for signing: every field except `signature`.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(self.group.0.as_bytes());
        buf.push(0);
        buf.extend_from_slice(self.name.as_bytes());
        buf.push(0);
        buf.extend_from_slice(&self.founder.as_bytes());
        buf.extend_from_slice(&self.owner.as_bytes());
        buf.extend_from_slice(&(self.administrators.len() as u32).to_le_bytes());
        for admin in &self.administrators {
            buf.extend_from_slice(&admin.as_bytes());
        }
        buf.extend_from_slice(&(self.assistants.len() as u32).to_le_bytes());
        for bot in &self.assistants {
            buf.extend_from_slice(&bot.as_bytes());
        }
        buf.extend_from_slice(&self.time.to_le_bytes());
        buf
    }

    /// Sign with the owner's key.
    pub fn sign(&mut self, owner: &LocalIdentity) {
        self.signature = owner.sign(&self.signing_bytes());
    }

    /// Verify against the group meta.
    ///
    /// Ownership transfer is not supported, so the owner must be the founder.
    pub fn verify(&self, meta: &GroupMeta) -> Result<(), TomGroupError> {
        if !meta.matches(&self.group) {
            return Err(TomGroupError::InvalidEnvelope {
                reason: format!("meta does not match group {}", self.group),
            });
        }
        if self.founder != meta.founder || self.owner != meta.founder {
            return Err(TomGroupError::InvalidSignature);
        }
        crypto::verify(&self.owner, &self.signing_bytes(), &self.signature)
    }
}

// ── Snapshot ─────────────────────────────────────────────────────────────

/// Immutable view of a group's roles, taken once per operation.
///
/// Mutations never touch a snapshot in place; they build a new list and
/// hand it back to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSnapshot {
    pub group: GroupId,
    pub owner: NodeId,
    pub members: Vec<NodeId>,
    pub administrators: Vec<NodeId>,
    pub assistants: Vec<NodeId>,
}

impl GroupSnapshot {
    pub fn is_owner(&self, node: &NodeId) -> bool {
        self.owner == *node
    }

    pub fn is_administrator(&self, node: &NodeId) -> bool {
        self.administrators.contains(node)
    }

    pub fn is_member(&self, node: &NodeId) -> bool {
        self.members.contains(node)
    }

    pub fn is_assistant(&self, node: &NodeId) -> bool {
        self.assistants.contains(node)
    }

    /// Owner or administrator.
    pub fn can_reset(&self, node: &NodeId) -> bool {
        self.is_owner(node) || self.is_administrator(node)
    }

    /// Whether the group has what command processing needs.
    pub fn is_ready(&self) -> bool {
        !self.members.is_empty()
    }
}

// ── List helpers ─────────────────────────────────────────────────────────

/// Append `items` not already present. Returns (new list, actually added).
pub fn append_unique(list: &[NodeId], items: &[NodeId]) -> (Vec<NodeId>, Vec<NodeId>) {
    let mut next = list.to_vec();
    let mut added = Vec::new();
    for item in items {
        if !next.contains(item) {
            next.push(*item);
            added.push(*item);
        }
    }
    (next, added)
}

/// Remove `items`. Returns (new list, actually removed).
pub fn remove_all(list: &[NodeId], items: &[NodeId]) -> (Vec<NodeId>, Vec<NodeId>) {
    let mut removed = Vec::new();
    let next = list
        .iter()
        .filter(|node| {
            if items.contains(node) {
                removed.push(**node);
                false
            } else {
                true
            }
        })
        .copied()
        .collect();
    (next, removed)
}

/// Membership delta from `old` to `new`. Returns (added, removed).
pub fn membership_delta(old: &[NodeId], new: &[NodeId]) -> (Vec<NodeId>, Vec<NodeId>) {
    let added = new.iter().filter(|n| !old.contains(n)).copied().collect();
    let removed = old.iter().filter(|n| !new.contains(n)).copied().collect();
    (added, removed)
}

/// Drop duplicates, keeping first occurrences.
pub fn dedup_members(list: &[NodeId]) -> Vec<NodeId> {
    append_unique(&[], list).0
}

// ── GroupAction ──────────────────────────────────────────────────────────

/// Actions returned by group components: the runtime executes them.
///
/// Pure decision engine pattern: nothing in `group` performs I/O besides
/// the storage collaborator.
#[derive(Debug, Clone)]
pub enum GroupAction {
    /// Pack `content` for `to` (encrypt + sign) and send it.
    Send {
        to: NodeId,
        content: Content,
        priority: Priority,
    },

    /// Send an already packed envelope to `to`.
    Forward {
        to: NodeId,
        message: crate::message::ReliableMessage,
        priority: Priority,
    },

    /// An application-visible event.
    Event(GroupEvent),
}

impl GroupAction {
    /// Receipt addressed to a command's sender.
    pub fn receipt(to: NodeId, receipt: ReceiptContent) -> Self {
        GroupAction::Send {
            to,
            content: Content::Receipt(receipt),
            priority: Priority::Normal,
        }
    }
}

// ── GroupEvent ───────────────────────────────────────────────────────────

/// Application-visible group events.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupEvent {
    /// We created a group.
    GroupCreated { group: GroupId, members: Vec<NodeId> },

    /// The member list changed.
    MembershipChanged {
        group: GroupId,
        members: Vec<NodeId>,
        added: Vec<NodeId>,
        removed: Vec<NodeId>,
    },

    /// A join request or member invite is waiting for admin review.
    ApplicationReceived {
        group: GroupId,
        from: NodeId,
        candidates: Vec<NodeId>,
    },

    /// The administrator list changed.
    AdministratorsChanged {
        group: GroupId,
        administrators: Vec<NodeId>,
    },

    /// A newer bulletin was accepted.
    BulletinUpdated { group: GroupId },

    /// A text or file message arrived.
    MessageReceived {
        group: Option<GroupId>,
        sender: NodeId,
        content: Content,
    },

    /// A receipt arrived (denial, error or delivery notice).
    ReceiptReceived { from: NodeId, receipt: ReceiptContent },

    /// Sending to a peer failed (partial delivery is tolerated).
    SendFailed { to: NodeId, reason: String },
}
