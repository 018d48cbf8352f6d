//! ToM group layer.
//!
//! Decentralized group membership: there is no group server. Every peer
//! rebuilds the member list from signed commands, anchored on the latest
//! `reset` checkpoint, and checks each command against the sender's role
//! (owner / administrator / assistant / member / stranger).
//!
//! Wire format: MessagePack (compact binary).
//! Crypto: Ed25519 signatures + XChaCha20-Poly1305 encryption.

pub mod config;
pub mod content;
pub mod crypto;
pub mod error;
pub mod group;
pub mod message;
pub mod runtime;
pub mod service;
pub mod store;
pub mod types;

pub use config::GroupConfig;
pub use content::{Content, FileContent, ReceiptContent};
pub use crypto::{EncryptedPayload, LocalIdentity, SymmetricKey};
pub use error::{StoreError, TomGroupError};
pub use group::{
    Bulletin, CommandBody, CommandDispatcher, CommandKind, CommandProcessor, DeliveryStrategy,
    Emission, GroupAction, GroupAssistant, GroupBotsManager, GroupCommand, GroupCommandHelper,
    GroupDelegate, GroupEmitter, GroupEvent, GroupHistoryBuilder, GroupId, GroupManager,
    GroupMeta, GroupPacker, GroupSnapshot, AdminManager, POLYLOGUE_LIMIT, SECRET_GROUP_LIMIT,
};
pub use message::{InstantMessage, ReliableMessage};
pub use runtime::{GroupRuntime, RuntimeChannels, RuntimeCommand, RuntimeHandle, Transport};
pub use service::GroupService;
pub use store::{GroupStore, HistoryEntry, MemoryGroupStore, RoleUpdate, SqliteGroupStore};
pub use types::{now_ms, Address, NodeId, Priority};
