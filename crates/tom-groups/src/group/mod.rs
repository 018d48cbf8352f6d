/// Group membership for ToM.
///
/// Peer-to-peer: every node replays signed commands against the latest
/// reset checkpoint. Components return `Vec<GroupAction>`; the only I/O
/// they perform is through the `GroupStore` collaborator.
pub mod admin;
pub mod assistant;
pub mod bots;
pub mod builder;
pub mod command;
pub mod delegate;
pub mod emitter;
pub mod helper;
pub mod manager;
pub mod packer;
pub mod processor;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use admin::AdminManager;
pub use assistant::GroupAssistant;
pub use bots::GroupBotsManager;
pub use builder::GroupHistoryBuilder;
pub use command::{CommandBody, CommandKind, GroupCommand};
pub use delegate::GroupDelegate;
pub use emitter::{DeliveryStrategy, Emission, GroupEmitter};
pub use helper::GroupCommandHelper;
pub use manager::GroupManager;
pub use packer::GroupPacker;
pub use processor::{CommandDispatcher, CommandProcessor, ProcessorContext};
pub use types::{
    Bulletin, GroupAction, GroupEvent, GroupId, GroupMeta, GroupSnapshot, MAX_GROUP_NAME_LEN,
    POLYLOGUE_LIMIT, QUERY_EXPIRES_MS, SECRET_GROUP_LIMIT,
};
