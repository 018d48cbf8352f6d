/// Group runtime: drives a `GroupService` from one tokio task.
///
/// The task owns the service, so every read-then-write sequence on a
/// group runs without interleaving. The application talks to it through
/// a channel-based handle and never touches raw bytes.
mod executor;
mod r#loop;
mod transport;

pub use transport::Transport;

#[cfg(test)]
pub use transport::mock;

use tokio::sync::{mpsc, oneshot};

use crate::content::Content;
use crate::error::TomGroupError;
use crate::group::{GroupEvent, GroupId, GroupSnapshot};
use crate::service::GroupService;
use crate::types::NodeId;

/// Reply channel for a runtime command.
pub type Reply<T> = oneshot::Sender<Result<T, TomGroupError>>;

// ── Commands (app → runtime) ──────────────────────────────────────────

/// Commands the application sends to the runtime event loop.
pub enum RuntimeCommand {
    /// Found a group; replies with its id.
    CreateGroup {
        members: Vec<NodeId>,
        reply: Reply<GroupId>,
    },
    /// Replace the member list with a fresh reset.
    ResetMembers {
        group: GroupId,
        members: Vec<NodeId>,
        reply: Reply<()>,
    },
    InviteMembers {
        group: GroupId,
        members: Vec<NodeId>,
        reply: Reply<()>,
    },
    ExpelMembers {
        group: GroupId,
        members: Vec<NodeId>,
        reply: Reply<()>,
    },
    QuitGroup { group: GroupId, reply: Reply<()> },
    /// Admit pending join requests and invites.
    ReviewApplications { group: GroupId, reply: Reply<()> },
    UpdateAdministrators {
        group: GroupId,
        administrators: Vec<NodeId>,
        reply: Reply<()>,
    },
    Resign { group: GroupId, reply: Reply<()> },
    /// Ask the network for a group's history.
    QueryGroup { group: GroupId, reply: Reply<()> },
    /// Send content to a group; replies with the message id.
    SendMessage {
        group: GroupId,
        content: Content,
        reply: Reply<String>,
    },
    /// Raw bytes received from the network.
    Incoming { data: Vec<u8> },
    /// Query: groups known locally.
    GetGroups { reply: Reply<Vec<GroupId>> },
    /// Query: roles of one group.
    GetSnapshot {
        group: GroupId,
        reply: Reply<Option<GroupSnapshot>>,
    },
    /// Graceful shutdown.
    Shutdown,
}

// ── RuntimeHandle (app-facing API) ───────────────────────────────────

/// Handle to a running `GroupRuntime`. Cheap to clone.
#[derive(Clone)]
pub struct RuntimeHandle {
    cmd_tx: mpsc::Sender<RuntimeCommand>,
    local_id: NodeId,
}

impl RuntimeHandle {
    /// This node's identity.
    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> RuntimeCommand,
    ) -> Result<T, TomGroupError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(build(tx))
            .await
            .map_err(|_| TomGroupError::RuntimeClosed)?;
        rx.await.map_err(|_| TomGroupError::RuntimeClosed)?
    }

    pub async fn create_group(&self, members: Vec<NodeId>) -> Result<GroupId, TomGroupError> {
        self.request(|reply| RuntimeCommand::CreateGroup { members, reply })
            .await
    }

    pub async fn reset_members(
        &self,
        group: GroupId,
        members: Vec<NodeId>,
    ) -> Result<(), TomGroupError> {
        self.request(|reply| RuntimeCommand::ResetMembers {
            group,
            members,
            reply,
        })
        .await
    }

    pub async fn invite_members(
        &self,
        group: GroupId,
        members: Vec<NodeId>,
    ) -> Result<(), TomGroupError> {
        self.request(|reply| RuntimeCommand::InviteMembers {
            group,
            members,
            reply,
        })
        .await
    }

    pub async fn expel_members(
        &self,
        group: GroupId,
        members: Vec<NodeId>,
    ) -> Result<(), TomGroupError> {
        self.request(|reply| RuntimeCommand::ExpelMembers {
            group,
            members,
            reply,
        })
        .await
    }

    pub async fn quit_group(&self, group: GroupId) -> Result<(), TomGroupError> {
        self.request(|reply| RuntimeCommand::QuitGroup { group, reply })
            .await
    }

    pub async fn review_applications(&self, group: GroupId) -> Result<(), TomGroupError> {
        self.request(|reply| RuntimeCommand::ReviewApplications { group, reply })
            .await
    }

    pub async fn update_administrators(
        &self,
        group: GroupId,
        administrators: Vec<NodeId>,
    ) -> Result<(), TomGroupError> {
        self.request(|reply| RuntimeCommand::UpdateAdministrators {
            group,
            administrators,
            reply,
        })
        .await
    }

    pub async fn resign(&self, group: GroupId) -> Result<(), TomGroupError> {
        self.request(|reply| RuntimeCommand::Resign { group, reply })
            .await
    }

    pub async fn query_group(&self, group: GroupId) -> Result<(), TomGroupError> {
        self.request(|reply| RuntimeCommand::QueryGroup { group, reply })
            .await
    }

    /// Send content to a group. Returns the message id.
    pub async fn send_message(
        &self,
        group: GroupId,
        content: Content,
    ) -> Result<String, TomGroupError> {
        self.request(|reply| RuntimeCommand::SendMessage {
            group,
            content,
            reply,
        })
        .await
    }

    /// Feed bytes received from the network.
    pub async fn deliver(&self, data: Vec<u8>) -> Result<(), TomGroupError> {
        self.cmd_tx
            .send(RuntimeCommand::Incoming { data })
            .await
            .map_err(|_| TomGroupError::RuntimeClosed)
    }

    pub async fn groups(&self) -> Result<Vec<GroupId>, TomGroupError> {
        self.request(|reply| RuntimeCommand::GetGroups { reply }).await
    }

    pub async fn snapshot(&self, group: GroupId) -> Result<Option<GroupSnapshot>, TomGroupError> {
        self.request(|reply| RuntimeCommand::GetSnapshot { group, reply })
            .await
    }

    /// Graceful shutdown.
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(RuntimeCommand::Shutdown).await;
    }
}

// ── RuntimeChannels ──────────────────────────────────────────────────

/// Channels returned to the application when the runtime starts.
pub struct RuntimeChannels {
    /// Handle to send commands to the runtime.
    pub handle: RuntimeHandle,
    /// Group events (membership, messages, receipts, send failures).
    pub events: mpsc::Receiver<GroupEvent>,
}

// ── GroupRuntime ─────────────────────────────────────────────────────

/// The group runtime: spawn it and communicate via channels.
pub struct GroupRuntime;

impl GroupRuntime {
    /// Start the event loop as a tokio task. Without a transport, every
    /// outgoing action is reported as a `SendFailed` event.
    pub fn spawn<T: Transport + 'static>(
        service: GroupService,
        transport: Option<T>,
    ) -> RuntimeChannels {
        let local_id = service.local_id();
        let capacity = service.config().channel_capacity.max(1);
        let (cmd_tx, cmd_rx) = mpsc::channel::<RuntimeCommand>(capacity);
        let (event_tx, event_rx) = mpsc::channel::<GroupEvent>(capacity);

        tokio::spawn(r#loop::runtime_loop(service, transport, cmd_rx, event_tx));

        RuntimeChannels {
            handle: RuntimeHandle { cmd_tx, local_id },
            events: event_rx,
        }
    }
}
