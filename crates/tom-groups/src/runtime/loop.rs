/// The group runtime event loop.
///
/// A single async task that owns the `GroupService` and multiplexes over
/// application commands, incoming bytes and the maintenance timer.
use tokio::sync::mpsc;

use crate::error::TomGroupError;
use crate::group::{GroupAction, GroupEvent};
use crate::service::GroupService;
use crate::types::now_ms;

use super::executor::execute_actions;
use super::transport::Transport;
use super::{Reply, RuntimeCommand};

/// Main event loop: owns the service.
pub(super) async fn runtime_loop<T: Transport + 'static>(
    service: GroupService,
    transport: Option<T>,
    mut cmd_rx: mpsc::Receiver<RuntimeCommand>,
    event_tx: mpsc::Sender<GroupEvent>,
) {
    let local_id = service.local_id();
    let transport = transport.as_ref();
    let mut maintenance = tokio::time::interval(service.config().maintenance_interval);
    // Skip the immediate first tick
    maintenance.tick().await;

    tracing::info!("group runtime started for {local_id}");

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    tracing::info!("all handles dropped, stopping group runtime");
                    break;
                };
                match cmd {
                    RuntimeCommand::CreateGroup { members, reply } => {
                        let result = service.create_group(&members);
                        settle(&service, transport, &event_tx, result, reply).await;
                    }
                    RuntimeCommand::ResetMembers { group, members, reply } => {
                        let result = service.reset_members(&group, members).map(unit);
                        settle(&service, transport, &event_tx, result, reply).await;
                    }
                    RuntimeCommand::InviteMembers { group, members, reply } => {
                        let result = service.invite_members(&group, &members).map(unit);
                        settle(&service, transport, &event_tx, result, reply).await;
                    }
                    RuntimeCommand::ExpelMembers { group, members, reply } => {
                        let result = service.expel_members(&group, &members).map(unit);
                        settle(&service, transport, &event_tx, result, reply).await;
                    }
                    RuntimeCommand::QuitGroup { group, reply } => {
                        let result = service.quit_group(&group).map(unit);
                        settle(&service, transport, &event_tx, result, reply).await;
                    }
                    RuntimeCommand::ReviewApplications { group, reply } => {
                        let result = service.review_applications(&group).map(unit);
                        settle(&service, transport, &event_tx, result, reply).await;
                    }
                    RuntimeCommand::UpdateAdministrators { group, administrators, reply } => {
                        let result = service
                            .update_administrators(&group, &administrators)
                            .map(unit);
                        settle(&service, transport, &event_tx, result, reply).await;
                    }
                    RuntimeCommand::Resign { group, reply } => {
                        let result = service.resign(&group).map(unit);
                        settle(&service, transport, &event_tx, result, reply).await;
                    }
                    RuntimeCommand::QueryGroup { group, reply } => {
                        let result = service.query_group(&group).map(unit);
                        settle(&service, transport, &event_tx, result, reply).await;
                    }
                    RuntimeCommand::SendMessage { group, content, reply } => {
                        let result = service
                            .send_message(&group, content)
                            .map(|emission| (emission.message.id, emission.actions));
                        settle(&service, transport, &event_tx, result, reply).await;
                    }
                    RuntimeCommand::Incoming { data } => {
                        match service.handle_bytes(&data) {
                            Ok(actions) => {
                                execute_actions(&service, actions, transport, &event_tx).await;
                            }
                            Err(e) => tracing::warn!("incoming message rejected: {e}"),
                        }
                    }
                    RuntimeCommand::GetGroups { reply } => {
                        let _ = reply.send(service.groups());
                    }
                    RuntimeCommand::GetSnapshot { group, reply } => {
                        let _ = reply.send(service.snapshot(&group));
                    }
                    RuntimeCommand::Shutdown => {
                        tracing::info!("group runtime shutting down");
                        break;
                    }
                }
            }

            _ = maintenance.tick() => {
                let charged = service.maintenance(now_ms());
                if !charged.is_empty() {
                    tracing::debug!("{} bot(s) missed their response window", charged.len());
                }
            }
        }
    }
}

fn unit(actions: Vec<GroupAction>) -> ((), Vec<GroupAction>) {
    ((), actions)
}

/// Execute the actions of a successful operation, then answer the caller.
async fn settle<T, V>(
    service: &GroupService,
    transport: Option<&T>,
    event_tx: &mpsc::Sender<GroupEvent>,
    result: Result<(V, Vec<GroupAction>), TomGroupError>,
    reply: Reply<V>,
) where
    T: Transport,
{
    match result {
        Ok((value, actions)) => {
            execute_actions(service, actions, transport, event_tx).await;
            let _ = reply.send(Ok(value));
        }
        Err(e) => {
            tracing::debug!("group operation refused: {e}");
            let _ = reply.send(Err(e));
        }
    }
}
