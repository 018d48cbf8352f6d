//! Action executor: the only place that touches I/O.
//!
//! - Send / Forward -> pack via the service, then transport.send_raw()
//! - Event -> event_tx.try_send()
//!
//! A failed send becomes a `SendFailed` event; the rest of the batch
//! still goes out.

use tokio::sync::mpsc;

use crate::error::TomGroupError;
use crate::group::{GroupAction, GroupEvent};
use crate::service::GroupService;
use crate::types::NodeId;

use super::transport::Transport;

/// Execute a list of actions with the given transport, if any.
pub(super) async fn execute_actions<T: Transport>(
    service: &GroupService,
    actions: Vec<GroupAction>,
    transport: Option<&T>,
    event_tx: &mpsc::Sender<GroupEvent>,
) {
    for action in actions {
        match action {
            GroupAction::Event(event) => {
                // never block the loop on a slow consumer
                let _ = event_tx.try_send(event);
            }
            action => send_action(service, &action, transport, event_tx).await,
        }
    }
}

async fn send_action<T: Transport>(
    service: &GroupService,
    action: &GroupAction,
    transport: Option<&T>,
    event_tx: &mpsc::Sender<GroupEvent>,
) {
    let Some(to) = target(action) else {
        return;
    };
    let Some(transport) = transport else {
        report(event_tx, to, TomGroupError::NotConfigured("transport").to_string());
        return;
    };
    match service.pack_action(action) {
        Ok(Some((to, bytes, priority))) => {
            if let Err(e) = transport.send_raw(to, &bytes, priority).await {
                let err = TomGroupError::Transport(format!("send to {to} failed: {e}"));
                report(event_tx, to, err.to_string());
            }
        }
        Ok(None) => {}
        Err(e) => report(event_tx, to, format!("packing for {to} failed: {e}")),
    }
}

fn target(action: &GroupAction) -> Option<NodeId> {
    match action {
        GroupAction::Send { to, .. } | GroupAction::Forward { to, .. } => Some(*to),
        GroupAction::Event(_) => None,
    }
}

fn report(event_tx: &mpsc::Sender<GroupEvent>, to: NodeId, reason: String) {
    tracing::warn!("{reason}");
    let _ = event_tx.try_send(GroupEvent::SendFailed { to, reason });
}
