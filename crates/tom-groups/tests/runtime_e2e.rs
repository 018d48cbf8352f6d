/// End-to-end: three group runtimes wired through an in-process router.
///
/// Each runtime owns its service in its own task; the router hands bytes
/// to the target runtime's handle, as a session layer would.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tom_groups::{
    Content, GroupConfig, GroupEvent, GroupId, GroupRuntime, GroupService, LocalIdentity,
    MemoryGroupStore, NodeId, Priority, RuntimeHandle, Transport,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Clone, Default)]
struct Router {
    peers: Arc<Mutex<HashMap<NodeId, RuntimeHandle>>>,
}

#[async_trait::async_trait]
impl Transport for Router {
    async fn send_raw(&self, target: NodeId, data: &[u8], _priority: Priority) -> Result<(), String> {
        let handle = self
            .peers
            .lock()
            .unwrap()
            .get(&target)
            .cloned()
            .ok_or_else(|| format!("unknown peer {target}"))?;
        let data = data.to_vec();
        // never wait on the target's loop from inside the sender's loop
        tokio::spawn(async move {
            let _ = handle.deliver(data).await;
        });
        Ok(())
    }
}

struct Peer {
    handle: RuntimeHandle,
    events: mpsc::Receiver<GroupEvent>,
}

fn spawn(router: &Router, seed: u8) -> Peer {
    let service = GroupService::new(
        LocalIdentity::from_seed([seed; 32]),
        Arc::new(MemoryGroupStore::new()),
        GroupConfig::default(),
    );
    let channels = GroupRuntime::spawn(service, Some(router.clone()));
    router
        .peers
        .lock()
        .unwrap()
        .insert(channels.handle.local_id(), channels.handle.clone());
    Peer {
        handle: channels.handle,
        events: channels.events,
    }
}

async fn wait_for_members(peer: &Peer, group: &GroupId, expected: &[NodeId]) {
    for _ in 0..200 {
        if let Ok(Some(snap)) = peer.handle.snapshot(group.clone()).await {
            if snap.members == expected {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{} never saw members {expected:?}", peer.handle.local_id());
}

async fn next_message(peer: &mut Peer) -> (NodeId, Content) {
    let wait = async {
        while let Some(event) = peer.events.recv().await {
            if let GroupEvent::MessageReceived {
                sender, content, ..
            } = event
            {
                return Some((sender, content));
            }
        }
        None
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("timed out waiting for a message")
        .expect("event channel closed")
}

#[tokio::test]
async fn group_lifecycle_over_runtimes() {
    init_tracing();
    let router = Router::default();
    let alice = spawn(&router, 1);
    let mut bob = spawn(&router, 2);
    let mut carol = spawn(&router, 3);
    let (a, b, c) = (
        alice.handle.local_id(),
        bob.handle.local_id(),
        carol.handle.local_id(),
    );

    let group = alice.handle.create_group(vec![b, c]).await.unwrap();
    wait_for_members(&bob, &group, &[a, b, c]).await;
    wait_for_members(&carol, &group, &[a, b, c]).await;

    let id = alice
        .handle
        .send_message(group.clone(), Content::text("hello group"))
        .await
        .unwrap();
    assert!(!id.is_empty());
    assert_eq!(next_message(&mut bob).await, (a, Content::text("hello group")));
    assert_eq!(next_message(&mut carol).await, (a, Content::text("hello group")));

    carol.handle.quit_group(group.clone()).await.unwrap();
    wait_for_members(&alice, &group, &[a, b]).await;
    wait_for_members(&bob, &group, &[a, b]).await;

    bob.handle
        .send_message(group.clone(), Content::text("just us"))
        .await
        .unwrap();
    let mut alice = alice;
    assert_eq!(next_message(&mut alice).await, (b, Content::text("just us")));

    for peer in [&alice, &bob, &carol] {
        peer.handle.shutdown().await;
    }
}

#[tokio::test]
async fn expelled_member_is_told() {
    init_tracing();
    let router = Router::default();
    let alice = spawn(&router, 11);
    let bob = spawn(&router, 12);
    let carol = spawn(&router, 13);
    let (a, b, c) = (
        alice.handle.local_id(),
        bob.handle.local_id(),
        carol.handle.local_id(),
    );

    let group = alice.handle.create_group(vec![b, c]).await.unwrap();
    wait_for_members(&carol, &group, &[a, b, c]).await;

    alice.handle.expel_members(group.clone(), vec![c]).await.unwrap();
    wait_for_members(&bob, &group, &[a, b]).await;
    wait_for_members(&carol, &group, &[a, b]).await;

    let err = carol
        .handle
        .send_message(group.clone(), Content::text("still here?"))
        .await
        .unwrap_err();
    assert!(matches!(err, tom_groups::TomGroupError::PermissionDenied { .. }));
}
