use std::sync::Arc;

use proptest::prelude::*;
use tom_groups::group::packer::seal_broadcast;
use tom_groups::{
    now_ms, Address, Content, GroupAction, GroupCommand, GroupConfig, GroupEvent, GroupId,
    GroupService, GroupStore, InstantMessage, LocalIdentity, MemoryGroupStore, NodeId,
    ReliableMessage,
};

/// Deterministic identity for a test seed.
fn identity(seed: u8) -> LocalIdentity {
    use rand::{RngCore, SeedableRng};
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed as u64);
    let mut secret = [0u8; 32];
    rng.fill_bytes(&mut secret);
    LocalIdentity::from_seed(secret)
}

fn node(seed: u8) -> NodeId {
    identity(seed).id()
}

fn signed(seed: u8, command: &GroupCommand) -> ReliableMessage {
    let msg = InstantMessage::new(
        node(seed),
        Address::Anyone,
        Content::Command(command.clone()),
    )
    .in_group(command.group.clone());
    seal_broadcast(&identity(seed), &msg).unwrap()
}

/// Node 1 founds a group of [1, 2, 3, 4]. Returns the owner's service,
/// the group, the checkpoint time and the actions of the creation.
fn create() -> (GroupService, GroupId, u64, Vec<GroupAction>) {
    let owner = GroupService::new(
        identity(1),
        Arc::new(MemoryGroupStore::new()),
        GroupConfig::default(),
    );
    let (group, actions) = owner.create_group(&[node(2), node(3), node(4)]).unwrap();
    let t0 = owner.delegate().last_reset_time(&group).unwrap().unwrap();
    (owner, group, t0, actions)
}

fn founded() -> (GroupService, GroupId, u64) {
    let (owner, group, t0, _) = create();
    (owner, group, t0)
}

/// Node 2's view of the same group, learnt from the founder's history.
fn member_view() -> (GroupService, GroupId, u64) {
    let (owner, group, t0, actions) = create();
    let member = GroupService::new(
        identity(2),
        Arc::new(MemoryGroupStore::new()),
        GroupConfig::default(),
    );
    for action in &actions {
        if let Some((to, bytes, _)) = owner.pack_action(action).unwrap() {
            if to == member.local_id() {
                member.handle_bytes(&bytes).unwrap();
            }
        }
    }
    (member, group, t0)
}

/// Operations some node signs and the receiver judges.
#[derive(Debug, Clone)]
enum Op {
    Invite { by: u8, who: u8 },
    Join { by: u8 },
    Quit { by: u8 },
    Expel { by: u8, who: u8 },
    Reset { by: u8, members: Vec<u8> },
}

fn seed() -> impl Strategy<Value = u8> {
    1..=8u8
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (seed(), seed()).prop_map(|(by, who)| Op::Invite { by, who }),
        seed().prop_map(|by| Op::Join { by }),
        seed().prop_map(|by| Op::Quit { by }),
        (seed(), seed()).prop_map(|(by, who)| Op::Expel { by, who }),
        (seed(), prop::collection::vec(seed(), 0..6))
            .prop_map(|(by, members)| Op::Reset { by, members }),
    ]
}

fn command(op: &Op, group: &GroupId, time: u64) -> (u8, GroupCommand) {
    let g = group.clone();
    match op {
        Op::Invite { by, who } => (*by, GroupCommand::invite(g, time, vec![node(*who)])),
        Op::Join { by } => (*by, GroupCommand::join(g, time)),
        Op::Quit { by } => (*by, GroupCommand::quit(g, time)),
        Op::Expel { by, who } => (*by, GroupCommand::expel(g, time, vec![node(*who)])),
        Op::Reset { by, members } => (
            *by,
            GroupCommand::reset(g, time, members.iter().map(|s| node(*s)).collect()),
        ),
    }
}

/// Everything a replay must leave untouched.
fn state(service: &GroupService, group: &GroupId) -> (Vec<NodeId>, Vec<NodeId>, usize, Option<u64>) {
    let snap = service.snapshot(group).unwrap().unwrap();
    let histories = service.delegate().store().group_histories(group).unwrap().len();
    (
        snap.members,
        snap.administrators,
        histories,
        service.delegate().last_reset_time(group).unwrap(),
    )
}

fn changes_state(actions: &[GroupAction]) -> bool {
    actions.iter().any(|a| {
        matches!(
            a,
            GroupAction::Event(
                GroupEvent::MembershipChanged { .. } | GroupEvent::ApplicationReceived { .. }
            )
        )
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// An older reset never overrides a newer one; a newer one replaces
    /// the member list outright.
    #[test]
    fn reset_monotonicity(
        first in prop::collection::vec(2..=8u8, 0..5),
        second in prop::collection::vec(2..=8u8, 0..5),
        t1 in 1..1_000u64,
        t2 in 1..1_000u64,
    ) {
        let (member, group, t0) = member_view();
        let list = |rest: &[u8]| {
            let mut seeds = vec![1u8];
            seeds.extend(rest);
            let mut out: Vec<NodeId> = Vec::new();
            for s in seeds {
                if !out.contains(&node(s)) {
                    out.push(node(s));
                }
            }
            out
        };

        let r1 = GroupCommand::reset(group.clone(), t0 + t1, list(&first));
        member.handle_envelope(&signed(1, &r1)).unwrap();
        prop_assert_eq!(member.snapshot(&group).unwrap().unwrap().members, list(&first));

        let r2 = GroupCommand::reset(group.clone(), t0 + t2, list(&second));
        member.handle_envelope(&signed(1, &r2)).unwrap();
        let members = member.snapshot(&group).unwrap().unwrap().members;
        if t2 > t1 {
            prop_assert_eq!(members, list(&second));
            prop_assert_eq!(member.delegate().last_reset_time(&group).unwrap(), Some(t0 + t2));
        } else {
            prop_assert_eq!(members, list(&first));
            prop_assert_eq!(member.delegate().last_reset_time(&group).unwrap(), Some(t0 + t1));
        }
    }

    /// Replaying an envelope a second time changes nothing.
    #[test]
    fn idempotent_replay(ops in prop::collection::vec(op(), 1..10)) {
        let (owner, group, t0) = founded();
        for (i, op) in ops.iter().filter(|op| !matches!(op, Op::Reset { .. })).enumerate() {
            let (by, cmd) = command(op, &group, t0 + 1 + i as u64);
            let envelope = signed(by, &cmd);
            owner.handle_envelope(&envelope).unwrap();
            let before = state(&owner, &group);
            let replay = owner.handle_envelope(&envelope).unwrap();
            prop_assert!(!changes_state(&replay), "{:?} replayed with effect", op);
            prop_assert_eq!(state(&owner, &group), before);
        }
    }

    /// The owner stays first and is never removed, whatever arrives.
    #[test]
    fn owner_invariant(ops in prop::collection::vec(op(), 1..16)) {
        let (owner, group, t0) = founded();
        let base = t0.max(now_ms()) + 1;
        for (i, op) in ops.iter().enumerate() {
            let (by, cmd) = command(op, &group, base + 10 * i as u64);
            let actions = owner.handle_envelope(&signed(by, &cmd)).unwrap();
            for action in &actions {
                if let GroupAction::Event(GroupEvent::MembershipChanged { members, removed, .. }) = action {
                    prop_assert_eq!(members.first(), Some(&node(1)));
                    prop_assert!(!removed.contains(&node(1)));
                }
            }
            let snap = owner.snapshot(&group).unwrap().unwrap();
            prop_assert_eq!(snap.members.first(), Some(&node(1)));
            prop_assert!(snap.is_owner(&node(1)));
        }
    }
}
