//! Backup group scenarios: weight- and instability-driven activation,
//! retransmit catch-up, failover.

mod common;

use common::{test_group, MockLink, SendBehavior};
use multilink_group::GroupError;
use multilink_protocol::{
    encode_i32, GroupType, Link, MemberState, MsgCtrl, OptionCode,
};
use std::sync::Arc;
use std::time::Duration;

fn send_state(group: &multilink_group::GroupCore, id: u32) -> MemberState {
    let mut out = Vec::new();
    group.get_group_data(&mut out);
    out.iter().find(|d| d.id == id).unwrap().send_state
}

/// A higher-weight standby takes over: the first send still rides the
/// running primary, the standby is activated with the same sequence, and
/// the old primary is demoted to idle.
#[test]
fn backup_activation_by_weight() {
    let group = test_group(GroupType::Backup);

    let a = MockLink::new(1, 1000);
    group.add_member(a.clone() as Arc<dyn Link>, 10).unwrap();

    // Promote A to running primary.
    let mut ctrl = MsgCtrl::new();
    group.send(b"warmup", &mut ctrl).unwrap();
    assert_eq!(send_state(&group, 1), MemberState::Running);

    // B joins at the current schedule position with a higher weight.
    let b = MockLink::new(2, 1001);
    group.add_member(b.clone() as Arc<dyn Link>, 20).unwrap();
    assert_eq!(send_state(&group, 2), MemberState::Idle);

    let mut ctrl = MsgCtrl::new();
    group.send(b"payload", &mut ctrl).unwrap();
    let used = ctrl.pktseq.unwrap();

    // The message went over A, and B emitted the very same sequence.
    assert_eq!(a.sent_seqs(), vec![1000, 1001]);
    assert_eq!(b.sent_seqs(), vec![used.as_raw()]);

    // B is the primary now; A collapsed back to standby.
    assert_eq!(send_state(&group, 2), MemberState::Running);
    assert_eq!(send_state(&group, 1), MemberState::Idle);

    // The next message rides B alone.
    let mut ctrl = MsgCtrl::new();
    group.send(b"next", &mut ctrl).unwrap();
    assert_eq!(a.sent().len(), 2);
    assert_eq!(b.sent().len(), 2);
}

/// The primary exceeds the stability window: the standby is activated and
/// caught up with the last three messages under the primary's sequence
/// numbers.
#[test]
fn backup_activation_by_instability() {
    let group = test_group(GroupType::Backup);
    group
        .set_opt(OptionCode::StabilityTimeout, &encode_i32(40))
        .unwrap();

    let a = MockLink::new(1, 100);
    group.add_member(a.clone() as Arc<dyn Link>, 10).unwrap();

    // Three messages ride A; each is acknowledged so A stays stable.
    for payload in [b"m1" as &[u8], b"m2", b"m3"] {
        let mut ctrl = MsgCtrl::new();
        group.send(payload, &mut ctrl).unwrap();
        group.on_ack(1, ctrl.pktseq.unwrap().next(), None);
    }
    let a_seqs = a.sent_seqs();
    assert_eq!(a_seqs, vec![100, 101, 102]);

    // A standby whose schedule trails the group.
    let b = MockLink::new(2, 100);
    group.add_member(b.clone() as Arc<dyn Link>, 10).unwrap();

    // A goes silent beyond the stability window.
    a.set_ack_age(Duration::from_millis(300));
    std::thread::sleep(Duration::from_millis(50));

    let mut ctrl = MsgCtrl::new();
    group.send(b"m4", &mut ctrl).unwrap();
    let m4_seq = ctrl.pktseq.unwrap();

    // The unstable primary still carried the message.
    assert_eq!(a.sent().len(), 4);

    // B got the fresh message plus the replayed history, sequences forced
    // to match A's emissions exactly.
    let b_records = b.sent();
    let b_seqs: Vec<u32> = b_records.iter().map(|r| r.seq.as_raw()).collect();
    assert_eq!(b_seqs[0], m4_seq.as_raw());
    assert_eq!(&b_seqs[1..], &a_seqs[..]);
    let replayed: Vec<&[u8]> = b_records[1..].iter().map(|r| r.payload.as_slice()).collect();
    assert_eq!(replayed, vec![b"m1" as &[u8], b"m2", b"m3"]);
}

/// A hard primary failure inside the send still succeeds by activating
/// the standby in the same call.
#[test]
fn backup_failover_on_hard_failure() {
    let group = test_group(GroupType::Backup);
    let a = MockLink::new(1, 500);
    let b = MockLink::new(2, 500);
    group.add_member(a.clone() as Arc<dyn Link>, 10).unwrap();
    group.add_member(b.clone() as Arc<dyn Link>, 5).unwrap();

    let mut ctrl = MsgCtrl::new();
    group.send(b"m1", &mut ctrl).unwrap();
    assert_eq!(a.sent().len(), 1);
    assert!(b.sent().is_empty());

    a.set_behavior(SendBehavior::Fail);
    let mut ctrl = MsgCtrl::new();
    assert_eq!(group.send(b"m2", &mut ctrl).unwrap(), 2);

    assert!(a.is_closed());
    assert_eq!(b.sent()[0].payload, b"m2");
    assert_eq!(send_state(&group, 2), MemberState::Running);
}

/// Every sendable link unstable and no standby to promote: the send
/// reports that state.
#[test]
fn backup_all_links_unstable() {
    let group = test_group(GroupType::Backup);
    group
        .set_opt(OptionCode::StabilityTimeout, &encode_i32(40))
        .unwrap();
    let a = MockLink::new(1, 100);
    group.add_member(a.clone() as Arc<dyn Link>, 10).unwrap();

    let mut ctrl = MsgCtrl::new();
    group.send(b"m1", &mut ctrl).unwrap();

    a.set_ack_age(Duration::from_millis(300));
    a.set_behavior(SendBehavior::WouldBlock);
    std::thread::sleep(Duration::from_millis(50));

    let mut ctrl = MsgCtrl::new();
    assert_eq!(group.send(b"m2", &mut ctrl), Err(GroupError::AllLinksUnstable));
}

/// A stable, acknowledged primary never wakes the standby, and the group
/// watermark trims the retransmit buffer so a late joiner only replays
/// the unacknowledged tail.
#[test]
fn backup_ack_limits_replay() {
    let group = test_group(GroupType::Backup);
    group
        .set_opt(OptionCode::StabilityTimeout, &encode_i32(40))
        .unwrap();
    let a = MockLink::new(1, 100);
    group.add_member(a.clone() as Arc<dyn Link>, 10).unwrap();

    let mut msgnos = Vec::new();
    for payload in [b"m1" as &[u8], b"m2", b"m3"] {
        let mut ctrl = MsgCtrl::new();
        group.send(payload, &mut ctrl).unwrap();
        msgnos.push(ctrl.msgno.unwrap());
    }
    // The peer acknowledged m1 and m2 on the primary.
    group.on_ack(1, a.last_sent_seq(), Some(msgnos[1]));

    let b = MockLink::new(2, 100);
    group.add_member(b.clone() as Arc<dyn Link>, 10).unwrap();
    a.set_ack_age(Duration::from_millis(300));
    std::thread::sleep(Duration::from_millis(50));

    let mut ctrl = MsgCtrl::new();
    group.send(b"m4", &mut ctrl).unwrap();

    let payloads: Vec<Vec<u8>> = b.sent().iter().map(|r| r.payload.clone()).collect();
    assert_eq!(payloads[0], b"m4");
    assert!(payloads[1..].iter().any(|p| p == b"m3"));
    assert!(payloads[1..].iter().all(|p| p != b"m1" && p != b"m2"));
}
