//! Shared helpers for the group integration tests.
#![allow(dead_code)]

use multilink_group::{GroupCore, GroupEvent, PollNotifier};
use multilink_protocol::{
    encode_bool, EpollId, GroupId, GroupType, Link, LinkError, LinkId, LinkStatus, MsgCtrl,
    MsgNumber, OptionCode, SeqNumber, Timestamp,
};
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How the mock link answers the next send calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendBehavior {
    Accept,
    WouldBlock,
    Fail,
}

#[derive(Debug, Clone)]
pub struct SentRecord {
    pub seq: SeqNumber,
    pub msgno: Option<MsgNumber>,
    pub payload: Vec<u8>,
}

/// In-memory member link with scripted behavior.
pub struct MockLink {
    id: LinkId,
    local: SocketAddr,
    peer: SocketAddr,
    isn: SeqNumber,
    created: Timestamp,
    status: RwLock<LinkStatus>,
    behavior: RwLock<SendBehavior>,
    writable: AtomicBool,
    next_seq: RwLock<SeqNumber>,
    last_sent: RwLock<SeqNumber>,
    last_rcv: RwLock<SeqNumber>,
    last_ack: RwLock<Timestamp>,
    sent: RwLock<Vec<SentRecord>>,
    options: RwLock<Vec<(OptionCode, Vec<u8>)>>,
    closed: AtomicBool,
}

impl MockLink {
    pub fn new(id: LinkId, isn: u32) -> Arc<Self> {
        let isn = SeqNumber::new(isn);
        Arc::new(MockLink {
            id,
            local: format!("127.0.0.1:{}", 40_000 + id as u16).parse().unwrap(),
            peer: format!("127.0.0.1:{}", 50_000 + id as u16).parse().unwrap(),
            isn,
            created: Timestamp::now(),
            status: RwLock::new(LinkStatus::Connected),
            behavior: RwLock::new(SendBehavior::Accept),
            writable: AtomicBool::new(true),
            next_seq: RwLock::new(isn),
            last_sent: RwLock::new(isn.prev()),
            last_rcv: RwLock::new(isn.prev()),
            last_ack: RwLock::new(Timestamp::now()),
            sent: RwLock::new(Vec::new()),
            options: RwLock::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn set_behavior(&self, behavior: SendBehavior) {
        *self.behavior.write() = behavior;
    }

    pub fn set_writable(&self, writable: bool) {
        self.writable.store(writable, Ordering::SeqCst);
    }

    /// Backdate the last acknowledgement by `age`.
    pub fn set_ack_age(&self, age: Duration) {
        *self.last_ack.write() = Timestamp::now() - age;
    }

    pub fn sent(&self) -> Vec<SentRecord> {
        self.sent.read().clone()
    }

    pub fn sent_seqs(&self) -> Vec<u32> {
        self.sent.read().iter().map(|r| r.seq.as_raw()).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Link for MockLink {
    fn id(&self) -> LinkId {
        self.id
    }

    fn status(&self) -> LinkStatus {
        *self.status.read()
    }

    fn local_addr(&self) -> SocketAddr {
        self.local
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    fn send(&self, payload: &[u8], ctrl: &mut MsgCtrl) -> Result<usize, LinkError> {
        match *self.behavior.read() {
            SendBehavior::Accept => {
                let seq = *self.next_seq.read();
                if ctrl.src_time == 0 {
                    ctrl.src_time = Timestamp::now().as_micros_since(self.created).max(1);
                }
                ctrl.pktseq = Some(seq);
                self.sent.write().push(SentRecord {
                    seq,
                    msgno: ctrl.msgno,
                    payload: payload.to_vec(),
                });
                *self.last_sent.write() = seq;
                *self.next_seq.write() = seq.next();
                Ok(payload.len())
            }
            SendBehavior::WouldBlock => Err(LinkError::WouldBlock),
            SendBehavior::Fail => {
                *self.status.write() = LinkStatus::Broken;
                Err(LinkError::Broken)
            }
        }
    }

    fn override_send_seq(&self, seq: SeqNumber) {
        *self.next_seq.write() = seq;
    }

    fn last_sent_seq(&self) -> SeqNumber {
        *self.last_sent.read()
    }

    fn last_rcv_seq(&self) -> SeqNumber {
        *self.last_rcv.read()
    }

    fn last_ack_time(&self) -> Timestamp {
        *self.last_ack.read()
    }

    fn snd_isn(&self) -> SeqNumber {
        self.isn
    }

    fn rcv_isn(&self) -> SeqNumber {
        self.isn
    }

    fn is_writable(&self) -> bool {
        self.writable.load(Ordering::SeqCst)
    }

    fn set_option(&self, code: OptionCode, value: &[u8]) -> Result<(), LinkError> {
        if value.len() != code.value_len() {
            return Err(LinkError::BadOption);
        }
        self.options.write().push((code, value.to_vec()));
        Ok(())
    }

    fn get_option(&self, code: OptionCode) -> Option<Vec<u8>> {
        self.options
            .read()
            .iter()
            .rev()
            .find(|(c, _)| *c == code)
            .map(|(_, v)| v.clone())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        *self.status.write() = LinkStatus::Closed;
    }
}

/// Poll notifier that records every published event.
#[derive(Default)]
pub struct EventRecorder {
    events: parking_lot::Mutex<Vec<(EpollId, GroupEvent, bool)>>,
}

impl EventRecorder {
    pub fn events(&self) -> Vec<(EpollId, GroupEvent, bool)> {
        self.events.lock().clone()
    }

    pub fn count(&self, wanted: GroupEvent) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|(_, e, _)| *e == wanted)
            .count()
    }
}

impl PollNotifier for EventRecorder {
    fn post(&self, eid: EpollId, _group: GroupId, event: GroupEvent, enabled: bool) {
        self.events.lock().push((eid, event, enabled));
    }
}

/// A non-blocking group of the given type with a private storage pool.
pub fn test_group(group_type: GroupType) -> GroupCore {
    let group = GroupCore::with_storage(
        1,
        group_type,
        None,
        multilink_group::private_storage(1456, 64),
    );
    group
        .set_opt(OptionCode::SndSyn, &encode_bool(false))
        .unwrap();
    group
        .set_opt(OptionCode::RcvSyn, &encode_bool(false))
        .unwrap();
    group
}

/// Same, with a recording poll notifier attached.
pub fn test_group_with_events(group_type: GroupType) -> (GroupCore, Arc<EventRecorder>) {
    let recorder = Arc::new(EventRecorder::default());
    let group = GroupCore::with_storage(
        1,
        group_type,
        Some(recorder.clone()),
        multilink_group::private_storage(1456, 64),
    );
    group
        .set_opt(OptionCode::SndSyn, &encode_bool(false))
        .unwrap();
    group
        .set_opt(OptionCode::RcvSyn, &encode_bool(false))
        .unwrap();
    group.add_epoll(1);
    (group, recorder)
}
