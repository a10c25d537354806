//! Controllable in-memory link for unit tests.

use multilink_protocol::{
    Link, LinkError, LinkId, LinkStatus, MsgCtrl, MsgNumber, OptionCode, SeqNumber, Timestamp,
};
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

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

pub struct TestLink {
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

impl TestLink {
    pub fn connected(id: LinkId) -> Arc<Self> {
        Self::with_isn(id, SeqNumber::new(1000))
    }

    pub fn with_isn(id: LinkId, isn: SeqNumber) -> Arc<Self> {
        Arc::new(TestLink {
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

    pub fn set_status(&self, status: LinkStatus) {
        *self.status.write() = status;
    }

    pub fn set_writable(&self, writable: bool) {
        self.writable.store(writable, Ordering::SeqCst);
    }

    /// Backdate the last acknowledgement by `age`.
    pub fn set_ack_age(&self, age: Duration) {
        *self.last_ack.write() = Timestamp::now() - age;
    }

    pub fn set_last_rcv(&self, seq: SeqNumber) {
        *self.last_rcv.write() = seq;
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

    pub fn options_set(&self) -> Vec<(OptionCode, Vec<u8>)> {
        self.options.read().clone()
    }
}

impl Link for TestLink {
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
