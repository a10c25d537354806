//! Message control block
//!
//! Every send and receive carries a control block alongside the payload. On
//! send the caller may pin a TTL, ordering flag and origin timestamp; on
//! return the group fills in the sequence number, message number, source
//! member and the per-member status array.

use crate::link::LinkId;
use crate::member::MemberData;
use crate::sequence::{MsgNumber, SeqNumber};

/// Control metadata traveling with one message.
#[derive(Debug, Clone)]
pub struct MsgCtrl {
    /// Milliseconds the message may wait for delivery; -1 means unlimited.
    pub ttl: i32,
    /// Deliver strictly in message order.
    pub in_order: bool,
    /// Origin timestamp in microseconds on the delivery clock; 0 means
    /// "stamp at send time".
    pub src_time: u64,
    /// Packet sequence number used or delivered.
    pub pktseq: Option<SeqNumber>,
    /// Message number assigned or delivered.
    pub msgno: Option<MsgNumber>,
    /// Member the payload was delivered from.
    pub src_id: Option<LinkId>,
    /// Per-member status array, filled on receive.
    pub group_data: Vec<MemberData>,
}

impl Default for MsgCtrl {
    fn default() -> Self {
        MsgCtrl {
            ttl: -1,
            in_order: false,
            src_time: 0,
            pktseq: None,
            msgno: None,
            src_id: None,
            group_data: Vec::new(),
        }
    }
}

impl MsgCtrl {
    /// Control block for a send with no special handling.
    pub fn new() -> Self {
        Self::default()
    }
}
