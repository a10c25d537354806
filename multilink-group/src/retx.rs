//! Sender retransmit buffer
//!
//! Backup groups keep every sent message until all currently-active members
//! have acknowledged it, so that a freshly activated standby can be caught
//! up from the point its sequence baseline indicates. Entries are ordered by
//! message number; eviction follows the acknowledged watermark.

use crate::storage::{BufferedMessage, StorageHandle};
use multilink_protocol::{MsgCtrl, MsgNumber};
use std::collections::VecDeque;
use std::sync::Arc;

/// Ordered deque of buffered messages keyed by message number.
///
/// Invariant: `oldest_msgno <= acked_msgno + 1 <= next_msgno`. Entries with
/// `msgno <= acked_msgno` are evicted opportunistically on `append` or by an
/// explicit `trim`.
pub struct SenderRetxBuffer {
    storage: StorageHandle,
    queue: VecDeque<BufferedMessage>,
    next_msgno: MsgNumber,
    acked_msgno: Option<MsgNumber>,
    cap: usize,
    lost_through: Option<MsgNumber>,
}

impl SenderRetxBuffer {
    pub fn new(storage: StorageHandle, first_msgno: MsgNumber, cap: usize) -> Self {
        SenderRetxBuffer {
            storage,
            queue: VecDeque::new(),
            next_msgno: first_msgno,
            acked_msgno: None,
            cap,
            lost_through: None,
        }
    }

    /// The message number the next `append` will assign.
    pub fn next_msgno(&self) -> MsgNumber {
        self.next_msgno
    }

    /// Message number of the oldest retained entry.
    pub fn oldest_msgno(&self) -> Option<MsgNumber> {
        self.queue.front().map(|m| msgno_of(m))
    }

    pub fn acked_msgno(&self) -> Option<MsgNumber> {
        self.acked_msgno
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Store one message, assigning it the next message number.
    ///
    /// The returned number is also written into the stored control header.
    /// If the buffer exceeds its cap the oldest entry is evicted even when
    /// unacknowledged; a later catch-up that needs it will observe the gap.
    pub fn append(&mut self, payload: &[u8], ctrl: &MsgCtrl) -> MsgNumber {
        self.trim();

        let msgno = self.next_msgno;
        let mut stored = ctrl.clone();
        stored.msgno = Some(msgno);
        self.queue
            .push_back(BufferedMessage::copy_from(&self.storage, payload, stored));
        self.next_msgno = msgno.next();

        while self.queue.len() > self.cap {
            if let Some(evicted) = self.queue.pop_front() {
                let evicted_no = msgno_of(&evicted);
                let unacked = match self.acked_msgno {
                    Some(acked) => evicted_no.gt(acked),
                    None => true,
                };
                if unacked {
                    self.lost_through = Some(evicted_no);
                }
            }
        }

        msgno
    }

    /// Record that every currently-active member has acknowledged `msgno`.
    ///
    /// The watermark only moves forward and never past the last assigned
    /// number.
    pub fn ack(&mut self, msgno: MsgNumber) {
        let last_assigned = match self.queue.back() {
            Some(m) => msgno_of(m),
            None => return,
        };
        let clamped = if msgno.gt(last_assigned) {
            last_assigned
        } else {
            msgno
        };
        match self.acked_msgno {
            Some(acked) if !clamped.gt(acked) => {}
            _ => self.acked_msgno = Some(clamped),
        }
    }

    /// Evict entries at or below the acknowledged watermark.
    pub fn trim(&mut self) {
        let acked = match self.acked_msgno {
            Some(a) => a,
            None => return,
        };
        while let Some(front) = self.queue.front() {
            if msgno_of(front).le(acked) {
                self.queue.pop_front();
            } else {
                break;
            }
        }
    }

    /// Buffered messages with number greater than `msgno`, in order.
    pub fn iter_since(&self, msgno: MsgNumber) -> impl Iterator<Item = &BufferedMessage> {
        self.queue.iter().filter(move |m| msgno_of(m).gt(msgno))
    }

    /// All buffered messages, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &BufferedMessage> {
        self.queue.iter()
    }

    /// Highest message number evicted while still unacknowledged, if any.
    /// Consuming the marker resets it.
    pub fn take_lost_through(&mut self) -> Option<MsgNumber> {
        self.lost_through.take()
    }

    /// Drop all entries and restart the message-number space.
    pub fn reset(&mut self, first_msgno: MsgNumber) {
        self.queue.clear();
        self.next_msgno = first_msgno;
        self.acked_msgno = None;
        self.lost_through = None;
    }

    pub fn storage(&self) -> StorageHandle {
        Arc::clone(&self.storage)
    }
}

fn msgno_of(msg: &BufferedMessage) -> MsgNumber {
    // Every stored control header carries the assigned number.
    msg.ctrl().msgno.expect("buffered message without msgno")
}
