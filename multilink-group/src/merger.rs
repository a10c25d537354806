//! Receiver merge engine
//!
//! Packets for the same stream arrive over several member links, possibly
//! duplicated. The merger keeps one look-ahead position per member, feeds
//! the application a single monotonically increasing sequence, suppresses
//! duplicates and accounts for packets no member ever produced.

use crate::error::GroupError;
use bytes::Bytes;
use multilink_protocol::{LinkId, MsgCtrl, SeqNumber, Timestamp};
use std::collections::HashMap;
use std::time::Duration;

/// One buffered look-ahead packet for a member.
struct ReadPos {
    seq: SeqNumber,
    payload: Bytes,
    ctrl: MsgCtrl,
    token: i32,
    buffered_at: Timestamp,
    /// Packets become deliverable once the member's ACK covers them.
    deliverable: bool,
}

/// Per-group receive state merging all member links into one stream.
pub struct ReceiverMerger {
    positions: HashMap<LinkId, ReadPos>,
    /// Sequence of the last packet handed to the application. `None` until
    /// the first delivery defines the epoch.
    base_seq: Option<SeqNumber>,
    tsbpd_delay: Duration,
    tlpktdrop: bool,
    recv_discard_pkts: u64,
    recv_discard_bytes: u64,
    recv_drop_pkts: u64,
}

impl ReceiverMerger {
    pub fn new(tsbpd_delay: Duration, tlpktdrop: bool) -> Self {
        ReceiverMerger {
            positions: HashMap::new(),
            base_seq: None,
            tsbpd_delay,
            tlpktdrop,
            recv_discard_pkts: 0,
            recv_discard_bytes: 0,
            recv_drop_pkts: 0,
        }
    }

    pub fn set_policy(&mut self, tsbpd_delay: Duration, tlpktdrop: bool) {
        self.tsbpd_delay = tsbpd_delay;
        self.tlpktdrop = tlpktdrop;
    }

    pub fn base_seq(&self) -> Option<SeqNumber> {
        self.base_seq
    }

    pub fn recv_discard_pkts(&self) -> u64 {
        self.recv_discard_pkts
    }

    pub fn recv_discard_bytes(&self) -> u64 {
        self.recv_discard_bytes
    }

    pub fn recv_drop_pkts(&self) -> u64 {
        self.recv_drop_pkts
    }

    /// Register a packet newly arrived in order at `member`.
    ///
    /// `exp_seq` is the sequence previously received at that member. Returns
    /// a bitmap covering `(exp_seq, seq)` exclusive where `false` marks
    /// sequences still unseen across all members — the true group-level
    /// losses. Sequences already delivered or buffered elsewhere are `true`.
    pub fn provide_packet(
        &mut self,
        exp_seq: SeqNumber,
        seq: SeqNumber,
        member: LinkId,
        token: i32,
        payload: Bytes,
        ctrl: MsgCtrl,
    ) -> Vec<bool> {
        let gap = exp_seq.distance_to(seq) - 1;
        let mut bitmap = Vec::with_capacity(gap.max(0) as usize);
        for i in 1..=gap.max(0) {
            let s = exp_seq + i as u32;
            let seen = self.base_seq.map_or(false, |b| s.le(b))
                || self.positions.values().any(|p| p.seq == s);
            bitmap.push(seen);
        }

        // Already delivered to the application.
        if let Some(base) = self.base_seq {
            if seq.le(base) {
                self.count_discard(payload.len());
                return bitmap;
            }
        }

        // Buffered by another member: the later arrival is the duplicate.
        if self
            .positions
            .iter()
            .any(|(id, p)| *id != member && p.seq == seq)
        {
            self.count_discard(payload.len());
            return bitmap;
        }

        match self.positions.get(&member) {
            Some(existing) if existing.seq == seq => {
                self.count_discard(payload.len());
            }
            Some(_) => {
                // At most one look-ahead per member; a second packet has to
                // wait in the link until the first is consumed.
                tracing::debug!(member, %seq, "look-ahead slot occupied, packet deferred");
            }
            None => {
                self.positions.insert(
                    member,
                    ReadPos {
                        seq,
                        payload,
                        ctrl,
                        token,
                        buffered_at: Timestamp::now(),
                        deliverable: false,
                    },
                );
            }
        }

        bitmap
    }

    /// Promote `member`'s buffered packet to deliverable if the ACK covers
    /// it (`ack_seq` is past-the-last acknowledged sequence).
    pub fn ready_packets(&mut self, member: LinkId, ack_seq: SeqNumber) {
        if let Some(pos) = self.positions.get_mut(&member) {
            if pos.seq.lt(ack_seq) {
                pos.deliverable = true;
            }
        }
    }

    /// Pull the next packet of the merged stream into `buf`.
    pub fn recv(&mut self, buf: &mut [u8], ctrl: &mut MsgCtrl) -> Result<usize, GroupError> {
        let chosen = match self.base_seq {
            None => self.pick_lowest_deliverable(),
            Some(base) => {
                let target = base.next();
                match self.find_deliverable_at(target) {
                    Some(id) => Some(id),
                    None => self.check_packet_ahead(base)?,
                }
            }
        };

        let member = chosen.ok_or(GroupError::WouldBlock)?;
        let n = {
            let pos = self
                .positions
                .get(&member)
                .ok_or(GroupError::InternalInvariant("chosen read position vanished"))?;
            if buf.len() < pos.payload.len() {
                return Err(GroupError::BadOption(format!(
                    "receive buffer of {} bytes is smaller than the {}-byte payload",
                    buf.len(),
                    pos.payload.len()
                )));
            }
            pos.payload.len()
        };

        let pos = self
            .positions
            .remove(&member)
            .ok_or(GroupError::InternalInvariant("chosen read position vanished"))?;
        buf[..n].copy_from_slice(&pos.payload);
        ctrl.pktseq = Some(pos.seq);
        ctrl.msgno = pos.ctrl.msgno;
        ctrl.src_time = pos.ctrl.src_time;
        ctrl.in_order = pos.ctrl.in_order;
        ctrl.src_id = Some(member);
        self.base_seq = Some(pos.seq);
        self.evict_stale(pos.seq);
        Ok(n)
    }

    /// Whether a `recv` right now would return a packet.
    pub fn has_deliverable_next(&self) -> bool {
        match self.base_seq {
            None => self.positions.values().any(|p| p.deliverable),
            Some(base) => {
                let target = base.next();
                self.positions.values().any(|p| {
                    p.deliverable
                        && (p.seq == target
                            || (self.tlpktdrop && p.buffered_at.elapsed() >= self.tsbpd_delay))
                })
            }
        }
    }

    /// Forget the look-ahead packet of a wiped member.
    pub fn drop_member(&mut self, member: LinkId) {
        self.positions.remove(&member);
    }

    /// Start a fresh delivery epoch, as when the member table empties.
    pub fn reset(&mut self) {
        self.positions.clear();
        self.base_seq = None;
    }

    /// Look-ahead delivery when the head of line never materialized.
    ///
    /// Strictly contiguous delivery is required unless the too-late-packet
    /// drop policy is on, in which case a packet that has waited out the
    /// delivery delay is promoted and the skipped range is charged as
    /// dropped.
    fn check_packet_ahead(&mut self, base: SeqNumber) -> Result<Option<LinkId>, GroupError> {
        let ahead = match self.pick_lowest_deliverable() {
            Some(id) => id,
            None => return Ok(None),
        };
        if !self.tlpktdrop {
            return Err(GroupError::SeqDiscontinuity);
        }
        let (seq, waited) = {
            let pos = &self.positions[&ahead];
            (pos.seq, pos.buffered_at.elapsed())
        };
        if waited < self.tsbpd_delay {
            return Err(GroupError::SeqDiscontinuity);
        }
        let skipped = (base.distance_to(seq) - 1).max(0) as u64;
        self.recv_drop_pkts += skipped;
        tracing::debug!(%seq, skipped, "advancing past packets that never arrived");
        Ok(Some(ahead))
    }

    fn find_deliverable_at(&self, target: SeqNumber) -> Option<LinkId> {
        self.positions
            .iter()
            .find(|(_, p)| p.deliverable && p.seq == target)
            .map(|(id, _)| *id)
    }

    fn pick_lowest_deliverable(&self) -> Option<LinkId> {
        self.positions
            .iter()
            .filter(|(_, p)| p.deliverable)
            .min_by(|(_, a), (_, b)| {
                // Lowest sequence first; ties broken by delivery-clock
                // timestamp, then by member token.
                match a.seq.distance_to(b.seq).cmp(&0).reverse() {
                    std::cmp::Ordering::Equal => (a.ctrl.src_time, a.token)
                        .cmp(&(b.ctrl.src_time, b.token)),
                    other => other,
                }
            })
            .map(|(id, _)| *id)
    }

    /// Positions at or below the delivered sequence are duplicates now.
    fn evict_stale(&mut self, delivered: SeqNumber) {
        let stale: Vec<(LinkId, usize)> = self
            .positions
            .iter()
            .filter(|(_, p)| p.seq.le(delivered))
            .map(|(id, p)| (*id, p.payload.len()))
            .collect();
        for (id, bytes) in stale {
            self.positions.remove(&id);
            self.count_discard(bytes);
        }
    }

    fn count_discard(&mut self, bytes: usize) {
        self.recv_discard_pkts += 1;
        self.recv_discard_bytes += bytes as u64;
    }
}
