//! Broadcast send strategy
//!
//! Every message goes to every active member in one call, all members
//! emitting the same sequence number. Idle members are activated on the
//! spot; broken ones are wiped after the loop. The call succeeds as soon as
//! one member carries the message.

use crate::error::GroupError;
use crate::group::GroupInner;
use multilink_protocol::{GroupType, LinkError, LinkId, MemberState, MsgCtrl, SeqNumber};

impl GroupInner {
    /// Send one message over every sendable member.
    pub(crate) fn send_broadcast(
        &mut self,
        buf: &[u8],
        ctrl: &mut MsgCtrl,
    ) -> Result<usize, GroupError> {
        debug_assert!(self.group_type == GroupType::Broadcast);

        // Qualify members: idle-and-ready links activate for this send,
        // pending ones stay queued for a later retry window, dead ones are
        // collected for wiping.
        let mut wipeme: Vec<LinkId> = Vec::new();
        let mut pending: Vec<LinkId> = Vec::new();
        let mut targets: Vec<LinkId> = Vec::new();
        for d in self.members.iter_mut() {
            let link = match d.upgrade() {
                Some(link) => link,
                None => {
                    wipeme.push(d.id);
                    continue;
                }
            };
            d.last_status = link.status();
            if matches!(
                link.status(),
                multilink_protocol::LinkStatus::Broken | multilink_protocol::LinkStatus::Closed
            ) {
                wipeme.push(d.id);
                continue;
            }
            match d.send_state {
                MemberState::Broken => wipeme.push(d.id),
                MemberState::Pending => pending.push(d.id),
                MemberState::Idle => {
                    if link.is_writable() {
                        targets.push(d.id);
                    } else {
                        pending.push(d.id);
                    }
                }
                MemberState::Running => targets.push(d.id),
            }
        }

        let msgno = self.last_sched_msgno;
        let mut curseq: Option<SeqNumber> = None;
        let mut best = 0usize;
        let mut any_success = false;
        let mut final_err: Option<GroupError> = None;

        for id in targets {
            let link = match self.members.find(id).and_then(|d| d.upgrade()) {
                Some(link) => link,
                None => {
                    wipeme.push(id);
                    continue;
                }
            };

            // The first sender picks the number; every later link is forced
            // to emit the same sequence for this message.
            let sched = curseq.unwrap_or(self.last_sched_seq);
            if link.last_sent_seq().next() != sched {
                link.override_send_seq(sched);
            }

            let mut mc = ctrl.clone();
            mc.msgno = Some(msgno);
            mc.group_data = Vec::new();
            match link.send(buf, &mut mc) {
                Ok(n) => {
                    if curseq.is_none() {
                        curseq = mc.pktseq;
                    }
                    if let Some(d) = self.members.find_mut(id) {
                        d.send_state = MemberState::Running;
                        d.send_result = n as i32;
                    }
                    self.members.set_active(id);
                    best = best.max(n);
                    any_success = true;
                }
                Err(LinkError::WouldBlock) => {
                    if let Some(d) = self.members.find_mut(id) {
                        d.send_result = -1;
                        d.ready_write = false;
                    }
                    pending.push(id);
                    GroupError::fold_worst(&mut final_err, GroupError::WouldBlock);
                }
                Err(err) => {
                    if let Some(d) = self.members.find_mut(id) {
                        d.send_result = -1;
                        d.send_state = MemberState::Broken;
                        d.ready_error = true;
                    }
                    wipeme.push(id);
                    GroupError::fold_worst(&mut final_err, GroupError::from_link_send(err.clone()));
                    tracing::warn!(group = self.id, link = id, error = %err,
                        "member send failed hard");
                }
            }
        }

        self.close_broken_members(&wipeme);

        if any_success {
            let used = curseq
                .ok_or(GroupError::InternalInvariant("successful send without a sequence"))?;
            self.last_sched_seq = used.next();
            self.last_sched_msgno = msgno.next();
            ctrl.pktseq = Some(used);
            ctrl.msgno = Some(msgno);
            Ok(best)
        } else if final_err.is_none() && pending.is_empty() {
            Err(GroupError::NoLiveLink)
        } else {
            Err(final_err.unwrap_or(GroupError::NoLiveLink))
        }
    }
}
