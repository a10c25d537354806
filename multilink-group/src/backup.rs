//! Backup send strategy
//!
//! Exactly one running primary carries traffic while idle members stand by
//! hot. A standby is activated when every running link turns unstable, when
//! a higher-weight standby exists, or when nothing is running at all. Every
//! sent message is kept in the retransmit buffer so a freshly activated
//! link can be caught up with the sequence numbers the primary already
//! emitted. After the send, surplus stable running links collapse back to
//! idle.

use crate::error::GroupError;
use crate::group::GroupInner;
use multilink_protocol::{
    GroupType, Link, LinkError, LinkId, LinkStatus, MemberState, MsgCtrl, MsgNumber, SeqNumber,
    Timestamp,
};
use std::sync::Arc;

/// Member qualification for one backup send cycle.
struct Qualification {
    wipeme: Vec<LinkId>,
    /// Idle, link alive and writable; sorted by descending weight.
    idlers: Vec<(LinkId, u16)>,
    pending: Vec<LinkId>,
    /// Running links past the stability window.
    unstable: Vec<LinkId>,
    /// All running links, unstable included.
    sendable: Vec<LinkId>,
}

impl GroupInner {
    /// Send one message over the backup group.
    pub(crate) fn send_backup(
        &mut self,
        buf: &[u8],
        ctrl: &mut MsgCtrl,
    ) -> Result<usize, GroupError> {
        debug_assert!(self.group_type == GroupType::Backup);

        let now = Timestamp::now();
        let mut q = self.qualify_backup_members(now);

        let msgno = self.retx.next_msgno();
        let mut curseq: Option<SeqNumber> = None;
        let mut parallel: Vec<LinkId> = Vec::new();
        let mut nsuccessful = 0usize;
        let mut max_sendable_weight = 0u16;
        let mut final_err: Option<GroupError> = None;

        let sendable = q.sendable.clone();
        for id in sendable {
            self.backup_send_one(
                id,
                buf,
                ctrl,
                msgno,
                &mut curseq,
                &mut parallel,
                &mut nsuccessful,
                &mut max_sendable_weight,
                &mut q.unstable,
                &mut q.wipeme,
                &mut final_err,
            );
        }

        // Members that failed hard are no longer sendable for the
        // activation decision.
        q.sendable.retain(|id| !q.wipeme.contains(id));
        q.unstable.retain(|id| !q.wipeme.contains(id));

        if let Some(reason) =
            self.backup_activation_reason(&q, max_sendable_weight, nsuccessful)
        {
            if !q.idlers.is_empty() {
                self.try_activate_idle_link(
                    &q.idlers,
                    buf,
                    ctrl,
                    msgno,
                    &mut curseq,
                    &mut parallel,
                    &mut nsuccessful,
                    &mut q.wipeme,
                    &mut final_err,
                    reason,
                );
            } else if q.sendable.is_empty() {
                // Pending connections may still come up; only a table with
                // nothing in flight is a dead end.
                if q.pending.is_empty() {
                    GroupError::fold_worst(&mut final_err, GroupError::NoLiveLink);
                } else {
                    GroupError::fold_worst(&mut final_err, GroupError::WouldBlock);
                }
            } else {
                GroupError::fold_worst(&mut final_err, GroupError::AllLinksUnstable);
            }
        }

        self.close_broken_members(&q.wipeme);
        self.check_parallel_links(&parallel, &q.unstable, now);

        if nsuccessful >= 1 {
            let used = curseq
                .ok_or(GroupError::InternalInvariant("successful send without a sequence"))?;
            // The message went out; keep a copy for catch-up on later
            // activations, stamped with the sequence it traveled under.
            // A failed send is not buffered, so a retry reuses its number.
            self.backup_buffer_message(buf, ctrl, curseq, msgno);
            self.last_sched_seq = used.next();
            self.last_sched_msgno = self.retx.next_msgno();
            ctrl.pktseq = Some(used);
            ctrl.msgno = Some(msgno);
            Ok(buf.len())
        } else {
            Err(final_err.unwrap_or(GroupError::NoLiveLink))
        }
    }

    /// Sort members into wipeme / idlers / pending / unstable / sendable.
    fn qualify_backup_members(&mut self, now: Timestamp) -> Qualification {
        let mut q = Qualification {
            wipeme: Vec::new(),
            idlers: Vec::new(),
            pending: Vec::new(),
            unstable: Vec::new(),
            sendable: Vec::new(),
        };
        let stability_timeout = self.opts.stability_timeout;
        for d in self.members.iter_mut() {
            let link = match d.upgrade() {
                Some(link) => link,
                None => {
                    q.wipeme.push(d.id);
                    continue;
                }
            };
            d.last_status = link.status();
            if matches!(link.status(), LinkStatus::Broken | LinkStatus::Closed) {
                q.wipeme.push(d.id);
                continue;
            }
            match d.send_state {
                MemberState::Broken => q.wipeme.push(d.id),
                MemberState::Pending => q.pending.push(d.id),
                MemberState::Idle => {
                    if link.is_writable() {
                        q.idlers.push((d.id, d.weight));
                    } else {
                        q.pending.push(d.id);
                    }
                }
                MemberState::Running => {
                    q.sendable.push(d.id);
                    // A running link is stable while an ACK or keepalive
                    // arrived within the stability window.
                    let last_response = link.last_ack_time().max(d.last_response);
                    if now.duration_since(last_response) >= stability_timeout {
                        q.unstable.push(d.id);
                    }
                }
            }
        }
        q.idlers.sort_by(|a, b| b.1.cmp(&a.1));
        q
    }

    /// Attempt the send on one running member and classify the outcome.
    #[allow(clippy::too_many_arguments)]
    fn backup_send_one(
        &mut self,
        id: LinkId,
        buf: &[u8],
        ctrl: &MsgCtrl,
        msgno: MsgNumber,
        curseq: &mut Option<SeqNumber>,
        parallel: &mut Vec<LinkId>,
        nsuccessful: &mut usize,
        max_sendable_weight: &mut u16,
        unstable: &mut Vec<LinkId>,
        wipeme: &mut Vec<LinkId>,
        final_err: &mut Option<GroupError>,
    ) {
        let (link, weight) = match self.members.find(id) {
            Some(d) => match d.upgrade() {
                Some(link) => (link, d.weight),
                None => {
                    wipeme.push(id);
                    return;
                }
            },
            None => return,
        };

        // Every running link emits the group schedule for this message.
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
                    *curseq = mc.pktseq;
                }
                if let Some(d) = self.members.find_mut(id) {
                    d.send_result = n as i32;
                }
                self.members.set_active(id);
                *max_sendable_weight = (*max_sendable_weight).max(weight);
                *nsuccessful += 1;
                parallel.push(id);
            }
            Err(LinkError::WouldBlock) => {
                if let Some(d) = self.members.find_mut(id) {
                    d.send_result = -1;
                    d.ready_write = false;
                }
                if !unstable.contains(&id) {
                    unstable.push(id);
                }
                GroupError::fold_worst(final_err, GroupError::WouldBlock);
            }
            Err(err) => {
                if let Some(d) = self.members.find_mut(id) {
                    d.send_result = -1;
                    d.send_state = MemberState::Broken;
                    d.ready_error = true;
                }
                wipeme.push(id);
                GroupError::fold_worst(final_err, GroupError::from_link_send(err.clone()));
                tracing::warn!(group = self.id, link = id, error = %err,
                    "primary send failed hard");
            }
        }
    }

    /// Store the message in the retransmit buffer under the sequence it
    /// travels with.
    fn backup_buffer_message(
        &mut self,
        buf: &[u8],
        ctrl: &MsgCtrl,
        curseq: Option<SeqNumber>,
        msgno: MsgNumber,
    ) {
        let mut stored = ctrl.clone();
        stored.pktseq = Some(curseq.unwrap_or(self.last_sched_seq));
        stored.group_data = Vec::new();
        if stored.src_time == 0 {
            if let Some(start) = self.start_time {
                stored.src_time = Timestamp::now().as_micros_since(start).max(1);
            }
        }
        let assigned = self.retx.append(buf, &stored);
        debug_assert_eq!(assigned, msgno);
        if let Some(lost) = self.retx.take_lost_through() {
            tracing::warn!(group = self.id, through = %lost,
                "retransmit buffer overflow evicted unacknowledged messages");
        }
    }

    /// Decide whether a standby must be activated, and why.
    ///
    /// Activation is needed when every sendable link is unstable, when an
    /// idle link outweighs every successful sender, or when nothing is
    /// sendable at all.
    fn backup_activation_reason(
        &self,
        q: &Qualification,
        max_sendable_weight: u16,
        nsuccessful: usize,
    ) -> Option<&'static str> {
        if q.sendable.is_empty() {
            return Some("no running link");
        }
        if q.unstable.len() >= q.sendable.len() {
            return Some("all running links unstable");
        }
        if nsuccessful > 0 {
            if let Some(&(_, top_weight)) = q.idlers.first() {
                if top_weight > max_sendable_weight {
                    return Some("higher-weight standby available");
                }
            }
        }
        None
    }

    /// Promote standbys in descending weight order until one carries the
    /// current message; catch the newcomer up from the retransmit buffer.
    #[allow(clippy::too_many_arguments)]
    fn try_activate_idle_link(
        &mut self,
        idlers: &[(LinkId, u16)],
        buf: &[u8],
        ctrl: &MsgCtrl,
        msgno: MsgNumber,
        curseq: &mut Option<SeqNumber>,
        parallel: &mut Vec<LinkId>,
        nsuccessful: &mut usize,
        wipeme: &mut Vec<LinkId>,
        final_err: &mut Option<GroupError>,
        reason: &'static str,
    ) {
        for &(id, _) in idlers {
            let link = match self.members.find(id).and_then(|d| d.upgrade()) {
                Some(link) => link,
                None => {
                    wipeme.push(id);
                    continue;
                }
            };

            let target = curseq.unwrap_or(self.last_sched_seq);
            let baseline_next = link.last_sent_seq().next();
            link.override_send_seq(target);

            let mut mc = ctrl.clone();
            mc.msgno = Some(msgno);
            mc.group_data = Vec::new();
            match link.send(buf, &mut mc) {
                Ok(n) => {
                    if curseq.is_none() {
                        *curseq = mc.pktseq;
                    }
                    if let Some(d) = self.members.find_mut(id) {
                        d.send_state = MemberState::Running;
                        d.send_result = n as i32;
                        d.last_response = Timestamp::now();
                    }
                    self.members.set_active(id);
                    *nsuccessful += 1;
                    parallel.push(id);
                    tracing::info!(group = self.id, link = id, reason,
                        "activated standby link");

                    let target = curseq.unwrap_or(target);
                    if !self.retx.is_empty() && baseline_next.lt(target) {
                        match self.send_backup_rexmit(&link, baseline_next, target) {
                            Ok(count) => tracing::debug!(group = self.id, link = id, count,
                                "replayed buffered messages to activated link"),
                            Err(err) => tracing::warn!(group = self.id, link = id, error = %err,
                                "catch-up replay incomplete"),
                        }
                    }
                    return;
                }
                Err(LinkError::WouldBlock) => {
                    if let Some(d) = self.members.find_mut(id) {
                        d.send_result = -1;
                        d.ready_write = false;
                    }
                    GroupError::fold_worst(final_err, GroupError::WouldBlock);
                }
                Err(err) => {
                    if let Some(d) = self.members.find_mut(id) {
                        d.send_result = -1;
                        d.send_state = MemberState::Broken;
                        d.ready_error = true;
                    }
                    wipeme.push(id);
                    GroupError::fold_worst(final_err, GroupError::from_link_send(err));
                }
            }
        }
    }

    /// Replay buffered history onto a freshly activated link.
    ///
    /// Messages with sequences in `[from_seq, before_seq)` are re-sent with
    /// their original sequence numbers forced, so the peer sees the same
    /// emissions the previous primary produced. The current message is
    /// outside the range; the caller already sent it fresh.
    fn send_backup_rexmit(
        &mut self,
        link: &Arc<dyn Link>,
        from_seq: SeqNumber,
        before_seq: SeqNumber,
    ) -> Result<usize, GroupError> {
        let oldest_seq = self
            .retx
            .iter()
            .next()
            .and_then(|m| m.ctrl().pktseq)
            .ok_or(GroupError::InternalInvariant("buffered message without a sequence"))?;
        let history_lost = from_seq.lt(oldest_seq);

        let mut replayed = 0usize;
        let mut failure: Option<GroupError> = None;
        for msg in self.retx.iter() {
            let seq = msg
                .ctrl()
                .pktseq
                .ok_or(GroupError::InternalInvariant("buffered message without a sequence"))?;
            if seq.lt(from_seq) {
                continue;
            }
            if !seq.lt(before_seq) {
                break;
            }
            link.override_send_seq(seq);
            let mut mc = msg.ctrl().clone();
            match link.send(msg.payload(), &mut mc) {
                Ok(_) => replayed += 1,
                Err(err) => {
                    failure = Some(GroupError::from_link_send(err));
                    break;
                }
            }
        }

        // Put the link back on schedule behind the current message.
        link.override_send_seq(before_seq.next());

        if let Some(err) = failure {
            return Err(err);
        }
        if history_lost {
            // Part of the needed history was evicted; the peer will see a
            // gap it can only resolve through loss reporting.
            return Err(GroupError::SeqDiscontinuity);
        }
        Ok(replayed)
    }

    /// Collapse surplus running links after the send.
    ///
    /// When more than one running link survived and at least one is stable,
    /// everything but the highest-weight stable link is demoted to idle.
    /// Unstable links are left running.
    fn check_parallel_links(&mut self, parallel: &[LinkId], unstable: &[LinkId], now: Timestamp) {
        if parallel.len() < 2 {
            return;
        }
        let stability_timeout = self.opts.stability_timeout;
        let mut stable: Vec<(LinkId, u16)> = Vec::new();
        for &id in parallel {
            if unstable.contains(&id) {
                continue;
            }
            let d = match self.members.find(id) {
                Some(d) => d,
                None => continue,
            };
            let link = match d.upgrade() {
                Some(link) => link,
                None => continue,
            };
            let last_response = link.last_ack_time().max(d.last_response);
            if now.duration_since(last_response) < stability_timeout {
                stable.push((id, d.weight));
            }
        }
        let keep = match stable.iter().max_by_key(|(_, w)| *w) {
            Some(&(id, _)) => id,
            None => return,
        };
        for (id, _) in stable {
            if id == keep {
                continue;
            }
            if let Some(d) = self.members.find_mut(id) {
                d.send_state = MemberState::Idle;
                tracing::info!(group = self.id, link = id, kept = keep,
                    "demoted surplus running link to standby");
            }
        }
    }
}
