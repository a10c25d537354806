//! Connection group core
//!
//! A group bonds several member links into one logical endpoint with a
//! single send/receive surface. This module owns the group lock, the busy
//! refcount that keeps the garbage collector away from a group mid-call,
//! the option set, group-time anchors and the lifecycle flags. The actual
//! dispatch strategies live in `broadcast` and `backup`.

use crate::error::GroupError;
use crate::member::{MemberTable, SocketData};
use crate::merger::ReceiverMerger;
use crate::readiness::{PollNotifier, ReadinessBridge};
use crate::retx::SenderRetxBuffer;
use crate::storage::{StorageHandle, LIVE_DEF_PAYLOAD, SHARED_STORAGE};
use bytes::Bytes;
use multilink_protocol::{
    encode_bool, encode_i32, first_msgno, fresh_isn, ConfigItem, EpollId, GroupId, GroupType,
    HandshakeSide, Link, LinkId, LinkStatus, MemberData, MemberState, MsgCtrl, MsgNumber,
    OptionCode, SeqNumber, Timestamp,
};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Handshake extension flag: peers number messages in lockstep.
pub const FLAG_SYNC_ON_MSGNO: u32 = 0x40;

/// Messages retained for backup catch-up before oldest-unacked eviction.
const RETX_BUFFER_CAP: usize = 1000;

const DEFAULT_TSBPD_DELAY: Duration = Duration::from_millis(120);
const DEFAULT_STABILITY_TIMEOUT: Duration = Duration::from_millis(80);

/// Options consumed at the group level.
#[derive(Debug, Clone)]
pub struct GroupOptions {
    pub rcv_syn: bool,
    pub snd_syn: bool,
    /// `None` means wait forever.
    pub rcv_timeout: Option<Duration>,
    pub snd_timeout: Option<Duration>,
    pub tsbpd_mode: bool,
    pub tsbpd_delay: Duration,
    pub tlpktdrop: bool,
    pub stability_timeout: Duration,
    pub payload_size: usize,
    pub group_connect: bool,
}

impl Default for GroupOptions {
    fn default() -> Self {
        GroupOptions {
            rcv_syn: true,
            snd_syn: true,
            rcv_timeout: None,
            snd_timeout: None,
            tsbpd_mode: true,
            tsbpd_delay: DEFAULT_TSBPD_DELAY,
            tlpktdrop: true,
            stability_timeout: DEFAULT_STABILITY_TIMEOUT,
            payload_size: LIVE_DEF_PAYLOAD,
            group_connect: false,
        }
    }
}

/// Packet/byte counter pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Metric {
    pub pkts: u64,
    pub bytes: u64,
}

impl Metric {
    fn count(&mut self, bytes: usize) {
        self.pkts += 1;
        self.bytes += bytes as u64;
    }
}

/// Group statistics snapshot.
#[derive(Debug, Clone)]
pub struct GroupStats {
    /// Messages accepted from the application.
    pub sent: Metric,
    /// Messages delivered to the application.
    pub recv: Metric,
    /// Packets not received from any member (drop bytes are estimated from
    /// the average payload size).
    pub recv_drop: Metric,
    /// Packets discarded as already delivered or duplicated.
    pub recv_discard: Metric,
    pub member_count: usize,
    pub running_members: usize,
    /// Time since the stats were last cleared.
    pub elapsed: Duration,
    /// Time since the group carried its first data packet, if any.
    pub since_activation: Option<Duration>,
}

struct StatsInner {
    activate_time: Option<Timestamp>,
    last_sample: Timestamp,
    sent: Metric,
    recv: Metric,
    drop_pkts_base: u64,
    discard_pkts_base: u64,
    discard_bytes_base: u64,
}

impl StatsInner {
    fn new() -> Self {
        StatsInner {
            activate_time: None,
            last_sample: Timestamp::now(),
            sent: Metric::default(),
            recv: Metric::default(),
            drop_pkts_base: 0,
            discard_pkts_base: 0,
            discard_bytes_base: 0,
        }
    }
}

/// Everything guarded by the group lock.
pub(crate) struct GroupInner {
    pub(crate) id: GroupId,
    pub(crate) peer_group_id: Option<GroupId>,
    pub(crate) group_type: GroupType,
    pub(crate) managed: bool,
    pub(crate) sync_on_msgno: bool,
    pub(crate) opened: bool,
    pub(crate) connected: bool,
    pub(crate) closing: bool,
    pub(crate) busy: i32,
    pub(crate) members: MemberTable,
    pub(crate) merger: ReceiverMerger,
    pub(crate) retx: SenderRetxBuffer,
    pub(crate) bridge: ReadinessBridge,
    pub(crate) config: Vec<ConfigItem>,
    pub(crate) opts: GroupOptions,
    /// Sequence number the next message will be scheduled with. Every
    /// running member emits this number for the same message.
    pub(crate) last_sched_seq: SeqNumber,
    pub(crate) last_sched_msgno: MsgNumber,
    /// Set once the first connected member defines the schedule.
    pub(crate) seq_defined: bool,
    pub(crate) start_time: Option<Timestamp>,
    pub(crate) peer_start_time: Option<Timestamp>,
    stats: StatsInner,
    avg_payload_size: Option<usize>,
}

impl GroupInner {
    /// Route a send to the strategy for this group type.
    pub(crate) fn send_dispatch(
        &mut self,
        buf: &[u8],
        ctrl: &mut MsgCtrl,
    ) -> Result<usize, GroupError> {
        if buf.len() > self.opts.payload_size {
            return Err(GroupError::BadOption(format!(
                "payload of {} bytes exceeds the configured maximum of {}",
                buf.len(),
                self.opts.payload_size
            )));
        }
        let res = match self.group_type {
            GroupType::Broadcast => self.send_broadcast(buf, ctrl),
            GroupType::Backup => self.send_backup(buf, ctrl),
            GroupType::Multicast => Err(GroupError::BadOption(
                "multicast groups are not implemented".into(),
            )),
        };
        if let Ok(n) = res {
            self.stats.sent.count(n);
            if self.stats.activate_time.is_none() {
                self.stats.activate_time = Some(Timestamp::now());
            }
        }
        self.refresh_writable();
        res
    }

    /// Pull the next merged packet and fill the caller's control block.
    pub(crate) fn recv_internal(
        &mut self,
        buf: &mut [u8],
        ctrl: &mut MsgCtrl,
    ) -> Result<usize, GroupError> {
        let n = self.merger.recv(buf, ctrl)?;
        if let Some(src) = ctrl.src_id {
            if let Some(d) = self.members.find_mut(src) {
                d.recv_result = n as i32;
            }
        }
        ctrl.group_data = self.members.member_data();
        self.stats.recv.count(n);
        if self.stats.activate_time.is_none() {
            self.stats.activate_time = Some(Timestamp::now());
        }
        self.update_avg_payload(n);
        self.refresh_readable();
        Ok(n)
    }

    /// Close and wipe the given members, publishing a failure event each.
    pub(crate) fn close_broken_members(&mut self, wipeme: &[LinkId]) {
        for &id in wipeme {
            if let Some(d) = self.members.find(id) {
                if let Some(link) = d.upgrade() {
                    link.close();
                }
            }
            if self.members.remove(id) {
                self.merger.drop_member(id);
                self.bridge.link_failed(id);
                tracing::warn!(group = self.id, link = id, "wiped broken member link");
            }
        }
        if self.members.is_empty() && !wipeme.is_empty() {
            self.on_table_emptied();
        }
    }

    /// Transition to the empty table: fresh delivery epoch on the next
    /// connection, lifecycle flags cleared, sticky error published.
    pub(crate) fn on_table_emptied(&mut self) {
        self.last_sched_seq = fresh_isn();
        self.last_sched_msgno = first_msgno();
        self.seq_defined = false;
        self.merger.reset();
        self.retx.reset(first_msgno());
        let was_open = self.opened;
        self.opened = false;
        self.connected = false;
        if was_open && !self.closing {
            self.bridge.table_emptied();
        }
        tracing::debug!(group = self.id, "member table emptied, receive state reset");
    }

    /// Writable while at least one idle-or-running member has buffer space.
    pub(crate) fn refresh_writable(&mut self) {
        let mut writable = false;
        for d in self.members.iter_mut() {
            let link_writable = d
                .upgrade()
                .map(|l| l.is_writable())
                .unwrap_or(false);
            d.ready_write = link_writable;
            if link_writable
                && matches!(d.send_state, MemberState::Idle | MemberState::Running)
            {
                writable = true;
            }
        }
        self.bridge.set_writable(writable);
    }

    pub(crate) fn refresh_readable(&mut self) {
        self.bridge.set_readable(self.merger.has_deliverable_next());
    }

    pub(crate) fn update_avg_payload(&mut self, size: usize) {
        self.avg_payload_size = Some(match self.avg_payload_size {
            // Infinite impulse response average, weight 1/4 on the sample.
            Some(avg) => (avg * 3 + size) / 4,
            None => size,
        });
    }

    pub(crate) fn avg_payload(&self) -> usize {
        self.avg_payload_size.unwrap_or(LIVE_DEF_PAYLOAD)
    }

    fn apply_config_item(&mut self, item: &ConfigItem) -> Result<(), GroupError> {
        let bad = |what: &str| GroupError::BadOption(format!("{} for {}", what, item.code));
        match item.code {
            OptionCode::RcvSyn => self.opts.rcv_syn = item.read_bool().ok_or(bad("bad value"))?,
            OptionCode::SndSyn => self.opts.snd_syn = item.read_bool().ok_or(bad("bad value"))?,
            OptionCode::RcvTimeo => {
                self.opts.rcv_timeout = decode_timeout(item.read_i32().ok_or(bad("bad value"))?)?
            }
            OptionCode::SndTimeo => {
                self.opts.snd_timeout = decode_timeout(item.read_i32().ok_or(bad("bad value"))?)?
            }
            OptionCode::TsbpdMode => {
                self.opts.tsbpd_mode = item.read_bool().ok_or(bad("bad value"))?
            }
            OptionCode::TsbpdDelay => {
                let ms = item.read_i32().ok_or(bad("bad value"))?;
                if ms < 0 {
                    return Err(bad("negative delay"));
                }
                self.opts.tsbpd_delay = Duration::from_millis(ms as u64);
                self.merger
                    .set_policy(self.opts.tsbpd_delay, self.opts.tlpktdrop);
            }
            OptionCode::TlPktDrop => {
                self.opts.tlpktdrop = item.read_bool().ok_or(bad("bad value"))?;
                self.merger
                    .set_policy(self.opts.tsbpd_delay, self.opts.tlpktdrop);
            }
            OptionCode::StabilityTimeout => {
                let ms = item.read_i32().ok_or(bad("bad value"))?;
                if ms <= 0 {
                    return Err(bad("non-positive timeout"));
                }
                self.opts.stability_timeout = Duration::from_millis(ms as u64);
            }
            OptionCode::PayloadSize => {
                let size = item.read_i32().ok_or(bad("bad value"))?;
                if size <= 0 || size as usize > crate::storage::LIVE_MAX_PAYLOAD {
                    return Err(bad("payload size out of range"));
                }
                self.opts.payload_size = size as usize;
            }
            OptionCode::GroupType => {
                if self.opened {
                    return Err(GroupError::BadOption(
                        "group type is fixed once a member is attached".into(),
                    ));
                }
                self.group_type = match item.read_i32().ok_or(bad("bad value"))? {
                    0 => GroupType::Broadcast,
                    1 => GroupType::Backup,
                    2 => GroupType::Multicast,
                    other => {
                        return Err(GroupError::BadOption(format!(
                            "unknown group type code {}",
                            other
                        )))
                    }
                };
            }
            OptionCode::GroupConnect => {
                self.opts.group_connect = item.read_bool().ok_or(bad("bad value"))?
            }
            OptionCode::Weight => {
                return Err(GroupError::BadOption(
                    "weight is configured per member at attach".into(),
                ))
            }
        }
        Ok(())
    }

    /// Remember a member-scoped option so later attaches inherit it.
    fn store_config_item(&mut self, item: ConfigItem) {
        if let Some(existing) = self.config.iter_mut().find(|c| c.code == item.code) {
            *existing = item;
        } else {
            self.config.push(item);
        }
    }
}

/// Decode a millisecond timeout where -1 means infinite.
fn decode_timeout(ms: i32) -> Result<Option<Duration>, GroupError> {
    match ms {
        -1 => Ok(None),
        ms if ms >= 0 => Ok(Some(Duration::from_millis(ms as u64))),
        _ => Err(GroupError::BadOption("negative timeout".into())),
    }
}

/// Option codes that travel from the group config onto each member link.
const MEMBER_SCOPED: [OptionCode; 5] = [
    OptionCode::TsbpdMode,
    OptionCode::TsbpdDelay,
    OptionCode::TlPktDrop,
    OptionCode::PayloadSize,
    OptionCode::StabilityTimeout,
];

/// RAII increment of the busy refcount; the garbage collector will not
/// reclaim a group while any guard is alive.
pub struct ApiGuard<'a> {
    group: &'a GroupCore,
}

impl Drop for ApiGuard<'_> {
    fn drop(&mut self) {
        self.group.inner.lock().busy -= 1;
    }
}

/// One bonded connection group.
pub struct GroupCore {
    id: GroupId,
    inner: Mutex<GroupInner>,
    rcv_lock: Mutex<()>,
    rcv_cond: Condvar,
    snd_lock: Mutex<()>,
    snd_cond: Condvar,
}

impl GroupCore {
    pub fn new(id: GroupId, group_type: GroupType) -> Self {
        Self::with_notifier(id, group_type, None)
    }

    pub fn with_notifier(
        id: GroupId,
        group_type: GroupType,
        notifier: Option<Arc<dyn PollNotifier>>,
    ) -> Self {
        Self::with_storage(id, group_type, notifier, Arc::clone(&SHARED_STORAGE))
    }

    /// Construct with a private payload storage pool (tests, tooling).
    pub fn with_storage(
        id: GroupId,
        group_type: GroupType,
        notifier: Option<Arc<dyn PollNotifier>>,
        storage: StorageHandle,
    ) -> Self {
        let opts = GroupOptions::default();
        let merger = ReceiverMerger::new(opts.tsbpd_delay, opts.tlpktdrop);
        GroupCore {
            id,
            inner: Mutex::new(GroupInner {
                id,
                peer_group_id: None,
                group_type,
                managed: true,
                sync_on_msgno: false,
                opened: false,
                connected: false,
                closing: false,
                busy: 0,
                members: MemberTable::new(),
                merger,
                retx: SenderRetxBuffer::new(storage, first_msgno(), RETX_BUFFER_CAP),
                bridge: ReadinessBridge::new(id, notifier),
                config: Vec::new(),
                opts,
                last_sched_seq: fresh_isn(),
                last_sched_msgno: first_msgno(),
                seq_defined: false,
                start_time: None,
                peer_start_time: None,
                stats: StatsInner::new(),
                avg_payload_size: None,
            }),
            rcv_lock: Mutex::new(()),
            rcv_cond: Condvar::new(),
            snd_lock: Mutex::new(()),
            snd_cond: Condvar::new(),
        }
    }

    pub fn id(&self) -> GroupId {
        self.id
    }

    pub fn group_type(&self) -> GroupType {
        self.inner.lock().group_type
    }

    pub fn peer_group_id(&self) -> Option<GroupId> {
        self.inner.lock().peer_group_id
    }

    pub fn set_peer_group_id(&self, peer: GroupId) {
        self.inner.lock().peer_group_id = Some(peer);
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().opened
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().connected
    }

    pub fn is_closing(&self) -> bool {
        self.inner.lock().closing
    }

    pub fn is_managed(&self) -> bool {
        self.inner.lock().managed
    }

    pub fn set_managed(&self, managed: bool) {
        self.inner.lock().managed = managed;
    }

    pub fn sync_on_msgno(&self) -> bool {
        self.inner.lock().sync_on_msgno
    }

    /// Mark the group open without a member, as on the accept path where
    /// the group is created lazily just before the first socket lands.
    pub fn set_open(&self) {
        self.inner.lock().opened = true;
    }

    /// Enter an API call: pins the group against reclamation.
    pub fn api_acquire(&self) -> ApiGuard<'_> {
        self.inner.lock().busy += 1;
        ApiGuard { group: self }
    }

    /// Whether the garbage collector must leave the group alone.
    pub fn is_still_busy(&self) -> bool {
        let inner = self.inner.lock();
        inner.busy > 0 || !inner.members.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn busy_count(&self) -> i32 {
        self.inner.lock().busy
    }

    /// Attach a link as a new member. Stored member-scoped options are
    /// pushed onto the link before it appears in the table.
    pub fn add_member(&self, link: Arc<dyn Link>, weight: u16) -> Result<LinkId, GroupError> {
        let _busy = self.api_acquire();
        let mut inner = self.inner.lock();
        if inner.closing {
            return Err(GroupError::Closed);
        }
        if inner.group_type == GroupType::Multicast {
            return Err(GroupError::BadOption(
                "multicast groups are not implemented".into(),
            ));
        }
        let id = link.id();
        if inner.members.find(id).is_some() {
            return Err(GroupError::BadOption(format!(
                "link {} is already a member",
                id
            )));
        }
        for item in inner.config.clone() {
            if let Err(err) = link.set_option(item.code, &item.value) {
                tracing::warn!(group = self.id, link = id, option = %item.code, error = %err,
                    "member link rejected derived option");
            }
        }
        let data = SocketData::prepare(&link, weight);
        inner.members.add(data);
        inner.opened = true;
        if link.status() == LinkStatus::Connected {
            inner.connected = true;
            let now = Timestamp::now();
            if inner.start_time.is_none() {
                inner.start_time = Some(now);
                inner.peer_start_time = Some(now);
            }
            // The first connected member defines the group schedule; every
            // later one is forced onto it.
            if inner.seq_defined {
                link.override_send_seq(inner.last_sched_seq);
            } else {
                inner.seq_defined = true;
                inner.last_sched_seq = link.snd_isn();
            }
        }
        inner.refresh_writable();
        tracing::info!(group = self.id, link = id, weight, "member link attached");
        drop(inner);
        self.snd_cond.notify_all();
        Ok(id)
    }

    /// Detach a member. The caller must already have detached the link from
    /// this group on its side.
    pub fn remove_member(&self, id: LinkId) -> Result<(), GroupError> {
        let _busy = self.api_acquire();
        let mut inner = self.inner.lock();
        if !inner.members.remove(id) {
            return Err(GroupError::BadOption(format!("no member with id {}", id)));
        }
        inner.merger.drop_member(id);
        if inner.members.is_empty() {
            inner.on_table_emptied();
        }
        inner.refresh_writable();
        inner.refresh_readable();
        tracing::info!(group = self.id, link = id, "member link detached");
        Ok(())
    }

    /// Send one message through the group strategy. In blocking mode the
    /// call waits for a writable member up to the send timeout.
    pub fn send(&self, buf: &[u8], ctrl: &mut MsgCtrl) -> Result<usize, GroupError> {
        let _busy = self.api_acquire();
        let mut deadline = None;
        let mut deadline_armed = false;
        loop {
            let mut inner = self.inner.lock();
            if inner.closing {
                return Err(GroupError::Closed);
            }
            let blocking = inner.opts.snd_syn;
            if !deadline_armed {
                deadline = inner.opts.snd_timeout.map(|t| Instant::now() + t);
                deadline_armed = true;
            }
            match inner.send_dispatch(buf, ctrl) {
                Err(GroupError::WouldBlock) if blocking => {
                    drop(inner);
                    if !self.wait_on(&self.snd_cond, &self.snd_lock, deadline) {
                        return Err(GroupError::Timeout);
                    }
                }
                other => return other,
            }
        }
    }

    /// Receive the next message of the merged stream. In blocking mode the
    /// call waits on the receive-data condition up to the receive timeout.
    pub fn recv(&self, buf: &mut [u8], ctrl: &mut MsgCtrl) -> Result<usize, GroupError> {
        let _busy = self.api_acquire();
        let mut deadline = None;
        let mut deadline_armed = false;
        loop {
            let mut inner = self.inner.lock();
            if inner.closing {
                return Err(GroupError::Closed);
            }
            let blocking = inner.opts.rcv_syn;
            if !deadline_armed {
                deadline = inner.opts.rcv_timeout.map(|t| Instant::now() + t);
                deadline_armed = true;
            }
            match inner.recv_internal(buf, ctrl) {
                Err(GroupError::WouldBlock) | Err(GroupError::SeqDiscontinuity) if blocking => {
                    drop(inner);
                    if !self.wait_on(&self.rcv_cond, &self.rcv_lock, deadline) {
                        return Err(GroupError::Timeout);
                    }
                }
                // A gap pending its drop deadline looks like "nothing yet"
                // to a non-blocking caller.
                Err(GroupError::SeqDiscontinuity) => return Err(GroupError::WouldBlock),
                other => return other,
            }
        }
    }

    /// Close the group: mark closing, close and drop all members, wake all
    /// waiters. Further calls fail with `Closed`; callbacks become no-ops.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closing = true;
        let ids: Vec<LinkId> = inner.members.iter().map(|d| d.id).collect();
        for id in ids {
            if let Some(link) = inner.members.find(id).and_then(|d| d.upgrade()) {
                link.close();
            }
            inner.members.remove(id);
            inner.merger.drop_member(id);
        }
        inner.opened = false;
        inner.connected = false;
        inner.bridge.clear();
        drop(inner);
        self.rcv_cond.notify_all();
        self.snd_cond.notify_all();
        tracing::info!(group = self.id, "group closed");
    }

    pub fn set_opt(&self, code: OptionCode, value: &[u8]) -> Result<(), GroupError> {
        let _busy = self.api_acquire();
        let mut inner = self.inner.lock();
        if inner.closing {
            return Err(GroupError::Closed);
        }
        let item = ConfigItem::new(code, value).ok_or_else(|| {
            GroupError::BadOption(format!(
                "option {} takes {} bytes, got {}",
                code,
                code.value_len(),
                value.len()
            ))
        })?;
        inner.apply_config_item(&item)?;
        if MEMBER_SCOPED.contains(&code) {
            inner.store_config_item(item);
        }
        Ok(())
    }

    pub fn get_opt(&self, code: OptionCode) -> Result<Vec<u8>, GroupError> {
        let inner = self.inner.lock();
        let value = match code {
            OptionCode::RcvSyn => encode_bool(inner.opts.rcv_syn),
            OptionCode::SndSyn => encode_bool(inner.opts.snd_syn),
            OptionCode::RcvTimeo => encode_i32(encode_timeout(inner.opts.rcv_timeout)),
            OptionCode::SndTimeo => encode_i32(encode_timeout(inner.opts.snd_timeout)),
            OptionCode::TsbpdMode => encode_bool(inner.opts.tsbpd_mode),
            OptionCode::TsbpdDelay => encode_i32(inner.opts.tsbpd_delay.as_millis() as i32),
            OptionCode::TlPktDrop => encode_bool(inner.opts.tlpktdrop),
            OptionCode::StabilityTimeout => {
                encode_i32(inner.opts.stability_timeout.as_millis() as i32)
            }
            OptionCode::PayloadSize => encode_i32(inner.opts.payload_size as i32),
            OptionCode::GroupType => encode_i32(match inner.group_type {
                GroupType::Broadcast => 0,
                GroupType::Backup => 1,
                GroupType::Multicast => 2,
            }),
            OptionCode::GroupConnect => encode_bool(inner.opts.group_connect),
            OptionCode::Weight => {
                return Err(GroupError::BadOption(
                    "weight is read per member from the group data".into(),
                ))
            }
        };
        Ok(value)
    }

    /// Parse a comma-separated `key=value` configuration string.
    pub fn configure(&self, input: &str) -> Result<(), GroupError> {
        for part in input.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (key, value) = part.split_once('=').ok_or_else(|| {
                GroupError::BadOption(format!("expected key=value, got {:?}", part))
            })?;
            match key {
                "type" => {
                    let code: i32 = match value {
                        "broadcast" => 0,
                        "backup" => 1,
                        other => {
                            return Err(GroupError::BadOption(format!(
                                "unknown group type {:?}",
                                other
                            )))
                        }
                    };
                    self.set_opt(OptionCode::GroupType, &encode_i32(code))?;
                }
                other => {
                    return Err(GroupError::BadOption(format!(
                        "unknown configuration key {:?}",
                        other
                    )))
                }
            }
        }
        Ok(())
    }

    /// Fill `out` with the per-member status array. Returns the count.
    pub fn get_group_data(&self, out: &mut Vec<MemberData>) -> usize {
        let inner = self.inner.lock();
        *out = inner.members.member_data();
        out.len()
    }

    /// Read the statistics, optionally resetting the interval counters.
    pub fn stats(&self, clear: bool) -> GroupStats {
        let mut inner = self.inner.lock();
        let drop_pkts = inner.merger.recv_drop_pkts() - inner.stats.drop_pkts_base;
        let discard_pkts = inner.merger.recv_discard_pkts() - inner.stats.discard_pkts_base;
        let discard_bytes = inner.merger.recv_discard_bytes() - inner.stats.discard_bytes_base;
        let avg = inner.avg_payload() as u64;
        let snapshot = GroupStats {
            sent: inner.stats.sent,
            recv: inner.stats.recv,
            recv_drop: Metric {
                pkts: drop_pkts,
                bytes: drop_pkts * avg,
            },
            recv_discard: Metric {
                pkts: discard_pkts,
                bytes: discard_bytes,
            },
            member_count: inner.members.len(),
            running_members: inner
                .members
                .iter()
                .filter(|d| d.send_state == MemberState::Running)
                .count(),
            elapsed: inner.stats.last_sample.elapsed(),
            since_activation: inner.stats.activate_time.map(|t| t.elapsed()),
        };
        if clear {
            inner.stats.sent = Metric::default();
            inner.stats.recv = Metric::default();
            inner.stats.drop_pkts_base = inner.merger.recv_drop_pkts();
            inner.stats.discard_pkts_base = inner.merger.recv_discard_pkts();
            inner.stats.discard_bytes_base = inner.merger.recv_discard_bytes();
            inner.stats.last_sample = Timestamp::now();
        }
        snapshot
    }

    pub fn add_epoll(&self, eid: EpollId) {
        self.inner.lock().bridge.add(eid);
    }

    pub fn remove_epoll(&self, eid: EpollId) {
        self.inner.lock().bridge.remove(eid);
    }

    /// Link callback: a new in-order packet arrived at `link_id`.
    ///
    /// Returns the group-level loss bitmap for the gap since `exp_seq`
    /// (`false` marks sequences unseen on every member).
    pub fn on_packet(
        &self,
        link_id: LinkId,
        exp_seq: SeqNumber,
        seq: SeqNumber,
        payload: Bytes,
        ctrl: MsgCtrl,
    ) -> Vec<bool> {
        let mut inner = self.inner.lock();
        if inner.closing {
            return Vec::new();
        }
        let token = match inner.members.find_mut(link_id) {
            Some(d) => {
                d.recv_state = MemberState::Running;
                d.ready_read = true;
                d.recv_result = payload.len() as i32;
                d.token
            }
            None => return Vec::new(),
        };
        let bytes = payload.len();
        let bitmap = inner
            .merger
            .provide_packet(exp_seq, seq, link_id, token, payload, ctrl);
        inner.update_avg_payload(bytes);
        inner.refresh_readable();
        drop(inner);
        self.rcv_cond.notify_all();
        bitmap
    }

    /// Link callback: the peer acknowledged everything below `ack_seq` on
    /// `link_id`; `msgno` is the highest message number covered, if known.
    pub fn on_ack(&self, link_id: LinkId, ack_seq: SeqNumber, msgno: Option<MsgNumber>) {
        let mut inner = self.inner.lock();
        if inner.closing {
            return;
        }
        let now = Timestamp::now();
        if let Some(d) = inner.members.find_mut(link_id) {
            d.last_response = now;
            if let Some(m) = msgno {
                d.acked_msgno = Some(match d.acked_msgno {
                    Some(prev) if prev.ge(m) => prev,
                    _ => m,
                });
            }
        }
        inner.merger.ready_packets(link_id, ack_seq);

        // The group's acknowledged watermark is the minimum across every
        // currently-sendable member; a lagging active link keeps the
        // retransmit history alive.
        let mut min_acked: Option<MsgNumber> = None;
        let mut all_have = true;
        for d in inner.members.iter() {
            if d.send_state != MemberState::Running {
                continue;
            }
            match d.acked_msgno {
                Some(m) => {
                    min_acked = Some(match min_acked {
                        Some(cur) if cur.le(m) => cur,
                        _ => m,
                    });
                }
                None => all_have = false,
            }
        }
        if all_have {
            if let Some(m) = min_acked {
                inner.retx.ack(m);
                inner.retx.trim();
            }
        }
        inner.refresh_readable();
        inner.refresh_writable();
        drop(inner);
        self.rcv_cond.notify_all();
        self.snd_cond.notify_all();
    }

    /// Link callback: keepalive from an otherwise silent member counts as
    /// a sign of life for the stability qualifier.
    pub fn on_keepalive(&self, link_id: LinkId) {
        let mut inner = self.inner.lock();
        if inner.closing {
            return;
        }
        if let Some(d) = inner.members.find_mut(link_id) {
            d.last_response = Timestamp::now();
        }
    }

    /// Synchronize the delivery-clock anchors: the first connected member
    /// defines them, later members receive the derived pair. Returns
    /// `(start, peer_start, defined_now)`.
    pub fn apply_group_time(
        &self,
        start_time: Timestamp,
        peer_start_time: Timestamp,
    ) -> (Timestamp, Timestamp, bool) {
        let mut inner = self.inner.lock();
        match (inner.start_time, inner.peer_start_time) {
            (Some(start), Some(peer)) => (start, peer, false),
            _ => {
                inner.start_time = Some(start_time);
                inner.peer_start_time = Some(peer_start_time);
                (start_time, peer_start_time, true)
            }
        }
    }

    /// Synchronize sequence numbering: the first member defines the group
    /// schedule, every later member is forced onto it. Returns
    /// `(snd_isn, rcv_isn, derived)`.
    pub fn apply_group_sequences(
        &self,
        link_id: LinkId,
        snd_isn: SeqNumber,
        rcv_isn: SeqNumber,
    ) -> (SeqNumber, SeqNumber, bool) {
        let mut inner = self.inner.lock();
        if inner.seq_defined {
            let forced = inner.last_sched_seq;
            if let Some(link) = inner.members.find(link_id).and_then(|d| d.upgrade()) {
                link.override_send_seq(forced);
            }
            (forced, rcv_isn, true)
        } else {
            inner.seq_defined = true;
            inner.last_sched_seq = snd_isn;
            (snd_isn, rcv_isn, false)
        }
    }

    /// Copy member-scoped settings from a template link into the group
    /// config so later attaches inherit them.
    pub fn derive_settings(&self, source: &dyn Link) {
        let mut inner = self.inner.lock();
        for code in MEMBER_SCOPED {
            if let Some(value) = source.get_option(code) {
                if let Some(item) = ConfigItem::new(code, &value) {
                    if inner.apply_config_item(&item).is_ok() {
                        inner.store_config_item(item);
                    }
                }
            }
        }
    }

    /// Interpret the group handshake extension flags.
    ///
    /// The responder adopts the initiator's message-number synchronization
    /// flag; the initiator rejects a reply that does not match its own.
    pub fn apply_flags(&self, flags: u32, side: HandshakeSide) -> bool {
        let mut inner = self.inner.lock();
        let sync = flags & FLAG_SYNC_ON_MSGNO != 0;
        match side {
            HandshakeSide::Responder => {
                inner.sync_on_msgno = sync;
                true
            }
            HandshakeSide::Initiator => sync == inner.sync_on_msgno,
        }
    }

    /// Sleep one bounded slice on a condition, honoring the deadline.
    /// Returns false once the deadline has passed.
    fn wait_on(&self, cond: &Condvar, lock: &Mutex<()>, deadline: Option<Instant>) -> bool {
        let mut guard = lock.lock();
        let slice = Duration::from_millis(10);
        let wait_for = match deadline {
            Some(d) => {
                let now = Instant::now();
                if now >= d {
                    return false;
                }
                (d - now).min(slice)
            }
            None => slice,
        };
        cond.wait_for(&mut guard, wait_for);
        true
    }
}

fn encode_timeout(timeout: Option<Duration>) -> i32 {
    match timeout {
        Some(t) => t.as_millis() as i32,
        None => -1,
    }
}
