//! Member table
//!
//! One `SocketData` slot per bonded link, kept in attach order. The table
//! carries the last-active cursor used by the sender strategies; the cursor
//! is reset whenever the slot it references is erased.

use multilink_protocol::{
    Link, LinkId, LinkStatus, MemberData, MemberState, MsgNumber, Timestamp,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Weak};

static TOKEN_GEN: AtomicI32 = AtomicI32::new(0);

/// Next member token. Tokens increase monotonically and restart from zero
/// if the counter ever goes negative.
pub fn gen_token() -> i32 {
    let token = TOKEN_GEN.fetch_add(1, Ordering::Relaxed) + 1;
    if token < 0 {
        TOKEN_GEN.store(0, Ordering::Relaxed);
        0
    } else {
        token
    }
}

/// State of one member link inside the group.
pub struct SocketData {
    pub id: LinkId,
    /// Back-edge to the link; the link owns itself, the group owns this slot.
    pub link: Weak<dyn Link>,
    pub token: i32,
    pub last_status: LinkStatus,
    pub send_state: MemberState,
    pub recv_state: MemberState,
    pub send_result: i32,
    pub recv_result: i32,
    pub local_addr: SocketAddr,
    pub peer_addr: SocketAddr,
    pub ready_read: bool,
    pub ready_write: bool,
    pub ready_error: bool,
    pub weight: u16,
    /// Highest message number this member has acknowledged.
    pub acked_msgno: Option<MsgNumber>,
    /// Last time the member showed signs of life (ACK or keepalive).
    pub last_response: Timestamp,
}

impl SocketData {
    /// Prepare a slot for a link being attached.
    ///
    /// A connected link starts IDLE in both directions; anything else is
    /// PENDING until the connection completes.
    pub fn prepare(link: &Arc<dyn Link>, weight: u16) -> Self {
        let status = link.status();
        let initial = if status == LinkStatus::Connected {
            MemberState::Idle
        } else {
            MemberState::Pending
        };
        SocketData {
            id: link.id(),
            link: Arc::downgrade(link),
            token: gen_token(),
            last_status: status,
            send_state: initial,
            recv_state: initial,
            send_result: 0,
            recv_result: 0,
            local_addr: link.local_addr(),
            peer_addr: link.peer_addr(),
            ready_read: false,
            ready_write: link.is_writable(),
            ready_error: false,
            weight,
            acked_msgno: None,
            last_response: Timestamp::now(),
        }
    }

    /// The live link behind this slot, if it still exists.
    pub fn upgrade(&self) -> Option<Arc<dyn Link>> {
        self.link.upgrade()
    }

    /// Application-visible snapshot of this slot.
    pub fn to_member_data(&self) -> MemberData {
        MemberData {
            id: self.id,
            token: self.token,
            status: self.last_status,
            send_state: self.send_state,
            recv_state: self.recv_state,
            send_result: self.send_result,
            recv_result: self.recv_result,
            local_addr: self.local_addr,
            peer_addr: self.peer_addr,
            weight: self.weight,
        }
    }
}

/// Ordered collection of member slots with a last-active cursor.
pub struct MemberTable {
    entries: Vec<SocketData>,
    last_active: Option<LinkId>,
}

impl MemberTable {
    pub fn new() -> Self {
        MemberTable {
            entries: Vec::new(),
            last_active: None,
        }
    }

    pub fn add(&mut self, data: SocketData) -> &mut SocketData {
        self.entries.push(data);
        let last = self.entries.len() - 1;
        &mut self.entries[last]
    }

    /// Remove the slot for `id`. Returns whether a slot was removed. The
    /// last-active cursor is reset if it referenced the erased slot.
    pub fn remove(&mut self, id: LinkId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|d| d.id != id);
        if self.last_active == Some(id) {
            self.last_active = None;
        }
        self.entries.len() != before
    }

    pub fn find(&self, id: LinkId) -> Option<&SocketData> {
        self.entries.iter().find(|d| d.id == id)
    }

    pub fn find_mut(&mut self, id: LinkId) -> Option<&mut SocketData> {
        self.entries.iter_mut().find(|d| d.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SocketData> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut SocketData> {
        self.entries.iter_mut()
    }

    /// Mark `id` as the most recently used member. Ignored for unknown ids.
    pub fn set_active(&mut self, id: LinkId) {
        if self.entries.iter().any(|d| d.id == id) {
            self.last_active = Some(id);
        }
    }

    pub fn active(&self) -> Option<&SocketData> {
        self.last_active.and_then(|id| self.find(id))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn member_data(&self) -> Vec<MemberData> {
        self.entries.iter().map(|d| d.to_member_data()).collect()
    }
}

impl Default for MemberTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_link::TestLink;

    fn slot(id: LinkId, weight: u16) -> SocketData {
        let link = TestLink::connected(id);
        SocketData::prepare(&(link as Arc<dyn Link>), weight)
    }

    #[test]
    fn tokens_increase() {
        let a = slot(1, 0);
        let b = slot(2, 0);
        assert!(b.token > a.token);
    }

    #[test]
    fn connected_link_starts_idle() {
        let d = slot(1, 5);
        assert_eq!(d.send_state, MemberState::Idle);
        assert_eq!(d.recv_state, MemberState::Idle);
        assert_eq!(d.weight, 5);
    }

    #[test]
    fn add_find_remove() {
        let mut table = MemberTable::new();
        table.add(slot(1, 0));
        table.add(slot(2, 0));
        assert_eq!(table.len(), 2);
        assert!(table.find(1).is_some());
        assert!(table.remove(1));
        assert!(table.find(1).is_none());
        assert!(!table.remove(1));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn cursor_reset_on_erase() {
        let mut table = MemberTable::new();
        table.add(slot(1, 0));
        table.add(slot(2, 0));
        table.set_active(2);
        assert_eq!(table.active().map(|d| d.id), Some(2));
        table.remove(2);
        assert!(table.active().is_none());
        // Removing an unrelated member leaves the cursor alone.
        table.set_active(1);
        table.remove(99);
        assert_eq!(table.active().map(|d| d.id), Some(1));
    }

    #[test]
    fn member_data_mirrors_slot() {
        let mut table = MemberTable::new();
        table.add(slot(7, 12));
        let data = table.member_data();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].id, 7);
        assert_eq!(data[0].weight, 12);
        assert_eq!(data[0].status, LinkStatus::Connected);
    }
}
