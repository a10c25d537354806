//! Readiness bridge
//!
//! Translates member-level readiness into group-level events for the
//! external poller. Read/write readiness is level-triggered and published
//! only on change; the table-emptied error is published once and stays
//! sticky until the group closes.

use multilink_protocol::{EpollId, GroupId, LinkId};
use std::collections::HashSet;
use std::sync::Arc;

/// Group-level readiness events delivered to the poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupEvent {
    Readable,
    Writable,
    /// A member link failed and was wiped from the table.
    MemberFailed(LinkId),
    /// The member table emptied while the group was open.
    Error,
}

/// External poller the bridge publishes into.
pub trait PollNotifier: Send + Sync {
    fn post(&self, eid: EpollId, group: GroupId, event: GroupEvent, enabled: bool);
}

/// Per-group set of poller subscriptions plus the published event levels.
pub(crate) struct ReadinessBridge {
    group_id: GroupId,
    subscribers: HashSet<EpollId>,
    notifier: Option<Arc<dyn PollNotifier>>,
    readable: bool,
    writable: bool,
    error_published: bool,
}

impl ReadinessBridge {
    pub(crate) fn new(group_id: GroupId, notifier: Option<Arc<dyn PollNotifier>>) -> Self {
        ReadinessBridge {
            group_id,
            subscribers: HashSet::new(),
            notifier,
            readable: false,
            writable: false,
            error_published: false,
        }
    }

    pub(crate) fn add(&mut self, eid: EpollId) {
        if self.subscribers.insert(eid) {
            // A late subscriber sees the current levels right away.
            if let Some(notifier) = &self.notifier {
                if self.readable {
                    notifier.post(eid, self.group_id, GroupEvent::Readable, true);
                }
                if self.writable {
                    notifier.post(eid, self.group_id, GroupEvent::Writable, true);
                }
                if self.error_published {
                    notifier.post(eid, self.group_id, GroupEvent::Error, true);
                }
            }
        }
    }

    pub(crate) fn remove(&mut self, eid: EpollId) {
        self.subscribers.remove(&eid);
    }

    pub(crate) fn set_readable(&mut self, readable: bool) {
        if self.readable != readable {
            self.readable = readable;
            self.publish(GroupEvent::Readable, readable);
        }
    }

    pub(crate) fn set_writable(&mut self, writable: bool) {
        if self.writable != writable {
            self.writable = writable;
            self.publish(GroupEvent::Writable, writable);
        }
    }

    /// One failed link was wiped; published once per failure.
    pub(crate) fn link_failed(&mut self, id: LinkId) {
        self.publish(GroupEvent::MemberFailed(id), true);
    }

    /// The table emptied while open. Sticky until `clear`.
    pub(crate) fn table_emptied(&mut self) {
        if !self.error_published {
            self.error_published = true;
            self.publish(GroupEvent::Error, true);
        }
    }

    /// Drop all state on close.
    pub(crate) fn clear(&mut self) {
        self.subscribers.clear();
        self.readable = false;
        self.writable = false;
        self.error_published = false;
    }

    fn publish(&self, event: GroupEvent, enabled: bool) {
        if let Some(notifier) = &self.notifier {
            for eid in &self.subscribers {
                notifier.post(*eid, self.group_id, event, enabled);
            }
        }
    }
}
