//! Public member-status types
//!
//! These are the application-visible records describing a group and its
//! members, filled on every `recv` and on demand through the group-data
//! query. They serialize so that callers can snapshot and replay member
//! state.

use crate::link::{LinkId, LinkStatus};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Group dispatch mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupType {
    /// Every message goes to every active member.
    Broadcast,
    /// One primary carries traffic; idle members are hot standbys.
    Backup,
    /// Placeholder; not implemented.
    Multicast,
}

/// Qualification state of a member link, per direction.
///
/// Freshly attached links are PENDING, become IDLE once connected, and are
/// promoted to RUNNING by the sender strategy. A failed link is BROKEN until
/// it is wiped from the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberState {
    Pending,
    Idle,
    Running,
    Broken,
}

/// Snapshot of one member slot, as exposed to the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberData {
    pub id: LinkId,
    /// Monotonically increasing local identity of the slot.
    pub token: i32,
    pub status: LinkStatus,
    pub send_state: MemberState,
    pub recv_state: MemberState,
    /// Byte count of the last send on this member, or a negative error code.
    pub send_result: i32,
    /// Byte count of the last receive on this member, or a negative error code.
    pub recv_result: i32,
    pub local_addr: SocketAddr,
    pub peer_addr: SocketAddr,
    /// Larger weight wins selection in backup mode.
    pub weight: u16,
}
