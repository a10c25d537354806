//! Multilink - bonded multi-link datagram transport
//!
//! High-level re-exports for the connection-group core and the shared
//! protocol types.

pub use multilink_group as group;
pub use multilink_protocol as protocol;

// Re-export commonly used types
pub use multilink_group::{GroupCore, GroupError, GroupEvent, GroupStats, PollNotifier};
pub use multilink_protocol::{
    GroupType, Link, LinkStatus, MemberData, MemberState, MsgCtrl, MsgNumber, OptionCode,
    SeqNumber,
};
