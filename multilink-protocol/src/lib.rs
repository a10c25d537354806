//! Shared protocol types for multilink
//!
//! This crate carries the vocabulary shared between the group core and the
//! member-link transports: wrap-aware sequence and message number spaces,
//! the message control block, option codes, the public member-status types
//! and the `Link` contract every bonded connection implements.

pub mod link;
pub mod member;
pub mod msgctrl;
pub mod options;
pub mod sequence;
pub mod time;

pub use link::{EpollId, GroupId, HandshakeSide, Link, LinkError, LinkId, LinkStatus};
pub use member::{GroupType, MemberData, MemberState};
pub use msgctrl::MsgCtrl;
pub use options::{encode_bool, encode_i32, encode_u16, ConfigItem, OptionCode};
pub use sequence::{first_msgno, fresh_isn, MsgNumber, SeqNumber, MAX_MSG_NUMBER, MAX_SEQ_NUMBER};
pub use time::Timestamp;
