//! Connection-group core
//!
//! Bonds several member links into one logical endpoint with a single
//! send/receive surface, providing redundancy and failover across links
//! while preserving message ordering and exactly-once delivery at the
//! consumer. Broadcast groups fan every message out to all active members;
//! backup groups run one primary with hot standbys, a retransmit buffer
//! and weight-driven activation.

pub mod backup;
pub mod broadcast;
pub mod error;
pub mod group;
pub mod member;
pub mod merger;
pub mod readiness;
pub mod retx;
pub mod storage;

#[cfg(test)]
#[allow(dead_code)]
pub(crate) mod test_link;

pub use error::GroupError;
pub use group::{
    ApiGuard, GroupCore, GroupOptions, GroupStats, Metric, FLAG_SYNC_ON_MSGNO,
};
pub use member::{gen_token, MemberTable, SocketData};
pub use merger::ReceiverMerger;
pub use readiness::{GroupEvent, PollNotifier};
pub use retx::SenderRetxBuffer;
pub use storage::{
    private_storage, BufferedMessage, MessageStorage, StorageHandle, LIVE_DEF_PAYLOAD,
    LIVE_MAX_PAYLOAD, SHARED_STORAGE,
};
