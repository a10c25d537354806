//! Group errors
//!
//! Per-member failures are collected during a send and never surfaced while
//! at least one member succeeds. When everything fails, the worst error
//! wins, ranked by `severity`.

use multilink_protocol::LinkError;
use thiserror::Error;

/// Group-level errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GroupError {
    #[error("no live member link available")]
    NoLiveLink,

    #[error("every sendable member link is unstable")]
    AllLinksUnstable,

    #[error("group is closed")]
    Closed,

    #[error("operation timed out")]
    Timeout,

    #[error("operation would block")]
    WouldBlock,

    #[error("delivery sequence discontinuity")]
    SeqDiscontinuity,

    #[error("bad option: {0}")]
    BadOption(String),

    #[error("internal invariant violated: {0}")]
    InternalInvariant(&'static str),
}

impl GroupError {
    /// Rank used to pick the error reported when every member failed.
    fn severity(&self) -> u8 {
        match self {
            GroupError::InternalInvariant(_) => 7,
            GroupError::Closed => 6,
            GroupError::NoLiveLink => 5,
            GroupError::AllLinksUnstable => 4,
            GroupError::Timeout => 3,
            GroupError::SeqDiscontinuity => 2,
            GroupError::BadOption(_) => 2,
            GroupError::WouldBlock => 1,
        }
    }

    /// The worse of two errors.
    pub fn worst(self, other: GroupError) -> GroupError {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }

    /// Fold an error into an accumulator slot.
    pub fn fold_worst(slot: &mut Option<GroupError>, err: GroupError) {
        *slot = Some(match slot.take() {
            Some(prev) => prev.worst(err),
            None => err,
        });
    }

    /// Classify a member-link send failure at the group level.
    pub fn from_link_send(err: LinkError) -> GroupError {
        match err {
            LinkError::WouldBlock => GroupError::WouldBlock,
            LinkError::Broken | LinkError::Closed => GroupError::NoLiveLink,
            LinkError::PayloadTooLarge(n) => {
                GroupError::BadOption(format!("payload of {} bytes rejected by link", n))
            }
            LinkError::BadOption => GroupError::BadOption("option rejected by link".into()),
        }
    }
}
