//! Member-link contract
//!
//! A group bonds several point-to-point links behind one endpoint. The group
//! core never talks to sockets directly; it drives each member through this
//! trait and receives packet/ACK/keepalive callbacks from the link's own
//! threads. The link guarantees sequence monotonicity and delivery-clock
//! ordering within itself.

use crate::msgctrl::MsgCtrl;
use crate::options::OptionCode;
use crate::sequence::SeqNumber;
use crate::time::Timestamp;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use thiserror::Error;

/// Identifier of a member link within the process.
pub type LinkId = u32;

/// Identifier of a group within the process.
pub type GroupId = u32;

/// Identifier of an external poller subscription.
pub type EpollId = i32;

/// Mirrored status of an underlying link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkStatus {
    /// Handshake in progress.
    Connecting,
    /// Established and able to carry data.
    Connected,
    /// Failed; no further traffic possible.
    Broken,
    /// Shutdown initiated locally.
    Closing,
    /// Fully closed.
    Closed,
}

/// Errors surfaced by a member link.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("operation would block")]
    WouldBlock,

    #[error("link is broken")]
    Broken,

    #[error("link is closed")]
    Closed,

    #[error("payload of {0} bytes exceeds the link payload limit")]
    PayloadTooLarge(usize),

    #[error("option rejected by link")]
    BadOption,
}

/// Which side of the group handshake is being negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeSide {
    Initiator,
    Responder,
}

/// One bonded point-to-point connection.
///
/// All operations are non-blocking; `send` either accepts the whole message
/// or fails. Callbacks into the group (packet arrival, ACK, keepalive) are
/// delivered on the link's own threads, never from inside these calls.
pub trait Link: Send + Sync {
    fn id(&self) -> LinkId;
    fn status(&self) -> LinkStatus;
    fn local_addr(&self) -> SocketAddr;
    fn peer_addr(&self) -> SocketAddr;

    /// Send one message. On success the sequence number actually used is
    /// written to `ctrl.pktseq` and the byte count is returned.
    fn send(&self, payload: &[u8], ctrl: &mut MsgCtrl) -> Result<usize, LinkError>;

    /// Force the next data packet to carry the given sequence number.
    fn override_send_seq(&self, seq: SeqNumber);

    /// Sequence number of the last packet scheduled for sending.
    fn last_sent_seq(&self) -> SeqNumber;

    /// Highest contiguous sequence received from the peer.
    fn last_rcv_seq(&self) -> SeqNumber;

    /// Time the last acknowledgement arrived from the peer.
    fn last_ack_time(&self) -> Timestamp;

    /// Initial sequence number chosen for the send direction at handshake.
    fn snd_isn(&self) -> SeqNumber;

    /// Initial sequence number received from the peer at handshake.
    fn rcv_isn(&self) -> SeqNumber;

    /// Whether the send buffer has room for at least one message.
    fn is_writable(&self) -> bool;

    /// Apply a link-scoped option value.
    fn set_option(&self, code: OptionCode, value: &[u8]) -> Result<(), LinkError>;

    /// Read back a link-scoped option value, if the link recognizes it.
    fn get_option(&self, code: OptionCode) -> Option<Vec<u8>>;

    fn close(&self);
}
