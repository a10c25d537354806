//! Option codes and stored option values
//!
//! Options are identified by code and carried as opaque byte blobs. Each
//! code declares the exact value size it accepts; a `ConfigItem` can only be
//! constructed with a blob of that size. Booleans are one byte, durations
//! and integers are little-endian `i32`, weights are little-endian `u16`.

use std::fmt;

/// Option codes recognized at the group level or stored for members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionCode {
    /// Blocking-mode flag for receive.
    RcvSyn,
    /// Blocking-mode flag for send.
    SndSyn,
    /// Receive timeout, milliseconds (-1 = infinite).
    RcvTimeo,
    /// Send timeout, milliseconds (-1 = infinite).
    SndTimeo,
    /// Timestamp-based delivery clock on/off.
    TsbpdMode,
    /// Delivery-clock delay, milliseconds.
    TsbpdDelay,
    /// Skip packets whose delivery deadline passed.
    TlPktDrop,
    /// Milliseconds without an ACK before a running link is unstable.
    StabilityTimeout,
    /// Maximum payload per message, bytes.
    PayloadSize,
    /// Group dispatch mode.
    GroupType,
    /// Whether this endpoint accepts group connections.
    GroupConnect,
    /// Per-member selection weight.
    Weight,
}

impl OptionCode {
    /// Declared size of the value blob for this code.
    pub fn value_len(self) -> usize {
        match self {
            OptionCode::RcvSyn
            | OptionCode::SndSyn
            | OptionCode::TsbpdMode
            | OptionCode::TlPktDrop
            | OptionCode::GroupConnect => 1,
            OptionCode::Weight => 2,
            OptionCode::RcvTimeo
            | OptionCode::SndTimeo
            | OptionCode::TsbpdDelay
            | OptionCode::StabilityTimeout
            | OptionCode::PayloadSize
            | OptionCode::GroupType => 4,
        }
    }

    /// Whether the option is consumed by the group itself, as opposed to
    /// being stored and pushed down to each member on attach.
    pub fn group_scoped(self) -> bool {
        !matches!(self, OptionCode::Weight)
    }
}

impl fmt::Display for OptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// One stored option: code plus an opaque value blob of the declared size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigItem {
    pub code: OptionCode,
    pub value: Vec<u8>,
}

impl ConfigItem {
    /// Store an option value. Returns `None` when the blob length does not
    /// match the code's declared size.
    pub fn new(code: OptionCode, value: &[u8]) -> Option<Self> {
        if value.len() != code.value_len() {
            return None;
        }
        Some(ConfigItem {
            code,
            value: value.to_vec(),
        })
    }

    pub fn read_bool(&self) -> Option<bool> {
        match self.value.as_slice() {
            [b] => Some(*b != 0),
            _ => None,
        }
    }

    pub fn read_i32(&self) -> Option<i32> {
        let bytes: [u8; 4] = self.value.as_slice().try_into().ok()?;
        Some(i32::from_le_bytes(bytes))
    }

    pub fn read_u16(&self) -> Option<u16> {
        let bytes: [u8; 2] = self.value.as_slice().try_into().ok()?;
        Some(u16::from_le_bytes(bytes))
    }
}

/// Encode a boolean option value.
pub fn encode_bool(v: bool) -> Vec<u8> {
    vec![v as u8]
}

/// Encode a 32-bit integer option value.
pub fn encode_i32(v: i32) -> Vec<u8> {
    v.to_le_bytes().to_vec()
}

/// Encode a 16-bit weight option value.
pub fn encode_u16(v: u16) -> Vec<u8> {
    v.to_le_bytes().to_vec()
}
