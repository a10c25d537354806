//! Sequence and message number spaces
//!
//! Data packets carry a 31-bit sequence number (bit 31 distinguishes control
//! packets) and a 26-bit message number. Both counters wrap, so ordering is
//! decided by signed distance rather than plain integer comparison.

use rand::Rng;
use std::fmt;
use std::ops::{Add, Sub};

/// Maximum packet sequence number (31-bit space).
pub const MAX_SEQ_NUMBER: u32 = 0x7FFF_FFFF;

/// Maximum message number (26-bit space).
pub const MAX_MSG_NUMBER: u32 = 0x03FF_FFFF;

/// Packet sequence number with 31-bit wraparound semantics.
///
/// Comparisons account for wraparound: a number just past the wrap boundary
/// is *ahead of* one just before it, even though its raw value is smaller.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct SeqNumber(u32);

impl SeqNumber {
    /// Create a new sequence number.
    ///
    /// # Panics
    /// Panics if the value exceeds [`MAX_SEQ_NUMBER`].
    pub fn new(value: u32) -> Self {
        assert!(
            value <= MAX_SEQ_NUMBER,
            "sequence number {} exceeds maximum {}",
            value,
            MAX_SEQ_NUMBER
        );
        SeqNumber(value)
    }

    /// Create a sequence number, masking the value to 31 bits.
    #[inline]
    pub fn new_unchecked(value: u32) -> Self {
        SeqNumber(value & MAX_SEQ_NUMBER)
    }

    #[inline]
    pub fn as_raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn next(self) -> Self {
        SeqNumber((self.0 + 1) & MAX_SEQ_NUMBER)
    }

    #[inline]
    pub fn prev(self) -> Self {
        SeqNumber(self.0.wrapping_sub(1) & MAX_SEQ_NUMBER)
    }

    /// Signed distance from `self` to `other`, accounting for wraparound.
    ///
    /// Positive means `other` is ahead of `self`.
    pub fn distance_to(self, other: SeqNumber) -> i32 {
        signed_distance(self.0, other.0, MAX_SEQ_NUMBER)
    }

    #[inline]
    pub fn lt(self, other: SeqNumber) -> bool {
        self.distance_to(other) > 0
    }

    #[inline]
    pub fn le(self, other: SeqNumber) -> bool {
        self == other || self.lt(other)
    }

    #[inline]
    pub fn gt(self, other: SeqNumber) -> bool {
        self.distance_to(other) < 0
    }

    #[inline]
    pub fn ge(self, other: SeqNumber) -> bool {
        self == other || self.gt(other)
    }
}

/// Message number with 26-bit wraparound semantics.
///
/// Message numbers increase by one per application message and wrap
/// independently of the packet sequence space.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct MsgNumber(u32);

impl MsgNumber {
    /// Create a new message number.
    ///
    /// # Panics
    /// Panics if the value exceeds [`MAX_MSG_NUMBER`].
    pub fn new(value: u32) -> Self {
        assert!(
            value <= MAX_MSG_NUMBER,
            "message number {} exceeds maximum {}",
            value,
            MAX_MSG_NUMBER
        );
        MsgNumber(value)
    }

    #[inline]
    pub fn new_unchecked(value: u32) -> Self {
        MsgNumber(value & MAX_MSG_NUMBER)
    }

    #[inline]
    pub fn as_raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn next(self) -> Self {
        MsgNumber((self.0 + 1) & MAX_MSG_NUMBER)
    }

    /// Signed distance from `self` to `other`, accounting for wraparound.
    pub fn distance_to(self, other: MsgNumber) -> i32 {
        signed_distance(self.0, other.0, MAX_MSG_NUMBER)
    }

    #[inline]
    pub fn lt(self, other: MsgNumber) -> bool {
        self.distance_to(other) > 0
    }

    #[inline]
    pub fn le(self, other: MsgNumber) -> bool {
        self == other || self.lt(other)
    }

    #[inline]
    pub fn gt(self, other: MsgNumber) -> bool {
        self.distance_to(other) < 0
    }

    #[inline]
    pub fn ge(self, other: MsgNumber) -> bool {
        self == other || self.gt(other)
    }
}

/// Signed wrap-aware distance shared by both number spaces.
///
/// `max` must be a power-of-two-minus-one mask covering the space.
fn signed_distance(from: u32, to: u32, max: u32) -> i32 {
    let space = (max as i64) + 1;
    let half = space / 2;
    let diff = ((to as i64) - (from as i64)).rem_euclid(space);
    if diff >= half {
        (diff - space) as i32
    } else {
        diff as i32
    }
}

/// Generate a random initial sequence number for a fresh delivery epoch.
pub fn fresh_isn() -> SeqNumber {
    SeqNumber(rand::thread_rng().gen_range(0..=MAX_SEQ_NUMBER))
}

/// The message number assigned to the first message of a group.
pub fn first_msgno() -> MsgNumber {
    MsgNumber(1)
}

impl fmt::Debug for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SeqNumber({})", self.0)
    }
}

impl fmt::Display for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

impl fmt::Debug for MsgNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MsgNumber({})", self.0)
    }
}

impl fmt::Display for MsgNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl Add<u32> for SeqNumber {
    type Output = SeqNumber;

    fn add(self, rhs: u32) -> SeqNumber {
        SeqNumber::new_unchecked(self.0.wrapping_add(rhs))
    }
}

impl Sub<u32> for SeqNumber {
    type Output = SeqNumber;

    fn sub(self, rhs: u32) -> SeqNumber {
        SeqNumber::new_unchecked(self.0.wrapping_sub(rhs))
    }
}

impl Sub for SeqNumber {
    type Output = i32;

    /// Signed distance `self - rhs`.
    fn sub(self, rhs: SeqNumber) -> i32 {
        rhs.distance_to(self)
    }
}

impl Add<u32> for MsgNumber {
    type Output = MsgNumber;

    fn add(self, rhs: u32) -> MsgNumber {
        MsgNumber::new_unchecked(self.0.wrapping_add(rhs))
    }
}

impl Sub for MsgNumber {
    type Output = i32;

    fn sub(self, rhs: MsgNumber) -> i32 {
        rhs.distance_to(self)
    }
}
