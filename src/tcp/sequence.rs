//! Sequence space arithmetic.
//!
//! A connection numbers every byte it sends, plus one slot for the SYN and
//! one for the FIN, with a zero-based 64-bit *absolute* index. On the wire
//! only the low 32 bits survive, offset by the initial sequence number
//! (ISN). [`wrap`] and [`unwrap`] convert between the two.
//!
//! RFC 793 Section 3.3: all arithmetic on sequence numbers is performed
//! modulo 2**32, which preserves their relationship as they cycle from
//! 2**32 - 1 to 0 again.

use std::fmt;
use std::ops::{Add, Sub};

const PERIOD: u64 = 1 << 32;

/// A 32-bit sequence number as carried in a segment header.
#[derive(Debug, Default, Clone, Copy, Hash, Eq, PartialEq)]
pub struct SeqNo(u32);

impl SeqNo {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl From<u32> for SeqNo {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

/// Number of increments needed to get from `rhs` to `self`; negative when
/// going backwards is no longer than going forwards.
impl Sub for SeqNo {
    type Output = i32;

    fn sub(self, rhs: SeqNo) -> i32 {
        self.0.wrapping_sub(rhs.0) as i32
    }
}

impl Add<u32> for SeqNo {
    type Output = SeqNo;

    fn add(self, rhs: u32) -> SeqNo {
        SeqNo(self.0.wrapping_add(rhs))
    }
}

impl Sub<u32> for SeqNo {
    type Output = SeqNo;

    fn sub(self, rhs: u32) -> SeqNo {
        SeqNo(self.0.wrapping_sub(rhs))
    }
}

impl fmt::Display for SeqNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Converts an absolute sequence number into its on-the-wire value.
pub fn wrap(absolute: u64, isn: SeqNo) -> SeqNo {
    isn + absolute as u32
}

/// Converts an on-the-wire value back into the absolute sequence number
/// closest to `checkpoint`.
///
/// Of the candidates `checkpoint + d` and `checkpoint - (2**32 - d)`, where
/// `d` is the forward distance from `wrap(checkpoint)` to `seqno`, the
/// backward one wins only when it is strictly nearer and does not go below
/// zero.
pub fn unwrap(seqno: SeqNo, isn: SeqNo, checkpoint: u64) -> u64 {
    let forward = u64::from(seqno.0.wrapping_sub(wrap(checkpoint, isn).0));
    let backward = PERIOD - forward;
    if forward > PERIOD / 2 && checkpoint >= backward {
        return checkpoint - backward;
    }
    // only overflows for checkpoints in the final period, where going
    // backwards is always possible
    checkpoint
        .checked_add(forward)
        .unwrap_or_else(|| checkpoint - backward)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_adds_isn_modulo_period() {
        assert_eq!(wrap(3 * PERIOD, SeqNo::new(0)), SeqNo::new(0));
        assert_eq!(wrap(3 * PERIOD + 17, SeqNo::new(15)), SeqNo::new(32));
        assert_eq!(wrap(7 * PERIOD - 2, SeqNo::new(15)), SeqNo::new(13));
        assert_eq!(wrap(1, SeqNo::new(u32::MAX)), SeqNo::new(0));
    }

    #[test]
    fn unwrap_near_zero_checkpoint() {
        assert_eq!(unwrap(SeqNo::new(1), SeqNo::new(0), 0), 1);
        // one before the ISN cannot go negative, so it lands a period later
        assert_eq!(
            unwrap(SeqNo::new(u32::MAX), SeqNo::new(0), 0),
            PERIOD - 1
        );
        assert_eq!(unwrap(SeqNo::new(16), SeqNo::new(16), 0), 0);
    }

    #[test]
    fn unwrap_picks_the_closest_period() {
        assert_eq!(unwrap(SeqNo::new(u32::MAX), SeqNo::new(0), 3 * PERIOD), 3 * PERIOD - 1);
        assert_eq!(
            unwrap(SeqNo::new(u32::MAX - 1), SeqNo::new(u32::MAX), 3 * PERIOD),
            3 * PERIOD - 1
        );
        assert_eq!(
            unwrap(SeqNo::new(u32::MAX), SeqNo::new(10), 3 * PERIOD),
            3 * PERIOD - 11
        );
        assert_eq!(
            unwrap(SeqNo::new(1 << 31), SeqNo::new(0), 0),
            1 << 31
        );
        assert_eq!(
            unwrap(SeqNo::new(15), SeqNo::new(16), 9 * PERIOD + 5),
            9 * PERIOD - 1
        );
    }

    #[test]
    fn unwrap_at_the_top_of_the_range() {
        let checkpoint = u64::MAX - 5;
        let seqno = wrap(checkpoint + 3, SeqNo::new(7));
        assert_eq!(unwrap(seqno, SeqNo::new(7), checkpoint), checkpoint + 3);
        let seqno = wrap(checkpoint - 100, SeqNo::new(7));
        assert_eq!(unwrap(seqno, SeqNo::new(7), checkpoint), checkpoint - 100);
    }

    #[test]
    fn difference_is_signed() {
        assert_eq!(SeqNo::new(5) - SeqNo::new(3), 2);
        assert_eq!(SeqNo::new(3) - SeqNo::new(5), -2);
        assert_eq!(SeqNo::new(1) - SeqNo::new(u32::MAX), 2);
        assert_eq!(SeqNo::new(0) - 1u32, SeqNo::new(u32::MAX));
    }

    #[test]
    fn unwrap_forward_from_small_checkpoints() {
        // the backward candidate would go below zero for all of these
        assert_eq!(unwrap(SeqNo::new(5), SeqNo::new(0), 3), 5);
        assert_eq!(unwrap(SeqNo::new(1001), SeqNo::new(1000), 1), 1);
        assert_eq!(unwrap(SeqNo::new(3), SeqNo::new(u32::MAX), 2), 4);
    }
}
