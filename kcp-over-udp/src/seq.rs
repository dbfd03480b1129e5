//! Wrap-around-safe arithmetic for 32-bit sequence numbers and timestamps.
//!
//! Both `sn` and the millisecond clock are `u32` counters that are expected
//! to overflow during a long-lived connection.  Ordering is therefore never
//! decided with a plain `<`: the difference is taken with wrapping
//! subtraction and reinterpreted as a signed 32-bit value.  The result is
//! correct as long as the two values are less than `2^31` apart, which always
//! holds for a bounded window and a sane clock.

/// Signed distance from `earlier` to `later`.
///
/// Positive when `later` is after `earlier`, negative when it is before.
#[inline]
pub fn time_diff(later: u32, earlier: u32) -> i32 {
    later.wrapping_sub(earlier) as i32
}

/// `true` when `a` precedes `b` in wrap-around space.
#[inline]
pub fn seq_lt(a: u32, b: u32) -> bool {
    time_diff(a, b) < 0
}

/// `true` when `a` precedes or equals `b` in wrap-around space.
#[inline]
pub fn seq_le(a: u32, b: u32) -> bool {
    time_diff(a, b) <= 0
}
