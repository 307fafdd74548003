use jiff::SignedDuration;

/// Splits `elapsed` into a loop index and a position inside the loop.
///
/// The position is always in `[0, period)`, including when `elapsed` is
/// negative (the channel anchor lies in the future). A truncating remainder
/// would return negative positions there and misselect the entry, so this
/// goes through `div_euclid`/`rem_euclid` on whole nanoseconds.
///
/// `period` must be positive; callers check for empty/zero-length schedules
/// before doing loop arithmetic.
#[must_use]
pub fn floored_mod(elapsed: SignedDuration, period: SignedDuration) -> (i64, SignedDuration) {
    debug_assert!(period > SignedDuration::ZERO);
    let e = elapsed.as_nanos();
    let p = period.as_nanos();
    let quotient = e.div_euclid(p);
    let remainder = e.rem_euclid(p);
    (quotient as i64, SignedDuration::from_nanos(remainder as i64))
}

/// Absorbs rounding at instance boundaries: offsets handed to callers are
/// never negative.
#[must_use]
pub fn clamp_non_negative(d: SignedDuration) -> SignedDuration {
    if d < SignedDuration::ZERO { SignedDuration::ZERO } else { d }
}
