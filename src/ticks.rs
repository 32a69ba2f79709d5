//! On-disk timestamp encoding.
//!
//! Master headers store their two timestamps as signed 64-bit tick counts:
//! 100 ns intervals since `0001-01-01T00:00:00Z`.  This is the counter used
//! by the tool that defined the format, so dumps written by it decode to the
//! same instants here.  Precision below 100 ns is truncated on encode.

use chrono::{DateTime, TimeZone, Utc};

pub const TICKS_PER_SECOND: i64 = 10_000_000;
/// Ticks between `0001-01-01T00:00:00Z` and the Unix epoch.
pub const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;
/// Last representable instant, `9999-12-31T23:59:59.9999999Z`.
pub const MAX_TICKS: i64 = 3_155_378_975_999_999_999;

/// Convert a UTC instant to ticks.  `None` if it falls outside years 1..=9999.
pub fn to_ticks(time: &DateTime<Utc>) -> Option<i64> {
    // Leap-second nanos (>= 1e9) clamp to the last tick of the second.
    let sub = i64::from(time.timestamp_subsec_nanos() / 100).min(TICKS_PER_SECOND - 1);
    let ticks = time
        .timestamp()
        .checked_mul(TICKS_PER_SECOND)?
        .checked_add(sub)?
        .checked_add(UNIX_EPOCH_TICKS)?;
    (0..=MAX_TICKS).contains(&ticks).then_some(ticks)
}

/// Convert ticks back to a UTC instant.  `None` for out-of-range counters,
/// which only ever come from corrupt headers.
pub fn from_ticks(ticks: i64) -> Option<DateTime<Utc>> {
    if !(0..=MAX_TICKS).contains(&ticks) {
        return None;
    }
    let rel   = ticks - UNIX_EPOCH_TICKS;
    let secs  = rel.div_euclid(TICKS_PER_SECOND);
    let nanos = (rel.rem_euclid(TICKS_PER_SECOND) * 100) as u32;
    Utc.timestamp_opt(secs, nanos).single()
}

/// Drop sub-tick precision so a value compares equal after a round trip.
pub fn truncate(time: &DateTime<Utc>) -> Option<DateTime<Utc>> {
    to_ticks(time).and_then(from_ticks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_epoch_is_known_tick_count() {
        let epoch = Utc.timestamp_opt(0, 0).unwrap();
        assert_eq!(to_ticks(&epoch), Some(UNIX_EPOCH_TICKS));
        assert_eq!(from_ticks(UNIX_EPOCH_TICKS), Some(epoch));
    }

    #[test]
    fn range_ends_round_trip() {
        let first = from_ticks(0).unwrap();
        assert_eq!(first.to_rfc3339(), "0001-01-01T00:00:00+00:00");
        assert_eq!(to_ticks(&first), Some(0));

        let last = from_ticks(MAX_TICKS).unwrap();
        assert_eq!(to_ticks(&last), Some(MAX_TICKS));
    }

    #[test]
    fn out_of_range_ticks_are_rejected() {
        assert!(from_ticks(-1).is_none());
        assert!(from_ticks(MAX_TICKS + 1).is_none());
        assert!(from_ticks(i64::MAX).is_none());
    }

    #[test]
    fn sub_tick_precision_is_truncated() {
        let t = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let back = from_ticks(to_ticks(&t).unwrap()).unwrap();
        assert_eq!(back.timestamp_subsec_nanos(), 123_456_700);
        assert_eq!(truncate(&t), Some(back));
    }
}
