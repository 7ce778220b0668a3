//! Expiration times: the priority model of the reconciler.
//!
//! An expiration time is an integer where bigger means more urgent. `SYNC`
//! beats everything, `NO_WORK` loses to everything. Wall-clock milliseconds
//! are folded into 10ms units counted down from a fixed offset, so a deadline
//! that is further away produces a *smaller* number.

use std::fmt;

/// 2^30 - 1, the largest value that stays a small integer on every target.
const MAX_SIGNED_31_BIT_INT: u32 = 1_073_741_823;

const UNIT_SIZE: f64 = 10.0;
const MAGIC_NUMBER_OFFSET: u32 = MAX_SIGNED_31_BIT_INT - 1;

pub const LOW_PRIORITY_EXPIRATION_MS: f64 = 5000.0;
pub const LOW_PRIORITY_BATCH_SIZE_MS: f64 = 250.0;
pub const HIGH_PRIORITY_EXPIRATION_MS: f64 = 150.0;
pub const HIGH_PRIORITY_BATCH_SIZE_MS: f64 = 100.0;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ExpirationTime(pub u32);

pub const NO_WORK: ExpirationTime = ExpirationTime(0);
/// Offscreen / deprioritized work. Only rendered when nothing else is pending.
pub const NEVER: ExpirationTime = ExpirationTime(1);
pub const SYNC: ExpirationTime = ExpirationTime(MAX_SIGNED_31_BIT_INT);

impl ExpirationTime {
    pub fn is_no_work(self) -> bool {
        self == NO_WORK
    }

    /// Converts a timestamp (ms since the host clock origin).
    pub fn from_ms(ms: f64) -> Self {
        let units = (ms / UNIT_SIZE).max(0.0) as u32;
        ExpirationTime(MAGIC_NUMBER_OFFSET.saturating_sub(units))
    }

    pub fn to_ms(self) -> f64 {
        f64::from(MAGIC_NUMBER_OFFSET.saturating_sub(self.0)) * UNIT_SIZE
    }

    /// One step less urgent. Used to keep a fresh update from joining a render
    /// that is already in flight at the same bucket.
    pub fn decrement(self) -> Self {
        ExpirationTime(self.0.saturating_sub(1))
    }
}

impl fmt::Debug for ExpirationTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            NO_WORK => f.write_str("NoWork"),
            NEVER => f.write_str("Never"),
            SYNC => f.write_str("Sync"),
            ExpirationTime(v) => write!(f, "ExpirationTime({v})"),
        }
    }
}

fn ceiling(num: u32, precision: u32) -> u32 {
    (num / precision + 1) * precision
}

/// Rounds a deadline `expiration_ms` after `current_time` up to the next
/// `bucket_ms` boundary, so updates scheduled close together share a batch.
pub fn compute_expiration_bucket(
    current_time: ExpirationTime,
    expiration_ms: f64,
    bucket_ms: f64,
) -> ExpirationTime {
    let distance = MAGIC_NUMBER_OFFSET - current_time.0.min(MAGIC_NUMBER_OFFSET)
        + (expiration_ms / UNIT_SIZE) as u32;
    let precision = ((bucket_ms / UNIT_SIZE) as u32).max(1);
    ExpirationTime(MAGIC_NUMBER_OFFSET.saturating_sub(ceiling(distance, precision)))
}

pub fn compute_async_expiration(current_time: ExpirationTime) -> ExpirationTime {
    compute_expiration_bucket(
        current_time,
        LOW_PRIORITY_EXPIRATION_MS,
        LOW_PRIORITY_BATCH_SIZE_MS,
    )
}

pub fn compute_interactive_expiration(current_time: ExpirationTime) -> ExpirationTime {
    compute_expiration_bucket(
        current_time,
        HIGH_PRIORITY_EXPIRATION_MS,
        HIGH_PRIORITY_BATCH_SIZE_MS,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_beats_everything_and_no_work_loses() {
        let t = ExpirationTime::from_ms(1234.0);
        assert!(SYNC > t);
        assert!(t > NEVER);
        assert!(NEVER > NO_WORK);
    }

    #[test]
    fn test_ms_round_trip_is_unit_granular() {
        let t = ExpirationTime::from_ms(1000.0);
        assert_eq!(t.to_ms(), 1000.0);
        assert_eq!(ExpirationTime::from_ms(1009.0), t);
    }

    #[test]
    fn test_longer_latency_is_less_urgent() {
        let now = ExpirationTime::from_ms(0.0);
        let interactive = compute_interactive_expiration(now);
        let low = compute_async_expiration(now);
        assert!(interactive > low);
        assert!(interactive < now);
    }

    #[test]
    fn test_updates_within_a_batch_coalesce() {
        let a = compute_async_expiration(ExpirationTime::from_ms(1000.0));
        let b = compute_async_expiration(ExpirationTime::from_ms(1100.0));
        let c = compute_async_expiration(ExpirationTime::from_ms(1300.0));
        assert_eq!(a, b);
        assert!(c < b);
    }
}
