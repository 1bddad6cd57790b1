//
// Copyright 2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

use std::{
    fmt::Debug,
    ops::{Add, Sub},
};

/// A non-negative span of time.
///
/// A wrapper around [`std::time::Duration`] with the panicking difference
/// operations replaced by saturating ones: pacing arithmetic bottoms out at
/// zero when a tick runs late or a timestamp arrives out of order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Duration(std::time::Duration);

impl Duration {
    pub const ZERO: Duration = Duration::from_secs(0);
    pub const SECOND: Duration = Duration::from_secs(1);

    pub const fn from_secs(secs: u64) -> Duration {
        Duration(std::time::Duration::from_secs(secs))
    }

    pub const fn from_millis(millis: u64) -> Duration {
        Duration(std::time::Duration::from_millis(millis))
    }

    pub const fn as_millis(&self) -> u128 {
        self.0.as_millis()
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0.as_secs_f64()
    }

    /// Zero when `rhs` is the larger span.
    pub fn saturating_sub(self, rhs: Duration) -> Duration {
        self.0.checked_sub(rhs.0).map_or(Duration::ZERO, Duration)
    }

    /// `self`, bounded above by `limit`. Budget refills run elapsed time
    /// through this so a long gap between ticks grants at most `limit`
    /// worth of new budget.
    pub fn clamped_to(self, limit: Duration) -> Duration {
        if self > limit {
            limit
        } else {
            self
        }
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl From<std::time::Duration> for Duration {
    fn from(duration: std::time::Duration) -> Self {
        Self(duration)
    }
}

impl From<Duration> for std::time::Duration {
    fn from(duration: Duration) -> Self {
        duration.0
    }
}

impl Debug for Duration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A point on the monotonic clock.
///
/// A wrapper around [`std::time::Instant`] without the panicking
/// `duration_since`: elapsed time is always measured with
/// [`Instant::saturating_duration_since`], which reports a clock that stood
/// still or stepped backwards as zero elapsed.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instant(std::time::Instant);

impl Instant {
    pub fn now() -> Instant {
        Instant(std::time::Instant::now())
    }

    pub fn saturating_duration_since(&self, earlier: Instant) -> Duration {
        Duration(self.0.saturating_duration_since(earlier.0))
    }
}

impl From<std::time::Instant> for Instant {
    fn from(instant: std::time::Instant) -> Self {
        Self(instant)
    }
}

impl From<Instant> for std::time::Instant {
    fn from(instant: Instant) -> Self {
        instant.0
    }
}

impl Debug for Instant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub<Duration> for Instant {
    type Output = Instant;

    fn sub(self, rhs: Duration) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturating_subtraction_bottoms_out_at_zero() {
        let now = Instant::now();
        let later = now + Duration::from_millis(7);

        assert_eq!(
            Duration::from_millis(7),
            later.saturating_duration_since(now)
        );
        assert_eq!(Duration::ZERO, now.saturating_duration_since(later));

        let short = Duration::from_millis(2);
        let long = Duration::from_secs(5);
        assert_eq!(Duration::from_millis(4998), long.saturating_sub(short));
        assert_eq!(Duration::ZERO, short.saturating_sub(long));
    }

    #[test]
    fn clamping_bounds_above_only() {
        let limit = Duration::from_millis(30);

        assert_eq!(limit, Duration::from_secs(2).clamped_to(limit));
        assert_eq!(
            Duration::from_millis(5),
            Duration::from_millis(5).clamped_to(limit)
        );
        assert_eq!(limit, limit.clamped_to(limit));
    }

    #[test]
    fn instants_shift_by_durations() {
        let now = Instant::now();
        let later = now + Duration::SECOND;

        assert_eq!(now, later - Duration::SECOND);
        assert!(later > now);
    }

    #[test]
    fn std_conversions_are_lossless() {
        let instant = std::time::Instant::now();
        assert_eq!(instant, Instant::from(instant).into());
        assert_eq!(
            format!("{:?}", instant),
            format!("{:?}", Instant::from(instant))
        );

        let duration = std::time::Duration::from_millis(1234);
        assert_eq!(duration, Duration::from(duration).into());
        assert_eq!(1234, Duration::from(duration).as_millis());
        assert!(Duration::ZERO.is_zero());
    }
}
