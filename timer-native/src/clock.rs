//! Clock sources, one per timer behavior
//!
//! A [`Timestamp`] is only meaningful next to other timestamps read for the
//! same [`ClockBehavior`]: monotonic readings count from an arbitrary,
//! behavior-specific epoch, while wall-clock readings count from the Unix
//! epoch.

use {
    crate::{error::ClockError, platform},
    chrono::{DateTime, TimeDelta, Utc},
    std::{cmp::Ordering, fmt},
};

const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// How elapsed time is measured for a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClockBehavior {
    /// Fires after the interval has elapsed in real time, including time the
    /// system spent asleep. Calendar clock changes have no effect.
    Hourglass,
    /// Fires after the system has been awake for the interval. This is how
    /// run-loop timers behave: a 5 second timer armed just before a two hour
    /// sleep fires about 5 seconds after wake.
    PauseOnSuspend,
    /// Fires once the calendar clock reaches the fire date, however it gets
    /// there: sleep, NTP, or the user setting the clock.
    WallClock,
}

impl ClockBehavior {
    pub const ALL: [Self; 3] = [Self::Hourglass, Self::PauseOnSuspend, Self::WallClock];

    /// Whether timestamps for this behavior come from a monotonic counter.
    #[must_use]
    pub const fn is_monotonic(self) -> bool {
        !matches!(self, Self::WallClock)
    }
}

impl fmt::Display for ClockBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Hourglass => "hourglass",
            Self::PauseOnSuspend => "pause-on-suspend",
            Self::WallClock => "wall-clock",
        })
    }
}

/// A reading of one behavior's clock, in nanoseconds.
///
/// Readings from different behaviors are unordered: `partial_cmp` returns
/// `None` for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timestamp {
    behavior: ClockBehavior,
    nanos: i64,
}

impl Timestamp {
    #[must_use]
    pub const fn from_nanos(behavior: ClockBehavior, nanos: i64) -> Self {
        Self { behavior, nanos }
    }

    #[must_use]
    pub const fn behavior(self) -> ClockBehavior {
        self.behavior
    }

    #[must_use]
    pub const fn as_nanos(self) -> i64 {
        self.nanos
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_secs_f64(self) -> f64 {
        self.nanos as f64 / NANOS_PER_SEC
    }

    /// Moves the timestamp by `delta`, clamping at the ends of the range.
    #[must_use]
    pub fn saturating_add(self, delta: TimeDelta) -> Self {
        let nanos = match delta.num_nanoseconds() {
            Some(delta) => self.nanos.saturating_add(delta),
            None if delta < TimeDelta::zero() => i64::MIN,
            None => i64::MAX,
        };
        Self { nanos, ..self }
    }

    /// Signed time from `earlier` to `self`.
    ///
    /// Both readings must come from the same behavior's clock.
    #[must_use]
    pub fn signed_duration_since(self, earlier: Self) -> TimeDelta {
        debug_assert_eq!(
            self.behavior, earlier.behavior,
            "timestamps from different clocks cannot be subtracted"
        );
        // i128 keeps the difference of two extreme readings from overflowing
        let diff = i128::from(self.nanos) - i128::from(earlier.nanos);
        match i64::try_from(diff) {
            Ok(nanos) => TimeDelta::nanoseconds(nanos),
            Err(_) if diff < 0 => TimeDelta::MIN,
            Err(_) => TimeDelta::MAX,
        }
    }

    /// The calendar date of a wall-clock reading.
    ///
    /// Monotonic readings have no calendar meaning on their own; project them
    /// through [`ClockSource::time_until`] first.
    #[must_use]
    pub fn to_date_time(self) -> DateTime<Utc> {
        debug_assert_eq!(self.behavior, ClockBehavior::WallClock);
        DateTime::from_timestamp_nanos(self.nanos)
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        (self.behavior == other.behavior).then(|| self.nanos.cmp(&other.nanos))
    }
}

/// A source of "now" for every [`ClockBehavior`].
///
/// Only [`try_now`](Self::try_now) is required; the rest derive from it and
/// re-read the clock on every call. Nothing is cached, because the wall clock
/// can move in either direction between two calls.
pub trait ClockSource: Send + Sync + 'static {
    /// Reads the clock for `behavior`.
    ///
    /// # Errors
    ///
    /// Returns a [`ClockError`] if the platform cannot report this clock.
    fn try_now(&self, behavior: ClockBehavior) -> Result<Timestamp, ClockError>;

    /// Reads the clock for `behavior`.
    ///
    /// # Panics
    ///
    /// Panics if the clock is unavailable. No timer can work without its
    /// clock, so this is not a recoverable condition.
    fn now(&self, behavior: ClockBehavior) -> Timestamp {
        self.try_now(behavior).unwrap_or_else(|error| panic!("{error}"))
    }

    /// The deadline `interval` after `now`, in `behavior`'s clock.
    fn deadline(&self, behavior: ClockBehavior, now: Timestamp, interval: TimeDelta) -> Timestamp {
        debug_assert_eq!(now.behavior(), behavior);
        now.saturating_add(interval)
    }

    /// Whether the live clock has reached `deadline`.
    fn has_fired(&self, behavior: ClockBehavior, deadline: Timestamp) -> bool {
        self.now(behavior) >= deadline
    }

    /// `deadline - now`; negative once the deadline has passed.
    fn time_until(&self, behavior: ClockBehavior, deadline: Timestamp) -> TimeDelta {
        deadline.signed_duration_since(self.now(behavior))
    }
}

/// The operating system's clocks.
///
/// | behavior | Linux | macOS | Windows |
/// |----------|-------|-------|---------|
/// | `Hourglass` | `CLOCK_BOOTTIME` | `mach_continuous_time` | `GetTickCount64` |
/// | `PauseOnSuspend` | `CLOCK_MONOTONIC` | `mach_absolute_time` | `QueryUnbiasedInterruptTime` |
/// | `WallClock` | `CLOCK_REALTIME` | system time | system time |
///
/// Other targets fall back to [`std::time::Instant`] for both monotonic
/// behaviors, so there they cannot tell suspend apart.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    fn try_now(&self, behavior: ClockBehavior) -> Result<Timestamp, ClockError> {
        platform::now_nanos(behavior).map(|nanos| Timestamp::from_nanos(behavior, nanos))
    }
}

/// Seconds on the system clock for `behavior`.
///
/// A single value is arbitrary; subtract two readings to measure time the way
/// a timer with that behavior would.
///
/// # Panics
///
/// Panics if the clock is unavailable.
#[must_use]
pub fn time_interval_value(behavior: ClockBehavior) -> f64 {
    SystemClock.now(behavior).as_secs_f64()
}
