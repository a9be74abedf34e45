//! Error types

use {crate::clock::ClockBehavior, std::io};

/// A platform clock could not be read.
///
/// Every timer operation depends on reading a clock, so the infallible
/// [`ClockSource::now`](crate::ClockSource::now) path treats this as fatal.
#[derive(Debug, thiserror::Error)]
pub enum ClockError {
    /// The OS refused to report the time for this clock.
    #[error("{behavior} clock is unavailable")]
    Unavailable {
        behavior: ClockBehavior,
        #[source]
        source: io::Error,
    },
    /// The reading does not fit in a signed 64-bit nanosecond count.
    #[error("{behavior} clock reading is out of range")]
    OutOfRange { behavior: ClockBehavior },
}

/// Error returned by [`Timer::schedule`](crate::Timer::schedule)
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("timer has already fired or been invalidated")]
    NotPending,
    #[error("timer is already registered with a scheduler")]
    AlreadyScheduled,
}

/// A configuration override could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: expected {expected}, got {value:?}")]
    InvalidValue {
        var: &'static str,
        expected: &'static str,
        value: String,
    },
}
