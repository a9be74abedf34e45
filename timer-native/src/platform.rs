//! Platform-specific clock readings and timer arming
//!
//! Every platform module provides:
//!
//! - `now_nanos(behavior)`: the reading of that behavior's clock
//! - `set_timer(due, slice, cancelled, on_due)`: run `on_due` once the
//!   deadline is reached according to [`SystemClock`], unless `cancelled` is
//!   set first. A single native wait never exceeds `slice`; after each wait
//!   the live clock is checked again.

#[cfg(target_os = "macos")]
use macos as platform;
#[cfg(target_os = "macos")]
mod macos;

#[cfg(target_os = "windows")]
use windows as platform;
#[cfg(target_os = "windows")]
mod windows;

#[cfg(target_os = "linux")]
use linux as platform;
#[cfg(target_os = "linux")]
mod linux;

// Fallback implementation for unsupported platforms
#[cfg(not(any(target_os = "macos", target_os = "windows", target_os = "linux")))]
use fallback as platform;
#[cfg(not(any(target_os = "macos", target_os = "windows", target_os = "linux")))]
mod fallback;

pub use platform::*;
use {
    crate::{
        clock::{ClockBehavior, ClockSource, SystemClock},
        error::ClockError,
        scheduler::Due,
    },
    chrono::Utc,
    std::{
        sync::atomic::{AtomicBool, Ordering},
        thread,
        time::Duration,
    },
};

/// Time left until `due`, or `None` once it has been reached.
pub(crate) fn remaining(due: &Due) -> Option<Duration> {
    let until = SystemClock.time_until(due.behavior, due.deadline);
    // to_std fails for negative deltas; zero counts as reached
    until.to_std().ok().filter(|left| !left.is_zero())
}

/// Sleeps in slices of at most `slice` until `due` is reached.
///
/// Returns `false` if `cancelled` was set first.
pub(crate) fn sleep_until_due(due: &Due, slice: Duration, cancelled: &AtomicBool) -> bool {
    loop {
        if cancelled.load(Ordering::Acquire) {
            return false;
        }
        let Some(left) = remaining(due) else {
            return true;
        };
        let wait = left.min(slice);
        tracing::trace!(behavior = %due.behavior, ?wait, "sleeping toward deadline");
        thread::sleep(wait);
    }
}

/// Calendar time in nanoseconds since the Unix epoch.
#[cfg_attr(target_os = "linux", allow(dead_code))]
pub(crate) fn wall_clock_nanos() -> Result<i64, ClockError> {
    Utc::now()
        .timestamp_nanos_opt()
        .ok_or(ClockError::OutOfRange { behavior: ClockBehavior::WallClock })
}
