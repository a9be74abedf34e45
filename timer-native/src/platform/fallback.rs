use {
    super::{sleep_until_due, wall_clock_nanos},
    crate::{
        clock::ClockBehavior,
        error::ClockError,
        scheduler::{Due, OnDue},
    },
    std::{
        sync::{
            Arc, OnceLock,
            atomic::{AtomicBool, Ordering},
        },
        thread,
        time::{Duration, Instant},
    },
};

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// `Instant` is the only portable monotonic clock, so both monotonic
/// behaviors share it and neither can tell suspend apart here.
pub fn now_nanos(behavior: ClockBehavior) -> Result<i64, ClockError> {
    match behavior {
        ClockBehavior::Hourglass | ClockBehavior::PauseOnSuspend => {
            let elapsed = EPOCH.get_or_init(Instant::now).elapsed();
            i64::try_from(elapsed.as_nanos()).map_err(|_| ClockError::OutOfRange { behavior })
        }
        ClockBehavior::WallClock => wall_clock_nanos(),
    }
}

pub fn set_timer(due: Due, slice: Duration, cancelled: Arc<AtomicBool>, on_due: OnDue) {
    thread::spawn(move || {
        if sleep_until_due(&due, slice, &cancelled) && !cancelled.load(Ordering::Acquire) {
            on_due();
        }
    });
}
