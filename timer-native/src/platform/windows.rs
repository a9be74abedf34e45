use {
    super::{remaining, sleep_until_due, wall_clock_nanos},
    crate::{
        clock::ClockBehavior,
        error::ClockError,
        scheduler::{Due, OnDue},
    },
    std::{
        io,
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        thread,
        time::Duration,
    },
    windows::Win32::{
        Foundation::{CloseHandle, HANDLE, WAIT_FAILED},
        System::{SystemInformation::GetTickCount64, Threading::*, WindowsProgramming::QueryUnbiasedInterruptTime},
    },
};

const NANOS_PER_MILLI: i64 = 1_000_000;
const NANOS_PER_TICK: i64 = 100;

pub fn now_nanos(behavior: ClockBehavior) -> Result<i64, ClockError> {
    match behavior {
        ClockBehavior::Hourglass => {
            // includes time spent asleep
            let millis = unsafe { GetTickCount64() };
            i64::try_from(millis)
                .ok()
                .and_then(|millis| millis.checked_mul(NANOS_PER_MILLI))
                .ok_or(ClockError::OutOfRange { behavior })
        }
        ClockBehavior::PauseOnSuspend => {
            // 100ns units, excluding time spent asleep
            let mut ticks = 0u64;
            unsafe { QueryUnbiasedInterruptTime(&mut ticks) }.map_err(|error| ClockError::Unavailable {
                behavior,
                source: io::Error::other(error),
            })?;
            i64::try_from(ticks)
                .ok()
                .and_then(|ticks| ticks.checked_mul(NANOS_PER_TICK))
                .ok_or(ClockError::OutOfRange { behavior })
        }
        ClockBehavior::WallClock => wall_clock_nanos(),
    }
}

pub fn set_timer(due: Due, slice: Duration, cancelled: Arc<AtomicBool>, on_due: OnDue) {
    thread::spawn(move || {
        // Create a waitable timer
        let reached = match unsafe { CreateWaitableTimerW(None, true, None) } {
            Ok(timer) => {
                let reached = wait_on_timer(timer, &due, slice, &cancelled);
                let _ = unsafe { CloseHandle(timer) };
                reached
            }
            Err(error) => {
                tracing::warn!(behavior = %due.behavior, %error, "CreateWaitableTimerW failed, falling back to sleeping");
                sleep_until_due(&due, slice, &cancelled)
            }
        };

        if reached && !cancelled.load(Ordering::Acquire) {
            on_due();
        }
    });
}

fn wait_on_timer(timer: HANDLE, due: &Due, slice: Duration, cancelled: &AtomicBool) -> bool {
    loop {
        if cancelled.load(Ordering::Acquire) {
            return false;
        }
        let Some(left) = remaining(due) else {
            return true;
        };

        // Negative due times are relative, in 100ns intervals
        let wait = left.min(slice);
        let due_time = -i64::try_from(wait.as_nanos() / 100).unwrap_or(i64::MAX).max(1);

        unsafe {
            if let Err(error) = SetWaitableTimer(
                timer,
                &due_time as *const i64 as *const _,
                0,     // No period (one-shot)
                None,  // No completion routine
                None,  // No arg to completion routine
                false, // Don't resume system
            ) {
                tracing::warn!(behavior = %due.behavior, %error, "SetWaitableTimer failed, falling back to sleeping");
                return sleep_until_due(due, slice, cancelled);
            }
            if WaitForSingleObject(timer, INFINITE) == WAIT_FAILED {
                let error = io::Error::last_os_error();
                tracing::warn!(behavior = %due.behavior, %error, "WaitForSingleObject failed, falling back to sleeping");
                return sleep_until_due(due, slice, cancelled);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::clock::ClockSource, chrono::TimeDelta, std::sync::mpsc};

    #[test]
    fn test_every_clock_reads_nonzero() {
        for behavior in ClockBehavior::ALL {
            let nanos = now_nanos(behavior).unwrap();
            assert!(nanos > 0, "{behavior}: {nanos}");
        }
    }

    #[test]
    fn test_waitable_timer_reaches_deadline() {
        let clock = crate::SystemClock;
        let behavior = ClockBehavior::PauseOnSuspend;
        let due = Due {
            behavior,
            deadline: clock.deadline(behavior, clock.now(behavior), TimeDelta::milliseconds(30)),
            tolerance: Duration::ZERO,
        };
        let (tx, rx) = mpsc::channel();

        set_timer(due, Duration::from_millis(10), Arc::new(AtomicBool::new(false)), Box::new(move || tx.send(()).unwrap()));

        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(clock.has_fired(behavior, due.deadline));
    }
}
