use {
    super::sleep_until_due,
    crate::{
        clock::{ClockBehavior, ClockSource, SystemClock},
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
};

const NANOS_PER_SEC: i64 = 1_000_000_000;

const fn clock_id(behavior: ClockBehavior) -> libc::clockid_t {
    match behavior {
        // keeps counting while suspended
        ClockBehavior::Hourglass => libc::CLOCK_BOOTTIME,
        ClockBehavior::PauseOnSuspend => libc::CLOCK_MONOTONIC,
        ClockBehavior::WallClock => libc::CLOCK_REALTIME,
    }
}

pub fn now_nanos(behavior: ClockBehavior) -> Result<i64, ClockError> {
    let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
    if unsafe { libc::clock_gettime(clock_id(behavior), &mut ts) } == -1 {
        return Err(ClockError::Unavailable {
            behavior,
            source: io::Error::last_os_error(),
        });
    }

    i64::from(ts.tv_sec)
        .checked_mul(NANOS_PER_SEC)
        .and_then(|nanos| nanos.checked_add(i64::from(ts.tv_nsec)))
        .ok_or(ClockError::OutOfRange { behavior })
}

pub fn set_timer(due: Due, slice: Duration, cancelled: Arc<AtomicBool>, on_due: OnDue) {
    thread::spawn(move || {
        // timerfd on the behavior's own clock, so suspend is accounted for by the kernel
        let timer_fd = unsafe { libc::timerfd_create(clock_id(due.behavior), libc::TFD_CLOEXEC) };

        let reached = if timer_fd == -1 {
            tracing::warn!(
                behavior = %due.behavior,
                error = %io::Error::last_os_error(),
                "timerfd_create failed, falling back to sleeping"
            );
            sleep_until_due(&due, slice, &cancelled)
        } else {
            let reached = wait_on_timerfd(timer_fd, &due, slice, &cancelled);
            unsafe { libc::close(timer_fd) };
            reached
        };

        // Only call back if the deadline was reached and nobody cancelled in the meantime
        if reached && !cancelled.load(Ordering::Acquire) {
            on_due();
        }
    });
}

fn wait_on_timerfd(timer_fd: libc::c_int, due: &Due, slice: Duration, cancelled: &AtomicBool) -> bool {
    let mut flags = libc::TFD_TIMER_ABSTIME;
    if due.behavior == ClockBehavior::WallClock {
        // wakes the wait with ECANCELED whenever the realtime clock is set
        flags |= libc::TFD_TIMER_CANCEL_ON_SET;
    }

    let deadline = due.deadline.as_nanos();
    let timer_spec = libc::itimerspec {
        it_interval: libc::timespec { tv_sec: 0, tv_nsec: 0 },
        it_value: libc::timespec {
            tv_sec: deadline.div_euclid(NANOS_PER_SEC) as libc::time_t,
            tv_nsec: deadline.rem_euclid(NANOS_PER_SEC) as libc::c_long,
        },
    };
    let slice_ms = libc::c_int::try_from(slice.as_millis()).unwrap_or(libc::c_int::MAX).max(1);

    loop {
        if cancelled.load(Ordering::Acquire) {
            return false;
        }

        if unsafe { libc::timerfd_settime(timer_fd, flags, &timer_spec, std::ptr::null_mut()) } == -1 {
            tracing::warn!(
                behavior = %due.behavior,
                error = %io::Error::last_os_error(),
                "timerfd_settime failed, falling back to sleeping"
            );
            return sleep_until_due(due, slice, cancelled);
        }

        let mut poll_fd = libc::pollfd {
            fd: timer_fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let ready = unsafe { libc::poll(&mut poll_fd, 1, slice_ms) };
        if ready == -1 {
            let error = io::Error::last_os_error();
            if error.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            tracing::warn!(behavior = %due.behavior, %error, "poll on timerfd failed, falling back to sleeping");
            return sleep_until_due(due, slice, cancelled);
        }
        if ready > 0 {
            // Either an expiration count or ECANCELED after a clock change;
            // the clock check below decides in both cases.
            let mut buffer = [0u8; 8];
            let _ = unsafe { libc::read(timer_fd, buffer.as_mut_ptr().cast::<libc::c_void>(), buffer.len()) };
        }

        if SystemClock.has_fired(due.behavior, due.deadline) {
            return true;
        }
        tracing::trace!(behavior = %due.behavior, "deadline not reached yet, re-arming timerfd");
    }
}
