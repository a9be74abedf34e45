use {
    super::{remaining, sleep_until_due, wall_clock_nanos},
    crate::{
        clock::ClockBehavior,
        error::ClockError,
        scheduler::{Due, OnDue},
    },
    dispatch2::{DispatchQueue, DispatchQueueGlobalPriority, DispatchTime, GlobalQueueIdentifier},
    std::{
        sync::{
            Arc, Mutex, OnceLock, PoisonError,
            atomic::{AtomicBool, Ordering},
        },
        thread,
        time::Duration,
    },
};

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct MachTimebaseInfo {
    numer: u32,
    denom: u32,
}

unsafe extern "C" {
    fn mach_absolute_time() -> u64;
    // Unlike mach_absolute_time, keeps counting while the system sleeps
    fn mach_continuous_time() -> u64;
    fn mach_timebase_info(info: *mut MachTimebaseInfo) -> libc::c_int;
}

static TIMEBASE: OnceLock<Option<MachTimebaseInfo>> = OnceLock::new();

fn timebase() -> Option<MachTimebaseInfo> {
    *TIMEBASE.get_or_init(|| {
        let mut info = MachTimebaseInfo::default();
        let status = unsafe { mach_timebase_info(&mut info) };
        (status == 0 && info.denom != 0).then_some(info)
    })
}

pub fn now_nanos(behavior: ClockBehavior) -> Result<i64, ClockError> {
    let ticks = match behavior {
        ClockBehavior::Hourglass => unsafe { mach_continuous_time() },
        ClockBehavior::PauseOnSuspend => unsafe { mach_absolute_time() },
        ClockBehavior::WallClock => return wall_clock_nanos(),
    };

    let Some(info) = timebase() else {
        return Err(ClockError::Unavailable {
            behavior,
            source: std::io::Error::other("mach_timebase_info failed"),
        });
    };
    let nanos = u128::from(ticks) * u128::from(info.numer) / u128::from(info.denom);
    i64::try_from(nanos).map_err(|_| ClockError::OutOfRange { behavior })
}

/// One registration, re-armed on a GCD queue until its deadline is reached.
struct Waiter {
    due: Due,
    slice: Duration,
    cancelled: Arc<AtomicBool>,
    on_due: Mutex<Option<OnDue>>,
}

impl Waiter {
    fn run(&self) {
        if self.cancelled.load(Ordering::Acquire) {
            return;
        }
        let on_due = self.on_due.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(on_due) = on_due {
            on_due();
        }
    }
}

pub fn set_timer(due: Due, slice: Duration, cancelled: Arc<AtomicBool>, on_due: OnDue) {
    arm(Arc::new(Waiter {
        due,
        slice,
        cancelled,
        on_due: Mutex::new(Some(on_due)),
    }));
}

fn arm(waiter: Arc<Waiter>) {
    if waiter.cancelled.load(Ordering::Acquire) {
        return;
    }
    let Some(left) = remaining(&waiter.due) else {
        waiter.run();
        return;
    };

    // dispatch_after counts mach_absolute_time, which pauses during sleep;
    // bounded waits let the other clocks be re-checked after wake.
    let when = DispatchTime::try_from(left.min(waiter.slice)).unwrap_or(DispatchTime::NOW);
    let queue = DispatchQueue::global_queue(GlobalQueueIdentifier::Priority(DispatchQueueGlobalPriority::Default));

    let rearm = waiter.clone();
    if queue.after(when, move || arm(rearm)).is_err() {
        tracing::warn!(behavior = %waiter.due.behavior, "dispatch_after failed, falling back to sleeping");
        thread::spawn(move || {
            if sleep_until_due(&waiter.due, waiter.slice, &waiter.cancelled) {
                waiter.run();
            }
        });
    }
}
