//! Hand-driven clock and scheduler
//!
//! [`ManualClock`] keeps the three behaviors' clocks as separate counters, so
//! suspend and calendar changes can be simulated independently:
//!
//! | call | `Hourglass` | `PauseOnSuspend` | `WallClock` |
//! |------|-------------|------------------|-------------|
//! | [`advance`](ManualClock::advance) | + d | + d | + d |
//! | [`suspend`](ManualClock::suspend) | + d | unchanged | + d |
//! | [`jump_wall_clock`](ManualClock::jump_wall_clock) | unchanged | unchanged | ± delta |
//!
//! ```
//! use {
//!     chrono::TimeDelta,
//!     std::time::Duration,
//!     timer_native::{ClockBehavior, ClockSource, ManualClock},
//! };
//!
//! let clock = ManualClock::new();
//! let before = clock.now(ClockBehavior::PauseOnSuspend);
//!
//! clock.suspend(Duration::from_secs(60));
//! assert_eq!(clock.now(ClockBehavior::PauseOnSuspend), before);
//! assert_eq!(clock.now(ClockBehavior::Hourglass).as_nanos(), 60_000_000_000);
//!
//! clock.jump_wall_clock(TimeDelta::hours(-1));
//! assert_eq!(clock.now(ClockBehavior::Hourglass).as_nanos(), 60_000_000_000);
//! ```

use {
    crate::{
        clock::{ClockBehavior, ClockSource, Timestamp},
        error::ClockError,
        scheduler::{Due, OnDue, Registration, Scheduler},
    },
    chrono::{DateTime, TimeDelta, Utc},
    std::{
        mem,
        sync::{
            Arc, Mutex, PoisonError,
            atomic::{AtomicI64, Ordering},
        },
        time::Duration,
    },
};

fn duration_nanos(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX)
}

fn delta_nanos(delta: TimeDelta) -> i64 {
    delta.num_nanoseconds().unwrap_or(if delta < TimeDelta::zero() { i64::MIN } else { i64::MAX })
}

fn bump(counter: &AtomicI64, nanos: i64) {
    // fetch_update only fails when the closure returns None
    let _ = counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
        Some(current.saturating_add(nanos))
    });
}

/// A [`ClockSource`] that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    hourglass: AtomicI64,
    awake: AtomicI64,
    wall: AtomicI64,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    /// Monotonic clocks at zero, wall clock at the Unix epoch.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(DateTime::UNIX_EPOCH)
    }

    /// Monotonic clocks at zero, wall clock at `wall`.
    #[must_use]
    pub fn starting_at(wall: DateTime<Utc>) -> Self {
        Self {
            hourglass: AtomicI64::new(0),
            awake: AtomicI64::new(0),
            // representable until the year 2262
            wall: AtomicI64::new(wall.timestamp_nanos_opt().unwrap_or(i64::MAX)),
        }
    }

    /// Time passes with the system awake.
    pub fn advance(&self, duration: Duration) {
        let nanos = duration_nanos(duration);
        bump(&self.hourglass, nanos);
        bump(&self.awake, nanos);
        bump(&self.wall, nanos);
    }

    /// Time passes with the system asleep.
    pub fn suspend(&self, duration: Duration) {
        let nanos = duration_nanos(duration);
        bump(&self.hourglass, nanos);
        bump(&self.wall, nanos);
    }

    /// The calendar clock is set forward (positive) or back (negative).
    pub fn jump_wall_clock(&self, delta: TimeDelta) {
        bump(&self.wall, delta_nanos(delta));
    }

    /// The calendar clock is set to `wall`.
    pub fn set_wall_clock(&self, wall: DateTime<Utc>) {
        self.wall.store(wall.timestamp_nanos_opt().unwrap_or(i64::MAX), Ordering::Release);
    }

    /// Current calendar time.
    #[must_use]
    pub fn wall_clock(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.wall.load(Ordering::Acquire))
    }
}

impl ClockSource for ManualClock {
    fn try_now(&self, behavior: ClockBehavior) -> Result<Timestamp, ClockError> {
        let counter = match behavior {
            ClockBehavior::Hourglass => &self.hourglass,
            ClockBehavior::PauseOnSuspend => &self.awake,
            ClockBehavior::WallClock => &self.wall,
        };
        Ok(Timestamp::from_nanos(behavior, counter.load(Ordering::Acquire)))
    }
}

struct Entry {
    due: Due,
    registration: Registration,
    on_due: OnDue,
}

/// A [`Scheduler`] that runs callbacks only when [`run_due`] is called.
///
/// Deadlines are judged against the shared [`ManualClock`].
///
/// [`run_due`]: ManualScheduler::run_due
pub struct ManualScheduler {
    clock: Arc<ManualClock>,
    entries: Mutex<Vec<Entry>>,
}

impl std::fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("clock", &self.clock)
            .field("pending", &self.pending())
            .finish()
    }
}

impl ManualScheduler {
    #[must_use]
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn clock(&self) -> &Arc<ManualClock> {
        &self.clock
    }

    /// Registrations that are neither cancelled nor run yet.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|entry| !entry.registration.is_cancelled())
            .count()
    }

    /// Runs every registration whose deadline has been reached, in the order
    /// they were registered, and returns how many ran.
    ///
    /// Cancelled registrations are dropped without running. Callbacks run
    /// with no lock held, so they may register again.
    pub fn run_due(&self) -> usize {
        let ready = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            entries.retain(|entry| !entry.registration.is_cancelled());
            let (ready, waiting) = mem::take(&mut *entries)
                .into_iter()
                .partition::<Vec<_>, _>(|entry| self.clock.has_fired(entry.due.behavior, entry.due.deadline));
            *entries = waiting;
            ready
        };

        let mut ran = 0;
        for entry in ready {
            // may have been cancelled by an earlier callback in this batch
            if entry.registration.is_cancelled() {
                continue;
            }
            tracing::trace!(behavior = %entry.due.behavior, "running due registration");
            (entry.on_due)();
            ran += 1;
        }
        ran
    }
}

impl Scheduler for ManualScheduler {
    fn register(&self, due: Due, on_due: OnDue) -> Registration {
        let registration = Registration::new();
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).push(Entry {
            due,
            registration: registration.clone(),
            on_due,
        });
        registration
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        std::sync::atomic::{AtomicUsize, Ordering},
    };

    fn due_in(clock: &ManualClock, behavior: ClockBehavior, interval: TimeDelta) -> Due {
        Due {
            behavior,
            deadline: clock.deadline(behavior, clock.now(behavior), interval),
            tolerance: Duration::ZERO,
        }
    }

    #[test]
    fn test_advance_moves_every_clock() {
        let clock = ManualClock::new();
        clock.advance(Duration::from_millis(1_500));
        for behavior in ClockBehavior::ALL {
            assert_eq!(clock.now(behavior).as_nanos(), 1_500_000_000, "{behavior}");
        }
    }

    #[test]
    fn test_suspend_pauses_only_awake_clock() {
        let clock = ManualClock::new();
        clock.suspend(Duration::from_secs(7_200));
        assert_eq!(clock.now(ClockBehavior::Hourglass).as_nanos(), 7_200_000_000_000);
        assert_eq!(clock.now(ClockBehavior::PauseOnSuspend).as_nanos(), 0);
        assert_eq!(clock.wall_clock(), DateTime::UNIX_EPOCH + TimeDelta::hours(2));
    }

    #[test]
    fn test_wall_clock_jumps_both_ways() {
        let start = DateTime::UNIX_EPOCH + TimeDelta::days(20_000);
        let clock = ManualClock::starting_at(start);

        clock.jump_wall_clock(TimeDelta::hours(1));
        assert_eq!(clock.wall_clock(), start + TimeDelta::hours(1));
        clock.jump_wall_clock(TimeDelta::hours(-3));
        assert_eq!(clock.wall_clock(), start - TimeDelta::hours(2));
        assert_eq!(clock.now(ClockBehavior::Hourglass).as_nanos(), 0);

        clock.set_wall_clock(start);
        assert_eq!(clock.wall_clock(), start);
    }

    #[test]
    fn test_run_due_only_runs_reached_deadlines() {
        let clock = Arc::new(ManualClock::new());
        let scheduler = ManualScheduler::new(clock.clone());
        let ran = Arc::new(AtomicUsize::new(0));

        for millis in [10, 20, 30] {
            let ran = ran.clone();
            let due = due_in(&clock, ClockBehavior::Hourglass, TimeDelta::milliseconds(millis));
            let _registration = scheduler.register(due, Box::new(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            }));
        }

        assert_eq!(scheduler.run_due(), 0);
        clock.advance(Duration::from_millis(20));
        assert_eq!(scheduler.run_due(), 2);
        assert_eq!(scheduler.pending(), 1);
        assert_eq!(scheduler.run_due(), 0);

        clock.advance(Duration::from_millis(10));
        assert_eq!(scheduler.run_due(), 1);
        assert_eq!(ran.load(Ordering::SeqCst), 3);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_cancelled_registrations_are_dropped() {
        let clock = Arc::new(ManualClock::new());
        let scheduler = ManualScheduler::new(clock.clone());
        let ran = Arc::new(AtomicUsize::new(0));

        let counter = ran.clone();
        let registration = scheduler.register(
            due_in(&clock, ClockBehavior::WallClock, TimeDelta::seconds(1)),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        registration.cancel();
        assert_eq!(scheduler.pending(), 0);

        clock.advance(Duration::from_secs(5));
        assert_eq!(scheduler.run_due(), 0);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_pause_on_suspend_registration_waits_out_suspend() {
        let clock = Arc::new(ManualClock::new());
        let scheduler = ManualScheduler::new(clock.clone());

        let _registration = scheduler.register(
            due_in(&clock, ClockBehavior::PauseOnSuspend, TimeDelta::seconds(5)),
            Box::new(|| {}),
        );

        clock.suspend(Duration::from_secs(3_600));
        assert_eq!(scheduler.run_due(), 0);
        clock.advance(Duration::from_secs(5));
        assert_eq!(scheduler.run_due(), 1);
    }
}
