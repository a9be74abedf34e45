//! Single-shot timer with a per-instance clock behavior

use {
    crate::{
        clock::{ClockBehavior, ClockSource, SystemClock, Timestamp},
        completion::Completion,
        config::TimerConfig,
        error::ScheduleError,
        scheduler::{Due, Registration, Scheduler},
    },
    chrono::{DateTime, TimeDelta, Utc},
    std::{
        fmt, mem,
        sync::{
            Arc, Mutex, MutexGuard, PoisonError,
            atomic::{AtomicU64, Ordering},
        },
        task::{Context, Poll, Waker},
        time::Duration,
    },
};

type Callback<T> = Box<dyn FnOnce(&Timer<T>, &T) + Send + 'static>;

/// Where a timer is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerState {
    Pending,
    Fired,
    Invalidated,
}

/// How a timer left [`TimerState::Pending`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Fired,
    Invalidated,
}

enum Slot<T> {
    // The callback, and everything it captured, lives exactly as long as the
    // timer is pending.
    Pending { callback: Callback<T>, wakers: Vec<Waker> },
    // Fired, callback still running; completions keep waiting.
    Firing { wakers: Vec<Waker> },
    Fired,
    Invalidated,
}

impl<T> Slot<T> {
    const fn state(&self) -> TimerState {
        match self {
            Self::Pending { .. } => TimerState::Pending,
            Self::Firing { .. } | Self::Fired => TimerState::Fired,
            Self::Invalidated => TimerState::Invalidated,
        }
    }
}

fn lock<S>(mutex: &Mutex<S>) -> MutexGuard<'_, S> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A timer that fires once, measured by the clock its [`ClockBehavior`]
/// selects.
///
/// Construction computes the deadline but registers nothing; call
/// [`schedule`](Self::schedule) to hand it to a [`Scheduler`], or
/// [`fire`](Self::fire) to trigger it directly.
///
/// ```
/// use {
///     chrono::TimeDelta,
///     std::sync::Arc,
///     timer_native::{ClockBehavior, ManualClock, Timer, TimerConfig},
/// };
///
/// let clock = Arc::new(ManualClock::new());
/// let timer = Timer::with_clock(
///     clock,
///     &TimerConfig::default(),
///     ClockBehavior::Hourglass,
///     TimeDelta::seconds(5),
///     "tea",
///     |timer, drink| assert!(!timer.is_valid() && *drink == "tea"),
/// );
///
/// assert_eq!(timer.time_since_fire_date(), TimeDelta::seconds(-5));
/// timer.fire();
/// assert!(!timer.is_valid());
/// ```
pub struct Timer<T> {
    behavior: ClockBehavior,
    deadline: Timestamp,
    clock: Arc<dyn ClockSource>,
    tolerance_nanos: AtomicU64,
    user_info: T,
    slot: Mutex<Slot<T>>,
    registration: Mutex<Option<Registration>>,
}

impl<T> Timer<T>
where
    T: Send + Sync + 'static,
{
    /// Creates a pending timer on the system clocks that fires `interval`
    /// from now.
    ///
    /// Intervals below [`TimerConfig::min_interval`] (including zero and
    /// negative ones) are raised to it. Uses [`TimerConfig::default`];
    /// environment overrides only apply through [`with_clock`](Self::with_clock).
    ///
    /// # Panics
    ///
    /// Panics if the system clock for `behavior` is unavailable.
    pub fn new<F>(behavior: ClockBehavior, interval: TimeDelta, user_info: T, callback: F) -> Self
    where
        F: FnOnce(&Self, &T) + Send + 'static,
    {
        Self::with_clock(
            Arc::new(SystemClock),
            &TimerConfig::default(),
            behavior,
            interval,
            user_info,
            callback,
        )
    }

    /// Like [`new`](Self::new), measuring time with `clock` and applying
    /// `config`'s minimum interval.
    ///
    /// # Panics
    ///
    /// Panics if `clock` cannot read `behavior`'s clock.
    pub fn with_clock<F>(
        clock: Arc<dyn ClockSource>,
        config: &TimerConfig,
        behavior: ClockBehavior,
        interval: TimeDelta,
        user_info: T,
        callback: F,
    ) -> Self
    where
        F: FnOnce(&Self, &T) + Send + 'static,
    {
        let interval = interval.max(config.min_interval);
        let now = clock.now(behavior);
        let deadline = clock.deadline(behavior, now, interval);
        tracing::debug!(%behavior, ?interval, deadline = deadline.as_nanos(), "timer created");

        Self {
            behavior,
            deadline,
            clock,
            tolerance_nanos: AtomicU64::new(0),
            user_info,
            slot: Mutex::new(Slot::Pending {
                callback: Box::new(callback),
                wakers: Vec::new(),
            }),
            registration: Mutex::new(None),
        }
    }

    /// Registers the timer with `scheduler`, which calls [`fire`](Self::fire)
    /// once the deadline is reached.
    ///
    /// The scheduler only holds a weak reference: dropping every `Arc` to the
    /// timer means it never fires.
    ///
    /// # Errors
    ///
    /// [`ScheduleError::NotPending`] if the timer had already fired or been
    /// invalidated when this was called, [`ScheduleError::AlreadyScheduled`]
    /// if it was scheduled before. A timer that fires during `register`
    /// counts as scheduled.
    pub fn schedule(self: &Arc<Self>, scheduler: &dyn Scheduler) -> Result<(), ScheduleError> {
        if !self.is_valid() {
            return Err(ScheduleError::NotPending);
        }
        if lock(&self.registration).is_some() {
            return Err(ScheduleError::AlreadyScheduled);
        }

        let due = Due {
            behavior: self.behavior,
            deadline: self.deadline,
            tolerance: self.tolerance(),
        };
        let timer = Arc::downgrade(self);
        // No lock is held here: a scheduler is free to call back before
        // `register` returns.
        let registration = scheduler.register(
            due,
            Box::new(move || {
                if let Some(timer) = timer.upgrade() {
                    timer.fire();
                }
            }),
        );

        let mut stored = lock(&self.registration);
        if stored.is_some() {
            // lost a race with a concurrent schedule call
            registration.cancel();
            return Err(ScheduleError::AlreadyScheduled);
        }
        if !self.is_valid() {
            // the scheduler already called back, or the timer was
            // invalidated meanwhile; either way the registration is spent
            registration.cancel();
            return Ok(());
        }
        *stored = Some(registration);
        tracing::debug!(behavior = %self.behavior, "timer scheduled");
        Ok(())
    }

    /// Fires now: if pending, moves to [`TimerState::Fired`] and runs the
    /// callback on this thread before returning. Otherwise does nothing.
    ///
    /// The transition happens before the callback runs, so concurrent or
    /// re-entrant `fire`/`invalidate` calls are no-ops and the callback runs
    /// at most once.
    pub fn fire(&self) {
        let Some((callback, wakers)) = self.leave_pending(Slot::Firing { wakers: Vec::new() }) else {
            return;
        };
        tracing::debug!(behavior = %self.behavior, "timer fired");

        // settles to Fired even if the callback unwinds
        let _settle = Settle {
            slot: &self.slot,
            wakers,
        };
        callback(self, &self.user_info);
    }

    /// Stops the timer: if pending, drops the callback and moves to
    /// [`TimerState::Invalidated`]. Otherwise does nothing.
    ///
    /// Safe to call any number of times, including from inside the callback.
    pub fn invalidate(&self) {
        let Some((callback, wakers)) = self.leave_pending(Slot::Invalidated) else {
            return;
        };
        tracing::debug!(behavior = %self.behavior, "timer invalidated");

        drop(callback);
        wakers.into_iter().for_each(Waker::wake);
    }
}

/// Moves a firing slot to `Fired` and wakes every completion when dropped.
struct Settle<'a, T> {
    slot: &'a Mutex<Slot<T>>,
    wakers: Vec<Waker>,
}

impl<T> Drop for Settle<'_, T> {
    fn drop(&mut self) {
        let mut wakers = mem::take(&mut self.wakers);
        let settled = mem::replace(&mut *lock(self.slot), Slot::Fired);
        if let Slot::Firing { wakers: late } = settled {
            wakers.extend(late);
        }
        wakers.into_iter().for_each(Waker::wake);
    }
}

impl<T> Timer<T> {
    /// Takes the Pending → `next` edge. Exactly one caller wins it.
    fn leave_pending(&self, next: Slot<T>) -> Option<(Callback<T>, Vec<Waker>)> {
        let previous = {
            let mut slot = lock(&self.slot);
            if !matches!(*slot, Slot::Pending { .. }) {
                return None;
            }
            mem::replace(&mut *slot, next)
        };
        if let Some(registration) = lock(&self.registration).take() {
            registration.cancel();
        }

        match previous {
            Slot::Pending { callback, wakers } => Some((callback, wakers)),
            Slot::Firing { .. } | Slot::Fired | Slot::Invalidated => None,
        }
    }

    pub(crate) fn poll_outcome(&self, cx: &mut Context<'_>) -> Poll<Outcome> {
        let mut slot = lock(&self.slot);
        match &mut *slot {
            Slot::Fired => Poll::Ready(Outcome::Fired),
            Slot::Invalidated => Poll::Ready(Outcome::Invalidated),
            Slot::Pending { wakers, .. } | Slot::Firing { wakers } => {
                if !wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
                    wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }

    /// A future that resolves once the timer fires or is invalidated.
    ///
    /// Any number of completions may wait on the same timer.
    #[must_use]
    pub const fn completion(&self) -> Completion<'_, T> {
        Completion::new(self)
    }

    #[must_use]
    pub fn state(&self) -> TimerState {
        lock(&self.slot).state()
    }

    /// `true` until the timer fires or is invalidated.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.state() == TimerState::Pending
    }

    #[must_use]
    pub const fn behavior(&self) -> ClockBehavior {
        self.behavior
    }

    #[must_use]
    pub const fn user_info(&self) -> &T {
        &self.user_info
    }

    /// The deadline in the behavior's own clock.
    #[must_use]
    pub const fn deadline(&self) -> Timestamp {
        self.deadline
    }

    /// Calendar date at which the timer is expected to fire.
    ///
    /// For [`ClockBehavior::WallClock`] this is the stored deadline. For the
    /// monotonic behaviors it is a projection onto the current calendar
    /// clock, so it moves when the calendar clock is changed or, for
    /// [`ClockBehavior::PauseOnSuspend`], after the system sleeps.
    ///
    /// # Panics
    ///
    /// Panics if the clock is unavailable.
    #[must_use]
    pub fn fire_date(&self) -> DateTime<Utc> {
        if !self.behavior.is_monotonic() {
            return self.deadline.to_date_time();
        }
        let until = self.clock.time_until(self.behavior, self.deadline);
        self.clock.now(ClockBehavior::WallClock).saturating_add(until).to_date_time()
    }

    /// Time elapsed since the fire date: negative while the deadline is still
    /// ahead, positive once it has passed.
    ///
    /// # Panics
    ///
    /// Panics if the clock is unavailable.
    #[must_use]
    pub fn time_since_fire_date(&self) -> TimeDelta {
        -self.clock.time_until(self.behavior, self.deadline)
    }

    /// Whether the deadline has been reached, read from the live clock.
    ///
    /// # Panics
    ///
    /// Panics if the clock is unavailable.
    #[must_use]
    pub fn is_due(&self) -> bool {
        self.clock.has_fired(self.behavior, self.deadline)
    }

    /// How late the timer may fire. Default zero.
    #[must_use]
    pub fn tolerance(&self) -> Duration {
        Duration::from_nanos(self.tolerance_nanos.load(Ordering::Relaxed))
    }

    /// Lets a scheduler delay firing by up to `tolerance` to coalesce
    /// wakeups. Never changes the deadline or [`fire_date`](Self::fire_date).
    ///
    /// Only registrations made after this call see the new value.
    pub fn set_tolerance(&self, tolerance: Duration) {
        let nanos = u64::try_from(tolerance.as_nanos()).unwrap_or(u64::MAX);
        self.tolerance_nanos.store(nanos, Ordering::Relaxed);
    }
}

impl<T: fmt::Debug> fmt::Debug for Timer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("behavior", &self.behavior)
            .field("deadline", &self.deadline)
            .field("tolerance", &self.tolerance())
            .field("state", &self.state())
            .field("user_info", &self.user_info)
            .finish_non_exhaustive()
    }
}
