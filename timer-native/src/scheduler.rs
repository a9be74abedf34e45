//! Scheduler adapters: the seam between a [`Timer`](crate::Timer) and
//! whatever calls it back at its deadline
//!
//! A timer computes its own deadline; a scheduler only has to wait until the
//! behavior's clock reaches it and then invoke the registered callback once.

use {
    crate::{
        clock::{ClockBehavior, Timestamp},
        config::TimerConfig,
        platform,
    },
    std::{
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        time::Duration,
    },
};

/// Callback handed to a [`Scheduler`]
pub type OnDue = Box<dyn FnOnce() + Send + 'static>;

/// What a scheduler needs to know to call a timer back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Due {
    pub behavior: ClockBehavior,
    /// Reading of `behavior`'s clock at which the callback becomes due.
    pub deadline: Timestamp,
    /// How much later than `deadline` the scheduler may run the callback to
    /// coalesce it with other wakeups. Purely a hint.
    pub tolerance: Duration,
}

/// Cancellation handle for a registered callback.
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct Registration {
    cancelled: Arc<AtomicBool>,
}

impl Registration {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// After this returns the scheduler will not start the callback.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }
}

/// Something that can call back at or after a deadline.
pub trait Scheduler: Send + Sync {
    /// Arranges for `on_due` to run once `due.deadline` is reached in
    /// `due.behavior`'s clock, unless the returned registration is cancelled
    /// first.
    fn register(&self, due: Due, on_due: OnDue) -> Registration;
}

/// Scheduler backed by the operating system's timers and [`SystemClock`].
///
/// Each registration gets its own native wait, so callbacks run on a
/// background thread or GCD queue rather than the caller's thread.
///
/// [`SystemClock`]: crate::SystemClock
#[derive(Debug, Clone, Copy)]
pub struct NativeScheduler {
    max_wait_slice: Duration,
}

impl Default for NativeScheduler {
    fn default() -> Self {
        Self::new(&TimerConfig::default())
    }
}

impl NativeScheduler {
    #[must_use]
    pub fn new(config: &TimerConfig) -> Self {
        Self {
            max_wait_slice: config.max_wait_slice,
        }
    }

    #[must_use]
    pub const fn max_wait_slice(&self) -> Duration {
        self.max_wait_slice
    }
}

impl Scheduler for NativeScheduler {
    fn register(&self, due: Due, on_due: OnDue) -> Registration {
        let registration = Registration::new();
        tracing::debug!(
            behavior = %due.behavior,
            deadline = due.deadline.as_nanos(),
            tolerance = ?due.tolerance,
            "arming native timer"
        );
        platform::set_timer(due, self.max_wait_slice, registration.flag(), on_due);
        registration
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::clock::{ClockSource, SystemClock},
        chrono::TimeDelta,
        std::{sync::mpsc, time::Instant},
    };

    fn due_in(behavior: ClockBehavior, millis: i64) -> Due {
        let now = SystemClock.now(behavior);
        Due {
            behavior,
            deadline: SystemClock.deadline(behavior, now, TimeDelta::milliseconds(millis)),
            tolerance: Duration::ZERO,
        }
    }

    #[test]
    fn test_native_scheduler_calls_back_after_deadline() {
        for behavior in ClockBehavior::ALL {
            let (tx, rx) = mpsc::channel();
            let start = Instant::now();
            let due = due_in(behavior, 40);

            let _registration = NativeScheduler::default().register(due, Box::new(move || tx.send(()).unwrap()));

            rx.recv_timeout(Duration::from_secs(2)).unwrap();
            let elapsed = start.elapsed();
            assert!(elapsed >= Duration::from_millis(35), "{behavior}: {elapsed:?}");
            assert!(SystemClock.has_fired(behavior, due.deadline));
        }
    }

    #[test]
    fn test_native_scheduler_rechecks_in_slices() {
        let config = TimerConfig {
            max_wait_slice: Duration::from_millis(10),
            ..TimerConfig::default()
        };
        let (tx, rx) = mpsc::channel();
        let start = Instant::now();

        let _registration =
            NativeScheduler::new(&config).register(due_in(ClockBehavior::WallClock, 60), Box::new(move || tx.send(()).unwrap()));

        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(55));
    }

    #[test]
    fn test_already_due_runs_promptly() {
        let (tx, rx) = mpsc::channel();
        let due = due_in(ClockBehavior::Hourglass, -5);

        let _registration = NativeScheduler::default().register(due, Box::new(move || tx.send(()).unwrap()));

        rx.recv_timeout(Duration::from_millis(500)).unwrap();
    }

    #[test]
    fn test_cancelled_registration_never_runs() {
        let (tx, rx) = mpsc::channel::<()>();
        let registration =
            NativeScheduler::default().register(due_in(ClockBehavior::PauseOnSuspend, 30), Box::new(move || tx.send(()).unwrap()));

        registration.cancel();
        assert!(registration.is_cancelled());
        assert!(rx.recv_timeout(Duration::from_millis(150)).is_err());
    }

    #[test]
    fn test_registration_clones_share_cancellation() {
        let registration = Registration::new();
        let clone = registration.clone();
        assert!(!clone.is_cancelled());
        registration.cancel();
        assert!(clone.is_cancelled());
    }
}
