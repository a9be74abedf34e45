//! Awaiting a timer instead of handing it a callback

use {
    crate::timer::{Outcome, Timer},
    std::{
        future::Future,
        pin::Pin,
        task::{Context, Poll},
    },
};

/// A future that resolves when a [`Timer`] leaves the pending state.
///
/// Created by [`Timer::completion`]. Resolves to [`Outcome::Fired`] after the
/// callback has returned, or to [`Outcome::Invalidated`].
#[must_use = "futures do nothing unless polled"]
pub struct Completion<'a, T> {
    timer: &'a Timer<T>,
}

impl<'a, T> Completion<'a, T> {
    pub(crate) const fn new(timer: &'a Timer<T>) -> Self {
        Self { timer }
    }
}

impl<T> Future for Completion<'_, T> {
    type Output = Outcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.timer.poll_outcome(cx)
    }
}

impl<T> std::fmt::Debug for Completion<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion").field("state", &self.timer.state()).finish()
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            clock::ClockBehavior,
            config::TimerConfig,
            manual::ManualClock,
            scheduler::NativeScheduler,
            timer::TimerState,
        },
        chrono::TimeDelta,
        futures::{FutureExt, executor::block_on},
        std::{
            sync::{
                Arc,
                atomic::{AtomicBool, Ordering},
            },
            thread,
            time::{Duration, Instant},
        },
    };

    #[test]
    fn test_completion_ready_after_fire() {
        let clock = Arc::new(ManualClock::new());
        let timer = Timer::with_clock(clock, &TimerConfig::default(), ClockBehavior::Hourglass, TimeDelta::seconds(1), (), |_, _| {});

        assert!(timer.completion().now_or_never().is_none());
        timer.fire();
        assert_eq!(block_on(timer.completion()), Outcome::Fired);
    }

    #[test]
    fn test_completion_reports_invalidation() {
        let clock = Arc::new(ManualClock::new());
        let timer = Timer::with_clock(clock, &TimerConfig::default(), ClockBehavior::WallClock, TimeDelta::seconds(1), (), |_, _| {});

        timer.invalidate();
        assert_eq!(timer.completion().now_or_never(), Some(Outcome::Invalidated));
    }

    #[test]
    fn test_completion_woken_from_other_thread() {
        let clock = Arc::new(ManualClock::new());
        let timer = Arc::new(Timer::with_clock(
            clock,
            &TimerConfig::default(),
            ClockBehavior::PauseOnSuspend,
            TimeDelta::seconds(1),
            (),
            |_, _| {},
        ));

        let remote = timer.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            remote.invalidate();
        });

        assert_eq!(block_on(timer.completion()), Outcome::Invalidated);
        handle.join().unwrap();
    }

    #[test]
    fn test_completion_resolves_after_callback_returns() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let timer = Arc::new(Timer::new(
            ClockBehavior::Hourglass,
            TimeDelta::milliseconds(40),
            (),
            move |_, _| flag.store(true, Ordering::SeqCst),
        ));
        let start = Instant::now();

        timer.schedule(&NativeScheduler::default()).unwrap();

        assert_eq!(block_on(timer.completion()), Outcome::Fired);
        assert!(ran.load(Ordering::SeqCst));
        assert!(start.elapsed() >= Duration::from_millis(35));
        assert_eq!(timer.state(), TimerState::Fired);
    }
}
