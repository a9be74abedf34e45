//! Single-shot timers with a choice of clock
//!
//! Each [`Timer`] picks, per instance, which notion of elapsed time decides
//! when it fires:
//!
//! - [`ClockBehavior::Hourglass`]: real elapsed time, sleep included, immune
//!   to calendar changes
//! - [`ClockBehavior::PauseOnSuspend`]: time the system spent awake, like
//!   run-loop timers
//! - [`ClockBehavior::WallClock`]: the calendar clock reaching the fire date
//!
//! Timers only compute their deadline. Firing is done either directly with
//! [`Timer::fire`], or by a [`Scheduler`]: [`NativeScheduler`] waits on
//! platform-native timers, [`ManualScheduler`] runs against a hand-driven
//! [`ManualClock`].

// Platform-specific clock readings and timers
mod platform;

pub mod clock;
pub mod completion;
pub mod config;
pub mod error;
pub mod manual;
pub mod scheduler;
pub mod timer;

#[cfg(test)]
mod test_utils;

pub use {
    clock::{ClockBehavior, ClockSource, SystemClock, Timestamp, time_interval_value},
    completion::Completion,
    config::TimerConfig,
    error::{ClockError, ConfigError, ScheduleError},
    manual::{ManualClock, ManualScheduler},
    scheduler::{Due, NativeScheduler, OnDue, Registration, Scheduler},
    timer::{Outcome, Timer, TimerState},
};
