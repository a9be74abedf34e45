//! Timer policy configuration
//!
//! Settings resolve in this order (highest priority first):
//!
//! 1. values set directly on a [`TimerConfig`]
//! 2. environment variables, applied by [`TimerConfig::from_env`]
//! 3. [`TimerConfig::default`]
//!
//! Environment overrides are opt-in. [`TimerConfig::default`],
//! [`Timer::new`](crate::Timer::new) and
//! [`NativeScheduler::default`](crate::NativeScheduler) never read the
//! environment; pass a config built by [`TimerConfig::from_env`] to
//! [`Timer::with_clock`](crate::Timer::with_clock) and
//! [`NativeScheduler::new`](crate::NativeScheduler::new) instead.
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `TIMER_NATIVE_MIN_INTERVAL_US` | `u64` microseconds | `min_interval` |
//! | `TIMER_NATIVE_MAX_WAIT_SLICE_MS` | `u64` milliseconds, non-zero | `max_wait_slice` |

use {
    crate::error::ConfigError,
    chrono::TimeDelta,
    std::time::Duration,
};

/// Environment variable name for the minimum timer interval.
pub const ENV_MIN_INTERVAL_US: &str = "TIMER_NATIVE_MIN_INTERVAL_US";
/// Environment variable name for the native scheduler's re-check slice.
pub const ENV_MAX_WAIT_SLICE_MS: &str = "TIMER_NATIVE_MAX_WAIT_SLICE_MS";

/// Shortest interval a timer can be armed with, matching `NSTimer`.
pub const DEFAULT_MIN_INTERVAL: TimeDelta = TimeDelta::microseconds(100);

/// How long a native wait may run before the live clock is consulted again.
pub const DEFAULT_MAX_WAIT_SLICE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerConfig {
    /// Intervals shorter than this (including zero and negative ones) are
    /// raised to it.
    pub min_interval: TimeDelta,
    /// Upper bound on a single native wait. Suspend and calendar changes are
    /// noticed at the latest one slice after they happen.
    pub max_wait_slice: Duration,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            min_interval: DEFAULT_MIN_INTERVAL,
            max_wait_slice: DEFAULT_MAX_WAIT_SLICE,
        }
    }
}

impl TimerConfig {
    /// Defaults with any environment overrides applied.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if a variable is set but cannot
    /// be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply the environment variables that are set; unset ones leave the
    /// current value alone.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if a variable is set but cannot
    /// be parsed.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    fn apply_overrides(&mut self, read: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(val) = read(ENV_MIN_INTERVAL_US) {
            let micros = parse_u64(ENV_MIN_INTERVAL_US, &val)?;
            self.min_interval = i64::try_from(micros)
                .ok()
                .map(TimeDelta::microseconds)
                .ok_or_else(|| invalid(ENV_MIN_INTERVAL_US, "microseconds in range", &val))?;
        }
        if let Some(val) = read(ENV_MAX_WAIT_SLICE_MS) {
            let millis = parse_u64(ENV_MAX_WAIT_SLICE_MS, &val)?;
            if millis == 0 {
                return Err(invalid(ENV_MAX_WAIT_SLICE_MS, "non-zero milliseconds", &val));
            }
            self.max_wait_slice = Duration::from_millis(millis);
        }
        Ok(())
    }
}

fn parse_u64(var: &'static str, val: &str) -> Result<u64, ConfigError> {
    val.trim().parse::<u64>().map_err(|_| invalid(var, "unsigned integer", val))
}

fn invalid(var: &'static str, expected: &'static str, val: &str) -> ConfigError {
    ConfigError::InvalidValue {
        var,
        expected,
        value: val.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use {super::*, std::collections::HashMap};

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = TimerConfig::default();
        assert_eq!(config.min_interval, TimeDelta::microseconds(100));
        assert_eq!(config.max_wait_slice, Duration::from_secs(1));
    }

    #[test]
    fn test_unset_variables_keep_defaults() {
        let mut config = TimerConfig::default();
        config.apply_overrides(env(&[])).unwrap();
        assert_eq!(config, TimerConfig::default());
    }

    #[test]
    fn test_overrides_applied() {
        let mut config = TimerConfig::default();
        config
            .apply_overrides(env(&[(ENV_MIN_INTERVAL_US, " 250 "), (ENV_MAX_WAIT_SLICE_MS, "20")]))
            .unwrap();
        assert_eq!(config.min_interval, TimeDelta::microseconds(250));
        assert_eq!(config.max_wait_slice, Duration::from_millis(20));
    }

    #[test]
    fn test_malformed_value_rejected() {
        let mut config = TimerConfig::default();
        let err = config.apply_overrides(env(&[(ENV_MIN_INTERVAL_US, "soon")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                var: ENV_MIN_INTERVAL_US,
                expected: "unsigned integer",
                value: "soon".to_owned(),
            }
        );
        assert_eq!(config, TimerConfig::default());
    }

    #[test]
    fn test_from_env_starts_from_defaults() {
        if std::env::var_os(ENV_MIN_INTERVAL_US).is_none() && std::env::var_os(ENV_MAX_WAIT_SLICE_MS).is_none() {
            assert_eq!(TimerConfig::from_env().unwrap(), TimerConfig::default());
        }
    }

    #[test]
    fn test_zero_wait_slice_rejected() {
        let mut config = TimerConfig::default();
        let err = config.apply_overrides(env(&[(ENV_MAX_WAIT_SLICE_MS, "0")])).unwrap_err();
        assert!(err.to_string().contains(ENV_MAX_WAIT_SLICE_MS));
    }
}
