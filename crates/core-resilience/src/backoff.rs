//! Backoff schedules for retry policies
//!
//! A schedule maps a 1-based retry number to the delay that precedes it.
//! Optional jitter adds up to `fraction` of the computed delay on top.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
enum Schedule {
    Constant(Duration),
    Exponential {
        initial: Duration,
        multiplier: f64,
        max: Duration,
    },
    Custom(Arc<dyn Fn(u32) -> Duration + Send + Sync>),
}

/// Delay schedule applied between retry attempts
///
/// # Example
/// ```
/// use bulwark_core_resilience::Backoff;
/// use std::time::Duration;
///
/// let backoff = Backoff::exponential(Duration::from_millis(100), 2.0, Duration::from_secs(1));
/// assert_eq!(backoff.delay(1), Duration::from_millis(100));
/// assert_eq!(backoff.delay(3), Duration::from_millis(400));
/// assert_eq!(backoff.delay(10), Duration::from_secs(1));
/// ```
#[derive(Clone)]
pub struct Backoff {
    schedule: Schedule,
    jitter: f64,
}

impl Backoff {
    /// Retry immediately
    pub fn none() -> Self {
        Self::constant(Duration::ZERO)
    }

    /// Same delay before every retry
    pub fn constant(delay: Duration) -> Self {
        Self {
            schedule: Schedule::Constant(delay),
            jitter: 0.0,
        }
    }

    /// `initial * multiplier^(retry - 1)`, capped at `max`
    pub fn exponential(initial: Duration, multiplier: f64, max: Duration) -> Self {
        Self {
            schedule: Schedule::Exponential {
                initial,
                multiplier,
                max,
            },
            jitter: 0.0,
        }
    }

    /// Caller-supplied schedule
    pub fn from_fn<F>(schedule: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        Self {
            schedule: Schedule::Custom(Arc::new(schedule)),
            jitter: 0.0,
        }
    }

    /// Add up to `fraction` (0.0..=1.0) of each delay as random jitter
    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    /// Delay preceding the given retry (1-based)
    pub fn delay(&self, retry: u32) -> Duration {
        let base = match &self.schedule {
            Schedule::Constant(delay) => *delay,
            Schedule::Exponential {
                initial,
                multiplier,
                max,
            } => {
                let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
                let secs = initial.as_secs_f64() * multiplier.powi(exponent);
                if !secs.is_finite() || secs >= max.as_secs_f64() {
                    *max
                } else {
                    Duration::from_secs_f64(secs.max(0.0))
                }
            }
            Schedule::Custom(schedule) => schedule(retry),
        };

        self.apply_jitter(base)
    }

    fn apply_jitter(&self, base: Duration) -> Duration {
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }

        let extra = base.as_secs_f64() * self.jitter * rand::random::<f64>();
        let extra = Duration::try_from_secs_f64(extra).unwrap_or(Duration::MAX);
        base.saturating_add(extra)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::exponential(Duration::from_millis(100), 2.0, Duration::from_secs(30))
    }
}

impl fmt::Debug for Backoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("Backoff");
        match &self.schedule {
            Schedule::Constant(delay) => out.field("constant", delay),
            Schedule::Exponential {
                initial,
                multiplier,
                max,
            } => out
                .field("initial", initial)
                .field("multiplier", multiplier)
                .field("max", max),
            Schedule::Custom(_) => out.field("schedule", &"<custom>"),
        };
        out.field("jitter", &self.jitter).finish()
    }
}
