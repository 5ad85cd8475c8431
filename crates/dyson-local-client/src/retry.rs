//! Exponential backoff.
//!
//! [`exponential`] yields the delay schedule, [`backoff`] runs a task against
//! any schedule. The wait before a retry is the scheduled delay minus the
//! time the failed attempt took, so attempts start on the schedule's cadence
//! instead of drifting by the task's own duration.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

/// Parameters of an exponential schedule:
/// `delay(n) = clamp(base * factor^n, min, max)` for `n < count`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialOptions {
    pub base: Duration,
    pub factor: f64,
    pub min: Duration,
    /// `None` for no upper bound.
    pub max: Option<Duration>,
    /// Number of delays; `None` for an endless schedule.
    pub count: Option<usize>,
}

impl Default for ExponentialOptions {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1000),
            factor: 2.0,
            min: Duration::ZERO,
            max: None,
            count: None,
        }
    }
}

/// Lazy exponential delay schedule.
#[derive(Debug, Clone)]
pub struct Exponential {
    opts: ExponentialOptions,
    n: usize,
}

/// The schedule described by `opts`.
pub fn exponential(opts: ExponentialOptions) -> Exponential {
    Exponential { opts, n: 0 }
}

impl Exponential {
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn delay_at(&self, n: usize) -> Duration {
        let exp = i32::try_from(n).unwrap_or(i32::MAX);
        let nanos = (self.opts.base.as_nanos() as f64 * self.opts.factor.powi(exp)).round();
        let raw = if nanos.is_nan() || nanos <= 0.0 {
            Duration::ZERO
        } else if nanos >= u64::MAX as f64 {
            Duration::from_nanos(u64::MAX)
        } else {
            Duration::from_nanos(nanos as u64)
        };
        // min wins over max when they conflict.
        self.opts.max.map_or(raw, |max| raw.min(max)).max(self.opts.min)
    }
}

impl Iterator for Exponential {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.opts.count.is_some_and(|count| self.n >= count) {
            return None;
        }
        let delay = self.delay_at(self.n);
        self.n += 1;
        Some(delay)
    }
}

/// Run `task` until it succeeds or `delays` runs out.
///
/// On exhaustion the task's last error is returned as is.
pub async fn backoff<T, E, F, Fut>(
    mut delays: impl Iterator<Item = Duration>,
    mut task: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt: u32 = 1;
    loop {
        let started = Instant::now();
        let err = match task().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let Some(delay) = delays.next() else {
            debug!(attempt, "retry schedule exhausted");
            return Err(err);
        };
        let wait = delay.saturating_sub(started.elapsed());
        warn!(attempt, error = %err, wait = ?wait, "attempt failed, retrying");
        tokio::time::sleep(wait).await;
        attempt += 1;
    }
}

/// [`backoff`] over an [`exponential`] schedule.
pub async fn exponential_backoff<T, E, F, Fut>(opts: ExponentialOptions, task: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    backoff(exponential(opts), task).await
}
