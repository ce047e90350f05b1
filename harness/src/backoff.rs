//! Exponential backoff retry engine
//!
//! Every wait in the harness (control plane readiness, process counts, agent
//! status) goes through [`retry`]. The engine bounds the whole sequence of
//! attempts by `max_elapsed_time` and, unless disabled, also bounds each single
//! attempt by whatever budget is left, so one hung call cannot outlive the loop.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::errors::HarnessError;

/// Backoff parameters
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub initial_interval: Duration,
    pub randomization_factor: f64,
    pub multiplier: f64,
    pub max_interval: Duration,
    pub max_elapsed_time: Duration,
    /// Cancel an attempt that runs past the remaining budget
    pub bound_attempts: bool,
}

impl ExponentialBackoff {
    pub fn new(max_elapsed_time: Duration) -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            randomization_factor: 0.5,
            multiplier: 2.0,
            max_interval: Duration::from_secs(5),
            max_elapsed_time,
            bound_attempts: true,
        }
    }

    /// Backoff for `base × timeout_factor`
    pub fn scaled(timeout_factor: u32, base: Duration) -> Self {
        Self::new(scaled_timeout(timeout_factor, base))
    }

    /// Un-randomized interval after the given number of failed attempts
    pub fn interval(&self, failed_attempts: u32) -> Duration {
        let exp = failed_attempts.saturating_sub(1).min(64) as i32;
        let secs = self.initial_interval.as_secs_f64() * self.multiplier.powi(exp);
        Duration::from_secs_f64(secs.min(self.max_interval.as_secs_f64()))
    }

    /// Interval with jitter in `[i - f*i, i + f*i]`
    pub fn randomized_interval(&self, failed_attempts: u32) -> Duration {
        let interval = self.interval(failed_attempts).as_secs_f64();
        let delta = self.randomization_factor.clamp(0.0, 1.0) * interval;
        if delta <= 0.0 {
            return Duration::from_secs_f64(interval);
        }
        let secs = rand::rng().random_range((interval - delta)..=(interval + delta));
        Duration::from_secs_f64(secs.max(0.0))
    }
}

/// Multiply a base timeout by the global timeout factor (never below 1)
pub fn scaled_timeout(timeout_factor: u32, base: Duration) -> Duration {
    base * timeout_factor.max(1)
}

/// Context handed to each attempt
#[derive(Debug, Clone, Copy)]
pub struct Attempt {
    /// 1-based attempt counter
    pub number: u32,
    pub elapsed: Duration,
    /// Budget left for this attempt
    pub remaining: Duration,
}

/// Failure of a whole retry sequence
#[derive(Debug)]
pub struct Exhausted {
    pub retries: u32,
    pub elapsed: Duration,
    pub last: HarnessError,
}

async fn run<T, F, Fut>(
    backoff: &ExponentialBackoff,
    operation: &str,
    mut op: F,
) -> Result<T, Exhausted>
where
    F: FnMut(Attempt) -> Fut,
    Fut: Future<Output = Result<T, HarnessError>>,
{
    let started = Instant::now();
    let mut number = 0u32;
    // Last error returned by the operation itself, kept across deadline misses
    let mut observed: Option<HarnessError> = None;

    loop {
        number += 1;
        let elapsed = started.elapsed();
        let remaining = backoff.max_elapsed_time.saturating_sub(elapsed);
        let attempt = Attempt {
            number,
            elapsed,
            remaining,
        };

        let result = if backoff.bound_attempts {
            tokio::time::timeout(remaining, op(attempt)).await.ok()
        } else {
            Some(op(attempt).await)
        };
        let deadline_missed = result.is_none();

        let err = match result {
            Some(Ok(value)) => {
                debug!(
                    "{} succeeded after {} attempt(s), {:?} elapsed",
                    operation,
                    number,
                    started.elapsed()
                );
                return Ok(value);
            }
            Some(Err(err)) => err,
            None => HarnessError::NotReady(format!(
                "{} attempt {} did not complete within {:?}",
                operation, number, remaining
            )),
        };

        let elapsed = started.elapsed();
        if err.is_permanent() {
            return Err(Exhausted {
                retries: number,
                elapsed,
                last: err,
            });
        }

        let delay = backoff.randomized_interval(number);
        if elapsed + delay > backoff.max_elapsed_time {
            let last = match observed.take() {
                Some(previous) if deadline_missed => previous,
                _ => err,
            };
            return Err(Exhausted {
                retries: number,
                elapsed,
                last,
            });
        }

        warn!(
            "{} not ready yet (retry {}, {:.1}s elapsed): {}",
            operation,
            number,
            elapsed.as_secs_f64(),
            err
        );
        if !deadline_missed {
            observed = Some(err);
        }
        tokio::time::sleep(delay).await;
    }
}

/// Retry `op` until it succeeds or the budget is spent. Returns the last
/// observed error unchanged.
pub async fn retry<T, F, Fut>(
    backoff: &ExponentialBackoff,
    operation: &str,
    op: F,
) -> Result<T, HarnessError>
where
    F: FnMut(Attempt) -> Fut,
    Fut: Future<Output = Result<T, HarnessError>>,
{
    run(backoff, operation, op).await.map_err(|e| e.last)
}

/// Like [`retry`], but wraps a transient failure in [`HarnessError::Timeout`]
/// carrying the retry count and elapsed time. Permanent errors pass through.
pub async fn retry_with_context<T, F, Fut>(
    backoff: &ExponentialBackoff,
    operation: &str,
    op: F,
) -> Result<T, HarnessError>
where
    F: FnMut(Attempt) -> Fut,
    Fut: Future<Output = Result<T, HarnessError>>,
{
    run(backoff, operation, op).await.map_err(|e| {
        if e.last.is_permanent() {
            e.last
        } else {
            HarnessError::Timeout {
                operation: operation.to_string(),
                retries: e.retries,
                elapsed: e.elapsed,
                last: Box::new(e.last),
            }
        }
    })
}
