use std::future::Future;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::warn;

/// How a failed attempt should be treated by [`retry`].
#[derive(Debug)]
pub enum RetryError<E> {
    /// Retry after the next backoff delay, if the policy allows one.
    Transient(E),
    /// Stop immediately and surface the error.
    Permanent(E),
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            Self::Transient(e) | Self::Permanent(e) => e,
        }
    }
}

/// A backoff schedule. Returns `None` once the caller should give up.
pub trait Backoff: Send {
    /// `attempt` is the 1-based number of the attempt that just failed.
    fn next_delay(&mut self, attempt: u32, elapsed: Duration) -> Option<Duration>;
}

/// Calculate exponential backoff delay with jitter.
///
/// Formula: `min(base_ms * 2^(attempt-1) + jitter, max_ms)` (0-25% jitter)
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exp_factor = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exp_factor);

    let jitter = if delay_ms > 0 {
        rand::rng().random_range(0..=delay_ms / 4)
    } else {
        0
    };

    Duration::from_millis(delay_ms.saturating_add(jitter).min(max_ms))
}

/// Jittered exponential backoff bounded by a total elapsed budget.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub max_delay: Duration,
    pub max_elapsed: Duration,
}

impl ExponentialBackoff {
    /// The policy wrapped around every content store call.
    pub fn for_storage() -> Self {
        Self {
            base: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_elapsed: Duration::from_secs(120),
        }
    }
}

impl Backoff for ExponentialBackoff {
    fn next_delay(&mut self, attempt: u32, elapsed: Duration) -> Option<Duration> {
        if elapsed >= self.max_elapsed {
            return None;
        }
        let delay = calculate_backoff(
            attempt,
            self.base.as_millis() as u64,
            self.max_delay.as_millis() as u64,
        );
        Some(delay.min(self.max_elapsed - elapsed))
    }
}

/// Fibonacci backoff: 1, 1, 2, 3, 5, ... times `initial`, each delay capped
/// at `max_delay`, giving up once `max_elapsed` has passed.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    initial: Duration,
    max_delay: Duration,
    max_elapsed: Duration,
    prev: Duration,
    curr: Duration,
}

impl FibonacciBackoff {
    pub fn new(initial: Duration, max_delay: Duration, max_elapsed: Duration) -> Self {
        Self {
            initial,
            max_delay,
            max_elapsed,
            prev: Duration::ZERO,
            curr: initial,
        }
    }

    pub fn initial(&self) -> Duration {
        self.initial
    }
}

impl Backoff for FibonacciBackoff {
    fn next_delay(&mut self, _attempt: u32, elapsed: Duration) -> Option<Duration> {
        if elapsed >= self.max_elapsed {
            return None;
        }
        let delay = self.curr.min(self.max_delay);
        let next = self.prev.saturating_add(self.curr);
        self.prev = self.curr;
        self.curr = next;
        Some(delay)
    }
}

/// Fixed delay between attempts with a bounded number of retries.
#[derive(Debug, Clone)]
pub struct ConstantBackoff {
    pub delay: Duration,
    pub max_retries: u32,
}

impl Backoff for ConstantBackoff {
    fn next_delay(&mut self, attempt: u32, _elapsed: Duration) -> Option<Duration> {
        (attempt <= self.max_retries).then_some(self.delay)
    }
}

/// Run `op` until it succeeds, returns a permanent error, or the backoff
/// policy gives up. The closure receives the 1-based attempt number.
///
/// The first attempt always runs, even if the policy's budget is already
/// spent.
pub async fn retry<T, E, F, Fut, B>(backoff: &mut B, mut op: F) -> Result<T, E>
where
    B: Backoff + ?Sized,
    E: std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, RetryError<E>>>,
{
    let started = Instant::now();
    let mut attempt = 1u32;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(RetryError::Permanent(e)) => return Err(e),
            Err(RetryError::Transient(e)) => {
                let Some(delay) = backoff.next_delay(attempt, started.elapsed()) else {
                    return Err(e);
                };
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
