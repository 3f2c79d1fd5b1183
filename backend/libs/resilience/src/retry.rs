/// Retry policy with exponential backoff and jitter
use crate::shutdown::{is_shutdown, wait_for_shutdown};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one (at least 1)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Add random jitter to backoff (±30%)
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Fixed-shape strategy: `attempts` tries, `delay` before the first retry,
    /// each further delay multiplied by `backoff`. No jitter.
    pub fn strategy(attempts: u32, delay: Duration, backoff: f64) -> Self {
        Self {
            max_attempts: attempts.max(1),
            initial_backoff: delay,
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: backoff,
            jitter: false,
        }
    }

    /// Upper bound of the time spent sleeping between attempts (without jitter)
    pub fn total_backoff(&self) -> Duration {
        let mut total = Duration::ZERO;
        let mut backoff = self.initial_backoff;
        for _ in 1..self.max_attempts.max(1) {
            total += backoff;
            backoff = next_backoff(backoff, self);
        }
        total
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("Max attempts ({attempts}) exceeded: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: E },
    #[error("Operation cancelled by shutdown")]
    Cancelled,
}

impl<E> RetryError<E> {
    /// The error returned by the final attempt, if the retries ran out
    pub fn into_last_error(self) -> Option<E> {
        match self {
            RetryError::MaxRetriesExceeded { last_error, .. } => Some(last_error),
            RetryError::Cancelled => None,
        }
    }
}

/// Run `f` until it succeeds or `config.max_attempts` attempts have failed
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, f: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    run_attempts(config, None, f).await
}

/// Like [`with_retry`], but gives up with [`RetryError::Cancelled`] as soon as
/// `shutdown` flips to `true`. Both the in-flight attempt and the backoff
/// sleep are raced against the signal.
pub async fn with_retry_until_shutdown<F, Fut, T, E>(
    config: &RetryConfig,
    shutdown: &mut watch::Receiver<bool>,
    f: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    run_attempts(config, Some(shutdown), f).await
}

async fn run_attempts<F, Fut, T, E>(
    config: &RetryConfig,
    mut shutdown: Option<&mut watch::Receiver<bool>>,
    mut f: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut backoff = config.initial_backoff;
    let mut attempt = 0;

    loop {
        if shutdown.as_deref().is_some_and(is_shutdown) {
            return Err(RetryError::Cancelled);
        }

        let outcome = match shutdown.as_deref_mut() {
            Some(rx) => tokio::select! {
                _ = wait_for_shutdown(rx) => return Err(RetryError::Cancelled),
                outcome = f() => outcome,
            },
            None => f().await,
        };

        let error = match outcome {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        attempt += 1;
        if attempt >= max_attempts {
            warn!(attempts = max_attempts, error = %error, "Giving up after final attempt");
            return Err(RetryError::MaxRetriesExceeded {
                attempts: max_attempts,
                last_error: error,
            });
        }

        let delay = jittered(backoff, config.jitter);
        warn!(
            attempt = attempt,
            max_attempts = max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Attempt failed, retrying"
        );

        match shutdown.as_deref_mut() {
            Some(rx) => tokio::select! {
                _ = wait_for_shutdown(rx) => return Err(RetryError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            },
            None => tokio::time::sleep(delay).await,
        }

        backoff = next_backoff(backoff, config);
    }
}

fn next_backoff(current: Duration, config: &RetryConfig) -> Duration {
    Duration::from_millis(
        ((current.as_millis() as f64 * config.backoff_multiplier)
            .min(config.max_backoff.as_millis() as f64)) as u64,
    )
}

/// `base` scaled by a random factor in [0.7, 1.3) when `jitter` is set
fn jittered(base: Duration, jitter: bool) -> Duration {
    if !jitter {
        return base;
    }
    base.mul_f64(rand::thread_rng().gen_range(0.7..1.3))
}
