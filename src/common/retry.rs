//! Bounded retry with jittered exponential backoff and an overall deadline.

use rand::Rng;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Error substrings that will never succeed on retry.
pub const NON_RETRYABLE: &[&str] = &[
    "execution reverted",
    "out of gas",
    "abi: cannot marshal in to go slice",
];

pub fn is_retryable_message(msg: &str) -> bool {
    !NON_RETRYABLE.iter().any(|s| msg.contains(s))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryParams {
    pub attempts: u32,
    pub delay: Duration,
    pub max_delay: Duration,
    /// Zero disables the overall deadline.
    pub timeout: Duration,
}

impl Default for RetryParams {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            timeout: Duration::from_secs(30),
        }
    }
}

impl RetryParams {
    pub fn new(attempts: u32, delay: Duration, timeout: Duration) -> Self {
        Self { attempts, delay, max_delay: delay * 10, timeout }
    }

    fn jittered(delay: Duration) -> Duration {
        let spread = (delay.as_millis() as u64) / 2;
        if spread == 0 {
            return delay;
        }
        delay + Duration::from_millis(rand::rng().random_range(0..=spread))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    Timeout(Duration),
    Exhausted { attempts: u32, last: E },
    Unrecoverable(E),
}

impl<E> RetryError<E> {
    /// The underlying operation error, if one was observed.
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Timeout(_) => None,
            RetryError::Exhausted { last, .. } => Some(last),
            RetryError::Unrecoverable(e) => Some(e),
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Timeout(d) => write!(f, "retry timed out after {d:?}"),
            RetryError::Exhausted { attempts, last } => {
                write!(f, "{attempts} attempts exhausted, last error: {last}")
            }
            RetryError::Unrecoverable(e) => write!(f, "unrecoverable: {e}"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryError<E> {}

/// Runs `op` until it succeeds, `is_retryable` rejects the error, attempts run
/// out, or the overall deadline passes.
pub async fn retry_async<T, E, F, Fut, R>(params: &RetryParams, is_retryable: R, mut op: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
{
    let attempts = params.attempts.max(1);
    let deadline = (!params.timeout.is_zero()).then(|| Instant::now() + params.timeout);
    let mut delay = params.delay;
    let mut attempt = 0;

    loop {
        attempt += 1;
        let result = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, op()).await {
                Ok(r) => r,
                Err(_) => return Err(RetryError::Timeout(params.timeout)),
            },
            None => op().await,
        };

        match result {
            Ok(v) => return Ok(v),
            Err(e) if !is_retryable(&e) => return Err(RetryError::Unrecoverable(e)),
            Err(e) if attempt >= attempts => return Err(RetryError::Exhausted { attempts, last: e }),
            Err(_) => {}
        }

        let sleep = RetryParams::jittered(delay);
        if let Some(deadline) = deadline {
            if Instant::now() + sleep >= deadline {
                return Err(RetryError::Timeout(params.timeout));
            }
        }
        tokio::time::sleep(sleep).await;
        delay = (delay * 2).min(params.max_delay.max(params.delay));
    }
}
