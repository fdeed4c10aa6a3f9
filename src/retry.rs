//! Bounded retry with backoff and classified early exit.
//!
//! Shared by the captcha resolver (one attempt = one walk of the provider
//! chain), the session driver's captcha loop, and per-step navigation
//! retries.

use std::future::Future;
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::debug;

/// What a single attempt concluded.
#[derive(Debug)]
pub enum Attempt<T, E> {
    /// Finished; stop retrying.
    Done(T),
    /// Failed in a way another attempt may fix.
    Retry(E),
    /// Failed in a way no further attempt can fix.
    Abort(E),
}

/// Delay applied between attempts (never after the last one).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    None,
    Fixed(Duration),
    /// `base * 2^n`, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed(d) => d,
            Backoff::Exponential { base, max } => {
                let factor = 2u32.saturating_pow(attempt.min(16));
                base.saturating_mul(factor).min(max)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::new(max_attempts, Backoff::Fixed(delay))
    }

    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Backoff::None)
    }
}

/// Why a retried operation gave up.
#[derive(Debug, PartialEq)]
pub enum RetryError<E> {
    /// Every attempt asked for a retry.
    Exhausted { attempts: u32, last: E },
    /// An attempt reported an unrecoverable failure.
    Aborted { attempt: u32, error: E },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } => *attempts,
            RetryError::Aborted { attempt, .. } => *attempt,
        }
    }

    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Aborted { error, .. } => error,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }
}

/// Run `op` until it returns [`Attempt::Done`] or [`Attempt::Abort`], or
/// the attempt budget runs out. `op` receives the zero-based attempt index.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T, E>>,
{
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Attempt::Done(value) => return Ok(value),
            Attempt::Abort(error) => {
                return Err(RetryError::Aborted {
                    attempt: attempt + 1,
                    error,
                })
            }
            Attempt::Retry(error) => {
                attempt += 1;
                if !pause_before_next(policy, attempt).await {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: error,
                    });
                }
            }
        }
    }
}

/// Like [`retry`], but threads a mutable state through every attempt, for
/// operations that need `&mut` access to something owned by the caller.
pub async fn retry_with<S, T, E, F>(
    policy: &RetryPolicy,
    state: &mut S,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    S: ?Sized,
    F: for<'s> FnMut(&'s mut S, u32) -> BoxFuture<'s, Attempt<T, E>>,
{
    let mut attempt = 0;
    loop {
        match op(&mut *state, attempt).await {
            Attempt::Done(value) => return Ok(value),
            Attempt::Abort(error) => {
                return Err(RetryError::Aborted {
                    attempt: attempt + 1,
                    error,
                })
            }
            Attempt::Retry(error) => {
                attempt += 1;
                if !pause_before_next(policy, attempt).await {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: error,
                    });
                }
            }
        }
    }
}

/// Sleep out the backoff after `failed` attempts. False once the budget is spent.
async fn pause_before_next(policy: &RetryPolicy, failed: u32) -> bool {
    let max = policy.max_attempts.max(1);
    if failed >= max {
        return false;
    }
    let delay = policy.backoff.delay(failed - 1);
    debug!("Attempt {}/{} failed, retrying in {:?}", failed, max, delay);
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    true
}

/// [`retry`] for operations returning `Result`, with `is_retryable`
/// deciding which errors earn another attempt.
pub async fn retry_result<T, E, F, Fut, C>(
    policy: &RetryPolicy,
    is_retryable: C,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> bool,
{
    let is_retryable = &is_retryable;
    retry(policy, move |attempt| {
        let fut = op(attempt);
        async move {
            match fut.await {
                Ok(value) => Attempt::Done(value),
                Err(e) if is_retryable(&e) => Attempt::Retry(e),
                Err(e) => Attempt::Abort(e),
            }
        }
    })
    .await
}
