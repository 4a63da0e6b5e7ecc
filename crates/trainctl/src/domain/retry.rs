//! Bounded retry for optimistic operations.
//!
//! Each attempt decides for itself whether a failure is a lost race worth
//! another try ([`Attempt::Retry`]) or a hard failure ([`Attempt::Abort`]).
//! There is no sleep between attempts: the retried operations are optimistic
//! creates whose next attempt already works from fresh state.

use core::error::Error;
use std::future::Future;

use error_stack::Report;
use tracing::debug;

/// Outcome of a single attempt.
#[derive(Debug)]
pub enum Attempt<T, E> {
    Done(T),
    /// Lost a race; the reason is only logged
    Retry(String),
    Abort(E),
}

#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum RetryError {
    #[display("Gave up after {attempts} attempts: {last_reason}")]
    Exhausted { attempts: u32, last_reason: String },
}

impl Error for RetryError {}

/// Run `attempt` until it is done, aborts, or `max_attempts` is spent.
///
/// The closure receives the 1-based attempt number. Aborts are returned as
/// `Ok(Err(e))` so callers keep their own error type intact, and exhaustion
/// is reported as a typed [`RetryError`].
pub async fn retry_bounded<T, E, F, Fut>(
    max_attempts: u32,
    operation: &str,
    mut attempt: F,
) -> Result<Result<T, E>, Report<RetryError>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T, E>>,
{
    let mut last_reason = String::from("no attempt made");
    for number in 1..=max_attempts {
        match attempt(number).await {
            Attempt::Done(value) => return Ok(Ok(value)),
            Attempt::Abort(error) => return Ok(Err(error)),
            Attempt::Retry(reason) => {
                debug!(
                    operation,
                    attempt = number,
                    reason = %reason,
                    "Attempt lost a race, retrying"
                );
                last_reason = reason;
            }
        }
    }
    Err(Report::new(RetryError::Exhausted {
        attempts: max_attempts,
        last_reason,
    }))
}
