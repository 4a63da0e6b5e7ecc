//! Cancellable polling against an absolute deadline.

use core::error::Error;
use std::future::Future;
use std::time::Duration;

use error_stack::Context;
use error_stack::Report;
use error_stack::ResultExt;
use tokio::select;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    /// Measured from the first poll
    pub timeout: Duration,
}

impl PollConfig {
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(2), Duration::from_secs(300))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum PollError {
    #[display("Timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },
    #[display("Cancelled")]
    Cancelled,
    #[display("Condition check failed")]
    Aborted,
}

impl Error for PollError {}

/// Poll `predicate` every `config.interval` until it yields a value.
///
/// The predicate returns `Ok(Some(v))` when done, `Ok(None)` to keep
/// waiting, or an error which aborts the poll. The predicate is always
/// evaluated at least once, and once more right at the deadline, so a
/// condition that becomes true during the last interval is not missed.
#[tracing::instrument(
    skip(config, cancellation_token, predicate),
    fields(timeout = ?config.timeout)
)]
pub async fn poll_until<T, E, F, Fut>(
    what: &str,
    config: PollConfig,
    cancellation_token: &CancellationToken,
    mut predicate: F,
) -> Result<T, Report<PollError>>
where
    E: Context,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, Report<E>>>,
{
    let started = Instant::now();
    let deadline = started + config.timeout;

    loop {
        if cancellation_token.is_cancelled() {
            return Err(Report::new(PollError::Cancelled));
        }

        if let Some(value) = predicate().await.change_context(PollError::Aborted)? {
            return Ok(value);
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(Report::new(PollError::Timeout {
                elapsed: now - started,
            })
            .attach_printable(format!("while waiting for {what}")));
        }

        debug!(what, elapsed = ?(now - started), "Condition not met yet");
        let wake = (now + config.interval).min(deadline);
        select! {
            _ = cancellation_token.cancelled() => {
                return Err(Report::new(PollError::Cancelled));
            }
            _ = tokio::time::sleep_until(wake) => {}
        }
    }
}
